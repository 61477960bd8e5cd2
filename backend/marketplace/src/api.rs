//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::codes::{ErrorCode, ProjectEvent, ProjectState};
use crate::dapp::Dapp;
use crate::errors::{MarketError, Result};
use crate::models::{Bid, EventRequest, Project, ProjectArgs, User};

#[derive(Clone)]
pub struct ApiState {
    pub dapp: Dapp,
}

/// Routes of the dapp API.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/login", post(login))
        .route("/users", get(list_users))
        .route("/users/:username/balance", get(get_balance))
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/:name", get(get_project))
        .route("/projects/:name/bids", get(get_bids).post(create_bid))
        .route("/projects/:name/events", patch(handle_event))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectFilter {
    pub buyer: Option<String>,
    pub state: Option<ProjectState>,
    pub supplier: Option<String>,
}

#[derive(Deserialize)]
pub struct BidRequest {
    pub supplier: String,
    pub amount: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    pub project_event: ProjectEvent,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub bid_id: Option<u64>,
}

#[derive(Serialize)]
pub struct ProjectsResponse {
    pub count: usize,
    pub projects: Vec<Project>,
}

#[derive(Serialize)]
pub struct BidsResponse {
    pub project: String,
    pub count: usize,
    pub bids: Vec<Bid>,
}

#[derive(Serialize)]
pub struct UsersResponse {
    pub count: usize,
    pub users: Vec<User>,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub username: String,
    /// Decimal ether.
    pub balance: String,
    pub wei: String,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub project: String,
    pub state: ProjectState,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Address of the AdminInterface being served.
    pub contract: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl IntoResponse for MarketError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().map(|c| c.as_str()),
        };
        (status, Json(body)).into_response()
    }
}

fn status_for(err: &MarketError) -> StatusCode {
    match err {
        MarketError::Contract(ErrorCode::NotFound) => StatusCode::NOT_FOUND,
        MarketError::Contract(ErrorCode::Exists) => StatusCode::CONFLICT,
        MarketError::Contract(_) | MarketError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        MarketError::QueryTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        MarketError::Platform { .. } | MarketError::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        contract: state.dapp.contract().address.clone(),
    })
}

/// `POST /login`
pub async fn login(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let result = state.dapp.login(&req.username, &req.password).await?;
    let status = if result.authenticate {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    Ok((status, Json(result)))
}

/// `GET /users`
pub async fn list_users(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    let users = state.dapp.get_users().await?;
    Ok(Json(UsersResponse {
        count: users.len(),
        users,
    }))
}

/// `GET /users/:username/balance`
pub async fn get_balance(
    State(state): State<Arc<ApiState>>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse> {
    let wei = state.dapp.get_balance(&username).await?;
    Ok(Json(BalanceResponse {
        username,
        balance: wei.to_ether(),
        wei: wei.to_string(),
    }))
}

/// `GET /projects?buyer=…` | `?state=…` | `?supplier=…`
pub async fn list_projects(
    State(state): State<Arc<ApiState>>,
    Query(filter): Query<ProjectFilter>,
) -> Result<impl IntoResponse> {
    let projects = match filter {
        ProjectFilter {
            buyer: Some(buyer),
            state: None,
            supplier: None,
        } => state.dapp.get_projects_by_buyer(&buyer).await?,
        ProjectFilter {
            buyer: None,
            state: Some(project_state),
            supplier: None,
        } => state.dapp.get_projects_by_state(project_state).await?,
        ProjectFilter {
            buyer: None,
            state: None,
            supplier: Some(supplier),
        } => state.dapp.get_projects_by_supplier(&supplier).await?,
        _ => {
            return Err(MarketError::InvalidArgument(
                "exactly one of buyer, state or supplier is required".to_string(),
            ))
        }
    };
    Ok(Json(ProjectsResponse {
        count: projects.len(),
        projects,
    }))
}

/// `POST /projects`
pub async fn create_project(
    State(state): State<Arc<ApiState>>,
    Json(args): Json<ProjectArgs>,
) -> Result<impl IntoResponse> {
    let project = state.dapp.create_project(args).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// `GET /projects/:name`
pub async fn get_project(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.dapp.get_project(&name).await?))
}

/// `GET /projects/:name/bids`
pub async fn get_bids(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    let bids = state.dapp.get_bids(&name).await?;
    Ok(Json(BidsResponse {
        project: name,
        count: bids.len(),
        bids,
    }))
}

/// `POST /projects/:name/bids`
pub async fn create_bid(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
    Json(req): Json<BidRequest>,
) -> Result<impl IntoResponse> {
    let bid = state
        .dapp
        .create_bid(&name, &req.supplier, req.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(bid)))
}

/// `PATCH /projects/:name/events`
pub async fn handle_event(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
    Json(body): Json<EventBody>,
) -> Result<impl IntoResponse> {
    let request = EventRequest {
        project_name: name,
        project_event: body.project_event,
        username: body.username,
        password: body.password,
        bid_id: body.bid_id,
    };
    let new_state = state.dapp.handle_event(&request).await?;
    Ok(Json(EventResponse {
        project: request.project_name,
        state: new_state,
    }))
}
