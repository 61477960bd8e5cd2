//! Facade over the `AdminInterface` contract — the dapp's entry point.
//!
//! The admin interface owns one `UserManager` and one `ProjectManager`.
//! [`Dapp::attach`] resolves their addresses from its state and composes the
//! business operations (login, projects, bids, project events, deployment)
//! out of the two manager facades.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use crate::codes::{ErrorCode, ProjectEvent, ProjectState};
use crate::deploy::{self, Deployment, DeploymentEntry, PresetUser};
use crate::errors::{MarketError, Result};
use crate::models::{Bid, EventRequest, LoginResult, Project, ProjectArgs, User, Wei};
use crate::platform::{address_of, is_zero_address, ContractRef, Credential, Platform};
use crate::poll::PollPolicy;
use crate::project_manager::{self, ProjectManager};
use crate::user_manager::{self, UserManager};

pub const CONTRACT_NAME: &str = "AdminInterface";
/// Location of the admin interface source under the contracts directory.
pub const CONTRACT_FILENAME: &str = "admin/AdminInterface.sol";

/// Record types the index must track for the dapp to work.
const SEARCHABLE: [&str; 6] = [
    project_manager::BID_CONTRACT_NAME,
    project_manager::PROJECT_CONTRACT_NAME,
    user_manager::USER_CONTRACT_NAME,
    user_manager::CONTRACT_NAME,
    project_manager::CONTRACT_NAME,
    CONTRACT_NAME,
];

#[derive(Clone)]
pub struct Dapp {
    admin: Credential,
    contract: ContractRef,
    users: UserManager,
    projects: ProjectManager,
}

impl Dapp {
    /// Upload a fresh admin interface, make its records searchable and attach
    /// to it.
    pub async fn upload(
        platform: Arc<dyn Platform>,
        admin: Credential,
        source: &str,
        poll: PollPolicy,
    ) -> Result<Self> {
        info!("Uploading {CONTRACT_NAME}");
        let uploaded = platform
            .upload_contract(&admin, CONTRACT_NAME, source, json!({}))
            .await?;
        info!(
            "{CONTRACT_NAME} deployed at {} (code hash {})",
            uploaded.contract.address, uploaded.code_hash
        );

        platform
            .compile_search(&SEARCHABLE, CONTRACT_NAME, source)
            .await?;

        Self::attach(platform, admin, uploaded.contract, poll).await
    }

    /// Bind to an existing admin interface.
    pub async fn attach(
        platform: Arc<dyn Platform>,
        admin: Credential,
        contract: ContractRef,
        poll: PollPolicy,
    ) -> Result<Self> {
        debug!(?contract, "setContract");
        let state = platform.get_state(&contract).await?;

        let sub_contract = |slot: &str, name: &str| -> Result<ContractRef> {
            state
                .get(slot)
                .and_then(address_of)
                .filter(|address| !is_zero_address(address))
                .map(|address| ContractRef::new(name, address))
                .ok_or_else(|| MarketError::SubContractNotFound(slot.to_string()))
        };
        let user_manager = sub_contract("userManager", user_manager::CONTRACT_NAME)?;
        let project_manager = sub_contract("projectManager", project_manager::CONTRACT_NAME)?;

        info!(
            "Attached to {} — userManager={} projectManager={}",
            contract.address, user_manager.address, project_manager.address
        );

        Ok(Self {
            users: UserManager::new(platform.clone(), admin.clone(), user_manager, poll),
            projects: ProjectManager::new(platform, admin.clone(), project_manager, poll),
            admin,
            contract,
        })
    }

    pub fn contract(&self) -> &ContractRef {
        &self.contract
    }

    #[cfg(test)]
    pub fn users(&self) -> &UserManager {
        &self.users
    }

    #[cfg(test)]
    pub fn projects(&self) -> &ProjectManager {
        &self.projects
    }

    // ─────────────────────────────────────────────────────
    // Business operations
    // ─────────────────────────────────────────────────────

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResult> {
        debug!(username, "dapp: login");
        if !self.users.login(username, password).await? {
            return Ok(LoginResult {
                authenticate: false,
                user: None,
            });
        }
        let user = self.users.get_user(username).await?;
        Ok(LoginResult {
            authenticate: true,
            user: Some(user),
        })
    }

    pub async fn get_balance(&self, username: &str) -> Result<Wei> {
        debug!(username, "dapp: getBalance");
        self.users.get_balance(username).await
    }

    pub async fn get_users(&self) -> Result<Vec<User>> {
        debug!("dapp: getUsers");
        self.users.get_users().await
    }

    /// Create a project, stamping it with the current time. A taken name is
    /// rejected before any transaction is sent.
    pub async fn create_project(&self, mut args: ProjectArgs) -> Result<Project> {
        debug!(name = %args.name, "dapp: createProject");
        if self.projects.exists(&args.name).await? {
            return Err(MarketError::Contract(ErrorCode::Exists));
        }
        args.created = now_millis();
        self.projects.create_project(&args).await
    }

    pub async fn get_project(&self, name: &str) -> Result<Project> {
        debug!(name, "dapp: getProject");
        self.projects.get_project(name).await
    }

    pub async fn get_projects_by_buyer(&self, buyer: &str) -> Result<Vec<Project>> {
        debug!(buyer, "dapp: getProjectsByBuyer");
        self.projects.get_projects_by_buyer(buyer).await
    }

    pub async fn get_projects_by_state(&self, state: ProjectState) -> Result<Vec<Project>> {
        debug!(?state, "dapp: getProjectsByState");
        self.projects.get_projects_by_state(state).await
    }

    pub async fn get_projects_by_supplier(&self, supplier: &str) -> Result<Vec<Project>> {
        debug!(supplier, "dapp: getProjectsBySupplier");
        self.projects.get_projects_by_supplier(supplier).await
    }

    /// Place a bid for `supplier`, escrowed to the supplier's account.
    pub async fn create_bid(&self, name: &str, supplier: &str, amount: u64) -> Result<Bid> {
        debug!(name, supplier, amount, "dapp: createBid");
        let user = self.users.get_user(supplier).await?;
        self.projects
            .create_bid(name, supplier, &user.account, amount)
            .await
    }

    pub async fn get_bids(&self, name: &str) -> Result<Vec<Bid>> {
        debug!(name, "dapp: getBids");
        self.projects.get_bids_by_name(name).await
    }

    /// Route a project event. ACCEPT and RECEIVE involve funds and need more
    /// than a state transition; every other event goes straight to the
    /// contract.
    pub async fn handle_event(&self, request: &EventRequest) -> Result<ProjectState> {
        debug!(
            name = %request.project_name,
            event = ?request.project_event,
            "dapp: project handleEvent"
        );
        match request.project_event {
            ProjectEvent::Receive => self.receive_project(&request.project_name).await,
            ProjectEvent::Accept => {
                let (Some(username), Some(password), Some(bid_id)) =
                    (&request.username, &request.password, request.bid_id)
                else {
                    return Err(MarketError::InvalidArgument(
                        "ACCEPT needs username, password and bidId".to_string(),
                    ));
                };
                self.accept_bid(username, password, bid_id, &request.project_name)
                    .await
            }
            event => {
                self.projects
                    .handle_event(&request.project_name, event)
                    .await
            }
        }
    }

    async fn accept_bid(
        &self,
        buyer_name: &str,
        buyer_password: &str,
        bid_id: u64,
        project_name: &str,
    ) -> Result<ProjectState> {
        debug!(buyer_name, bid_id, project_name, "dapp: acceptBid");
        let buyer = self.users.get_user(buyer_name).await?;
        let credential = Credential::new(buyer.username, buyer_password, buyer.account);
        self.projects
            .accept_bid(&credential, bid_id, project_name)
            .await
    }

    /// Settle a delivered project: pay the accepted bid's escrow to its
    /// supplier.
    async fn receive_project(&self, project_name: &str) -> Result<ProjectState> {
        debug!(project_name, "dapp: receiveProject");
        let bid = self.projects.get_accepted_bid(project_name).await?;
        let supplier = self.users.get_user(&bid.supplier).await?;
        self.projects
            .settle_project(project_name, &supplier.account, &bid.address)
            .await?;
        info!(project_name, supplier = %supplier.username, "project settled");
        Ok(ProjectState::Received)
    }

    // ─────────────────────────────────────────────────────
    // Deployment
    // ─────────────────────────────────────────────────────

    /// Register the preset users. Users already known to the contract are
    /// looked up instead of re-created.
    pub async fn create_preset_users(&self, presets: &[PresetUser]) -> Result<Vec<User>> {
        let mut users = Vec::with_capacity(presets.len());
        for preset in presets {
            let user = if self.users.exists(&preset.username).await? {
                info!(username = %preset.username, "preset user already registered");
                self.users.get_user(&preset.username).await?
            } else {
                self.users
                    .create_user(&preset.username, &preset.password, preset.role)
                    .await?
            };
            users.push(user);
        }
        Ok(users)
    }

    /// Create the preset users and append this deployment to `deploy_file`.
    pub async fn deploy(
        &self,
        preset_file: &Path,
        deploy_file: &Path,
        bloc_url: &str,
        chain_id: Option<&str>,
    ) -> Result<Deployment> {
        debug!(preset = %preset_file.display(), deploy = %deploy_file.display(), "dapp: deploy");

        let preset = deploy::load_preset(preset_file).await?;
        let users = self.create_preset_users(&preset.users).await?;
        info!("Created {} preset user(s)", users.len());

        let mut deployment = Deployment::new();
        deployment.insert(
            deploy::chain_key(chain_id),
            DeploymentEntry {
                url: bloc_url.to_string(),
                admin: self.admin.clone(),
                contract: self.contract.clone(),
            },
        );
        deploy::append_deployment(deploy_file, &deployment).await?;
        Ok(deployment)
    }
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
