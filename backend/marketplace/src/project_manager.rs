//! Facade over the `ProjectManager` contract and the per-bid `Bid` contracts.
//!
//! Every state-changing operation has the same shape: build the call
//! arguments, invoke the contract, decode the leading status code, fail with
//! [`MarketError::Contract`] unless it is SUCCESS, and for creations poll the
//! search index until the new record is visible.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use crate::codes::{as_u64, ensure_success, BidState, ContractEnum, ErrorCode, ProjectEvent, ProjectState};
use crate::errors::{MarketError, Result};
use crate::models::{Bid, Project, ProjectArgs, Wei};
use crate::platform::{address_of, is_zero_address, ContractRef, Credential, Platform};
use crate::poll::{decode_rows, wait_one, PollPolicy};
use crate::query::{chunked_in_queries, Query};
use crate::user_manager::registered_addresses;

pub const CONTRACT_NAME: &str = "ProjectManager";
pub const PROJECT_CONTRACT_NAME: &str = "Project";
pub const BID_CONTRACT_NAME: &str = "Bid";

#[derive(Clone)]
pub struct ProjectManager {
    platform: Arc<dyn Platform>,
    admin: Credential,
    contract: ContractRef,
    poll: PollPolicy,
}

impl ProjectManager {
    pub fn new(
        platform: Arc<dyn Platform>,
        admin: Credential,
        contract: ContractRef,
        poll: PollPolicy,
    ) -> Self {
        Self {
            platform,
            admin,
            contract,
            poll,
        }
    }

    #[cfg(test)]
    pub fn contract(&self) -> &ContractRef {
        &self.contract
    }

    // ─────────────────────────────────────────────────────
    // Projects
    // ─────────────────────────────────────────────────────

    pub async fn create_project(&self, args: &ProjectArgs) -> Result<Project> {
        debug!(name = %args.name, buyer = %args.buyer, "createProject");

        let result = self
            .platform
            .call_method(
                &self.admin,
                &self.contract,
                "createProject",
                serde_json::to_value(args)?,
                Wei::ZERO,
            )
            .await?;
        ensure_success(&result)?;

        self.get_project(&args.name).await
    }

    pub async fn get_project(&self, name: &str) -> Result<Project> {
        debug!(name, "getProject");

        let result = self
            .platform
            .call_method(
                &self.admin,
                &self.contract,
                "getProject",
                json!({ "name": name }),
                Wei::ZERO,
            )
            .await?;
        let address = result
            .first()
            .and_then(address_of)
            .ok_or_else(|| MarketError::Decode(format!("getProject returned {result:?}")))?;
        if is_zero_address(&address) {
            return Err(MarketError::Contract(ErrorCode::NotFound));
        }

        wait_one(
            self.platform.as_ref(),
            &Query::table(PROJECT_CONTRACT_NAME).eq("address", address),
            self.poll,
        )
        .await
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        debug!(name, "exists");
        let result = self
            .platform
            .call_method(
                &self.admin,
                &self.contract,
                "exists",
                json!({ "name": name }),
                Wei::ZERO,
            )
            .await?;
        Ok(result.first() == Some(&json!(true)))
    }

    /// Every project the contract knows about.
    pub async fn get_projects(&self) -> Result<Vec<Project>> {
        debug!("getProjects");
        let addresses =
            registered_addresses(self.platform.as_ref(), &self.contract, "projects").await?;
        self.query_chunked("address", &addresses).await
    }

    pub async fn get_projects_by_buyer(&self, buyer: &str) -> Result<Vec<Project>> {
        debug!(buyer, "getProjectsByBuyer");
        let mut projects = self.get_projects().await?;
        projects.retain(|p| p.buyer == buyer);
        Ok(projects)
    }

    pub async fn get_projects_by_state(&self, state: ProjectState) -> Result<Vec<Project>> {
        debug!(?state, "getProjectsByState");
        let mut projects = self.get_projects().await?;
        projects.retain(|p| p.state == state);
        Ok(projects)
    }

    /// Projects the supplier has bid on.
    pub async fn get_projects_by_supplier(&self, supplier: &str) -> Result<Vec<Project>> {
        debug!(supplier, "getProjectsBySupplier");
        let bids = self.get_bids_by_supplier(supplier).await?;
        let mut seen = HashSet::new();
        let names: Vec<String> = bids
            .into_iter()
            .map(|b| b.name)
            .filter(|name| seen.insert(name.clone()))
            .collect();
        self.get_projects_by_name(&names).await
    }

    pub async fn get_projects_by_name(&self, names: &[String]) -> Result<Vec<Project>> {
        debug!(count = names.len(), "getProjectsByName");
        self.query_chunked("name", names).await
    }

    async fn query_chunked(&self, field: &str, values: &[String]) -> Result<Vec<Project>> {
        let mut projects = Vec::new();
        for query in chunked_in_queries(PROJECT_CONTRACT_NAME, field, values) {
            projects.extend(decode_rows::<Project>(self.platform.query(&query).await?)?);
        }
        Ok(projects)
    }

    /// Apply `event` to the named project; returns the project's new state.
    pub async fn handle_event(&self, name: &str, event: ProjectEvent) -> Result<ProjectState> {
        debug!(name, ?event, "handleEvent");

        let project = self.get_project(name).await?;
        let result = self
            .platform
            .call_method(
                &self.admin,
                &self.contract,
                "handleEvent",
                json!({
                    "projectAddress": project.address,
                    "projectEvent": event.code(),
                }),
                Wei::ZERO,
            )
            .await?;
        ensure_success(&result)?;

        let code = result
            .get(1)
            .and_then(as_u64)
            .ok_or_else(|| MarketError::Decode(format!("handleEvent returned {result:?}")))?;
        let state = ProjectState::from_code(code)
            .ok_or_else(|| MarketError::Decode(format!("unknown project state {code}")))?;
        info!(name, ?event, ?state, "project event applied");
        Ok(state)
    }

    /// Mark the project received and release the winning bid's escrow to the
    /// supplier.
    pub async fn settle_project(
        &self,
        name: &str,
        supplier_address: &str,
        bid_address: &str,
    ) -> Result<()> {
        debug!(name, supplier_address, bid_address, "settleProject");

        let result = self
            .platform
            .call_method(
                &self.admin,
                &self.contract,
                "settleProject",
                json!({
                    "name": name,
                    "supplierAddress": supplier_address,
                    "bidAddress": bid_address,
                }),
                Wei::ZERO,
            )
            .await?;
        ensure_success(&result)
    }

    // ─────────────────────────────────────────────────────
    // Bids
    // ─────────────────────────────────────────────────────

    pub async fn create_bid(
        &self,
        name: &str,
        supplier: &str,
        supplier_address: &str,
        amount: u64,
    ) -> Result<Bid> {
        debug!(name, supplier, amount, "createBid");

        let result = self
            .platform
            .call_method(
                &self.admin,
                &self.contract,
                "createBid",
                json!({
                    "name": name,
                    "supplier": supplier,
                    "supplierAddressTemp": supplier_address,
                    "amount": amount,
                }),
                Wei::ZERO,
            )
            .await?;
        ensure_success(&result)?;

        let bid_id = result
            .get(1)
            .and_then(as_u64)
            .ok_or_else(|| MarketError::Decode(format!("createBid returned {result:?}")))?;
        self.get_bid(bid_id).await
    }

    /// Accept `bid_id` on behalf of `buyer` and reject every other bid on the
    /// project.
    ///
    /// Accepting transfers the bid amount from the buyer into the bid's
    /// escrow. The platform rejects an under-funded transfer with HTTP 400,
    /// which surfaces here as `INSUFFICIENT_BALANCE`.
    pub async fn accept_bid(&self, buyer: &Credential, bid_id: u64, name: &str) -> Result<ProjectState> {
        debug!(buyer = %buyer.username, bid_id, name, "acceptBid");

        let bids = self.get_bids_by_name(name).await?;
        let winning = bids
            .iter()
            .find(|b| b.id == bid_id)
            .ok_or(MarketError::Contract(ErrorCode::NotFound))?;

        self.set_bid_state(buyer, &winning.address, BidState::Accepted, winning.amount)
            .await
            .map_err(|e| match e {
                MarketError::Platform { status: 400, .. } => {
                    MarketError::Contract(ErrorCode::InsufficientBalance)
                }
                other => other,
            })?;

        for bid in bids.iter().filter(|b| b.id != bid_id) {
            self.set_bid_state(buyer, &bid.address, BidState::Rejected, 0)
                .await?;
        }

        self.handle_event(name, ProjectEvent::Accept).await
    }

    /// Move a bid to `state`, sending `value_ether` along with the call.
    pub async fn set_bid_state(
        &self,
        caller: &Credential,
        bid_address: &str,
        state: BidState,
        value_ether: u64,
    ) -> Result<()> {
        debug!(caller = %caller.username, bid_address, ?state, value_ether, "setBidState");

        let result = self
            .platform
            .call_method(
                caller,
                &ContractRef::new(BID_CONTRACT_NAME, bid_address),
                "setBidState",
                json!({ "newState": state.code() }),
                Wei::from_ether(value_ether),
            )
            .await?;
        ensure_success(&result)
    }

    pub async fn get_bid(&self, bid_id: u64) -> Result<Bid> {
        debug!(bid_id, "getBid");
        wait_one(
            self.platform.as_ref(),
            &Query::table(BID_CONTRACT_NAME).eq("id", bid_id),
            self.poll,
        )
        .await
    }

    pub async fn get_bids_by_name(&self, name: &str) -> Result<Vec<Bid>> {
        debug!(name, "getBidsByName");
        let rows = self
            .platform
            .query(&Query::table(BID_CONTRACT_NAME).eq("name", name))
            .await?;
        decode_rows(rows)
    }

    pub async fn get_bids_by_supplier(&self, supplier: &str) -> Result<Vec<Bid>> {
        debug!(supplier, "getBidsBySupplier");
        let rows = self
            .platform
            .query(&Query::table(BID_CONTRACT_NAME).eq("supplier", supplier))
            .await?;
        decode_rows(rows)
    }

    /// The single accepted bid of a project. None is `NOT_FOUND`; more than
    /// one is `ERROR`.
    pub async fn get_accepted_bid(&self, name: &str) -> Result<Bid> {
        debug!(name, "getAcceptedBid");
        let mut accepted: Vec<Bid> = self
            .get_bids_by_name(name)
            .await?
            .into_iter()
            .filter(|b| b.state == BidState::Accepted)
            .collect();
        match accepted.len() {
            0 => Err(MarketError::Contract(ErrorCode::NotFound)),
            1 => Ok(accepted.remove(0)),
            _ => Err(MarketError::Contract(ErrorCode::Error)),
        }
    }
}
