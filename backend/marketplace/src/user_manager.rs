//! Facade over the `UserManager` contract.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::codes::{ensure_success, ContractEnum, ErrorCode, UserRole};
use crate::errors::{MarketError, Result};
use crate::models::{User, Wei};
use crate::platform::{address_of, is_zero_address, ContractRef, Credential, Platform};
use crate::poll::{decode_rows, wait_one, PollPolicy};
use crate::query::{chunked_in_queries, Query};

pub const CONTRACT_NAME: &str = "UserManager";
pub const USER_CONTRACT_NAME: &str = "User";

#[derive(Clone)]
pub struct UserManager {
    platform: Arc<dyn Platform>,
    admin: Credential,
    contract: ContractRef,
    poll: PollPolicy,
}

impl UserManager {
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

    /// Create a platform account for `username`, register it with the
    /// contract and wait for the user record to be indexed.
    pub async fn create_user(&self, username: &str, password: &str, role: UserRole) -> Result<User> {
        debug!(username, ?role, "createUser");

        let account = self.platform.create_user(username, password).await?;
        let result = self
            .platform
            .call_method(
                &self.admin,
                &self.contract,
                "createUser",
                json!({
                    "account": account,
                    "username": username,
                    "pwHash": password_hash(password),
                    "role": role.code(),
                }),
                Wei::ZERO,
            )
            .await?;
        ensure_success(&result)?;

        wait_one(
            self.platform.as_ref(),
            &Query::table(USER_CONTRACT_NAME).eq("username", username),
            self.poll,
        )
        .await
    }

    pub async fn exists(&self, username: &str) -> Result<bool> {
        debug!(username, "exists");
        let result = self
            .platform
            .call_method(
                &self.admin,
                &self.contract,
                "exists",
                json!({ "username": username }),
                Wei::ZERO,
            )
            .await?;
        Ok(result.first() == Some(&json!(true)))
    }

    /// Resolve a user record; a zero address from the contract means the
    /// user does not exist.
    pub async fn get_user(&self, username: &str) -> Result<User> {
        debug!(username, "getUser");
        let result = self
            .platform
            .call_method(
                &self.admin,
                &self.contract,
                "getUser",
                json!({ "username": username }),
                Wei::ZERO,
            )
            .await?;
        let address = result
            .first()
            .and_then(address_of)
            .ok_or_else(|| MarketError::Decode(format!("getUser returned {result:?}")))?;
        if is_zero_address(&address) {
            return Err(MarketError::Contract(ErrorCode::NotFound));
        }

        wait_one(
            self.platform.as_ref(),
            &Query::table(USER_CONTRACT_NAME).eq("address", address),
            self.poll,
        )
        .await
    }

    /// All users registered with the contract.
    pub async fn get_users(&self) -> Result<Vec<User>> {
        debug!("getUsers");
        let addresses = registered_addresses(self.platform.as_ref(), &self.contract, "users").await?;
        let mut users = Vec::new();
        for query in chunked_in_queries(USER_CONTRACT_NAME, "address", &addresses) {
            users.extend(decode_rows::<User>(self.platform.query(&query).await?)?);
        }
        Ok(users)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<bool> {
        debug!(username, "login");
        let result = self
            .platform
            .call_method(
                &self.admin,
                &self.contract,
                "login",
                json!({ "username": username, "pwHash": password_hash(password) }),
                Wei::ZERO,
            )
            .await?;
        Ok(result.first() == Some(&json!(true)))
    }

    pub async fn get_balance(&self, username: &str) -> Result<Wei> {
        debug!(username, "getBalance");
        let user = self.get_user(username).await?;
        self.platform.get_balance(&user.account).await
    }
}

/// Addresses listed in an array slot of a manager contract's state, minus
/// the zero sentinel the contracts keep in slot 0.
pub async fn registered_addresses(
    platform: &dyn Platform,
    contract: &ContractRef,
    slot: &str,
) -> Result<Vec<String>> {
    let state = platform.get_state(contract).await?;
    let list = state
        .get(slot)
        .and_then(|v| v.as_array())
        .ok_or_else(|| MarketError::Decode(format!("{} state has no {slot} list", contract.name)))?;
    Ok(list.iter().skip(1).filter_map(address_of).collect())
}

/// The contracts store passwords as `bytes32`: the UTF-8 bytes, zero padded
/// (or truncated) to 32 bytes, hex encoded.
pub fn password_hash(password: &str) -> String {
    let mut bytes = [0u8; 32];
    let raw = password.as_bytes();
    let len = raw.len().min(32);
    bytes[..len].copy_from_slice(&raw[..len]);
    hex::encode(bytes)
}
