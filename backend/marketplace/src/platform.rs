//! The boundary to the blockchain platform.
//!
//! Everything the facades need from the outside world goes through
//! [`Platform`]. [`crate::rest::RestClient`] talks to a real node; tests use
//! an in-memory fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::Result;
use crate::models::Wei;
use crate::query::Query;

/// Identity used to sign a call: platform username, password and the chain
/// account the call is sent from.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    pub address: String,
}

impl Credential {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            address: address.into(),
        }
    }
}

// Keeps passwords out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// A deployed contract: its Solidity name and address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRef {
    pub name: String,
    pub address: String,
}

impl ContractRef {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Result of uploading a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedContract {
    pub contract: ContractRef,
    pub code_hash: String,
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Invoke `method` on `contract` as `caller`, transferring `value`.
    ///
    /// Returns the method's outputs in order. For state-changing marketplace
    /// methods element 0 is the status code.
    async fn call_method(
        &self,
        caller: &Credential,
        contract: &ContractRef,
        method: &str,
        args: Value,
        value: Wei,
    ) -> Result<Vec<Value>>;

    /// Run a filter against the search index.
    async fn query(&self, query: &Query) -> Result<Vec<Value>>;

    /// Decoded storage of a contract.
    async fn get_state(&self, contract: &ContractRef) -> Result<Map<String, Value>>;

    /// First chain account owned by a platform user.
    async fn get_key(&self, username: &str) -> Result<String>;

    /// Create a platform user with a fresh funded account; returns the account.
    async fn create_user(&self, username: &str, password: &str) -> Result<String>;

    async fn get_balance(&self, address: &str) -> Result<Wei>;

    async fn upload_contract(
        &self,
        admin: &Credential,
        name: &str,
        source: &str,
        args: Value,
    ) -> Result<UploadedContract>;

    /// Register `searchable` contract names of `source` with the index.
    async fn compile_search(
        &self,
        searchable: &[&str],
        contract_name: &str,
        source: &str,
    ) -> Result<()>;
}

/// Whether an address returned by a contract is the zero address, which the
/// contracts use for "no such record".
pub fn is_zero_address(address: &str) -> bool {
    let trimmed = address.trim().trim_start_matches("0x");
    trimmed.is_empty() || trimmed.chars().all(|c| c == '0')
}

/// Read an address out of a call result element.
pub fn address_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
