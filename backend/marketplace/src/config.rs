//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{MarketError, Result};
use crate::poll::PollPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    /// Contract API endpoint (e.g. http://localhost/bloc/v2.2)
    pub bloc_url: String,
    /// Account/chain API endpoint
    pub strato_url: String,
    /// Search index endpoint
    pub search_url: String,
    pub admin_username: String,
    pub admin_password: String,
    /// Admin chain account; looked up from the platform when unset
    pub admin_address: Option<String>,
    /// Address of the deployed AdminInterface contract
    pub contract_address: Option<String>,
    /// Private chain to target, if any
    pub chain_id: Option<String>,
    /// Port for the REST API server
    pub api_port: u16,
    /// Delay between two index polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Index polls before giving up on a record
    pub poll_max_attempts: u32,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
    /// Directory holding the Solidity sources
    pub contracts_dir: PathBuf,
    pub preset_data_file: PathBuf,
    pub deploy_file: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            bloc_url: env_var("BLOC_URL")
                .unwrap_or_else(|_| "http://localhost/bloc/v2.2".to_string()),
            strato_url: env_var("STRATO_URL")
                .unwrap_or_else(|_| "http://localhost/strato-api/eth/v1.2".to_string()),
            search_url: env_var("SEARCH_URL")
                .unwrap_or_else(|_| "http://localhost/cirrus/search".to_string()),
            admin_username: env_var("ADMIN_USERNAME").map_err(|_| {
                MarketError::Config("ADMIN_USERNAME environment variable is required".to_string())
            })?,
            admin_password: env_var("ADMIN_PASSWORD").map_err(|_| {
                MarketError::Config("ADMIN_PASSWORD environment variable is required".to_string())
            })?,
            admin_address: env_var("ADMIN_ADDRESS").ok(),
            contract_address: env_var("CONTRACT_ADDRESS").ok(),
            chain_id: env_var("CHAIN_ID").ok(),
            api_port: parse_or("API_PORT", 3001)?,
            poll_interval_ms: parse_or("POLL_INTERVAL_MS", 500)?,
            poll_max_attempts: parse_or("POLL_MAX_ATTEMPTS", 60)?,
            request_timeout_secs: parse_or("REQUEST_TIMEOUT_SECS", 30)?,
            contracts_dir: env_var("CONTRACTS_DIR")
                .unwrap_or_else(|_| "./contracts".to_string())
                .into(),
            preset_data_file: env_var("PRESET_DATA_FILE")
                .unwrap_or_else(|_| "./config/preset.yaml".to_string())
                .into(),
            deploy_file: env_var("DEPLOY_FILE")
                .unwrap_or_else(|_| "./config/deploy.yaml".to_string())
                .into(),
        })
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.poll_max_attempts,
        }
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| MarketError::Config(format!("Missing env var: {key}")))
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| MarketError::Config(format!("Invalid {key}")))
}
