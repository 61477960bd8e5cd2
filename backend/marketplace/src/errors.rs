//! Application-wide error types.

use thiserror::Error;

use crate::codes::ErrorCode;

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The platform answered with a non-2xx HTTP status.
    #[error("Platform error {status}: {message}")]
    Platform { status: u16, message: String },

    /// A contract method returned a status code other than SUCCESS.
    #[error("Contract error: {0}")]
    Contract(ErrorCode),

    #[error("Sub contract address not found: {0}")]
    SubContractNotFound(String),

    #[error("Query {query} did not return {expected} record(s) after {attempts} attempts")]
    QueryTimeout {
        query: String,
        expected: usize,
        attempts: u32,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl MarketError {
    /// The contract status code carried by this error, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Contract(code) => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;
