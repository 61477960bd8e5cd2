//! Enumerations shared with the marketplace contracts.
//!
//! The contracts exchange every enum as its ordinal. Search-index rows may
//! render those ordinals as JSON numbers or as strings, so decoding accepts
//! both. The API layer uses the upper-case names instead.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::{MarketError, Result};

/// Ordinal <-> variant mapping for contract enums.
pub trait ContractEnum: Sized + Copy {
    fn from_code(code: u64) -> Option<Self>;
    fn code(&self) -> u64;
}

// ─────────────────────────────────────────────────────────
// Status codes
// ─────────────────────────────────────────────────────────

/// Outcome code returned as element 0 of every state-changing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Null,
    Success,
    Error,
    NotFound,
    Exists,
    RecursionLimit,
    InsufficientBalance,
    /// A code this build does not know about.
    Unknown(u64),
}

impl ErrorCode {
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => Self::Null,
            1 => Self::Success,
            2 => Self::Error,
            3 => Self::NotFound,
            4 => Self::Exists,
            5 => Self::RecursionLimit,
            6 => Self::InsufficientBalance,
            n => Self::Unknown(n),
        }
    }

    pub fn code(&self) -> u64 {
        match self {
            Self::Null => 0,
            Self::Success => 1,
            Self::Error => 2,
            Self::NotFound => 3,
            Self::Exists => 4,
            Self::RecursionLimit => 5,
            Self::InsufficientBalance => 6,
            Self::Unknown(n) => *n,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Exists => "EXISTS",
            Self::RecursionLimit => "RECURSION_LIMIT",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}

/// Lenient integer read, accepting `3`, `"3"` and `"3.0"` alike.
pub fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => {
            let digits: String = s
                .trim()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

/// Decode the leading status code of a call result.
pub fn status_of(result: &[Value]) -> Result<ErrorCode> {
    let first = result
        .first()
        .ok_or_else(|| MarketError::Decode("empty call result".to_string()))?;
    as_u64(first)
        .map(ErrorCode::from_code)
        .ok_or_else(|| MarketError::Decode(format!("status code is not numeric: {first}")))
}

/// Fail with [`MarketError::Contract`] unless the call reported SUCCESS.
pub fn ensure_success(result: &[Value]) -> Result<()> {
    match status_of(result)? {
        ErrorCode::Success => Ok(()),
        code => Err(MarketError::Contract(code)),
    }
}

// ─────────────────────────────────────────────────────────
// Lifecycle enums
// ─────────────────────────────────────────────────────────

/// Project lifecycle as tracked by the project contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectState {
    Null,
    Open,
    Production,
    Intransit,
    Received,
}

impl ContractEnum for ProjectState {
    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Null),
            1 => Some(Self::Open),
            2 => Some(Self::Production),
            3 => Some(Self::Intransit),
            4 => Some(Self::Received),
            _ => None,
        }
    }

    fn code(&self) -> u64 {
        *self as u64
    }
}

/// Events that drive [`ProjectState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectEvent {
    Null,
    Accept,
    Deliver,
    Receive,
}

impl ContractEnum for ProjectEvent {
    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Null),
            1 => Some(Self::Accept),
            2 => Some(Self::Deliver),
            3 => Some(Self::Receive),
            _ => None,
        }
    }

    fn code(&self) -> u64 {
        *self as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BidState {
    Null,
    Open,
    Accepted,
    Rejected,
}

impl ContractEnum for BidState {
    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Null),
            1 => Some(Self::Open),
            2 => Some(Self::Accepted),
            3 => Some(Self::Rejected),
            _ => None,
        }
    }

    fn code(&self) -> u64 {
        *self as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Null,
    Admin,
    Buyer,
    Supplier,
}

impl ContractEnum for UserRole {
    fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Null),
            1 => Some(Self::Admin),
            2 => Some(Self::Buyer),
            3 => Some(Self::Supplier),
            _ => None,
        }
    }

    fn code(&self) -> u64 {
        *self as u64
    }
}

/// `deserialize_with` helper for enum ordinals stored in index rows.
pub fn deserialize_code<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: ContractEnum,
{
    let raw = Value::deserialize(deserializer)?;
    let code = as_u64(&raw)
        .ok_or_else(|| de::Error::custom(format!("expected an enum ordinal, got {raw}")))?;
    T::from_code(code).ok_or_else(|| de::Error::custom(format!("unknown enum ordinal {code}")))
}
