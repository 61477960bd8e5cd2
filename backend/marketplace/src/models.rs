//! Records read back from the search index, and the argument shapes sent to
//! the marketplace contracts.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::codes::{as_u64, deserialize_code, BidState, ProjectEvent, ProjectState, UserRole};

const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// A project row from the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Address of the `Project` contract.
    #[serde(default)]
    pub address: String,
    pub name: String,
    pub buyer: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub spec: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub price: u64,
    /// Milliseconds since the Unix epoch.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub created: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub target_delivery: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub delivered: u64,
    #[serde(default)]
    pub address_street: String,
    #[serde(default)]
    pub address_city: String,
    #[serde(default)]
    pub address_state: String,
    #[serde(default)]
    pub address_zip: String,
    #[serde(deserialize_with = "deserialize_code")]
    pub state: ProjectState,
}

/// A bid row from the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    #[serde(deserialize_with = "lenient_u64")]
    pub id: u64,
    /// Name of the project this bid is for.
    pub name: String,
    pub supplier: String,
    /// Offered amount, in ether.
    #[serde(deserialize_with = "lenient_u64")]
    pub amount: u64,
    #[serde(deserialize_with = "deserialize_code")]
    pub state: BidState,
    /// Address of the `Bid` contract holding the escrow.
    #[serde(default)]
    pub address: String,
}

/// A user row from the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Address of the `User` contract.
    #[serde(default)]
    pub address: String,
    /// Chain account that holds the user's funds.
    pub account: String,
    pub username: String,
    #[serde(deserialize_with = "deserialize_code")]
    pub role: UserRole,
}

/// Arguments of `ProjectManager.createProject`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectArgs {
    pub name: String,
    pub buyer: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub spec: String,
    #[serde(default)]
    pub price: u64,
    /// Stamped by the dapp at creation time.
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub target_delivery: u64,
    #[serde(default)]
    pub address_street: String,
    #[serde(default)]
    pub address_city: String,
    #[serde(default)]
    pub address_state: String,
    #[serde(default)]
    pub address_zip: String,
}

/// Result of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginResult {
    pub authenticate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// A project event to apply, with the extra credentials ACCEPT needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub project_name: String,
    pub project_event: ProjectEvent,
    /// Buyer accepting a bid.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub bid_id: Option<u64>,
}

// ─────────────────────────────────────────────────────────
// Value transfer
// ─────────────────────────────────────────────────────────

/// An amount in wei. Serialized as a decimal string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Wei(pub u128);

impl Wei {
    pub const ZERO: Wei = Wei(0);

    pub fn from_ether(ether: u64) -> Self {
        Wei(u128::from(ether) * WEI_PER_ETHER)
    }

    /// Parse a decimal wei amount, as returned by the account API.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok().map(Wei)
    }

    /// Exact decimal rendering in ether, without trailing zeros.
    pub fn to_ether(&self) -> String {
        let whole = self.0 / WEI_PER_ETHER;
        let frac = self.0 % WEI_PER_ETHER;
        if frac == 0 {
            return whole.to_string();
        }
        let frac = format!("{frac:018}");
        format!("{whole}.{}", frac.trim_end_matches('0'))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Wei {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// `deserialize_with` helper for integer columns that may arrive as strings.
fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    as_u64(&raw).ok_or_else(|| de::Error::custom(format!("expected an integer, got {raw}")))
}
