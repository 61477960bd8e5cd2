//! Read-your-writes polling against the search index.
//!
//! The index trails contract state. After a write the facades poll the index
//! until the expected record shows up, giving up after a fixed number of
//! attempts.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{MarketError, Result};
use crate::platform::Platform;
use crate::query::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause between two attempts.
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_attempts: 60,
        }
    }
}

/// Poll `query` until it yields at least `min_count` rows.
pub async fn wait_query(
    platform: &dyn Platform,
    query: &Query,
    min_count: usize,
    policy: PollPolicy,
) -> Result<Vec<Value>> {
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        let rows = platform.query(query).await?;
        if rows.len() >= min_count {
            debug!("waitQuery {query}: {} rows after {attempt} attempt(s)", rows.len());
            return Ok(rows);
        }
        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    warn!("waitQuery {query}: gave up after {attempts} attempts");
    Err(MarketError::QueryTimeout {
        query: query.to_string(),
        expected: min_count,
        attempts,
    })
}

/// Poll for exactly one record and decode it.
pub async fn wait_one<T: DeserializeOwned>(
    platform: &dyn Platform,
    query: &Query,
    policy: PollPolicy,
) -> Result<T> {
    let mut rows = wait_query(platform, query, 1, policy).await?;
    Ok(serde_json::from_value(rows.swap_remove(0))?)
}

/// Decode a list of index rows.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(MarketError::from))
        .collect()
}
