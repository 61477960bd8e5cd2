//! Deployment bookkeeping — the preset-data bootstrap file and the
//! deployment record appended after each deploy.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::codes::UserRole;
use crate::errors::{MarketError, Result};
use crate::platform::{ContractRef, Credential};

/// Key used for the deployment record when no chain id is configured.
pub const DEFAULT_CHAIN: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresetData {
    #[serde(default)]
    pub users: Vec<PresetUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresetUser {
    pub username: String,
    pub password: String,
    pub role: UserRole,
}

/// One deployed dapp instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEntry {
    pub url: String,
    /// Serialized without its password.
    pub admin: Credential,
    pub contract: ContractRef,
}

/// Deployment record, keyed by chain.
pub type Deployment = BTreeMap<String, DeploymentEntry>;

pub fn chain_key(chain_id: Option<&str>) -> String {
    chain_id.unwrap_or(DEFAULT_CHAIN).to_string()
}

pub async fn load_preset(path: &Path) -> Result<PresetData> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        MarketError::Config(format!("Preset data read failed {}: {e}", path.display()))
    })?;
    let preset: PresetData = serde_yaml::from_str(&raw)?;
    info!("Preset data {}: {} user(s)", path.display(), preset.users.len());
    Ok(preset)
}

/// Append `deployment` to the record file as a new YAML document.
pub async fn append_deployment(path: &Path, deployment: &Deployment) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let doc = format!("---\n{}", serde_yaml::to_string(deployment)?);

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(doc.as_bytes()).await?;
    file.flush().await?;

    info!("Deployment appended to {}", path.display());
    Ok(())
}

/// The most recent deployment for `chain` in the record file, if any.
pub async fn find_deployment(path: &Path, chain: &str) -> Result<Option<DeploymentEntry>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut latest = None;
    for doc in serde_yaml::Deserializer::from_str(&raw) {
        let Some(mut deployment) = Option::<Deployment>::deserialize(doc)? else {
            continue;
        };
        if let Some(entry) = deployment.remove(chain) {
            latest = Some(entry);
        }
    }
    Ok(latest)
}
