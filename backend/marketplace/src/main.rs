//! Marketplace dapp backend — entry point.
//!
//! `serve` attaches to a deployed `AdminInterface` contract and exposes the
//! dapp over a small Axum REST API. `deploy` uploads a fresh contract set,
//! creates the preset users and appends the deployment record.

mod api;
mod codes;
mod config;
mod dapp;
mod deploy;
mod errors;
mod models;
mod platform;
mod poll;
mod project_manager;
mod query;
mod rest;
mod user_manager;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use dapp::Dapp;
use platform::{ContractRef, Credential, Platform};
use rest::RestClient;

#[derive(Parser)]
#[command(version, about = "Project marketplace dapp backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API against a deployed AdminInterface.
    Serve,
    /// Upload the contracts, create preset users and record the deployment.
    Deploy {
        /// Preset data file (defaults to PRESET_DATA_FILE).
        #[arg(long)]
        preset: Option<PathBuf>,
        /// Deployment record to append to (defaults to DEPLOY_FILE).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
        .build()?;
    let platform: Arc<dyn Platform> = Arc::new(RestClient::new(
        client,
        config.bloc_url.clone(),
        config.strato_url.clone(),
        config.search_url.clone(),
        config.chain_id.clone(),
    ));

    let admin_address = match &config.admin_address {
        Some(address) => address.clone(),
        None => platform.get_key(&config.admin_username).await?,
    };
    let admin = Credential::new(
        config.admin_username.clone(),
        config.admin_password.clone(),
        admin_address,
    );

    match cli.command {
        Command::Serve => serve(platform, admin, &config).await,
        Command::Deploy { preset, output } => {
            let source_path = config.contracts_dir.join(dapp::CONTRACT_FILENAME);
            let source = tokio::fs::read_to_string(&source_path)
                .await
                .map_err(|e| anyhow::anyhow!("reading {}: {e}", source_path.display()))?;

            let dapp = Dapp::upload(platform, admin, &source, config.poll_policy()).await?;
            let deployment = dapp
                .deploy(
                    &preset.unwrap_or_else(|| config.preset_data_file.clone()),
                    &output.unwrap_or_else(|| config.deploy_file.clone()),
                    &config.bloc_url,
                    config.chain_id.as_deref(),
                )
                .await?;
            print!("{}", serde_yaml::to_string(&deployment)?);
            Ok(())
        }
    }
}

async fn serve(platform: Arc<dyn Platform>, admin: Credential, config: &Config) -> anyhow::Result<()> {
    // Fall back to the last recorded deployment for this chain.
    let address = match &config.contract_address {
        Some(address) => address.clone(),
        None => {
            let chain = deploy::chain_key(config.chain_id.as_deref());
            deploy::find_deployment(&config.deploy_file, &chain)
                .await?
                .map(|entry| entry.contract.address)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "CONTRACT_ADDRESS is not set and {} has no deployment for {chain}",
                        config.deploy_file.display()
                    )
                })?
        }
    };

    let contract = ContractRef::new(dapp::CONTRACT_NAME, address);
    let dapp = Dapp::attach(platform, admin, contract, config.poll_policy()).await?;

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState { dapp });

    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
