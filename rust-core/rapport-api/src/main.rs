// SPDX-License-Identifier: PMPL-1.0-or-later
//! Rapport API server binary
//!
//! Reads `RAPPORT_*` configuration from the environment and serves the
//! HTTP API.

use rapport_api::ApiConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ApiConfig::from_env()?;

    tracing::info!(
        keys = config.api_keys.len(),
        generation = %config.repository.policy_generation,
        "Starting Rapport API server on {}:{}",
        config.host,
        config.port
    );

    rapport_api::serve(config).await?;

    Ok(())
}
