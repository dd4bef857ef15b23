// SPDX-License-Identifier: PMPL-1.0-or-later
//! rapport-ops: migration status and the tenant-isolation smoke suite.
//!
//! Both commands run against a fresh in-memory repository, so they are
//! safe to point at nothing and useful as a deployment gate.

mod smoke;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, ContentArrangement, Table};
use rapport_authz::PolicyGeneration;
use rapport_repository::{MigrationRunner, Repository, RepositoryConfig};
use rapport_storage::InMemoryBackend;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "rapport-ops", version = VERSION, about = "Operational tooling for Rapport")]
struct Cli {
    /// Policy generation the migrations should leave authoritative.
    #[arg(long, env = "RAPPORT_POLICY_GENERATION", default_value = "v2", global = true)]
    generation: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List built-in migrations and whether the configured run applies them.
    Migrations,
    /// Show installed and enabled policy counts after migrating.
    Policies,
    /// Run the isolation and audit smoke checks. Exits non-zero on failure.
    Smoke,
}

async fn open(generation: PolicyGeneration) -> Result<Repository> {
    let config = RepositoryConfig {
        policy_generation: generation,
        ..RepositoryConfig::default()
    };
    Repository::open_migrated(config, Arc::new(InMemoryBackend::new()))
        .await
        .context("failed to open and migrate the repository")
}

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header.iter().map(Cell::new));
    table
}

async fn list_migrations(generation: PolicyGeneration) -> Result<()> {
    let runner = MigrationRunner::builtin()?;
    let repo = open(generation).await?;
    let applied = repo.applied_migrations().await;

    let mut out = table(&["id", "applied at", "description", "status"]);
    for migration in runner.migrations() {
        let status = if applied.contains(&migration.id) {
            "applied"
        } else {
            "pending"
        };
        out.add_row(vec![
            Cell::new(migration.id.to_string()),
            Cell::new(migration.id.timestamp().format("%Y-%m-%d %H:%M:%S")),
            Cell::new(migration.id.description()),
            Cell::new(status),
        ]);
    }
    println!("{out}");
    println!(
        "({} applied, {} pending for {})",
        applied.len(),
        repo.pending_migrations().await.len(),
        generation
    );
    Ok(())
}

async fn show_policies(generation: PolicyGeneration) -> Result<()> {
    let repo = open(generation).await?;
    let counts = repo.policy_counts().await;

    let mut out = table(&["generation", "installed", "enabled"]);
    out.add_row(vec![
        Cell::new("v1"),
        Cell::new(counts.v1_installed),
        Cell::new(counts.v1_enabled),
    ]);
    out.add_row(vec![
        Cell::new("v2"),
        Cell::new(counts.v2_installed),
        Cell::new(counts.v2_enabled),
    ]);
    println!("{out}");
    println!("rollout state: {:?}", repo.rollout_state().await);
    Ok(())
}

async fn run_smoke(generation: PolicyGeneration) -> Result<bool> {
    let outcomes = smoke::run(generation).await?;

    let mut out = table(&["check", "result", "detail"]);
    for outcome in &outcomes {
        let (result, detail) = match &outcome.result {
            Ok(detail) => ("PASS", detail.clone()),
            Err(err) => ("FAIL", format!("{:#}", err)),
        };
        out.add_row(vec![
            Cell::new(outcome.name),
            Cell::new(result),
            Cell::new(detail),
        ]);
    }
    println!("{out}");

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    println!("({} checks, {} failed)", outcomes.len(), failed);
    Ok(failed == 0)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let generation: PolicyGeneration = cli.generation.parse()?;

    match cli.command {
        Command::Migrations => list_migrations(generation).await?,
        Command::Policies => show_policies(generation).await?,
        Command::Smoke => {
            if !run_smoke(generation).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
