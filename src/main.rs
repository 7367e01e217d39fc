//! # Provisioner Entry Point
//!
//! `serve` (the default) runs the HTTP API. The other subcommands are
//! operator tools sharing the same configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use tokio_util::sync::CancellationToken;

use provisioner::{
    access_control,
    config::{AppConfig, ConfigLoader},
    db::Resources,
    engine::PostgresAdminEngine,
    provisioning::Provisioner,
    server::{AppState, run_server},
    store::MetadataStore,
    telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "provisioner", version, about = "PostgreSQL tenant database provisioner")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve,
    /// Apply metadata store migrations and exit
    Migrate,
    /// Regenerate the access-control file from the metadata store and reload the engine
    Recompile,
    /// Print the managed rules of an access-control file without modifying it
    CheckHba {
        /// Defaults to the configured HBA path
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => migrate(config).await,
        Command::Recompile => recompile(config).await,
        Command::CheckHba { path } => check_hba(path.unwrap_or(config.hba_path)).await,
    }
}

async fn build_provisioner(config: &AppConfig) -> Result<(Resources, Provisioner)> {
    let resources = Resources::connect(config).await?;
    let store = MetadataStore::new(resources.metadata.clone(), config.operation_timeout());
    let engine = Arc::new(PostgresAdminEngine::new(resources.admin.clone()));
    let provisioner = Provisioner::new(config, store, engine);
    Ok((resources, provisioner))
}

async fn serve(config: AppConfig) -> Result<()> {
    let (resources, provisioner) = build_provisioner(&config).await?;
    Migrator::up(&resources.metadata, None)
        .await
        .context("applying migrations")?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        });
    }

    let result = run_server(AppState::new(config, provisioner), shutdown).await;
    resources.shutdown().await?;
    result
}

async fn migrate(config: AppConfig) -> Result<()> {
    let (resources, _) = build_provisioner(&config).await?;
    Migrator::up(&resources.metadata, None)
        .await
        .context("applying migrations")?;
    tracing::info!("Migrations applied");
    resources.shutdown().await
}

async fn recompile(config: AppConfig) -> Result<()> {
    let (resources, provisioner) = build_provisioner(&config).await?;
    let result = provisioner.recompile().await;
    resources.shutdown().await?;

    let report = result?;
    println!(
        "{}: {} tenant(s), {} rule(s), {}",
        config.hba_path.display(),
        report.tenants,
        report.rules,
        if report.changed { "updated" } else { "unchanged" }
    );
    Ok(())
}

async fn check_hba(path: PathBuf) -> Result<()> {
    let rules = access_control::inspect_file(&path).await?;
    let allow = rules.iter().filter(|r| r.is_allow()).count();
    for rule in &rules {
        println!(
            "{} {} {} {} {}",
            rule.mode, rule.database, rule.role, rule.address, rule.method
        );
    }
    println!(
        "{}: {} managed rule(s), {} allow",
        path.display(),
        rules.len(),
        allow
    );
    Ok(())
}
