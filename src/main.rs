//! pgmap - Main entry point.
//!
//! Connects to PostgreSQL, loads the migration directory and reports or
//! applies pending migrations.

use clap::Parser;
use pgmap::config::Config;
use pgmap::db::{Database, PgGateway, TracingObserver};
use pgmap::migrate::{MigrationState, Migrator, loader};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    info!(
        database = %config.masked_database_url(),
        namespace = %config.namespace,
        migrations = %config.migrations.display(),
        "Starting pgmap v{}",
        env!("CARGO_PKG_VERSION")
    );

    let migrations = loader::load_dir(&config.migrations)?;
    info!(count = migrations.len(), "Loaded migrations");

    let db_config = config.database()?;
    let gateway = PgGateway::connect(&db_config, config.query_timeout_duration()).await?;
    let db = Database::new(gateway.clone())
        .with_retry_policy(config.retry_policy())
        .with_isolation(config.isolation)
        .with_observer(Arc::new(TracingObserver));

    let migrator = Migrator::new(db, &config.namespace, migrations)?;
    let result = migrator.init(config.apply).await;
    gateway.close().await;

    let state = match result {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "Migration failed");
            return Err(e.into());
        }
    };

    match state {
        MigrationState::Empty => {
            println!("empty: ledger {} does not exist", migrator.ledger_table())
        }
        MigrationState::NeedsUpgrade => println!(
            "needs upgrade: run with --apply to reach version {}",
            migrator.latest_version()
        ),
        MigrationState::UpToDate => {
            println!("up to date at version {}", migrator.latest_version())
        }
    }

    Ok(())
}
