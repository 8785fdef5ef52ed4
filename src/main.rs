mod config;
mod db;
mod dedup;
mod enrich;
mod error;
mod identity;
mod models;
mod orchestrator;
mod raw_event;
mod sources;
mod sync_state;
mod upsert;

use std::sync::Arc;

use tracing::error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .without_time()
        .json()
        .init();

    let config = config::Config::from_env();

    let client = match db::connect(&config).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "[X] failed to connect to Postgres; aborting startup");
            std::process::exit(1);
        }
    };

    match orchestrator::run_cycle(client, &config).await {
        Ok(_report) => std::process::exit(0),
        Err(e) => {
            // A cycle-level error means a boundary we treat as fatal
            // (currently only SyncState persistence) failed; per-event and
            // per-source failures never reach here.
            error!(error = %e, "[X] sync cycle aborted");
            std::process::exit(0);
        }
    }
}
