use thiserror::Error;

/// Errors surfaced by the sync pipeline.
///
/// Every variant here is caught at a module boundary (adapter, enrichment,
/// upsert, dedup) and downgraded to a logged warning plus a counter — see
/// `orchestrator::run_cycle`. Only `Startup` ever aborts the process.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse upstream payload: {0}")]
    Parse(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("startup failure: {0}")]
    Startup(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
