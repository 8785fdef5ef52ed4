use chrono::{DateTime, Utc};
use tokio_postgres::Client;

use crate::error::{PipelineError, Result};
use crate::models::SyncState;

const SELECT_BY_KEY: &str = "
    select key, value, last_sync_start, last_sync_end, last_run_at
    from sync_state
    where key = $1
    ";

const INSERT_DEFAULT: &str = "
    insert into sync_state (key, value)
    values ($1, false)
    on conflict (key) do nothing
    ";

const SAVE: &str = "
    update sync_state
    set value = $2, last_sync_start = $3, last_sync_end = $4, last_run_at = $5
    where key = $1
    ";

/// Loads `SyncState[key]`, creating it with `value = false` on first access.
pub async fn load_or_create(client: &Client, key: &str) -> Result<SyncState> {
    if let Some(state) = fetch(client, key).await? {
        return Ok(state);
    }

    client
        .execute(INSERT_DEFAULT, &[&key])
        .await
        .map_err(PipelineError::Database)?;

    fetch(client, key)
        .await?
        .ok_or_else(|| PipelineError::Parse("sync_state row missing after insert".to_string()))
}

async fn fetch(client: &Client, key: &str) -> Result<Option<SyncState>> {
    let row = client
        .query_opt(SELECT_BY_KEY, &[&key])
        .await
        .map_err(PipelineError::Database)?;

    Ok(row.map(|r| SyncState {
        key: r.get("key"),
        value: r.get("value"),
        last_sync_start: r.get("last_sync_start"),
        last_sync_end: r.get("last_sync_end"),
        last_run_at: r.get("last_run_at"),
    }))
}

/// Persists the window bounds and run marker computed for this cycle.
pub async fn save(
    client: &Client,
    key: &str,
    value: bool,
    last_sync_start: DateTime<Utc>,
    last_sync_end: DateTime<Utc>,
    last_run_at: DateTime<Utc>,
) -> Result<()> {
    client
        .execute(
            SAVE,
            &[
                &key,
                &value,
                &Some(last_sync_start),
                &Some(last_sync_end),
                &Some(last_run_at),
            ],
        )
        .await
        .map_err(PipelineError::Database)?;

    Ok(())
}
