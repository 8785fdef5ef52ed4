use tokio_postgres::{Client, NoTls};
use tracing::error;

use crate::config::Config;
use crate::error::{PipelineError, Result};

/// Opens a Postgres connection, handing the connection driver off to its
/// own task so the returned `Client` can be used directly for queries.
pub async fn connect(config: &Config) -> Result<Client> {
    let (client, connection) =
        tokio_postgres::connect(&config.postgres_connection_string(), NoTls)
            .await
            .map_err(PipelineError::Database)?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "Postgres connection error");
        }
    });

    Ok(client)
}
