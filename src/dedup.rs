use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_postgres::Client;
use tracing::warn;

use crate::config::Config;
use crate::error::{PipelineError, Result};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// The subset of an `Event` the sweep needs: canonical candidates with a
/// resolved `location`.
#[derive(Debug, Clone)]
pub struct DedupCandidate {
    pub id: i64,
    pub source: String,
    pub origin_time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub magnitude: Option<f64>,
}

const SELECT_CANDIDATES: &str = "
    select id, source, origin_time, latitude, longitude, magnitude
    from earthquake
    where duplicate_of is null
      and latitude is not null
      and longitude is not null
    order by origin_time asc
    ";

// Single statement: the insert and the duplicate_of update either both
// land or neither does. `on conflict ... do nothing` makes a re-run over
// an already-linked pair a no-op instead of an error, and the trailing
// `update ... returning` only fires when the insert actually happened, so
// callers can tell a fresh link from a skipped one from one round trip.
const PERSIST_LINK: &str = "
    with ins as (
        insert into duplicatelink (canonical_id, duplicate_id, dt, dd, dm)
        values ($1, $2, $3, $4, $5)
        on conflict (canonical_id, duplicate_id) do nothing
        returning duplicate_id
    )
    update earthquake
    set duplicate_of = $1
    where id = (select duplicate_id from ins)
    returning id
    ";

fn source_priority(source: &str) -> u8 {
    match source.trim().to_ascii_uppercase().as_str() {
        "USGS" => 0,
        "IGN" => 1,
        "EMSC" => 2,
        _ => 99,
    }
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// One candidate duplicate pair found by the sweep, before existence
/// checking against already-persisted links.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkCandidate {
    pub canonical_id: i64,
    pub duplicate_id: i64,
    pub dt_secs: f64,
    pub dd_km: f64,
    pub dm: f64,
}

/// Pure time-window sweep over time-sorted candidates. Exposed separately
/// from the DB-facing `run` so the pairwise math and tie-breaking can be
/// unit tested without a database.
pub fn sweep(
    candidates: &[DedupCandidate],
    dt_threshold_secs: f64,
    dd_threshold_km: f64,
    dm_threshold: f64,
) -> Vec<LinkCandidate> {
    let mut links = Vec::new();

    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            let dt_secs = (candidates[j].origin_time - candidates[i].origin_time)
                .num_milliseconds() as f64
                / 1000.0;

            if dt_secs > dt_threshold_secs {
                break;
            }

            let a = &candidates[i];
            let b = &candidates[j];

            if a.source.eq_ignore_ascii_case(&b.source) {
                continue;
            }

            let (Some(mag_a), Some(mag_b)) = (a.magnitude, b.magnitude) else {
                continue;
            };

            let dm = (mag_a - mag_b).abs();
            if dm > dm_threshold {
                continue;
            }

            let dd_km = haversine_km(a.latitude, a.longitude, b.latitude, b.longitude);
            if dd_km > dd_threshold_km {
                continue;
            }

            let priority_a = source_priority(&a.source);
            let priority_b = source_priority(&b.source);

            let (canonical_id, duplicate_id) = match priority_a.cmp(&priority_b) {
                std::cmp::Ordering::Less => (a.id, b.id),
                std::cmp::Ordering::Greater => (b.id, a.id),
                // Tied priority is unreachable with the default table but
                // must not invent an ordering.
                std::cmp::Ordering::Equal => continue,
            };

            links.push(LinkCandidate {
                canonical_id,
                duplicate_id,
                dt_secs,
                dd_km,
                dm,
            });
        }
    }

    links
}

/// Runs one dedup sweep over all canonical events and persists any newly
/// discovered links through a bounded pool (the DB round trip in
/// `persist_link` is the suspension point; the sweep itself stays a single
/// sequential pass since its early-break depends on scanning time-sorted
/// candidates in order). Re-runnable: a pre-existing `(canonical,
/// duplicate)` link is skipped silently, never rewritten.
pub async fn run(client: &Arc<Client>, config: &Config) -> Result<u64> {
    let candidates = load_candidates(client).await?;
    let dt_threshold_secs = config.dedup_dt_threshold_secs as f64;

    let link_candidates = sweep(
        &candidates,
        dt_threshold_secs,
        config.dedup_dd_threshold_km,
        config.dedup_dm_threshold,
    );

    let semaphore = Arc::new(Semaphore::new(config.dedup_pool_width));
    let mut tasks = JoinSet::new();

    for candidate in link_candidates {
        let client = Arc::clone(client);
        let permit = Arc::clone(&semaphore);

        tasks.spawn(async move {
            let _permit = permit.acquire_owned().await;
            (candidate, persist_link(&client, candidate).await)
        });
    }

    let mut created = 0_u64;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(true))) => created += 1,
            Ok((_, Ok(false))) => {}
            Ok((candidate, Err(e))) => {
                warn!(
                    canonical_id = candidate.canonical_id,
                    duplicate_id = candidate.duplicate_id,
                    error = %e,
                    "[*] failed to persist duplicate link"
                );
            }
            Err(e) => warn!(error = %e, "[*] dedup persist task panicked"),
        }
    }

    Ok(created)
}

async fn load_candidates(client: &Client) -> Result<Vec<DedupCandidate>> {
    let rows = client
        .query(SELECT_CANDIDATES, &[])
        .await
        .map_err(PipelineError::Database)?;

    Ok(rows
        .into_iter()
        .map(|row| DedupCandidate {
            id: row.get("id"),
            source: row.get("source"),
            origin_time: row.get("origin_time"),
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            magnitude: row.get("magnitude"),
        })
        .collect())
}

async fn persist_link(client: &Client, candidate: LinkCandidate) -> Result<bool> {
    let row = client
        .query_opt(
            PERSIST_LINK,
            &[
                &candidate.canonical_id,
                &candidate.duplicate_id,
                &candidate.dt_secs,
                &candidate.dd_km,
                &candidate.dm,
            ],
        )
        .await
        .map_err(PipelineError::Database)?;

    Ok(row.is_some())
}
