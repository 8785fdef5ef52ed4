use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_postgres::Client;
use tracing::{info, warn};

use crate::config::Config;
use crate::dedup;
use crate::error::Result;
use crate::models::{CycleReport, SyncState};
use crate::raw_event::RawEvent;
use crate::sources::{emsc, fetch_or_empty, ign, usgs};
use crate::sync_state;
use crate::upsert;

/// Runs exactly one sync cycle: load/advance `SyncState`, fan out the three
/// source adapters, collapse per-`global_id` multiplicities, upsert through
/// the event-processing pool, sweep for duplicates, and report counts. The
/// only ordering guarantee across pools is that every upsert of this cycle
/// completes before the dedup sweep begins.
pub async fn run_cycle(client: Arc<Client>, config: &Config) -> Result<CycleReport> {
    let started_at = Instant::now();

    let (start_time, end_time) = compute_fetch_window(&client).await?;

    let raw_events = fetch_sources(config, start_time, end_time).await;
    let collapsed = collapse_by_global_id(raw_events);

    info!(
        fetched = collapsed.len(),
        start_time = %start_time,
        end_time = %end_time,
        "[*] starting event processing pool"
    );

    let report = process_events(&client, config, collapsed).await;

    let duplicate_links = dedup::run(&client, config).await?;
    let mut report = report;
    report.duplicate_links = duplicate_links;

    let elapsed = started_at.elapsed();
    println!(
        "[✓] cycle complete in {:.2}s — new={} updated={} unchanged={} errors={} duplicate_links={}",
        elapsed.as_secs_f64(),
        report.new,
        report.updated,
        report.unchanged,
        report.errors,
        report.duplicate_links
    );

    Ok(report)
}

/// Computes the `[start_time, end_time]` fetch window and advances
/// `SyncState`.
async fn compute_fetch_window(client: &Client) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let state = sync_state::load_or_create(client, SyncState::INITIAL_SYNC_KEY).await?;

    let now = Utc::now();
    let end_time = now + Duration::days(1);

    let start_time = if state.value {
        now - Duration::days(1)
    } else {
        match max_retrieved_time(client).await? {
            Some(last) => last - Duration::days(1),
            None => now - Duration::days(30),
        }
    };

    sync_state::save(
        client,
        SyncState::INITIAL_SYNC_KEY,
        true,
        start_time,
        end_time,
        now,
    )
    .await?;

    Ok((start_time, end_time))
}

async fn max_retrieved_time(client: &Client) -> Result<Option<DateTime<Utc>>> {
    let row = client
        .query_one("select max(retrieved_time) as last from earthquake", &[])
        .await
        .map_err(crate::error::PipelineError::Database)?;

    Ok(row.get::<_, Option<DateTime<Utc>>>("last"))
}

/// Fan out the three source adapters, bounded by `source_pool_width`
/// (one task per adapter).
async fn fetch_sources(
    config: &Config,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Vec<RawEvent> {
    let semaphore = Arc::new(Semaphore::new(config.source_pool_width));
    let mut tasks = JoinSet::new();

    let usgs_config = config.clone();
    let usgs_permit = semaphore.clone();
    tasks.spawn(async move {
        let _permit = usgs_permit.acquire_owned().await;
        fetch_or_empty("USGS", || usgs::fetch(&usgs_config, start_time, end_time)).await
    });

    let emsc_config = config.clone();
    let emsc_permit = semaphore.clone();
    tasks.spawn(async move {
        let _permit = emsc_permit.acquire_owned().await;
        fetch_or_empty("EMSC", || emsc::fetch(&emsc_config, start_time, end_time)).await
    });

    let ign_config = config.clone();
    let ign_permit = semaphore;
    tasks.spawn(async move {
        let _permit = ign_permit.acquire_owned().await;
        // IGN ignores the fetch window; it always returns its rolling
        // snapshot.
        fetch_or_empty("IGN", || ign::fetch(&ign_config)).await
    });

    let mut all_events = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(events) => all_events.extend(events),
            Err(e) => warn!(error = %e, "[*] source fetch task panicked"),
        }
    }

    all_events
}

/// Collapses multiple records sharing a `global_id` observed within one
/// cycle down to the one with the largest `updated_time_utc`, absent
/// values sorting before present ones.
fn collapse_by_global_id(raw_events: Vec<RawEvent>) -> Vec<RawEvent> {
    let mut by_id: HashMap<String, RawEvent> = HashMap::new();

    for event in raw_events {
        match by_id.get(&event.global_id) {
            Some(existing) if !is_strictly_newer(&event, existing) => {}
            _ => {
                by_id.insert(event.global_id.clone(), event);
            }
        }
    }

    by_id.into_values().collect()
}

fn is_strictly_newer(candidate: &RawEvent, incumbent: &RawEvent) -> bool {
    match (candidate.updated_time_utc, incumbent.updated_time_utc) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Runs `{enrich, upsert}` per collapsed event through the bounded
/// event-processing pool. A per-event fatal error is logged, counted as
/// `errors`, and never aborts the cycle.
async fn process_events(
    client: &Arc<Client>,
    config: &Config,
    raw_events: Vec<RawEvent>,
) -> CycleReport {
    let semaphore = Arc::new(Semaphore::new(config.event_pool_width));
    let mut tasks = JoinSet::new();

    for raw_event in raw_events {
        let client = Arc::clone(client);
        let config = config.clone();
        let permit = Arc::clone(&semaphore);

        tasks.spawn(async move {
            let _permit = permit.acquire_owned().await;
            let source_id = raw_event.source_id.clone();
            match upsert::upsert(&client, &config, &raw_event).await {
                Ok((_, status)) => Some(status),
                Err(e) => {
                    warn!(source_id, error = %e, "[X] per-event processing failed");
                    None
                }
            }
        });
    }

    let mut report = CycleReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(status)) => report.record(status),
            Ok(None) => report.errors += 1,
            Err(e) => {
                warn!(error = %e, "[X] event processing task panicked");
                report.errors += 1;
            }
        }
    }

    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn raw_event(global_id: &str, updated_secs: Option<i64>) -> RawEvent {
        RawEvent {
            source: "USGS".to_string(),
            source_id: global_id.to_string(),
            global_id: global_id.to_string(),
            magnitude: None,
            mag_type: None,
            place_name: None,
            latitude: None,
            longitude: None,
            depth_km: None,
            origin_time_utc: None,
            updated_time_utc: updated_secs.map(|s| Utc::now() + Duration::seconds(s)),
            retrieved_time_utc: Utc::now(),
            tsunami: None,
            has_shakemap: false,
            raw_data: Value::Null,
        }
    }

    #[test]
    fn collapse_keeps_largest_updated_time_per_global_id() {
        let events = vec![
            raw_event("g1", Some(100)),
            raw_event("g1", Some(200)),
            raw_event("g2", None),
        ];

        let collapsed = collapse_by_global_id(events);
        assert_eq!(collapsed.len(), 2);

        let g1 = collapsed.iter().find(|e| e.global_id == "g1").unwrap();
        let kept_secs = (g1.updated_time_utc.unwrap() - Utc::now()).num_seconds();
        assert!((kept_secs - 200).abs() <= 1);
    }

    #[test]
    fn collapse_prefers_present_updated_time_over_absent() {
        let events = vec![raw_event("g1", None), raw_event("g1", Some(50))];
        let collapsed = collapse_by_global_id(events);
        assert_eq!(collapsed.len(), 1);
        assert!(collapsed[0].updated_time_utc.is_some());
    }

    #[test]
    fn is_strictly_newer_treats_absent_candidate_as_never_newer() {
        let older = raw_event("g1", Some(1));
        let newer = raw_event("g1", Some(2));
        let absent = raw_event("g1", None);

        assert!(is_strictly_newer(&newer, &older));
        assert!(!is_strictly_newer(&older, &newer));
        assert!(!is_strictly_newer(&absent, &older));
        assert!(is_strictly_newer(&older, &absent));
    }
}
