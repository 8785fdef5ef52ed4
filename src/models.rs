use chrono::{DateTime, Utc};
use serde_json::Value;

/// The canonical persisted earthquake record.
///
/// `id` is only populated once the row has round-tripped through Postgres;
/// freshly-built events destined for an insert carry `id = None`.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Option<i64>,
    pub global_id: String,
    pub source: String,
    pub source_id: String,
    pub origin_time: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub magnitude: Option<f64>,
    pub mag_type: Option<String>,
    pub depth_km: Option<f64>,
    pub place_name: Option<String>,
    pub origin_country: Option<String>,
    pub tectonic_plate: Option<String>,
    pub affected_countries: Vec<String>,
    pub tsunami: Option<bool>,
    pub has_curves: Option<bool>,
    pub updated_time: Option<DateTime<Utc>>,
    pub retrieved_time: DateTime<Utc>,
    pub raw_data: Value,
    pub duplicate_of: Option<i64>,
}

impl Event {
    /// `true` when both coordinates are present and a `location` point can
    /// be derived.
    pub fn has_location(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// A directed `canonical -> duplicate` edge with the deltas measured at
/// creation time.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateLink {
    pub canonical_id: i64,
    pub duplicate_id: i64,
    pub dt_secs: f64,
    pub dd_km: f64,
    pub dm: f64,
}

/// One MMI intensity contour belonging to an `Event`. `coordinates` is the
/// verbatim GeoJSON polygon-ring value from the upstream contour feature.
#[derive(Debug, Clone)]
pub struct IntensityCurve {
    pub event_id: i64,
    pub intensity: f64,
    pub coordinates: Value,
}

/// The keyed singleton row tracking whether the initial backfill sync has
/// run.
#[derive(Debug, Clone)]
pub struct SyncState {
    pub key: String,
    pub value: bool,
    pub last_sync_start: Option<DateTime<Utc>>,
    pub last_sync_end: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl SyncState {
    pub const INITIAL_SYNC_KEY: &'static str = "initial_sync_done";
}

/// Outcome of a single upsert call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStatus {
    New,
    Updated,
    Unchanged,
}

impl UpsertStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Tallies produced by one sync cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleReport {
    pub new: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub errors: u64,
    pub duplicate_links: u64,
}

impl CycleReport {
    pub fn record(&mut self, status: UpsertStatus) {
        match status {
            UpsertStatus::New => self.new += 1,
            UpsertStatus::Updated => self.updated += 1,
            UpsertStatus::Unchanged => self.unchanged += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_location_requires_both_coordinates() {
        let mut event = sample_event();
        event.latitude = Some(1.0);
        event.longitude = None;
        assert!(!event.has_location());

        event.longitude = Some(2.0);
        assert!(event.has_location());
    }

    #[test]
    fn cycle_report_tallies_each_status() {
        let mut report = CycleReport::default();
        report.record(UpsertStatus::New);
        report.record(UpsertStatus::Updated);
        report.record(UpsertStatus::Unchanged);
        report.record(UpsertStatus::Unchanged);

        assert_eq!(report.new, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.unchanged, 2);
    }

    fn sample_event() -> Event {
        Event {
            id: Some(1),
            global_id: "abc".to_string(),
            source: "USGS".to_string(),
            source_id: "USGS_nc1".to_string(),
            origin_time: Utc::now(),
            latitude: None,
            longitude: None,
            magnitude: None,
            mag_type: None,
            depth_km: None,
            place_name: None,
            origin_country: None,
            tectonic_plate: None,
            affected_countries: Vec::new(),
            tsunami: None,
            has_curves: None,
            updated_time: None,
            retrieved_time: Utc::now(),
            raw_data: Value::Null,
            duplicate_of: None,
        }
    }
}
