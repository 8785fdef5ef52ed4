use chrono::{DateTime, Utc};
use serde_json::Value;

/// The common shape every source adapter maps its upstream record into.
/// No shared class hierarchy — adapters are plain functions returning a
/// `Vec<RawEvent>`.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub source: String,
    pub source_id: String,
    pub global_id: String,
    pub magnitude: Option<f64>,
    pub mag_type: Option<String>,
    pub place_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub depth_km: Option<f64>,
    pub origin_time_utc: Option<DateTime<Utc>>,
    pub updated_time_utc: Option<DateTime<Utc>>,
    pub retrieved_time_utc: DateTime<Utc>,
    pub tsunami: Option<bool>,
    pub has_shakemap: bool,
    pub raw_data: Value,
}
