use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::identity::{global_id, safe_float, standardize_date};
use crate::raw_event::RawEvent;
use crate::sources::http_client;

const SOURCE: &str = "EMSC";

/// Fetches and normalizes the EMSC/seismicportal feed for `[start, end)`.
/// Only `"ke"` (known earthquake) and `"fe"` (felt earthquake) event types
/// are kept.
pub async fn fetch(
    config: &Config,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Result<Vec<RawEvent>> {
    let client = http_client(config.http_timeout).map_err(PipelineError::Http)?;

    let start = start_time.format("%Y-%m-%dT%H:%M:%S").to_string();
    let end = end_time.format("%Y-%m-%dT%H:%M:%S").to_string();

    let payload: Value = client
        .get(&config.emsc_base_url)
        .query(&[("format", "json"), ("starttime", &start), ("endtime", &end)])
        .send()
        .await
        .map_err(PipelineError::Http)?
        .json()
        .await
        .map_err(PipelineError::Http)?;

    let features = payload
        .get("features")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let retrieved_time_utc = Utc::now();
    let events = features
        .into_iter()
        .filter(is_kept_event_type)
        .filter_map(|feature| map_feature(feature, retrieved_time_utc))
        .collect();

    Ok(events)
}

fn is_kept_event_type(feature: &Value) -> bool {
    feature
        .get("properties")
        .and_then(|p| p.get("evtype"))
        .and_then(Value::as_str)
        .map(|t| t.to_ascii_lowercase())
        .is_some_and(|t| t == "ke" || t == "fe")
}

fn map_feature(feature: Value, retrieved_time_utc: DateTime<Utc>) -> Option<RawEvent> {
    let properties = feature.get("properties")?;
    let unid = properties.get("unid").and_then(Value::as_str)?;
    let source_id = format!("{SOURCE}_{unid}");

    let coordinates = feature
        .get("geometry")
        .and_then(|g| g.get("coordinates"))
        .and_then(Value::as_array);

    Some(RawEvent {
        global_id: global_id(SOURCE, &source_id),
        source: SOURCE.to_string(),
        source_id,
        magnitude: safe_float(properties.get("mag")),
        mag_type: properties
            .get("magtype")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        place_name: properties
            .get("flynn_region")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        latitude: coordinates
            .and_then(|c| c.get(1))
            .and_then(|v| safe_float(Some(v))),
        longitude: coordinates
            .and_then(|c| c.first())
            .and_then(|v| safe_float(Some(v))),
        depth_km: coordinates
            .and_then(|c| c.get(2))
            .and_then(|v| safe_float(Some(v))),
        origin_time_utc: standardize_date(properties.get("time")),
        updated_time_utc: standardize_date(properties.get("lastupdate")),
        retrieved_time_utc,
        tsunami: None,
        has_shakemap: false,
        raw_data: feature,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_feature() -> Value {
        serde_json::json!({
            "properties": {
                "unid": "20240501_0000001",
                "mag": 5.1,
                "magtype": "mw",
                "flynn_region": "CRETE, GREECE",
                "time": "2024-05-01T10:00:03Z",
                "lastupdate": "2024-05-01T10:05:00Z",
                "evtype": "ke"
            },
            "geometry": { "coordinates": [10.01, 45.01, 12.0] }
        })
    }

    #[test]
    fn is_kept_event_type_accepts_ke_and_fe_only() {
        let mut feature = sample_feature();
        assert!(is_kept_event_type(&feature));

        feature["properties"]["evtype"] = serde_json::json!("FE");
        assert!(is_kept_event_type(&feature));

        feature["properties"]["evtype"] = serde_json::json!("qb");
        assert!(!is_kept_event_type(&feature));
    }

    #[test]
    fn map_feature_extracts_magnitude_and_coordinates() {
        let event = map_feature(sample_feature(), Utc::now()).unwrap();
        assert_eq!(event.source_id, "EMSC_20240501_0000001");
        assert_eq!(event.magnitude, Some(5.1));
        assert_eq!(event.longitude, Some(10.01));
        assert_eq!(event.latitude, Some(45.01));
    }

    #[test]
    fn map_feature_skips_when_unid_missing() {
        let mut feature = sample_feature();
        feature["properties"].as_object_mut().unwrap().remove("unid");
        assert!(map_feature(feature, Utc::now()).is_none());
    }
}
