use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::identity::{global_id, safe_bool, safe_float, standardize_date};
use crate::raw_event::RawEvent;
use crate::sources::http_client;

const SOURCE: &str = "USGS";

/// Fetches and normalizes the USGS FDSN earthquake feed for `[start, end)`.
/// Features whose `properties.type` isn't `"earthquake"` (case-insensitive)
/// are dropped before mapping.
pub async fn fetch(
    config: &Config,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Result<Vec<RawEvent>> {
    let client = http_client(config.http_timeout).map_err(PipelineError::Http)?;

    let payload: Value = client
        .get(&config.usgs_base_url)
        .query(&[
            ("format", "geojson"),
            ("starttime", &start_time.to_rfc3339()),
            ("endtime", &end_time.to_rfc3339()),
        ])
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
        .filter(is_earthquake_type)
        .filter_map(|feature| map_feature(feature, retrieved_time_utc))
        .collect();

    Ok(events)
}

fn is_earthquake_type(feature: &Value) -> bool {
    feature
        .get("properties")
        .and_then(|p| p.get("type"))
        .and_then(Value::as_str)
        .is_some_and(|t| t.eq_ignore_ascii_case("earthquake"))
}

fn map_feature(feature: Value, retrieved_time_utc: DateTime<Utc>) -> Option<RawEvent> {
    let properties = feature.get("properties")?;
    let feature_id = feature.get("id").and_then(Value::as_str)?;
    let source_id = format!("{SOURCE}_{feature_id}");

    let coordinates = feature
        .get("geometry")
        .and_then(|g| g.get("coordinates"))
        .and_then(Value::as_array);

    let types_field = properties
        .get("types")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Some(RawEvent {
        global_id: global_id(SOURCE, &source_id),
        source: SOURCE.to_string(),
        source_id,
        magnitude: safe_float(properties.get("mag")),
        mag_type: properties
            .get("magType")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        place_name: properties
            .get("place")
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
        updated_time_utc: standardize_date(properties.get("updated")),
        retrieved_time_utc,
        tsunami: safe_bool(properties.get("tsunami")),
        has_shakemap: types_field.contains("shakemap"),
        raw_data: feature,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_feature() -> Value {
        serde_json::json!({
            "type": "Feature",
            "id": "nc1",
            "properties": {
                "type": "earthquake",
                "mag": 4.2,
                "magType": "ML",
                "place": "10km NE of Somewhere",
                "time": 1_700_000_000_000_i64,
                "updated": 1_700_000_100_000_i64,
                "tsunami": 0,
                "types": ",origin,phase-data,shakemap,"
            },
            "geometry": { "type": "Point", "coordinates": [-122.0, 38.0, 7.5] }
        })
    }

    #[test]
    fn is_earthquake_type_is_case_insensitive() {
        let mut feature = sample_feature();
        feature["properties"]["type"] = serde_json::json!("Earthquake");
        assert!(is_earthquake_type(&feature));

        feature["properties"]["type"] = serde_json::json!("quarry blast");
        assert!(!is_earthquake_type(&feature));
    }

    #[test]
    fn map_feature_extracts_core_fields_and_shakemap_flag() {
        let event = map_feature(sample_feature(), Utc::now()).unwrap();
        assert_eq!(event.source_id, "USGS_nc1");
        assert_eq!(event.global_id, global_id("USGS", "USGS_nc1"));
        assert_eq!(event.origin_time_utc.unwrap().to_rfc3339(), "2023-11-14T22:13:20+00:00");
        assert_eq!(event.longitude, Some(-122.0));
        assert_eq!(event.latitude, Some(38.0));
        assert_eq!(event.depth_km, Some(7.5));
        assert_eq!(event.magnitude, Some(4.2));
        assert!(event.has_shakemap);
        assert_eq!(event.tsunami, Some(false));
    }

    #[test]
    fn map_feature_detects_absent_shakemap() {
        let mut feature = sample_feature();
        feature["properties"]["types"] = serde_json::json!(",origin,phase-data,");
        let event = map_feature(feature, Utc::now()).unwrap();
        assert!(!event.has_shakemap);
    }
}
