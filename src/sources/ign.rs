use chrono::Utc;
use regex::Regex;
use serde_json::Value;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::identity::{global_id, safe_float, standardize_date};
use crate::raw_event::RawEvent;
use crate::sources::http_client;

const SOURCE: &str = "IGN";

/// Matches the `var dias3 = { ... };` assignment the IGN feed wraps its
/// JSON payload in. `(?s)` makes `.` match newlines so multi-line feature
/// arrays are captured whole.
fn payload_pattern() -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?s)var\s+dias3\s*=\s*(\{.*\});").unwrap()
}

/// Fetches and normalizes the IGN rolling earthquake feed. IGN returns a
/// rolling snapshot and ignores the orchestrator's fetch window — no window
/// parameters are sent upstream.
pub async fn fetch(config: &Config) -> Result<Vec<RawEvent>> {
    let client = http_client(config.http_timeout).map_err(PipelineError::Http)?;

    let body = client
        .get(&config.ign_base_url)
        .send()
        .await
        .map_err(PipelineError::Http)?
        .text()
        .await
        .map_err(PipelineError::Http)?;

    let captured = payload_pattern()
        .captures(&body)
        .and_then(|c| c.get(1))
        .ok_or_else(|| PipelineError::Parse("IGN payload marker not found".to_string()))?;

    let payload: Value = serde_json::from_str(captured.as_str())
        .map_err(|e| PipelineError::Parse(format!("invalid IGN JSON payload: {e}")))?;

    let features = payload
        .get("features")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let retrieved_time_utc = Utc::now();
    let events = features
        .into_iter()
        .filter_map(|feature| map_feature(feature, retrieved_time_utc))
        .collect();

    Ok(events)
}

fn map_feature(feature: Value, retrieved_time_utc: chrono::DateTime<Utc>) -> Option<RawEvent> {
    let properties = feature.get("properties")?;
    let coordinates = feature
        .get("geometry")
        .and_then(|g| g.get("coordinates"))
        .and_then(Value::as_array);

    let lon = coordinates
        .and_then(|c| c.first())
        .and_then(|v| safe_float(Some(v)));
    let lat = coordinates
        .and_then(|c| c.get(1))
        .and_then(|v| safe_float(Some(v)));

    let evid = properties.get("evid").and_then(Value::as_str);
    let source_id = match evid {
        Some(id) if !id.trim().is_empty() => format!("{SOURCE}_{id}"),
        _ => format!(
            "{SOURCE}_{}_{}",
            lon.map(|v| v.to_string()).unwrap_or_default(),
            lat.map(|v| v.to_string()).unwrap_or_default()
        ),
    };

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
            .get("loc")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        latitude: lat,
        longitude: lon,
        depth_km: safe_float(properties.get("depth")),
        origin_time_utc: standardize_date(properties.get("fecha")),
        updated_time_utc: None,
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

    #[test]
    fn payload_pattern_captures_multiline_object() {
        let body = "var dias3 = {\n  \"features\": [\n    1\n  ]\n};\nvar other = 1;";
        let captured = payload_pattern().captures(body).unwrap();
        let json: Value = serde_json::from_str(captured.get(1).unwrap().as_str()).unwrap();
        assert_eq!(json["features"][0], 1);
    }

    #[test]
    fn map_feature_uses_evid_when_present() {
        let feature = serde_json::json!({
            "properties": {
                "evid": "es2024abcd",
                "mag": "3.1",
                "magtype": "mbLg",
                "loc": "W GRANADA.GR",
                "depth": "5",
                "fecha": "2024-05-01T10:00:00Z"
            },
            "geometry": { "coordinates": [-3.6, 37.2] }
        });

        let event = map_feature(feature, Utc::now()).unwrap();
        assert_eq!(event.source_id, "IGN_es2024abcd");
        assert_eq!(event.magnitude, Some(3.1));
        assert_eq!(event.longitude, Some(-3.6));
        assert_eq!(event.latitude, Some(37.2));
        assert_eq!(event.global_id, global_id("IGN", "IGN_es2024abcd"));
    }

    #[test]
    fn map_feature_falls_back_to_coordinate_id_when_evid_absent() {
        let feature = serde_json::json!({
            "properties": {},
            "geometry": { "coordinates": [-3.6, 37.2] }
        });

        let event = map_feature(feature, Utc::now()).unwrap();
        assert_eq!(event.source_id, "IGN_-3.6_37.2");
    }
}
