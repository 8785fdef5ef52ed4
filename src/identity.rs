use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Stable `global_id`: lowercase SHA-256 hex of `UPPER(trim(source)) +
/// "::" + trim(source_id)`. Immutable and unique per physical upstream
/// record across all catalogs and all runs.
pub fn global_id(source: &str, source_id: &str) -> String {
    let fingerprint = format!(
        "{}::{}",
        source.trim().to_ascii_uppercase(),
        source_id.trim()
    );

    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    hex::encode(hasher.finalize())
}

/// Coerces a loosely-typed upstream JSON value into a finite `f64`, or
/// `None` when the value is null, an empty string, or a NaN sentinel.
pub fn safe_float(value: Option<&Value>) -> Option<f64> {
    let value = value?;

    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
                return None;
            }
            trimmed.parse::<f64>().ok()
        }
        _ => None,
    };

    parsed.filter(|v| v.is_finite())
}

/// Coerces a loosely-typed upstream JSON value into a `bool`, recognizing
/// common case-insensitive truthy/falsy string sentinels.
pub fn safe_bool(value: Option<&Value>) -> Option<bool> {
    let value = value?;

    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => {
            if n.as_i64() == Some(1) {
                Some(true)
            } else if n.as_i64() == Some(0) {
                Some(false)
            } else {
                None
            }
        }
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Standardizes an upstream timestamp to a UTC instant. Accepts epoch
/// milliseconds (numeric), ISO-8601 strings (`Z` suffix allowed), and
/// already-parsed instants (naive ones are assumed UTC). Unparseable
/// inputs yield `None` rather than an error.
pub fn standardize_date(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let value = value?;

    match value {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => parse_date_string(s.trim()),
        _ => None,
    }
}

fn parse_date_string(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // Some feeds emit a trailing `Z` on a format rfc3339 can't parse
    // directly (e.g. missing sub-second precision boundary characters);
    // retry after swapping the literal `Z` for an explicit UTC offset.
    if let Some(stripped) = raw.strip_suffix('Z') {
        let with_offset = format!("{stripped}+00:00");
        if let Ok(dt) = DateTime::parse_from_rfc3339(&with_offset) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }

    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn global_id_is_sha256_of_normalized_source_and_id() {
        let id = global_id("USGS", "USGS_nc1");
        let expected = {
            let mut hasher = Sha256::new();
            hasher.update(b"USGS::USGS_nc1");
            hex::encode(hasher.finalize())
        };
        assert_eq!(id, expected);
        assert_eq!(id.len(), 64);
    }

    #[test]
    fn global_id_normalizes_case_and_whitespace() {
        assert_eq!(
            global_id("usgs", " USGS_nc1 "),
            global_id("USGS", "USGS_nc1")
        );
    }

    #[test]
    fn safe_float_rejects_null_empty_and_nan_sentinels() {
        assert_eq!(safe_float(None), None);
        assert_eq!(safe_float(Some(&Value::Null)), None);
        assert_eq!(safe_float(Some(&json!(""))), None);
        assert_eq!(safe_float(Some(&json!("NaN"))), None);
        assert_eq!(safe_float(Some(&json!("4.2"))), Some(4.2));
        assert_eq!(safe_float(Some(&json!(4.2))), Some(4.2));
    }

    #[test]
    fn safe_bool_recognizes_sentinels_case_insensitively() {
        assert_eq!(safe_bool(Some(&json!("TRUE"))), Some(true));
        assert_eq!(safe_bool(Some(&json!("yes"))), Some(true));
        assert_eq!(safe_bool(Some(&json!("No"))), Some(false));
        assert_eq!(safe_bool(Some(&json!(1))), Some(true));
        assert_eq!(safe_bool(Some(&json!("maybe"))), None);
    }

    #[test]
    fn standardize_date_parses_epoch_millis() {
        let dt = standardize_date(Some(&json!(1_700_000_000_000_i64))).unwrap();
        assert_eq!(dt.to_rfc3339(), "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn standardize_date_parses_iso8601_with_trailing_z() {
        let dt = standardize_date(Some(&json!("2026-02-20T21:00:00Z"))).unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-02-20T21:00:00+00:00");
    }

    #[test]
    fn standardize_date_rejects_unparseable_input() {
        assert_eq!(standardize_date(Some(&json!("not-a-date"))), None);
        assert_eq!(standardize_date(None), None);
    }
}
