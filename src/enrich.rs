use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio_postgres::Client;
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::models::IntensityCurve;
use crate::sources::http_client;

/// Geospatial context derived for one event.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub tectonic_plate: Option<String>,
    pub origin_country: Option<String>,
    pub affected_countries: Vec<String>,
    pub intensity_curves: Vec<(f64, Value)>,
}

/// Resolves `tectonic_plate` and `origin_country` by point-in-polygon
/// lookup against the read-only `plates`/`countries` reference layers, and
/// — when the record carries a shakemap — fetches MMI contours and
/// intersects their vertices against `countries` to derive
/// `affected_countries`. Every lookup degrades independently to `None`/
/// empty on failure; nothing here ever aborts the calling upsert.
pub async fn enrich(
    client: &Client,
    lon: Option<f64>,
    lat: Option<f64>,
    source_id: &str,
    has_shakemap: bool,
    usgs_base_url: &str,
    http_timeout: Duration,
) -> Enrichment {
    let mut enrichment = Enrichment::default();

    if let (Some(lon), Some(lat)) = (lon, lat) {
        enrichment.tectonic_plate = lookup_plate(client, lon, lat).await.unwrap_or_else(|e| {
            warn!(source_id, error = %e, "[*] tectonic plate lookup failed");
            None
        });

        enrichment.origin_country = lookup_country(client, lon, lat).await.unwrap_or_else(|e| {
            warn!(source_id, error = %e, "[*] origin country lookup failed");
            None
        });
    }

    if has_shakemap && !source_id.is_empty() {
        match fetch_contours(source_id, usgs_base_url, http_timeout).await {
            Ok(contours) => {
                enrichment.affected_countries =
                    affected_countries(client, &contours).await.unwrap_or_else(|e| {
                        warn!(source_id, error = %e, "[*] affected-country lookup failed");
                        Vec::new()
                    });
                enrichment.intensity_curves = contours;
            }
            Err(e) => {
                warn!(source_id, error = %e, "[*] contour fetch failed");
            }
        }
    }

    enrichment
}

async fn lookup_plate(client: &Client, lon: f64, lat: f64) -> Result<Option<String>> {
    let row = client
        .query_opt(
            "
            select coalesce(platename, code) as name
            from plates
            where st_intersects(geom, st_setsrid(st_point($1, $2), 4326))
            limit 1
            ",
            &[&lon, &lat],
        )
        .await
        .map_err(PipelineError::Database)?;

    Ok(row.and_then(|r| r.get::<_, Option<String>>("name")))
}

async fn lookup_country(client: &Client, lon: f64, lat: f64) -> Result<Option<String>> {
    let row = client
        .query_opt(
            "
            select coalesce(admin, sovereignt) as name
            from countries
            where st_contains(geom, st_setsrid(st_point($1, $2), 4326))
            limit 1
            ",
            &[&lon, &lat],
        )
        .await
        .map_err(PipelineError::Database)?;

    Ok(row.and_then(|r| r.get::<_, Option<String>>("name")))
}

/// Fetches the MMI contour set for a USGS event: resolve `event_id` from
/// `source_id`, pull the detail document, and fetch the first
/// `cont_mmi.json` URL found in it.
async fn fetch_contours(
    source_id: &str,
    usgs_base_url: &str,
    http_timeout: Duration,
) -> Result<Vec<(f64, Value)>> {
    let event_id = source_id.strip_prefix("USGS_").unwrap_or(source_id);
    let client = http_client(http_timeout).map_err(PipelineError::Http)?;

    let detail_text = client
        .get(usgs_base_url)
        .query(&[("eventid", event_id), ("format", "geojson")])
        .send()
        .await
        .map_err(PipelineError::Http)?
        .text()
        .await
        .map_err(PipelineError::Http)?;

    let contour_url = find_contour_url(&detail_text)
        .ok_or_else(|| PipelineError::Parse("no cont_mmi.json URL in detail document".to_string()))?;

    let contour_doc: Value = client
        .get(&contour_url)
        .send()
        .await
        .map_err(PipelineError::Http)?
        .json()
        .await
        .map_err(PipelineError::Http)?;

    let features = contour_doc
        .get("features")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let contours = features
        .into_iter()
        .filter_map(|feature| {
            let value = feature.get("properties")?.get("value")?.as_f64()?;
            let coordinates = feature.get("geometry")?.get("coordinates")?.clone();
            Some((value, coordinates))
        })
        .collect();

    Ok(contours)
}

fn find_contour_url(detail_text: &str) -> Option<String> {
    #[allow(clippy::unwrap_used)]
    let pattern = Regex::new(r#"https://[^"\\]*cont_mmi\.json"#).unwrap();
    pattern.find(detail_text).map(|m| m.as_str().to_string())
}

/// Intersects every vertex across all contour polygons against `countries`
/// and returns the distinct set of country names touched.
async fn affected_countries(client: &Client, contours: &[(f64, Value)]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();

    for (_, coordinates) in contours {
        for (lon, lat) in extract_vertices(coordinates) {
            if let Some(name) = lookup_country(client, lon, lat).await? {
                seen.insert(name);
            }
        }
    }

    Ok(seen.into_iter().collect())
}

/// Recursively walks a GeoJSON coordinate tree (Polygon or MultiPolygon
/// rings) and collects every `(lon, lat)` leaf pair.
fn extract_vertices(value: &Value) -> Vec<(f64, f64)> {
    let Value::Array(items) = value else {
        return Vec::new();
    };

    let is_point = items.len() >= 2 && items[0].is_number() && items[1].is_number();
    if is_point {
        return match (items[0].as_f64(), items[1].as_f64()) {
            (Some(lon), Some(lat)) => vec![(lon, lat)],
            _ => Vec::new(),
        };
    }

    items.iter().flat_map(extract_vertices).collect()
}

pub fn to_intensity_curves(event_id: i64, contours: &[(f64, Value)]) -> Vec<IntensityCurve> {
    contours
        .iter()
        .map(|(intensity, coordinates)| IntensityCurve {
            event_id,
            intensity: *intensity,
            coordinates: coordinates.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_contour_url_extracts_first_match() {
        let text = r#"{"contents":"...\"url\":\"https://earthquake.usgs.gov/product/shakemap/foo/bar/cont_mmi.json\"..."}"#;
        let found = find_contour_url(text).unwrap();
        assert!(found.ends_with("cont_mmi.json"));
    }

    #[test]
    fn find_contour_url_returns_none_when_absent() {
        assert_eq!(find_contour_url("no contours here"), None);
    }

    #[test]
    fn extract_vertices_walks_polygon_rings() {
        let polygon = serde_json::json!([[[1.0, 2.0], [3.0, 4.0], [1.0, 2.0]]]);
        let vertices = extract_vertices(&polygon);
        assert_eq!(vertices, vec![(1.0, 2.0), (3.0, 4.0), (1.0, 2.0)]);
    }

    #[test]
    fn extract_vertices_handles_empty_input() {
        assert_eq!(extract_vertices(&Value::Null), Vec::<(f64, f64)>::new());
    }

    #[test]
    fn to_intensity_curves_pairs_each_contour_with_event_id() {
        let contours = vec![(4.0, serde_json::json!([[1.0, 2.0]])), (5.0, serde_json::json!([[3.0, 4.0]]))];
        let curves = to_intensity_curves(42, &contours);
        assert_eq!(curves.len(), 2);
        assert_eq!(curves[0].event_id, 42);
        assert_eq!(curves[1].intensity, 5.0);
    }
}
