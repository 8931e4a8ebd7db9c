//! Turns portable-shape query rows into feature records.
//!
//! Rows whose geometry is missing or fails to parse are skipped, never
//! fatal: one bad record must not blank an entire tile.

use geojson::{GeoJson, Geometry};
use log::debug;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::layer::LayerConfig;

/// One feature extracted from a portable-shape row: a parsed geometry plus
/// the layer's property columns in declaration order.
#[derive(Clone, Debug)]
pub struct FeatureRecord {
    pub geometry: Geometry,
    pub properties: Vec<(String, Value)>,
}

/// Parses every row of a portable-shape result set, dropping unusable rows.
pub fn features_from_rows(rows: &[PgRow], config: &LayerConfig) -> Vec<FeatureRecord> {
    rows.iter()
        .filter_map(|row| feature_from_row(row, config))
        .collect()
}

fn feature_from_row(row: &PgRow, config: &LayerConfig) -> Option<FeatureRecord> {
    // geometry is always column 0 (see portable_tile_sql)
    let raw = row.try_get::<Option<String>, _>(0).ok().flatten()?;
    let geometry = parse_geometry(&raw)?;
    let mut properties = Vec::with_capacity(config.properties.len());
    for name in &config.properties {
        let value = match row.try_get::<Option<String>, _>(name.as_str()) {
            Ok(Some(text)) => parse_property(&text),
            Ok(None) => Value::Null,
            Err(e) => {
                debug!("property '{}' unreadable, recording null: {}", name, e);
                Value::Null
            }
        };
        properties.push((name.clone(), value));
    }
    Some(FeatureRecord {
        geometry,
        properties,
    })
}

fn parse_geometry(raw: &str) -> Option<Geometry> {
    match raw.parse::<GeoJson>() {
        Ok(GeoJson::Geometry(geometry)) => Some(geometry),
        Ok(_) => {
            debug!("skipping row: expected a bare GeoJSON geometry");
            None
        }
        Err(e) => {
            debug!("skipping row with unparseable geometry: {}", e);
            None
        }
    }
}

/// Interprets a property column's text.
///
/// Values that look object- or array-shaped get a JSON parse so structured
/// columns survive the text cast; everything else stays a raw string.
fn parse_property(text: &str) -> Value {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
    } else {
        Value::String(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_property_scalars() {
        assert_eq!(parse_property("main street"), json!("main street"));
        assert_eq!(parse_property("42"), json!("42"));
        assert_eq!(parse_property(""), json!(""));
    }

    #[test]
    fn test_parse_property_json_shapes() {
        assert_eq!(
            parse_property(r#"{"lanes": 2, "oneway": true}"#),
            json!({"lanes": 2, "oneway": true})
        );
        assert_eq!(parse_property("[1, 2, 3]"), json!([1, 2, 3]));
        assert_eq!(parse_property("  [1, 2]"), json!([1, 2]));
    }

    #[test]
    fn test_parse_property_malformed_json_falls_back() {
        assert_eq!(parse_property("{not json"), json!("{not json"));
        assert_eq!(parse_property("[1, 2"), json!("[1, 2"));
    }

    #[test]
    fn test_parse_geometry() {
        let geometry = parse_geometry(r#"{"type":"Point","coordinates":[139.69,35.68]}"#);
        assert!(matches!(
            geometry.map(|g| g.value),
            Some(geojson::Value::Point(_))
        ));
    }

    #[test]
    fn test_parse_geometry_rejects_non_geometry() {
        assert!(parse_geometry("not geojson at all").is_none());
        assert!(
            parse_geometry(r#"{"type":"FeatureCollection","features":[]}"#).is_none()
        );
    }
}
