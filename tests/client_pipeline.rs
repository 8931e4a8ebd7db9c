//! Client-side encoding exercised end to end without a database: feature
//! records in, decoded Mapbox Vector Tile out.

use prost::Message;
use serde_json::json;

use tilesmith::feature::FeatureRecord;
use tilesmith::mvt::vector_tile::tile::GeomType;
use tilesmith::mvt::vector_tile::Tile;
use tilesmith::render::encode_features;
use tilesmith::{tile_to_bounds, TileCoord, SOURCE_LAYER};

fn geometry(geojson_text: &str) -> geojson::Geometry {
    match geojson_text.parse::<geojson::GeoJson>() {
        Ok(geojson::GeoJson::Geometry(geometry)) => geometry,
        other => panic!("fixture is not a bare geometry: {:?}", other),
    }
}

fn tokyo_point() -> FeatureRecord {
    FeatureRecord {
        geometry: geometry(r#"{"type":"Point","coordinates":[139.69,35.68]}"#),
        properties: vec![("name".to_string(), json!("tokyo"))],
    }
}

/// The tile containing the fixture point at zoom 10.
fn containing_tile() -> TileCoord {
    let (x, y) = slippy_map_tilenames::lonlat2tile(139.69, 35.68, 10);
    TileCoord::new(10, x, y).unwrap()
}

#[test]
fn point_feature_round_trips_through_client_encoding() {
    let coord = containing_tile();
    assert!(tile_to_bounds(coord).contains(139.69, 35.68));

    let bytes = encode_features(vec![tokyo_point()], coord).unwrap();
    assert!(!bytes.is_empty());

    let tile = Tile::decode(bytes.as_slice()).unwrap();
    assert_eq!(tile.layers.len(), 1);
    let layer = &tile.layers[0];
    assert_eq!(layer.name, SOURCE_LAYER);
    assert_eq!(layer.version, 2);
    assert_eq!(layer.features.len(), 1);
    assert_eq!(layer.features[0].r#type(), GeomType::Point);
    assert_eq!(layer.keys, vec!["name"]);
    assert_eq!(layer.values[0].string_value.as_deref(), Some("tokyo"));
}

#[test]
fn zero_features_yield_zero_length_payload() {
    let bytes = encode_features(Vec::new(), containing_tile()).unwrap();
    assert!(bytes.is_empty());
}

#[test]
fn features_outside_the_tile_yield_zero_length_payload() {
    // the fixture sits in Tokyo; ask for a Paris tile at the same zoom
    let (x, y) = slippy_map_tilenames::lonlat2tile(2.35, 48.85, 10);
    let coord = TileCoord::new(10, x, y).unwrap();
    let bytes = encode_features(vec![tokyo_point()], coord).unwrap();
    assert!(bytes.is_empty());
}

#[test]
fn mixed_geometry_types_encode_with_their_own_types() {
    let coord = TileCoord::new(0, 0, 0).unwrap();
    let features = vec![
        tokyo_point(),
        FeatureRecord {
            geometry: geometry(
                r#"{"type":"LineString","coordinates":[[-10.0,0.0],[10.0,5.0]]}"#,
            ),
            properties: vec![("kind".to_string(), json!("route"))],
        },
        FeatureRecord {
            geometry: geometry(
                r#"{"type":"Polygon","coordinates":[[[0.0,0.0],[20.0,0.0],[20.0,20.0],[0.0,20.0],[0.0,0.0]]]}"#,
            ),
            properties: vec![("kind".to_string(), json!("zone"))],
        },
    ];
    let bytes = encode_features(features, coord).unwrap();
    let tile = Tile::decode(bytes.as_slice()).unwrap();
    let layer = &tile.layers[0];
    assert_eq!(layer.features.len(), 3);
    let mut types: Vec<GeomType> = layer.features.iter().map(|f| f.r#type()).collect();
    types.sort();
    assert_eq!(
        types,
        vec![GeomType::Point, GeomType::Linestring, GeomType::Polygon]
    );
}
