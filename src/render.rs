//! The two tile encoders behind [`TileRenderer`](crate::TileRenderer):
//! delegated (PostGIS builds the tile in one round trip) and client-side
//! (portable rows are parsed, tiled and encoded here). Given the same data
//! and coordinate both produce tiles with the same features, so a layer can
//! switch strategies without the map changing.

use std::time::Instant;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use sqlx::{PgConnection, Row};

use crate::feature::{features_from_rows, FeatureRecord};
use crate::geom::{simplify_tolerance, tile_to_bounds, TileCoord};
use crate::layer::LayerConfig;
use crate::mvt::vector_tile::tile::GeomType;
use crate::mvt::{encode_lines, encode_points, encode_polygons, encode_tile, LayerBuilder};
use crate::query::{delegated_tile_sql, portable_tile_sql};
use crate::tiler::{SlicedGeometry, TileIndex};
use crate::{Error, TileRenderer, SOURCE_LAYER, TILE_EXTENT};

/// Which encoder serves a layer's requests.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RenderStrategy {
    /// The database returns an already-encoded tile.
    Delegated,
    /// Rows come back as GeoJSON and are tiled client-side.
    Client,
}

impl RenderStrategy {
    /// Tag prefixed to metric tile ids.
    pub fn tag(self) -> &'static str {
        match self {
            RenderStrategy::Delegated => "delegated",
            RenderStrategy::Client => "client",
        }
    }
}

/// One rendered tile plus the per-phase observations metrics want.
#[derive(Clone, Debug)]
pub struct RenderedTile {
    pub data: Vec<u8>,
    pub fetch_ms: u64,
    pub convert_ms: u64,
    /// `-1` when the strategy cannot observe the count.
    pub feature_count: i64,
}

/// Delegated encoder: the whole tile is produced by `ST_AsMVT` in the
/// database and the payload passes through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct DelegatedRenderer;

#[async_trait]
impl TileRenderer for DelegatedRenderer {
    async fn render_mvt(
        &self,
        conn: &mut PgConnection,
        config: &LayerConfig,
        coord: TileCoord,
    ) -> Result<RenderedTile, Error> {
        let sql = delegated_tile_sql(config)?;
        let bounds = tile_to_bounds(coord);
        debug!("tile {} delegated sql: {}", coord, sql);

        let started = Instant::now();
        let row = sqlx::query(&sql)
            .bind(bounds.min_lng)
            .bind(bounds.min_lat)
            .bind(bounds.max_lng)
            .bind(bounds.max_lat)
            .bind(simplify_tolerance(coord.z))
            .fetch_optional(&mut *conn)
            .await?;
        let fetch_ms = started.elapsed().as_millis() as u64;

        let data = match row {
            Some(row) => row.try_get::<Option<Vec<u8>>, _>(0)?.unwrap_or_default(),
            None => Vec::new(),
        };
        Ok(RenderedTile {
            data,
            fetch_ms,
            convert_ms: 0,
            feature_count: -1,
        })
    }
}

/// Client-side encoder: executes the portable-shape query, parses rows
/// into feature records, and tiles/encodes them locally.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClientRenderer;

#[async_trait]
impl TileRenderer for ClientRenderer {
    async fn render_mvt(
        &self,
        conn: &mut PgConnection,
        config: &LayerConfig,
        coord: TileCoord,
    ) -> Result<RenderedTile, Error> {
        let sql = portable_tile_sql(config)?;
        let bounds = tile_to_bounds(coord);
        debug!("tile {} portable sql: {}", coord, sql);

        let started = Instant::now();
        let rows = sqlx::query(&sql)
            .bind(bounds.min_lng)
            .bind(bounds.min_lat)
            .bind(bounds.max_lng)
            .bind(bounds.max_lat)
            .bind(simplify_tolerance(coord.z))
            .fetch_all(&mut *conn)
            .await?;
        let fetch_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let features = features_from_rows(&rows, config);
        let feature_count = features.len() as i64;
        let data = encode_features(features, coord)?;
        let convert_ms = started.elapsed().as_millis() as u64;

        Ok(RenderedTile {
            data,
            fetch_ms,
            convert_ms,
            feature_count,
        })
    }
}

/// Tiles and serializes a feature set for one coordinate.
///
/// An empty feature set, or one whose geometry all falls outside the tile
/// window, yields a zero-length payload rather than an empty tile document.
pub fn encode_features(features: Vec<FeatureRecord>, coord: TileCoord) -> Result<Vec<u8>, Error> {
    if features.is_empty() {
        return Ok(Vec::new());
    }
    let index = TileIndex::build(features, coord.z);
    let slice = index
        .extract(coord)
        .ok_or_else(|| Error::Encoding(format!("no slice for tile {}", coord)))?;
    if slice.features.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = LayerBuilder::new(SOURCE_LAYER, TILE_EXTENT);
    for feature in slice.features {
        let (geom_type, commands) = match &feature.geometry {
            SlicedGeometry::Points(points) => (GeomType::Point, encode_points(points)),
            SlicedGeometry::Lines(lines) => (GeomType::Linestring, encode_lines(lines)),
            SlicedGeometry::Polygons(rings) => (GeomType::Polygon, encode_polygons(rings)),
        };
        builder.add_feature(geom_type, commands, &feature.properties);
    }
    if builder.is_empty() {
        return Ok(Vec::new());
    }
    Ok(encode_tile(builder.build()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_tags() {
        assert_eq!(RenderStrategy::Delegated.tag(), "delegated");
        assert_eq!(RenderStrategy::Client.tag(), "client");
    }

    #[test]
    fn test_strategy_deserializes_lowercase() {
        let strategy: RenderStrategy = serde_yaml::from_str("client").unwrap();
        assert_eq!(strategy, RenderStrategy::Client);
        let strategy: RenderStrategy = serde_yaml::from_str("delegated").unwrap();
        assert_eq!(strategy, RenderStrategy::Delegated);
        assert!(serde_yaml::from_str::<RenderStrategy>("mystery").is_err());
    }

    #[test]
    fn test_encode_features_empty_input() {
        let coord = TileCoord::new(0, 0, 0).unwrap();
        assert!(encode_features(Vec::new(), coord).unwrap().is_empty());
    }
}
