//! Compiles the spatially-filtered, zoom-adapted SQL for a layer and tile.
//!
//! Two shapes are produced: a delegated shape that has PostGIS encode the
//! tile (`ST_AsMVT`), and a portable shape returning GeoJSON text plus
//! property columns for client-side tiling. Both share the same filter and
//! simplification so the strategies stay interchangeable.
//!
//! All four envelope values and the simplification tolerance are bound as
//! `$1`..`$5`; no numeric value is ever formatted into the statement text.
//! Table, schema and column names pass a strict allow-list before being
//! quoted.

use crate::layer::LayerConfig;
use crate::{Error, SOURCE_LAYER, TILE_BUFFER, TILE_EXTENT};

/// Hard cap on features per delegated tile, bounding tile size.
pub const DELEGATED_FEATURE_LIMIT: u32 = 10_000;

/// Quotes an SQL identifier, rejecting anything outside
/// `[A-Za-z_][A-Za-z0-9_]*`.
///
/// Identifiers come from layer configuration, which is caller-supplied, so
/// they get the same suspicion as request input.
pub fn quote_ident(ident: &str) -> Result<String, Error> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(format!("\"{}\"", ident))
    } else {
        Err(Error::Identifier(ident.to_string()))
    }
}

/// Schema-qualified, quoted table reference for a layer.
fn qualified_table(config: &LayerConfig) -> Result<String, Error> {
    let schema = quote_ident(config.schema.as_deref().unwrap_or("public"))?;
    let table = quote_ident(&config.table)?;
    Ok(format!("{}.{}", schema, table))
}

/// The shared spatial filter: geometry intersects the bound tile envelope.
fn intersects_filter(geom: &str) -> String {
    format!(
        "ST_Intersects(t.{}, ST_MakeEnvelope($1, $2, $3, $4, 4326))",
        geom
    )
}

/// Builds the delegated-shape statement: a single pre-encoded tile column.
///
/// Geometries are simplified at the bound tolerance, transformed into tile
/// pixel space by `ST_AsMVTGeom`, and capped at
/// [`DELEGATED_FEATURE_LIMIT`] rows; rows whose encoded geometry collapses
/// to NULL are discarded before aggregation.
pub fn delegated_tile_sql(config: &LayerConfig) -> Result<String, Error> {
    let geom = quote_ident(&config.geometry_column)?;
    let table = qualified_table(config)?;
    let mut columns = vec![format!(
        "ST_AsMVTGeom(ST_SimplifyPreserveTopology(t.{geom}, $5), \
         ST_MakeEnvelope($1, $2, $3, $4, 4326), {extent}, {buffer}, true) AS mvtgeom",
        geom = geom,
        extent = TILE_EXTENT,
        buffer = TILE_BUFFER,
    )];
    for prop in &config.properties {
        columns.push(format!("t.{}", quote_ident(prop)?));
    }
    Ok(format!(
        "SELECT ST_AsMVT(tile, '{layer}', {extent}, 'mvtgeom') FROM (\
         SELECT {columns} FROM {table} t WHERE {filter} LIMIT {limit}\
         ) tile WHERE tile.mvtgeom IS NOT NULL",
        layer = SOURCE_LAYER,
        extent = TILE_EXTENT,
        columns = columns.join(", "),
        table = table,
        filter = intersects_filter(&geom),
        limit = DELEGATED_FEATURE_LIMIT,
    ))
}

/// Builds the portable-shape statement: GeoJSON text plus properties.
///
/// The geometry lands in column 0 as GeoJSON after the same simplification
/// and filter as the delegated shape; each property column is cast to text
/// (json/jsonb columns serialize to their JSON text). No row cap here: the
/// client-side tiler enforces its own limits.
pub fn portable_tile_sql(config: &LayerConfig) -> Result<String, Error> {
    let geom = quote_ident(&config.geometry_column)?;
    let table = qualified_table(config)?;
    let mut columns = vec![format!(
        "ST_AsGeoJSON(ST_SimplifyPreserveTopology(t.{}, $5)) AS geojson",
        geom
    )];
    for prop in &config.properties {
        let quoted = quote_ident(prop)?;
        columns.push(format!("t.{q}::text AS {q}", q = quoted));
    }
    Ok(format!(
        "SELECT {columns} FROM {table} t WHERE {filter}",
        columns = columns.join(", "),
        table = table,
        filter = intersects_filter(&geom),
    ))
}
