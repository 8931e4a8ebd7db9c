//! # Tilesmith
//!
//! A tile request pipeline over PostGIS: point a rendering client's
//! `tile://` requests at a [`TileService`](protocol::TileService) and it
//! turns each `layer/z/x/y` coordinate into a spatially-filtered query and
//! a Mapbox Vector Tile payload.
//!
//! ## Current features
//!
//! Given a PostGIS database and a set of layer configurations (declared in
//! code or as a YAML layer set), this crate serves MVT tiles through either
//! of two interchangeable encoders: a delegated path where PostGIS encodes
//! the tile in a single round trip (`ST_AsMVT`), and a client-side path
//! that fetches portable GeoJSON rows and performs the tiling and encoding
//! itself. Layers can pin a strategy; everything else follows the service
//! default. Spatial GiST indexes are managed per layer, best-effort, behind
//! a global toggle.
//!
//! ## Known limitations
//!
//! The database is assumed to store geometries in EPSG:4326; projection
//! configuration is not currently exposed. Tile payloads are returned
//! uncompressed, and there is no tile cache: every request reaches the
//! database. The trait-based design allows for further encoders (other
//! engines, other formats) to be added without touching the protocol
//! adapter.

use async_trait::async_trait;

use sqlx::PgConnection;

pub mod error;
pub mod feature;
pub mod geom;
pub mod index;
pub mod layer;
pub mod metrics;
pub mod mvt;
pub mod protocol;
pub mod query;
pub mod render;
pub mod tiler;

pub use error::Error;
pub use geom::{simplify_tolerance, tile_to_bounds, TileBounds, TileCoord};
pub use layer::{LayerConfig, LayerRegistry, LayerSet};
pub use metrics::{MetricsCollector, MetricsSummary, TileMetric};
pub use protocol::{TileRequest, TileService, TileServiceBuilder, TILE_SCHEME};
pub use render::{ClientRenderer, DelegatedRenderer, RenderStrategy, RenderedTile};

/// Tile-local coordinate extent used by both encoders.
pub const TILE_EXTENT: u32 = 4096;

/// Pixel margin kept around the tile by both encoders, so strokes crossing
/// the edge render without seams.
pub const TILE_BUFFER: u32 = 64;

/// The source-layer name carried by every tile; the rendering client binds
/// its styles against this single name.
pub const SOURCE_LAYER: &str = "v";

/// The tile encoder capability. Both strategies implement it, and the
/// protocol adapter picks one per request, so further encoders are an
/// additional implementation rather than a new branch.
#[async_trait]
pub trait TileRenderer {
    /// Renders the Mapbox vector tile for one layer at a slippy-map
    /// coordinate, reporting timing and size observations alongside the
    /// payload.
    async fn render_mvt(
        &self,
        conn: &mut PgConnection,
        config: &layer::LayerConfig,
        coord: geom::TileCoord,
    ) -> Result<render::RenderedTile, Error>;
}
