//! The protocol adapter: resolves `tile://` URLs issued by the rendering
//! client into tile bytes.
//!
//! Every failure path terminates in an empty payload. The rendering client
//! shows a blank tile; it never sees an error.

use std::time::Instant;

use log::{info, warn};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

use crate::geom::TileCoord;
use crate::index::SpatialIndexManager;
use crate::layer::{LayerConfig, LayerRegistry, LayerSet};
use crate::metrics::{MetricsCollector, TileMetric};
use crate::render::{ClientRenderer, DelegatedRenderer, RenderStrategy};
use crate::{Error, TileRenderer};

/// URL scheme the adapter is registered for with the rendering client.
pub const TILE_SCHEME: &str = "tile";

/// A parsed `tile://<layer>/<z>/<x>/<y>.<ext>` request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileRequest {
    pub layer_id: String,
    pub coord: TileCoord,
}

impl TileRequest {
    /// Parses a tile URL. The extension is accepted but ignored.
    pub fn parse(url: &str) -> Result<TileRequest, Error> {
        let rest = url
            .strip_prefix(TILE_SCHEME)
            .and_then(|rest| rest.strip_prefix("://"))
            .ok_or_else(|| Error::Parse(format!("expected a {}:// url: '{}'", TILE_SCHEME, url)))?;

        let mut segments = rest.split('/');
        let layer_id = match segments.next() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(Error::Parse(format!("missing layer id: '{}'", url))),
        };
        let z = parse_segment(segments.next(), url)?;
        let x = parse_segment(segments.next(), url)?;
        let y_segment = segments
            .next()
            .ok_or_else(|| Error::Parse(format!("missing tile row: '{}'", url)))?;
        if segments.next().is_some() {
            return Err(Error::Parse(format!("trailing path segments: '{}'", url)));
        }
        let y_stem = y_segment.split('.').next().unwrap_or(y_segment);
        let y = parse_segment(Some(y_stem), url)?;

        Ok(TileRequest {
            layer_id,
            coord: TileCoord::new(z, x, y)?,
        })
    }
}

fn parse_segment<T: std::str::FromStr>(segment: Option<&str>, url: &str) -> Result<T, Error> {
    segment
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Parse(format!("bad tile coordinate in '{}'", url)))
}

/// Options for assembling a [`TileService`].
#[derive(Clone, Debug)]
pub struct TileServiceBuilder {
    default_strategy: RenderStrategy,
    spatial_index: bool,
}

impl Default for TileServiceBuilder {
    fn default() -> Self {
        TileServiceBuilder {
            default_strategy: RenderStrategy::Delegated,
            spatial_index: true,
        }
    }
}

impl TileServiceBuilder {
    /// Strategy used by layers without their own override.
    pub fn default_strategy(mut self, strategy: RenderStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Initial state of the global spatial-index toggle.
    pub fn spatial_index(mut self, enabled: bool) -> Self {
        self.spatial_index = enabled;
        self
    }

    /// Builds the service over an existing pool.
    pub fn build(self, pool: PgPool) -> TileService {
        TileService {
            pool,
            layers: LayerRegistry::new(),
            metrics: MetricsCollector::new(),
            index: SpatialIndexManager::new(self.spatial_index),
            default_strategy: self.default_strategy,
            delegated: DelegatedRenderer,
            client: ClientRenderer,
        }
    }

    /// Connects a new pool and builds the service over it. Every new
    /// connection loads the spatial capability before it serves a query.
    pub async fn connect(self, url: &str) -> Result<TileService, Error> {
        let pool = PgPoolOptions::new()
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("CREATE EXTENSION IF NOT EXISTS postgis").await?;
                    Ok(())
                })
            })
            .connect(url)
            .await
            .map_err(Error::Connection)?;
        Ok(self.build(pool))
    }
}

/// The tile pipeline's owning context: pool, active layer set, metrics,
/// index manager and both renderers, constructed explicitly and shared by
/// cloning nothing global.
pub struct TileService {
    pool: PgPool,
    layers: LayerRegistry,
    metrics: MetricsCollector,
    index: SpatialIndexManager,
    default_strategy: RenderStrategy,
    delegated: DelegatedRenderer,
    client: ClientRenderer,
}

impl TileService {
    pub fn builder() -> TileServiceBuilder {
        TileServiceBuilder::default()
    }

    /// Builds a service with default options over an existing pool.
    pub fn new(pool: PgPool) -> TileService {
        TileService::builder().build(pool)
    }

    /// Connects with default options.
    pub async fn connect(url: &str) -> Result<TileService, Error> {
        TileService::builder().connect(url).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn layers(&self) -> &LayerRegistry {
        &self.layers
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn index_manager(&self) -> &SpatialIndexManager {
        &self.index
    }

    /// Lifecycle hook: a map layer was added. Registers its configuration
    /// and attaches a spatial index when indexing is enabled.
    pub async fn register_layer(&self, id: &str, config: LayerConfig) {
        let table = config.table.clone();
        let column = config.geometry_column.clone();
        self.layers.register(id, config);
        if let Some(name) = self.index.ensure_index(&self.pool, &table, &column).await {
            self.layers.attach_index(id, &name);
        }
    }

    /// Registers every layer of a declared layer set.
    pub async fn register_layer_set(&self, set: LayerSet) {
        for source in set.layers {
            self.register_layer(&source.id, source.config).await;
        }
    }

    /// Lifecycle hook: a map layer was removed. Drops its configuration
    /// and, best-effort, any index attached to it. A query already running
    /// for this layer is not cancelled; its result is simply discarded by
    /// the client.
    pub async fn unregister_layer(&self, id: &str) {
        if let Some(config) = self.layers.unregister(id) {
            if let Some(name) = config.index_name {
                self.index.drop_index(&self.pool, &name).await;
            }
        }
    }

    /// Flips the global spatial-index toggle across all registered layers.
    pub async fn set_spatial_index_enabled(&self, enabled: bool) {
        self.index.set_enabled(&self.pool, &self.layers, enabled).await;
    }

    /// Serves one tile request. Always returns a payload: tile bytes, or
    /// zero bytes on any failure.
    pub async fn handle_tile_request(&self, url: &str) -> Vec<u8> {
        match self.try_handle(url).await {
            Ok(data) => data,
            Err(e) => {
                warn!("tile request '{}' failed, serving empty tile: {}", url, e);
                Vec::new()
            }
        }
    }

    async fn try_handle(&self, url: &str) -> Result<Vec<u8>, Error> {
        let request = TileRequest::parse(url)?;
        let config = self
            .layers
            .get(&request.layer_id)
            .ok_or_else(|| Error::ConfigMissing(request.layer_id.clone()))?;
        let strategy = config.strategy.unwrap_or(self.default_strategy);

        let started = Instant::now();
        let mut conn = self.pool.acquire().await.map_err(Error::Connection)?;
        let rendered = self
            .renderer(strategy)
            .render_mvt(&mut conn, &config, request.coord)
            .await?;
        // back to the pool before bookkeeping; error paths release on drop
        drop(conn);

        info!(
            "{} tile {}/{}: {} bytes in {} ms",
            strategy.tag(),
            request.layer_id,
            request.coord,
            rendered.data.len(),
            started.elapsed().as_millis(),
        );
        self.metrics.add(TileMetric::now(
            format!("{}/{}", strategy.tag(), request.coord),
            rendered.fetch_ms,
            rendered.convert_ms,
            rendered.feature_count,
            rendered.data.len(),
        ));
        Ok(rendered.data)
    }

    fn renderer(&self, strategy: RenderStrategy) -> &dyn TileRenderer {
        match strategy {
            RenderStrategy::Delegated => &self.delegated,
            RenderStrategy::Client => &self.client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_urls() {
        let request = TileRequest::parse("tile://roads/10/909/403.mvt").unwrap();
        assert_eq!(request.layer_id, "roads");
        assert_eq!(request.coord, TileCoord::new(10, 909, 403).unwrap());

        // extension is optional
        let request = TileRequest::parse("tile://roads/0/0/0").unwrap();
        assert_eq!(request.coord, TileCoord::new(0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_malformed_urls() {
        for url in [
            "",
            "roads/10/909/403.mvt",
            "http://roads/10/909/403.mvt",
            "tile:///10/909/403.mvt",
            "tile://roads/10/909",
            "tile://roads/10/909/403.mvt/extra",
            "tile://roads/abc/909/403.mvt",
            "tile://roads/10/-1/403.mvt",
            "tile://roads/10/909/x.mvt",
        ] {
            assert!(
                matches!(TileRequest::parse(url), Err(Error::Parse(_))),
                "accepted: {}",
                url
            );
        }
    }

    #[test]
    fn test_parse_rejects_out_of_grid_coords() {
        assert!(TileRequest::parse("tile://roads/1/2/0.mvt").is_err());
        assert!(TileRequest::parse("tile://roads/1/0/2.mvt").is_err());
    }
}
