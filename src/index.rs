//! Spatial index lifecycle: best-effort GiST indexes accelerating the tile
//! queries, created and dropped as layers come and go.
//!
//! Index failures never fail a tile. A layer without its index still
//! serves, just slower, so every error path here logs and degrades.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use sqlx::PgPool;

use crate::layer::LayerRegistry;
use crate::query::quote_ident;
use crate::Error;

/// Deterministic index name for a table/column pair.
pub fn index_name(table: &str, column: &str) -> String {
    format!("idx_{}_{}", table, column)
}

/// Manages per-layer spatial indexes and the global indexing toggle.
#[derive(Clone)]
pub struct SpatialIndexManager {
    enabled: Arc<AtomicBool>,
}

impl Default for SpatialIndexManager {
    fn default() -> Self {
        SpatialIndexManager::new(true)
    }
}

impl SpatialIndexManager {
    pub fn new(enabled: bool) -> Self {
        SpatialIndexManager {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Makes sure the deterministic index for `table.column` exists.
    ///
    /// Returns `None` when indexing is globally disabled or creation fails;
    /// an existing index is returned as-is without a second creation.
    pub async fn ensure_index(&self, pool: &PgPool, table: &str, column: &str) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }
        match self.create_if_missing(pool, table, column).await {
            Ok(name) => Some(name),
            Err(e) => {
                warn!(
                    "spatial index for {}.{} unavailable, serving unindexed: {}",
                    table, column, e
                );
                None
            }
        }
    }

    async fn create_if_missing(
        &self,
        pool: &PgPool,
        table: &str,
        column: &str,
    ) -> Result<String, Error> {
        let name = index_name(table, column);
        let existing = sqlx::query("SELECT 1 FROM pg_indexes WHERE indexname = $1")
            .bind(&name)
            .fetch_optional(pool)
            .await
            .map_err(Error::Index)?;
        if existing.is_some() {
            debug!("spatial index {} already present", name);
            return Ok(name);
        }
        let sql = format!(
            "CREATE INDEX {} ON {} USING GIST ({})",
            quote_ident(&name)?,
            quote_ident(table)?,
            quote_ident(column)?,
        );
        sqlx::query(&sql).execute(pool).await.map_err(Error::Index)?;
        info!("created spatial index {}", name);
        Ok(name)
    }

    /// Drops an index by name. Best-effort: failure is logged and swallowed.
    pub async fn drop_index(&self, pool: &PgPool, name: &str) {
        let quoted = match quote_ident(name) {
            Ok(quoted) => quoted,
            Err(e) => {
                warn!("refusing to drop index: {}", e);
                return;
            }
        };
        match sqlx::query(&format!("DROP INDEX IF EXISTS {}", quoted))
            .execute(pool)
            .await
        {
            Ok(_) => info!("dropped spatial index {}", name),
            Err(e) => warn!("failed to drop spatial index {}: {}", name, e),
        }
    }

    /// Flips the global toggle, walking every registered layer.
    ///
    /// Disabling drops each layer's attached index and clears its
    /// reference; enabling creates missing indexes and attaches them.
    /// Layers are handled one at a time, and one layer's failure never
    /// stops the rest: a partially indexed layer set is a valid end state.
    pub async fn set_enabled(&self, pool: &PgPool, registry: &LayerRegistry, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        for (id, config) in registry.list() {
            if enabled {
                if let Some(name) = self
                    .ensure_index(pool, &config.table, &config.geometry_column)
                    .await
                {
                    registry.attach_index(&id, &name);
                }
            } else if let Some(name) = registry.detach_index(&id) {
                self.drop_index(pool, &name).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name_deterministic() {
        assert_eq!(index_name("roads", "geom"), "idx_roads_geom");
        assert_eq!(index_name("roads", "geom"), index_name("roads", "geom"));
    }

    #[test]
    fn test_toggle_flag() {
        let manager = SpatialIndexManager::new(true);
        assert!(manager.is_enabled());
        let manager = SpatialIndexManager::new(false);
        assert!(!manager.is_enabled());
    }

    #[tokio::test]
    async fn test_ensure_index_noop_when_disabled() {
        // a lazy pool never connects; the disabled check must short-circuit
        // before any round trip
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unreachable")
            .unwrap();
        let manager = SpatialIndexManager::new(false);
        assert_eq!(manager.ensure_index(&pool, "roads", "geom").await, None);
    }
}
