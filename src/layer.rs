//! Layer configuration: per-layer table descriptions, YAML layer sets, and
//! the runtime registry consulted on every tile request.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;
use serde::Deserialize;

use crate::render::RenderStrategy;
use crate::Error;

/// Description of one vector layer backed by a PostGIS table.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LayerConfig {
    /// Table holding the layer's records.
    pub table: String,
    /// Column carrying the geometry.
    pub geometry_column: String,
    /// Property columns encoded into each feature, in declaration order.
    #[serde(default)]
    pub properties: Vec<String>,
    /// Schema qualifying `table`; `public` when absent.
    #[serde(default)]
    pub schema: Option<String>,
    /// Per-layer override of the service-wide render strategy.
    #[serde(default)]
    pub strategy: Option<RenderStrategy>,
    /// Spatial index currently attached to this layer, if any. Managed by
    /// the index manager, never read from a layer source document.
    #[serde(skip)]
    pub index_name: Option<String>,
}

/// One entry of a layer set document.
#[derive(Clone, Debug, Deserialize)]
pub struct LayerSource {
    pub id: String,
    #[serde(flatten)]
    pub config: LayerConfig,
}

/// A YAML document declaring a set of layers.
#[derive(Clone, Debug, Deserialize)]
pub struct LayerSet {
    pub layers: Vec<LayerSource>,
}

impl LayerSet {
    /// Parses a layer set from its YAML representation.
    pub fn from_yaml(data: &str) -> Result<LayerSet, Error> {
        Ok(serde_yaml::from_str(data)?)
    }
}

/// The active layer set: layer id to configuration, shared across requests.
///
/// Reads vastly outnumber writes (writes happen only when the rendering
/// client adds or removes a layer), so a `RwLock` over the map suffices.
#[derive(Clone, Default)]
pub struct LayerRegistry {
    inner: Arc<RwLock<HashMap<String, LayerConfig>>>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a layer configuration.
    ///
    /// The stored property list keeps its declaration order but is made
    /// unique, and any entry naming the geometry column itself is dropped:
    /// geometry is never doubled as a feature attribute.
    pub fn register(&self, id: impl Into<String>, mut config: LayerConfig) {
        let id = id.into();
        let mut seen: Vec<String> = Vec::with_capacity(config.properties.len());
        for prop in config.properties.drain(..) {
            if prop == config.geometry_column {
                debug!(
                    "layer '{}': dropping property '{}' shadowing the geometry column",
                    id, prop
                );
            } else if !seen.contains(&prop) {
                seen.push(prop);
            }
        }
        config.properties = seen;
        self.write().insert(id, config);
    }

    /// Removes a layer, returning its configuration (including any attached
    /// index name, which the caller is responsible for releasing).
    pub fn unregister(&self, id: &str) -> Option<LayerConfig> {
        self.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<LayerConfig> {
        self.read().get(id).cloned()
    }

    /// All registered layers, as (id, config) pairs.
    pub fn list(&self) -> Vec<(String, LayerConfig)> {
        self.read()
            .iter()
            .map(|(id, config)| (id.clone(), config.clone()))
            .collect()
    }

    /// Records a spatial index on a layer.
    pub fn attach_index(&self, id: &str, index_name: &str) {
        if let Some(config) = self.write().get_mut(id) {
            config.index_name = Some(index_name.to_string());
        }
    }

    /// Clears a layer's spatial index reference, returning the old name.
    pub fn detach_index(&self, id: &str) -> Option<String> {
        self.write().get_mut(id).and_then(|c| c.index_name.take())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, LayerConfig>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, LayerConfig>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
