//! Client-side Mapbox Vector Tile encoding.
//!
//! Builds the single source-layer tile the client-side encoder serializes:
//! geometry
//! command streams with zig-zag deltas, plus the layer-wide key/value
//! dictionaries deduplicated through insertion-ordered sets.

pub mod vector_tile;

use indexmap::IndexSet;
use prost::Message;
use serde_json::Value as JsonValue;

use vector_tile::tile::{Feature, GeomType, Layer, Value};
use vector_tile::Tile;

const MOVE_TO: u32 = 1;
const LINE_TO: u32 = 2;
const CLOSE_PATH: u32 = 7;

#[inline]
fn command(id: u32, count: u32) -> u32 {
    id | (count << 3)
}

#[inline]
fn zigzag(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

/// Encodes point geometry: one MoveTo carrying every point.
pub fn encode_points(points: &[[i32; 2]]) -> Vec<u32> {
    if points.is_empty() {
        return Vec::new();
    }
    let mut buf = Vec::with_capacity(1 + points.len() * 2);
    buf.push(command(MOVE_TO, points.len() as u32));
    let (mut px, mut py) = (0, 0);
    for &[x, y] in points {
        buf.push(zigzag(x - px));
        buf.push(zigzag(y - py));
        (px, py) = (x, y);
    }
    buf
}

/// Encodes linestring geometry: MoveTo + LineTo per part.
pub fn encode_lines(lines: &[Vec<[i32; 2]>]) -> Vec<u32> {
    let mut buf = Vec::new();
    let mut cursor = (0, 0);
    for line in lines {
        encode_path(&mut buf, line, &mut cursor, false);
    }
    buf
}

/// Encodes polygon geometry: MoveTo + LineTo + ClosePath per ring.
///
/// Rings arrive without a closing vertex; orientation distinguishes
/// exterior from interior rings on the decoding side.
pub fn encode_polygons(rings: &[Vec<[i32; 2]>]) -> Vec<u32> {
    let mut buf = Vec::new();
    let mut cursor = (0, 0);
    for ring in rings {
        encode_path(&mut buf, ring, &mut cursor, true);
    }
    buf
}

fn encode_path(buf: &mut Vec<u32>, path: &[[i32; 2]], cursor: &mut (i32, i32), close: bool) {
    let Some(&[first_x, first_y]) = path.first() else {
        return;
    };
    buf.push(command(MOVE_TO, 1));
    buf.push(zigzag(first_x - cursor.0));
    buf.push(zigzag(first_y - cursor.1));
    *cursor = (first_x, first_y);

    let lineto_pos = buf.len();
    buf.push(LINE_TO); // count patched below
    let mut count = 0;
    for &[x, y] in &path[1..] {
        let (dx, dy) = (x - cursor.0, y - cursor.1);
        // duplicate vertices collapse after rounding to the tile grid
        if dx != 0 || dy != 0 {
            buf.push(zigzag(dx));
            buf.push(zigzag(dy));
            *cursor = (x, y);
            count += 1;
        }
    }
    if count == 0 {
        // single-vertex remnant: repeat the point so the part stays valid
        buf.extend([0, 0]);
        count = 1;
    }
    buf[lineto_pos] = command(LINE_TO, count);
    if close {
        buf.push(command(CLOSE_PATH, 1));
    }
}

/// Hashable stand-in for `tile::Value`, keyed into the value dictionary.
/// Doubles are compared by bit pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum TagValue {
    String(String),
    Double([u8; 8]),
    Int(i64),
    Uint(u64),
    Bool(bool),
}

impl TagValue {
    /// Maps a property value into the MVT value space. Nulls are dropped;
    /// nested objects and arrays are carried as their JSON text.
    fn from_json(value: &JsonValue) -> Option<TagValue> {
        match value {
            JsonValue::Null => None,
            JsonValue::Bool(b) => Some(TagValue::Bool(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= 0 {
                        Some(TagValue::Uint(i as u64))
                    } else {
                        Some(TagValue::Int(i))
                    }
                } else if let Some(u) = n.as_u64() {
                    Some(TagValue::Uint(u))
                } else {
                    n.as_f64().map(|f| TagValue::Double(f.to_ne_bytes()))
                }
            }
            JsonValue::String(s) => Some(TagValue::String(s.clone())),
            nested => Some(TagValue::String(nested.to_string())),
        }
    }

    fn into_tile_value(self) -> Value {
        match self {
            TagValue::String(v) => Value {
                string_value: Some(v),
                ..Default::default()
            },
            TagValue::Double(v) => Value {
                double_value: Some(f64::from_ne_bytes(v)),
                ..Default::default()
            },
            TagValue::Int(v) => Value {
                int_value: Some(v),
                ..Default::default()
            },
            TagValue::Uint(v) => Value {
                uint_value: Some(v),
                ..Default::default()
            },
            TagValue::Bool(v) => Value {
                bool_value: Some(v),
                ..Default::default()
            },
        }
    }
}

/// Accumulates one tile layer: features plus shared key/value dictionaries.
pub struct LayerBuilder {
    name: String,
    extent: u32,
    keys: IndexSet<String>,
    values: IndexSet<TagValue>,
    features: Vec<Feature>,
}

impl LayerBuilder {
    pub fn new(name: impl Into<String>, extent: u32) -> Self {
        LayerBuilder {
            name: name.into(),
            extent,
            keys: IndexSet::new(),
            values: IndexSet::new(),
            features: Vec::new(),
        }
    }

    /// Adds a feature with an already-encoded geometry command stream.
    /// Features with empty geometry are dropped.
    pub fn add_feature(
        &mut self,
        geom_type: GeomType,
        geometry: Vec<u32>,
        properties: &[(String, JsonValue)],
    ) {
        if geometry.is_empty() {
            return;
        }
        let mut tags = Vec::with_capacity(properties.len() * 2);
        for (key, value) in properties {
            let Some(tag_value) = TagValue::from_json(value) else {
                continue;
            };
            let key_idx = self.keys.insert_full(key.clone()).0;
            let value_idx = self.values.insert_full(tag_value).0;
            tags.push(key_idx as u32);
            tags.push(value_idx as u32);
        }
        let mut feature = Feature {
            id: None,
            tags,
            r#type: None,
            geometry,
        };
        feature.set_type(geom_type);
        self.features.push(feature);
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn build(self) -> Layer {
        Layer {
            version: 2,
            name: self.name,
            features: self.features,
            keys: self.keys.into_iter().collect(),
            values: self
                .values
                .into_iter()
                .map(TagValue::into_tile_value)
                .collect(),
            extent: Some(self.extent),
        }
    }
}

/// Serializes a single-layer tile to its wire bytes.
pub fn encode_tile(layer: Layer) -> Vec<u8> {
    Tile {
        layers: vec![layer],
    }
    .encode_to_vec()
}
