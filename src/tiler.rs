//! Ephemeral client-side tiling: projects one request's features into tile
//! pixel space at a single zoom level and extracts the exact tile slice.
//!
//! The index lives for one tile request only, so it is built for the
//! requested zoom alone; asking it for any other zoom yields nothing.

use geojson::Value as GeoValue;
use log::{debug, warn};
use serde_json::Value as JsonValue;

use crate::feature::FeatureRecord;
use crate::geom::TileCoord;
use crate::query::DELEGATED_FEATURE_LIMIT;
use crate::{TILE_BUFFER, TILE_EXTENT};

/// A feature's geometry projected into global pixel space at one zoom.
#[derive(Clone, Debug)]
enum ProjectedGeometry {
    Points(Vec<[f64; 2]>),
    Lines(Vec<Vec<[f64; 2]>>),
    /// Flattened rings; orientation separates exterior from interior.
    Polygons(Vec<Vec<[f64; 2]>>),
}

#[derive(Clone, Copy, Debug)]
struct Bbox {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl Bbox {
    fn empty() -> Self {
        Bbox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    fn expand(&mut self, p: [f64; 2]) {
        self.min_x = self.min_x.min(p[0]);
        self.min_y = self.min_y.min(p[1]);
        self.max_x = self.max_x.max(p[0]);
        self.max_y = self.max_y.max(p[1]);
    }

    fn intersects(&self, other: &Bbox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    fn contains(&self, p: [f64; 2]) -> bool {
        p[0] >= self.min_x && p[0] <= self.max_x && p[1] >= self.min_y && p[1] <= self.max_y
    }
}

struct IndexedFeature {
    geometry: ProjectedGeometry,
    bbox: Bbox,
    properties: Vec<(String, JsonValue)>,
}

/// Geometry of one feature clipped into tile-local integer coordinates.
#[derive(Clone, Debug, PartialEq)]
pub enum SlicedGeometry {
    Points(Vec<[i32; 2]>),
    Lines(Vec<Vec<[i32; 2]>>),
    Polygons(Vec<Vec<[i32; 2]>>),
}

/// One feature of an extracted tile slice.
#[derive(Clone, Debug)]
pub struct SlicedFeature {
    pub geometry: SlicedGeometry,
    pub properties: Vec<(String, JsonValue)>,
}

/// The features of exactly one tile, ready for encoding.
#[derive(Default)]
pub struct TileSlice {
    pub features: Vec<SlicedFeature>,
}

/// Single-zoom tiling index over one request's features.
pub struct TileIndex {
    zoom: u8,
    features: Vec<IndexedFeature>,
}

impl TileIndex {
    /// Projects the feature set into pixel space at `zoom`.
    pub fn build(features: Vec<FeatureRecord>, zoom: u8) -> TileIndex {
        let scale = (1u64 << zoom) as f64 * f64::from(TILE_EXTENT);
        let features = features
            .into_iter()
            .filter_map(|record| index_feature(record, scale))
            .collect();
        TileIndex { zoom, features }
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Extracts the slice for `coord`, clipping every intersecting feature
    /// to the tile window (extent plus buffer) in tile-local coordinates.
    ///
    /// The index only answers for the zoom it was built at.
    pub fn extract(&self, coord: TileCoord) -> Option<TileSlice> {
        if coord.z != self.zoom {
            debug!("tile {} requested from a zoom-{} index", coord, self.zoom);
            return None;
        }
        let extent = f64::from(TILE_EXTENT);
        let buffer = f64::from(TILE_BUFFER);
        let origin = [f64::from(coord.x) * extent, f64::from(coord.y) * extent];
        let window = Bbox {
            min_x: origin[0] - buffer,
            min_y: origin[1] - buffer,
            max_x: origin[0] + extent + buffer,
            max_y: origin[1] + extent + buffer,
        };

        let mut slice = TileSlice::default();
        for feature in &self.features {
            if slice.features.len() >= DELEGATED_FEATURE_LIMIT as usize {
                warn!(
                    "tile {}: feature cap {} reached, truncating",
                    coord, DELEGATED_FEATURE_LIMIT
                );
                break;
            }
            if !feature.bbox.intersects(&window) {
                continue;
            }
            let geometry = match &feature.geometry {
                ProjectedGeometry::Points(points) => {
                    let kept: Vec<[i32; 2]> = points
                        .iter()
                        .filter(|p| window.contains(**p))
                        .map(|p| to_local(*p, origin))
                        .collect();
                    if kept.is_empty() {
                        continue;
                    }
                    SlicedGeometry::Points(kept)
                }
                ProjectedGeometry::Lines(lines) => {
                    let kept: Vec<Vec<[i32; 2]>> = lines
                        .iter()
                        .flat_map(|line| clip_line(line, &window))
                        .map(|part| part.into_iter().map(|p| to_local(p, origin)).collect())
                        .collect();
                    if kept.is_empty() {
                        continue;
                    }
                    SlicedGeometry::Lines(kept)
                }
                ProjectedGeometry::Polygons(rings) => {
                    let kept: Vec<Vec<[i32; 2]>> = rings
                        .iter()
                        .filter_map(|ring| clip_ring(ring, &window))
                        .map(|ring| ring.into_iter().map(|p| to_local(p, origin)).collect())
                        .collect();
                    if kept.is_empty() {
                        continue;
                    }
                    SlicedGeometry::Polygons(kept)
                }
            };
            slice.features.push(SlicedFeature {
                geometry,
                properties: feature.properties.clone(),
            });
        }
        Some(slice)
    }
}

fn to_local(p: [f64; 2], origin: [f64; 2]) -> [i32; 2] {
    [
        (p[0] - origin[0]).round() as i32,
        (p[1] - origin[1]).round() as i32,
    ]
}

/// Web-mercator pixel projection at a fixed zoom scale.
fn project(pos: &[f64], scale: f64) -> Option<[f64; 2]> {
    if pos.len() < 2 {
        return None;
    }
    let (lng, lat) = (pos[0], pos[1]);
    let x = (lng / 360.0 + 0.5) * scale;
    let sin = lat.to_radians().sin();
    let y = if sin >= 1.0 {
        0.0
    } else if sin <= -1.0 {
        scale
    } else {
        (0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * std::f64::consts::PI)) * scale
    };
    Some([x, y.clamp(0.0, scale)])
}

fn project_path(positions: &[Vec<f64>], scale: f64) -> Vec<[f64; 2]> {
    positions
        .iter()
        .filter_map(|pos| project(pos, scale))
        .collect()
}

/// Projects a GeoJSON ring, dropping the redundant closing vertex.
fn project_ring(positions: &[Vec<f64>], scale: f64) -> Vec<[f64; 2]> {
    let open = match (positions.first(), positions.last()) {
        (Some(first), Some(last)) if positions.len() > 1 && first == last => {
            &positions[..positions.len() - 1]
        }
        _ => positions,
    };
    project_path(open, scale)
}

fn index_feature(record: FeatureRecord, scale: f64) -> Option<IndexedFeature> {
    let geometry = match &record.geometry.value {
        GeoValue::Point(pos) => {
            ProjectedGeometry::Points(project(pos, scale).map(|p| vec![p])?)
        }
        GeoValue::MultiPoint(positions) => {
            ProjectedGeometry::Points(project_path(positions, scale))
        }
        GeoValue::LineString(positions) => {
            ProjectedGeometry::Lines(vec![project_path(positions, scale)])
        }
        GeoValue::MultiLineString(lines) => ProjectedGeometry::Lines(
            lines.iter().map(|line| project_path(line, scale)).collect(),
        ),
        GeoValue::Polygon(rings) => ProjectedGeometry::Polygons(
            rings.iter().map(|ring| project_ring(ring, scale)).collect(),
        ),
        GeoValue::MultiPolygon(polygons) => ProjectedGeometry::Polygons(
            polygons
                .iter()
                .flat_map(|rings| rings.iter().map(|ring| project_ring(ring, scale)))
                .collect(),
        ),
        GeoValue::GeometryCollection(_) => {
            debug!("skipping unsupported GeometryCollection feature");
            return None;
        }
    };

    let mut bbox = Bbox::empty();
    match &geometry {
        ProjectedGeometry::Points(points) => points.iter().for_each(|p| bbox.expand(*p)),
        ProjectedGeometry::Lines(lines) | ProjectedGeometry::Polygons(lines) => lines
            .iter()
            .for_each(|part| part.iter().for_each(|p| bbox.expand(*p))),
    }
    if bbox.min_x > bbox.max_x {
        return None;
    }
    Some(IndexedFeature {
        geometry,
        bbox,
        properties: record.properties,
    })
}

/// Clips a polyline to a rectangle, splitting it into the surviving parts.
/// Each segment goes through Liang-Barsky; contiguous survivors stitch back
/// into one part.
fn clip_line(line: &[[f64; 2]], window: &Bbox) -> Vec<Vec<[f64; 2]>> {
    let mut parts: Vec<Vec<[f64; 2]>> = Vec::new();
    let mut current: Vec<[f64; 2]> = Vec::new();
    for segment in line.windows(2) {
        match clip_segment(segment[0], segment[1], window) {
            Some((a, b, exit_clipped)) => {
                if current.is_empty() {
                    current.push(a);
                } else if *current.last().unwrap_or(&a) != a {
                    // re-entered the window: start a new part
                    parts.push(std::mem::take(&mut current));
                    current.push(a);
                }
                current.push(b);
                if exit_clipped {
                    parts.push(std::mem::take(&mut current));
                }
            }
            None => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts.retain(|part| part.len() >= 2);
    parts
}

/// Liang-Barsky segment/rectangle clip. Returns the clipped endpoints and
/// whether the exit end was cut short.
fn clip_segment(
    p0: [f64; 2],
    p1: [f64; 2],
    window: &Bbox,
) -> Option<([f64; 2], [f64; 2], bool)> {
    let (dx, dy) = (p1[0] - p0[0], p1[1] - p0[1]);
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    let checks = [
        (-dx, p0[0] - window.min_x),
        (dx, window.max_x - p0[0]),
        (-dy, p0[1] - window.min_y),
        (dy, window.max_y - p0[1]),
    ];
    for (p, q) in checks {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                if r > t0 {
                    t0 = r;
                }
            } else {
                if r < t0 {
                    return None;
                }
                if r < t1 {
                    t1 = r;
                }
            }
        }
    }
    let a = [p0[0] + t0 * dx, p0[1] + t0 * dy];
    let b = [p0[0] + t1 * dx, p0[1] + t1 * dy];
    Some((a, b, t1 < 1.0))
}

/// Sutherland-Hodgman ring/rectangle clip. Returns `None` when the ring
/// degenerates below a triangle.
fn clip_ring(ring: &[[f64; 2]], window: &Bbox) -> Option<Vec<[f64; 2]>> {
    let mut output = ring.to_vec();
    for edge in 0..4 {
        if output.is_empty() {
            return None;
        }
        let input = std::mem::take(&mut output);
        let n = input.len();
        for i in 0..n {
            let current = input[i];
            let previous = input[(i + n - 1) % n];
            let current_in = inside(current, edge, window);
            let previous_in = inside(previous, edge, window);
            if current_in {
                if !previous_in {
                    output.push(edge_intersect(previous, current, edge, window));
                }
                output.push(current);
            } else if previous_in {
                output.push(edge_intersect(previous, current, edge, window));
            }
        }
    }
    (output.len() >= 3).then_some(output)
}

fn inside(p: [f64; 2], edge: usize, w: &Bbox) -> bool {
    match edge {
        0 => p[0] >= w.min_x,
        1 => p[0] <= w.max_x,
        2 => p[1] >= w.min_y,
        _ => p[1] <= w.max_y,
    }
}

fn edge_intersect(a: [f64; 2], b: [f64; 2], edge: usize, w: &Bbox) -> [f64; 2] {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    match edge {
        0 => {
            let t = (w.min_x - a[0]) / dx;
            [w.min_x, a[1] + t * dy]
        }
        1 => {
            let t = (w.max_x - a[0]) / dx;
            [w.max_x, a[1] + t * dy]
        }
        2 => {
            let t = (w.min_y - a[1]) / dy;
            [a[0] + t * dx, w.min_y]
        }
        _ => {
            let t = (w.max_y - a[1]) / dy;
            [a[0] + t * dx, w.max_y]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point_feature(lng: f64, lat: f64) -> FeatureRecord {
        FeatureRecord {
            geometry: geojson::Geometry::new(GeoValue::Point(vec![lng, lat])),
            properties: vec![("name".to_string(), json!("pin"))],
        }
    }

    fn line_feature(coords: Vec<Vec<f64>>) -> FeatureRecord {
        FeatureRecord {
            geometry: geojson::Geometry::new(GeoValue::LineString(coords)),
            properties: Vec::new(),
        }
    }

    fn polygon_feature(ring: Vec<Vec<f64>>) -> FeatureRecord {
        FeatureRecord {
            geometry: geojson::Geometry::new(GeoValue::Polygon(vec![ring])),
            properties: Vec::new(),
        }
    }

    #[test]
    fn test_point_lands_in_containing_tile() {
        let (x, y) = slippy_map_tilenames::lonlat2tile(139.69, 35.68, 10);
        let index = TileIndex::build(vec![point_feature(139.69, 35.68)], 10);
        let coord = TileCoord::new(10, x, y).unwrap();
        let slice = index.extract(coord).unwrap();
        assert_eq!(slice.features.len(), 1);
        match &slice.features[0].geometry {
            SlicedGeometry::Points(points) => {
                assert_eq!(points.len(), 1);
                let [px, py] = points[0];
                assert!((0..TILE_EXTENT as i32).contains(&px));
                assert!((0..TILE_EXTENT as i32).contains(&py));
            }
            other => panic!("expected a point, got {:?}", other),
        }
    }

    #[test]
    fn test_point_absent_from_distant_tile() {
        let index = TileIndex::build(vec![point_feature(139.69, 35.68)], 10);
        let slice = index.extract(TileCoord::new(10, 0, 0).unwrap()).unwrap();
        assert!(slice.features.is_empty());
    }

    #[test]
    fn test_zoom_mismatch_yields_nothing() {
        let index = TileIndex::build(vec![point_feature(0.0, 0.0)], 10);
        assert!(index.extract(TileCoord::new(9, 0, 0).unwrap()).is_none());
    }

    #[test]
    fn test_line_is_clipped_to_window() {
        // spans the equator across the whole world; tile 1/0/0 sees only
        // its own (buffered) share
        let index = TileIndex::build(
            vec![line_feature(vec![vec![-179.0, 0.01], vec![179.0, 0.01]])],
            1,
        );
        let slice = index.extract(TileCoord::new(1, 0, 0).unwrap()).unwrap();
        assert_eq!(slice.features.len(), 1);
        match &slice.features[0].geometry {
            SlicedGeometry::Lines(lines) => {
                assert_eq!(lines.len(), 1);
                let max = TILE_EXTENT as i32 + TILE_BUFFER as i32;
                for &[px, _] in &lines[0] {
                    assert!(px >= -(TILE_BUFFER as i32) && px <= max, "x={}", px);
                }
            }
            other => panic!("expected lines, got {:?}", other),
        }
    }

    #[test]
    fn test_polygon_is_clipped_to_window() {
        // covers roughly a hemisphere; the clipped ring must stay inside
        // the buffered window and remain a ring
        let index = TileIndex::build(
            vec![polygon_feature(vec![
                vec![-170.0, -70.0],
                vec![170.0, -70.0],
                vec![170.0, 70.0],
                vec![-170.0, 70.0],
                vec![-170.0, -70.0],
            ])],
            2,
        );
        let slice = index.extract(TileCoord::new(2, 1, 1).unwrap()).unwrap();
        assert_eq!(slice.features.len(), 1);
        match &slice.features[0].geometry {
            SlicedGeometry::Polygons(rings) => {
                assert_eq!(rings.len(), 1);
                assert!(rings[0].len() >= 3);
                let lo = -(TILE_BUFFER as i32);
                let hi = TILE_EXTENT as i32 + TILE_BUFFER as i32;
                for &[px, py] in &rings[0] {
                    assert!(px >= lo && px <= hi);
                    assert!(py >= lo && py <= hi);
                }
            }
            other => panic!("expected polygons, got {:?}", other),
        }
    }

    #[test]
    fn test_geometry_collection_is_skipped() {
        let record = FeatureRecord {
            geometry: geojson::Geometry::new(GeoValue::GeometryCollection(Vec::new())),
            properties: Vec::new(),
        };
        let index = TileIndex::build(vec![record], 0);
        assert_eq!(index.feature_count(), 0);
    }

    #[test]
    fn test_clip_segment_passthrough_and_cut() {
        let window = Bbox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 10.0,
            max_y: 10.0,
        };
        let (a, b, cut) = clip_segment([1.0, 1.0], [9.0, 9.0], &window).unwrap();
        assert_eq!((a, b, cut), ([1.0, 1.0], [9.0, 9.0], false));

        let (a, b, cut) = clip_segment([5.0, 5.0], [15.0, 5.0], &window).unwrap();
        assert_eq!(a, [5.0, 5.0]);
        assert_eq!(b, [10.0, 5.0]);
        assert!(cut);

        assert!(clip_segment([20.0, 20.0], [30.0, 20.0], &window).is_none());
    }

    #[test]
    fn test_clip_line_splits_on_reentry() {
        let window = Bbox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 10.0,
            max_y: 10.0,
        };
        // leaves through the right edge and comes back in: two parts
        let line = [
            [2.0, 2.0],
            [14.0, 2.0],
            [14.0, 8.0],
            [2.0, 8.0],
        ];
        let parts = clip_line(&line, &window);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], vec![[2.0, 2.0], [10.0, 2.0]]);
        assert_eq!(parts[1], vec![[10.0, 8.0], [2.0, 8.0]]);
    }

    #[test]
    fn test_clip_ring_corner_overlap() {
        let window = Bbox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 10.0,
            max_y: 10.0,
        };
        let ring = [[5.0, 5.0], [15.0, 5.0], [15.0, 15.0], [5.0, 15.0]];
        let clipped = clip_ring(&ring, &window).unwrap();
        assert!(clipped.len() >= 3);
        for [x, y] in clipped {
            assert!((0.0..=10.0).contains(&x));
            assert!((0.0..=10.0).contains(&y));
        }
        let far_ring = [[20.0, 20.0], [30.0, 20.0], [30.0, 30.0]];
        assert!(clip_ring(&far_ring, &window).is_none());
    }
}
