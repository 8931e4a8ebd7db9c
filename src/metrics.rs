//! Bounded per-tile performance history.
//!
//! Appends happen in request completion order under concurrency; no
//! ordering guarantee beyond insertion order of the surviving window.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;

/// Number of most-recent records retained.
pub const METRICS_CAPACITY: usize = 100;

/// Timing and size record for one served tile.
#[derive(Clone, Debug, PartialEq)]
pub struct TileMetric {
    /// Strategy tag plus tile address, e.g. `delegated/10/909/403`.
    pub tile_id: String,
    pub fetch_ms: u64,
    pub convert_ms: u64,
    pub total_ms: u64,
    /// `-1` when the strategy cannot observe the count.
    pub feature_count: i64,
    pub tile_size: usize,
    pub timestamp_ms: i64,
}

impl TileMetric {
    /// Stamps a record with the current wall-clock time.
    pub fn now(
        tile_id: String,
        fetch_ms: u64,
        convert_ms: u64,
        feature_count: i64,
        tile_size: usize,
    ) -> Self {
        TileMetric {
            tile_id,
            fetch_ms,
            convert_ms,
            total_ms: fetch_ms + convert_ms,
            feature_count,
            tile_size,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Rolling averages over the retained window.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSummary {
    pub count: usize,
    pub avg_fetch_ms: f64,
    pub avg_convert_ms: f64,
    pub avg_total_ms: f64,
    pub avg_tile_size: f64,
    /// Averaged over records with a known feature count only.
    pub avg_feature_count: f64,
}

/// Append-only, capacity-bounded metric history shared across requests.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<VecDeque<TileMetric>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record, evicting the oldest once capacity is reached.
    pub fn add(&self, metric: TileMetric) {
        let mut records = self.lock();
        if records.len() == METRICS_CAPACITY {
            records.pop_front();
        }
        records.push_back(metric);
    }

    /// The retained records, oldest first.
    pub fn snapshot(&self) -> Vec<TileMetric> {
        self.lock().iter().cloned().collect()
    }

    pub fn averages(&self) -> MetricsSummary {
        let records = self.lock();
        if records.is_empty() {
            return MetricsSummary::default();
        }
        let count = records.len();
        let mut summary = MetricsSummary {
            count,
            ..Default::default()
        };
        let mut counted_features = 0usize;
        for record in records.iter() {
            summary.avg_fetch_ms += record.fetch_ms as f64;
            summary.avg_convert_ms += record.convert_ms as f64;
            summary.avg_total_ms += record.total_ms as f64;
            summary.avg_tile_size += record.tile_size as f64;
            if record.feature_count >= 0 {
                summary.avg_feature_count += record.feature_count as f64;
                counted_features += 1;
            }
        }
        summary.avg_fetch_ms /= count as f64;
        summary.avg_convert_ms /= count as f64;
        summary.avg_total_ms /= count as f64;
        summary.avg_tile_size /= count as f64;
        if counted_features > 0 {
            summary.avg_feature_count /= counted_features as f64;
        }
        summary
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<TileMetric>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
