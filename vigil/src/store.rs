//! Retention-bounded time-series metrics store
//!
//! Holds series of function trace records and service snapshots keyed by a
//! series identifier. Appends arrive from every traced call plus the
//! periodic collector; reads come from the dashboard layer. Critical
//! sections are short and free of I/O; persistence runs out of line, and a
//! persistence failure only degrades the store to memory-only operation.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::tracer::{FunctionTraceRecord, TraceOutcome};

/// Series key under which service snapshots are stored
pub const SERVICE_SERIES_KEY: &str = "service.health";

/// Process health reading taken once per collector tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f32,
    pub mem_percent: f32,
    pub thread_count: i64,
    /// Whether every reading stayed within the configured thresholds
    pub healthy: bool,
}

/// One stored entry: a function trace record or a service snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricRecord {
    Trace(FunctionTraceRecord),
    Snapshot(ServiceSnapshot),
}

impl MetricRecord {
    /// Natural timestamp of the record: completion time for traces, sample
    /// time for snapshots
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MetricRecord::Trace(record) => record.end_time,
            MetricRecord::Snapshot(snapshot) => snapshot.timestamp,
        }
    }

    pub fn as_trace(&self) -> Option<&FunctionTraceRecord> {
        match self {
            MetricRecord::Trace(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_snapshot(&self) -> Option<&ServiceSnapshot> {
        match self {
            MetricRecord::Snapshot(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

/// Aggregate statistics over one series, for dashboard summaries
///
/// `count` spans every record in the series; the remaining fields are
/// computed over trace records only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesAggregate {
    pub count: usize,
    pub avg_duration: Duration,
    pub max_heap_delta: i64,
    /// Trace records that ended in a panic
    pub error_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SeriesPoint {
    /// Series timestamp assigned at append; non-decreasing within a series
    at: DateTime<Utc>,
    record: MetricRecord,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Series {
    points: Vec<SeriesPoint>,
}

impl Series {
    fn append(&mut self, record: MetricRecord) {
        let mut at = record.timestamp();
        if let Some(last) = self.points.last() {
            // Completion order can race timestamp order by microseconds;
            // clamp so the ascending invariant holds. The record payload
            // is never altered.
            if at < last.at {
                at = last.at;
            }
        }
        self.points.push(SeriesPoint { at, record });
    }

    fn range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<MetricRecord> {
        self.points
            .iter()
            .filter(|point| point.at >= from && point.at <= to)
            .map(|point| point.record.clone())
            .collect()
    }

    fn latest(&self) -> Option<MetricRecord> {
        self.points.last().map(|point| point.record.clone())
    }

    /// Drop the contiguous prefix older than `cutoff`; returns how many
    /// points were evicted
    fn purge_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let keep_from = self.points.partition_point(|point| point.at < cutoff);
        if keep_from > 0 {
            self.points.drain(..keep_from);
        }
        keep_from
    }
}

/// Thread-safe, append-mostly time-series store
///
/// The store owns its synchronization; callers never need external locking.
/// Unknown series keys are created implicitly on append and yield empty
/// results on queries.
#[derive(Debug)]
pub struct MetricsStore {
    series: RwLock<HashMap<String, Series>>,
    path: Option<PathBuf>,
    degraded: AtomicBool,
}

impl MetricsStore {
    /// Store with no on-disk representation; nothing to flush
    pub fn in_memory() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            path: None,
            degraded: AtomicBool::new(false),
        }
    }

    /// Open a store persisted at `path`, loading whatever a previous run
    /// flushed and purging records older than `retention` before any query
    /// is served. A missing file starts empty; a corrupt one is logged and
    /// discarded, never fatal.
    pub fn open<P: AsRef<Path>>(path: P, retention: Duration) -> Self {
        let path = path.as_ref().to_path_buf();

        let mut series: HashMap<String, Series> = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::warn!(
                        "Discarding unreadable metrics file {}: {}",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!("Could not read metrics file {}: {}", path.display(), e);
                HashMap::new()
            }
        };

        // Persisted points predate this process; restore the ascending
        // invariant, then apply the current retention so a shortened
        // horizon takes effect retroactively.
        let cutoff = cutoff_for(retention);
        let mut dropped = 0;
        for entries in series.values_mut() {
            entries.points.sort_by_key(|point| point.at);
            dropped += entries.purge_older_than(cutoff);
        }
        series.retain(|_, entries| !entries.points.is_empty());

        if dropped > 0 {
            tracing::info!("Purged {} expired records while loading metrics", dropped);
        }

        Self {
            series: RwLock::new(series),
            path: Some(path),
            degraded: AtomicBool::new(false),
        }
    }

    /// Append a record, creating the series on first use. Safe under
    /// arbitrary concurrent callers; never fails.
    pub fn append(&self, series_key: &str, record: MetricRecord) {
        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        series.entry(series_key.to_string()).or_default().append(record);
    }

    /// Records whose series timestamps fall in `[from, to]`, oldest first.
    /// A consistent snapshot view; unknown keys yield an empty result.
    pub fn query_range(
        &self,
        series_key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<MetricRecord> {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        series
            .get(series_key)
            .map(|entries| entries.range(from, to))
            .unwrap_or_default()
    }

    /// Most recently appended record of a series
    pub fn query_latest(&self, series_key: &str) -> Option<MetricRecord> {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        series.get(series_key).and_then(|entries| entries.latest())
    }

    /// Aggregate statistics for one series
    pub fn aggregate(&self, series_key: &str) -> SeriesAggregate {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = series.get(series_key) else {
            return SeriesAggregate::default();
        };

        let mut aggregate = SeriesAggregate {
            count: entries.points.len(),
            ..SeriesAggregate::default()
        };

        let mut total = Duration::ZERO;
        let mut traces = 0u32;
        let mut max_heap = None;

        for point in &entries.points {
            if let MetricRecord::Trace(record) = &point.record {
                traces += 1;
                total += record.duration();
                max_heap = Some(max_heap.map_or(record.heap_alloc_delta, |current: i64| {
                    current.max(record.heap_alloc_delta)
                }));
                if record.outcome == TraceOutcome::Panicked {
                    aggregate.error_count += 1;
                }
            }
        }

        if traces > 0 {
            aggregate.avg_duration = total / traces;
        }
        aggregate.max_heap_delta = max_heap.unwrap_or(0);
        aggregate
    }

    /// Evict the contiguous prefix of one series older than
    /// `now − horizon`. Returns the number of evicted records.
    pub fn purge_older_than(&self, series_key: &str, horizon: Duration) -> usize {
        let cutoff = cutoff_for(horizon);
        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        series
            .get_mut(series_key)
            .map(|entries| entries.purge_older_than(cutoff))
            .unwrap_or(0)
    }

    /// Sweep every series with the same horizon; returns total evicted
    pub fn purge_all(&self, horizon: Duration) -> usize {
        let cutoff = cutoff_for(horizon);
        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        series
            .values_mut()
            .map(|entries| entries.purge_older_than(cutoff))
            .sum()
    }

    /// Known series keys, sorted for stable dashboard listings
    pub fn list_series_keys(&self) -> Vec<String> {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = series.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Whether the last flush failed and the store is serving memory-only
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Persist a consistent snapshot of every series to the backing file.
    ///
    /// The snapshot is cloned under the read lock; serialization and file
    /// I/O happen after it is released. Failure flips the store into
    /// degraded (memory-only) mode; in-memory data is unaffected and a
    /// later successful flush clears the flag.
    pub fn flush(&self) -> StorageResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot = {
            let series = self.series.read().unwrap_or_else(|e| e.into_inner());
            series.clone()
        };

        let result = write_atomically(path, &snapshot);
        match &result {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    tracing::info!("Metrics persistence recovered, leaving degraded mode");
                }
            }
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                tracing::warn!("Metrics flush failed, continuing memory-only: {}", e);
            }
        }
        result
    }
}

fn write_atomically(path: &Path, series: &HashMap<String, Series>) -> StorageResult<()> {
    let flush_failed = |reason: String| StorageError::FlushFailed {
        path: path.to_path_buf(),
        reason,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| flush_failed(e.to_string()))?;

    let payload = serde_json::to_vec(series).map_err(|e| flush_failed(e.to_string()))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| flush_failed(e.to_string()))?;
    temp.write_all(&payload)
        .map_err(|e| flush_failed(e.to_string()))?;
    temp.persist(path).map_err(|e| flush_failed(e.to_string()))?;

    Ok(())
}

fn cutoff_for(horizon: Duration) -> DateTime<Utc> {
    match chrono::Duration::from_std(horizon) {
        Ok(delta) => Utc::now() - delta,
        // A horizon too large for chrono can never expire anything.
        Err(_) => DateTime::<Utc>::MIN_UTC,
    }
}
