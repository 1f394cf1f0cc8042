//! Periodic service-health collector
//!
//! A single background task samples the host process on a fixed cadence.
//! Each tick appends one health snapshot, sweeps records older than the
//! retention horizon, and flushes the store. Starting a collector that is
//! already running fails rather than silently doubling the cadence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::HealthThresholds;
use crate::error::{CollectorError, CollectorResult};
use crate::sampler::{ResourceSampler, ResourceSnapshot};
use crate::store::{MetricRecord, MetricsStore, ServiceSnapshot, SERVICE_SERIES_KEY};

/// Background snapshot-and-sweep worker
///
/// The retention horizon is shared behind a lock and read on every sweep,
/// so a runtime adjustment takes effect on the next tick without a
/// restart. The tick cadence itself is fixed once started.
#[derive(Debug)]
pub struct HealthCollector {
    store: Arc<MetricsStore>,
    sampler: Arc<ResourceSampler>,
    thresholds: HealthThresholds,
    sync_frequency: Duration,
    retention: Arc<RwLock<Duration>>,
    running: AtomicBool,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HealthCollector {
    /// `sync_frequency` must be positive; configuration validation
    /// guarantees this for values that come from [`crate::VigilConfig`].
    pub fn new(
        store: Arc<MetricsStore>,
        sampler: Arc<ResourceSampler>,
        thresholds: HealthThresholds,
        sync_frequency: Duration,
        retention: Arc<RwLock<Duration>>,
    ) -> Self {
        Self {
            store,
            sampler,
            thresholds,
            sync_frequency,
            retention,
            running: AtomicBool::new(false),
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the collection loop. The first snapshot is taken immediately,
    /// later ones every `sync_frequency`. Fails with
    /// [`CollectorError::AlreadyRunning`] if the loop is already up.
    pub async fn start(&mut self) -> CollectorResult<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CollectorError::AlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let store = Arc::clone(&self.store);
        let sampler = Arc::clone(&self.sampler);
        let thresholds = self.thresholds;
        let retention = Arc::clone(&self.retention);
        let sync_frequency = self.sync_frequency;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync_frequency);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::collect_once(&store, &sampler, thresholds, &retention);
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });
        self.handle = Some(handle);

        tracing::info!(
            "Health collector started, sampling every {:?}",
            sync_frequency
        );
        Ok(())
    }

    /// Signal the loop and wait for it to finish. After this returns no
    /// further snapshots are appended. Fails with
    /// [`CollectorError::NotRunning`] if the loop is not up.
    pub async fn stop(&mut self) -> CollectorResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::NotRunning);
        }

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Collector task ended abnormally: {}", e);
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Health collector stopped");
        Ok(())
    }

    fn collect_once(
        store: &MetricsStore,
        sampler: &ResourceSampler,
        thresholds: HealthThresholds,
        retention: &RwLock<Duration>,
    ) {
        let sample = sampler.snapshot();
        let snapshot = ServiceSnapshot {
            timestamp: sample.taken_at,
            cpu_percent: sample.cpu_percent,
            mem_percent: sample.mem_percent,
            thread_count: sample.thread_count,
            healthy: within_thresholds(&sample, thresholds),
        };
        tracing::debug!(
            "Health snapshot: cpu={:.1}% mem={:.1}% threads={} healthy={}",
            snapshot.cpu_percent,
            snapshot.mem_percent,
            snapshot.thread_count,
            snapshot.healthy
        );
        store.append(SERVICE_SERIES_KEY, MetricRecord::Snapshot(snapshot));

        let horizon = *retention.read().unwrap_or_else(|e| e.into_inner());
        let evicted = store.purge_all(horizon);
        if evicted > 0 {
            tracing::debug!("Evicted {} records past the retention horizon", evicted);
        }

        // The store logs flush failures and marks itself degraded.
        let _ = store.flush();
    }
}

/// Sentinel readings of zero always pass: an unavailable reading must not
/// flag an otherwise healthy service.
pub(crate) fn within_thresholds(sample: &ResourceSnapshot, thresholds: HealthThresholds) -> bool {
    sample.cpu_percent <= thresholds.max_cpu_percent
        && sample.mem_percent <= thresholds.max_memory_percent
        && sample.thread_count <= thresholds.max_thread_count
}
