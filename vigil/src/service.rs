//! Service lifecycle facade
//!
//! Ties configuration, identity, tracing, collection, and storage together
//! behind one object. A host initializes the service once at startup,
//! starts it, traces calls through it, reads dashboard views from it, and
//! stops it on the way out. Configuration problems fail initialization;
//! after that, nothing in the pipeline takes the host down.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::collector::{within_thresholds, HealthCollector};
use crate::config::VigilConfig;
use crate::error::{ConfigError, Result, TraceResult};
use crate::identity::IdentityCache;
use crate::sampler::ResourceSampler;
use crate::store::{MetricRecord, MetricsStore, SeriesAggregate, SERVICE_SERIES_KEY};
use crate::tracer::{BoxedValue, Callable, FunctionTracer, FunctionTraceRecord};

/// Static facts about the monitored service, for dashboard headers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceInfo {
    pub service_name: String,
    /// When this service name was first seen on this host, across restarts
    pub first_start_time: DateTime<Utc>,
    pub process_id: u32,
    pub os: String,
    pub arch: String,
    pub library_version: String,
    pub retention_period: Duration,
}

/// Point-in-time health summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub cpu_percent: f32,
    pub mem_percent: f32,
    pub thread_count: i64,
    pub observed_at: DateTime<Utc>,
    /// False when the collector has not ticked yet and the report was
    /// sampled on demand instead of read from a stored snapshot
    pub from_snapshot: bool,
}

/// One monitored service: tracer, collector, store, and identity
///
/// ```no_run
/// use vigil::{traceable, VigilConfig, VigilService};
///
/// # async fn run() -> vigil::Result<()> {
/// let mut config = VigilConfig::default();
/// config.service.name = "checkout".to_string();
///
/// let mut service = VigilService::init(config).await?;
/// service.start().await?;
///
/// service.trace("checkout.reprice", traceable!(|| {}))?;
///
/// service.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct VigilService {
    config: VigilConfig,
    store: Arc<MetricsStore>,
    sampler: Arc<ResourceSampler>,
    tracer: FunctionTracer,
    collector: HealthCollector,
    retention: Arc<RwLock<Duration>>,
    first_start_time: DateTime<Utc>,
}

impl VigilService {
    /// Validate `config`, restore the service identity and any persisted
    /// metrics, and assemble the tracing pipeline. Records older than the
    /// configured retention are purged before anything is served. The
    /// collector is not running yet; call [`Self::start`].
    pub async fn init(config: VigilConfig) -> Result<Self> {
        config.validate()?;
        let sync_frequency = config.sync_frequency()?;
        let retention_period = config.retention_period()?;

        tracing::info!(
            "Initializing monitoring for service '{}'",
            config.service.name
        );

        let identity = IdentityCache::load(config.identity_cache_path());
        let first_start_time = match identity.get_or_create(&config.service.name) {
            Ok(at) => at,
            Err(e) => {
                tracing::warn!("Service identity is not durable: {}", e);
                identity
                    .first_start_of(&config.service.name)
                    .unwrap_or_else(Utc::now)
            }
        };

        let store = Arc::new(MetricsStore::open(config.metrics_path(), retention_period));
        let sampler = Arc::new(ResourceSampler::new());
        let tracer = FunctionTracer::new(Arc::clone(&store), Arc::clone(&sampler));
        let retention = Arc::new(RwLock::new(retention_period));
        let collector = HealthCollector::new(
            Arc::clone(&store),
            Arc::clone(&sampler),
            config.health,
            sync_frequency,
            Arc::clone(&retention),
        );

        tracing::info!(
            "Service '{}' first seen {}",
            config.service.name,
            first_start_time.to_rfc3339()
        );

        Ok(Self {
            config,
            store,
            sampler,
            tracer,
            collector,
            retention,
            first_start_time,
        })
    }

    /// Begin periodic collection. Idempotent at this level: a service that
    /// is already started stays started and logs a warning.
    pub async fn start(&mut self) -> Result<()> {
        if self.collector.is_running() {
            tracing::warn!(
                "Service '{}' is already started",
                self.config.service.name
            );
            return Ok(());
        }
        self.collector.start().await?;
        tracing::info!("Service '{}' started", self.config.service.name);
        Ok(())
    }

    /// Stop collection and flush outstanding metrics. Also idempotent; a
    /// flush failure is logged and reflected by [`Self::is_degraded`]
    /// rather than failing the shutdown.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.collector.is_running() {
            tracing::debug!(
                "Service '{}' is not running, nothing to stop",
                self.config.service.name
            );
            return Ok(());
        }
        self.collector.stop().await?;
        let _ = self.store.flush();
        tracing::info!("Service '{}' stopped", self.config.service.name);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.collector.is_running()
    }

    /// The underlying tracer, for callers that want to hold their own
    /// handle; it shares this service's store and sampler
    pub fn tracer(&self) -> &FunctionTracer {
        &self.tracer
    }

    /// Trace a target that takes no arguments and returns nothing
    pub fn trace(&self, function_key: &str, callable: Callable) -> TraceResult<FunctionTraceRecord> {
        self.tracer.trace(function_key, callable)
    }

    /// Trace a target invoked with `args`, recording but not returning
    /// its values
    pub fn trace_with_args(
        &self,
        function_key: &str,
        callable: Callable,
        args: Vec<BoxedValue>,
    ) -> TraceResult<FunctionTraceRecord> {
        self.tracer.trace_with_args(function_key, callable, args)
    }

    /// Trace a target and hand back its first return value live
    pub fn trace_with_return(
        &self,
        function_key: &str,
        callable: Callable,
        args: Vec<BoxedValue>,
    ) -> TraceResult<Option<BoxedValue>> {
        self.tracer.trace_with_return(function_key, callable, args)
    }

    /// Trace a target and hand back every return value live
    pub fn trace_with_returns(
        &self,
        function_key: &str,
        callable: Callable,
        args: Vec<BoxedValue>,
    ) -> TraceResult<Vec<BoxedValue>> {
        self.tracer.trace_with_returns(function_key, callable, args)
    }

    /// Records in `[from, to]` for one series, oldest first
    pub fn query_range(
        &self,
        series_key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<MetricRecord> {
        self.store.query_range(series_key, from, to)
    }

    /// Most recent record of one series
    pub fn query_latest(&self, series_key: &str) -> Option<MetricRecord> {
        self.store.query_latest(series_key)
    }

    /// Aggregate statistics for one series
    pub fn aggregate(&self, series_key: &str) -> SeriesAggregate {
        self.store.aggregate(series_key)
    }

    /// Every known series key, including the service health series
    pub fn list_series_keys(&self) -> Vec<String> {
        self.store.list_series_keys()
    }

    /// Whether metrics persistence is currently failing and the store is
    /// serving from memory only
    pub fn is_degraded(&self) -> bool {
        self.store.is_degraded()
    }

    /// Health summary from the newest stored snapshot, or sampled on
    /// demand when the collector has not ticked yet
    pub fn health_report(&self) -> HealthReport {
        if let Some(MetricRecord::Snapshot(snapshot)) = self.store.query_latest(SERVICE_SERIES_KEY)
        {
            return HealthReport {
                healthy: snapshot.healthy,
                cpu_percent: snapshot.cpu_percent,
                mem_percent: snapshot.mem_percent,
                thread_count: snapshot.thread_count,
                observed_at: snapshot.timestamp,
                from_snapshot: true,
            };
        }

        let sample = self.sampler.snapshot();
        HealthReport {
            healthy: within_thresholds(&sample, self.config.health),
            cpu_percent: sample.cpu_percent,
            mem_percent: sample.mem_percent,
            thread_count: sample.thread_count,
            observed_at: sample.taken_at,
            from_snapshot: false,
        }
    }

    /// Static facts about this service and process
    pub fn service_info(&self) -> ServiceInfo {
        ServiceInfo {
            service_name: self.config.service.name.clone(),
            first_start_time: self.first_start_time,
            process_id: std::process::id(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            library_version: env!("CARGO_PKG_VERSION").to_string(),
            retention_period: *self.retention.read().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Adjust the retention horizon at runtime. Takes effect on the next
    /// collector sweep; the tick cadence is unaffected.
    pub fn set_retention_period(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(ConfigError::InvalidDuration {
                field: "retention_period",
                value: humantime::format_duration(period).to_string(),
                reason: "duration must be positive".to_string(),
            }
            .into());
        }
        *self.retention.write().unwrap_or_else(|e| e.into_inner()) = period;
        tracing::info!(
            "Retention period set to {}",
            humantime::format_duration(period)
        );
        Ok(())
    }
}
