//! Vigil in-process service monitoring library
//!
//! Vigil instruments a running service from the inside: individual
//! functions are traced across arbitrary signatures, process health is
//! sampled on a fixed cadence, and both land in a retention-bounded local
//! store that survives restarts. Instrumentation never takes the host
//! down; targets that panic are recovered and recorded, and persistence
//! failures degrade the store to memory-only operation.
//!
//! ```no_run
//! use vigil::{trace_args, traceable, VigilConfig, VigilService};
//!
//! # async fn run() -> vigil::Result<()> {
//! let mut config = VigilConfig::default();
//! config.service.name = "checkout".to_string();
//!
//! let mut service = VigilService::init(config).await?;
//! service.start().await?;
//!
//! let total = service
//!     .trace_with_return(
//!         "checkout.total",
//!         traceable!(|subtotal: i64, tax: i64| -> i64 { subtotal + tax }),
//!         trace_args![40i64, 2i64],
//!     )?
//!     .and_then(|value| value.downcast::<i64>().ok());
//! assert_eq!(total.as_deref(), Some(&42));
//!
//! println!("{:?}", service.aggregate("checkout.total"));
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod sampler;
pub mod tracer;
pub mod store;
pub mod collector;
pub mod identity;
pub mod service;

// Re-export commonly used types
pub use config::{CollectorSettings, HealthThresholds, ServiceSettings, VigilConfig};
pub use error::{
    CacheError, CollectorError, ConfigError, Result, StorageError, TraceError, VigilError,
};
pub use sampler::{ResourceSampler, ResourceSnapshot};
pub use tracer::{
    BoxedValue, Callable, CallOutput, CapturedValue, FunctionTraceRecord, FunctionTracer,
    TraceOutcome,
};
pub use store::{
    MetricRecord, MetricsStore, SeriesAggregate, ServiceSnapshot, SERVICE_SERIES_KEY,
};
pub use collector::HealthCollector;
pub use identity::IdentityCache;
pub use service::{HealthReport, ServiceInfo, VigilService};
