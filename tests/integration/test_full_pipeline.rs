use std::time::Duration;

use anyhow::Result;
use chrono::Utc;

use vigil::{trace_args, traceable, TraceOutcome, VigilService, SERVICE_SERIES_KEY};

use crate::test_utils::wait_for_condition;
use crate::utils::assertions::{assert_ascending_timestamps, assert_series_counts};
use crate::utils::fixtures::fast_service_config;
use crate::{performance_test, test_setup, DEFAULT_TEST_TIMEOUT};

/// Full pipeline integration test
/// Covers the complete flow: trace -> store -> collect -> persist -> reload
#[tokio::test]
async fn test_full_pipeline() -> Result<()> {
    test_setup!();

    let (config, _temp_dir) = fast_service_config("pipeline");

    {
        let mut service = VigilService::init(config.clone()).await?;
        service.start().await?;

        // Every call shape lands in the store.
        service.trace("pipeline.tick", traceable!(|| {}))?;

        service.trace_with_args(
            "pipeline.resize",
            traceable!(|width: u32, height: u32| {
                let _ = width * height;
            }),
            trace_args![800u32, 600u32],
        )?;

        let sum = service.trace_with_return(
            "pipeline.sum",
            traceable!(|a: i64, b: i64| -> i64 { a + b }),
            trace_args![2i64, 3i64],
        )?;
        let sum = sum.and_then(|value| value.downcast::<i64>().ok());
        assert_eq!(sum.as_deref(), Some(&5));

        let parts = service.trace_with_returns(
            "pipeline.split",
            traceable!(|path: String| -> (String, String) {
                match path.split_once('/') {
                    Some((dir, file)) => (dir.to_string(), file.to_string()),
                    None => (String::new(), path),
                }
            }),
            trace_args!["etc/vigil.toml".to_string()],
        )?;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].downcast_ref::<String>().map(String::as_str), Some("etc"));
        assert_eq!(
            parts[1].downcast_ref::<String>().map(String::as_str),
            Some("vigil.toml")
        );

        // The collector contributes health snapshots alongside the traces.
        wait_for_condition(
            || service.aggregate(SERVICE_SERIES_KEY).count >= 2,
            DEFAULT_TEST_TIMEOUT,
            Duration::from_millis(10),
        )
        .await?;

        assert_series_counts(
            &service,
            &[
                ("pipeline.tick", 1),
                ("pipeline.resize", 1),
                ("pipeline.sum", 1),
                ("pipeline.split", 1),
            ],
        );

        let window = service.query_range(
            SERVICE_SERIES_KEY,
            Utc::now() - chrono::Duration::hours(1),
            Utc::now() + chrono::Duration::hours(1),
        );
        assert!(!window.is_empty());
        assert_ascending_timestamps(&window);

        service.stop().await?;
    }

    // A fresh service over the same base path serves yesterday's records
    // without re-tracing anything.
    let reloaded = VigilService::init(config).await?;
    assert_series_counts(
        &reloaded,
        &[
            ("pipeline.tick", 1),
            ("pipeline.resize", 1),
            ("pipeline.sum", 1),
            ("pipeline.split", 1),
        ],
    );
    assert!(reloaded.query_latest("pipeline.split").is_some());
    assert!(reloaded.aggregate(SERVICE_SERIES_KEY).count >= 2);

    Ok(())
}

/// The read-side views stay coherent while the collector runs
#[tokio::test]
async fn test_dashboard_views_stay_coherent() -> Result<()> {
    test_setup!();

    let (config, _temp_dir) = fast_service_config("dashboard");
    let mut service = VigilService::init(config).await?;

    // Before the first tick the health report is sampled on demand.
    assert!(!service.health_report().from_snapshot);

    service.start().await?;

    for _ in 0..5 {
        service.trace("dashboard.refresh", traceable!(|| {}))?;
    }

    wait_for_condition(
        || service.health_report().from_snapshot,
        DEFAULT_TEST_TIMEOUT,
        Duration::from_millis(10),
    )
    .await?;

    let info = service.service_info();
    assert_eq!(info.service_name, "dashboard");
    assert_eq!(info.process_id, std::process::id());
    assert_eq!(info.os, std::env::consts::OS);
    assert_eq!(info.arch, std::env::consts::ARCH);
    assert!(!info.library_version.is_empty());
    assert!(info.first_start_time <= Utc::now());
    assert_eq!(info.retention_period, Duration::from_secs(7 * 24 * 3600));

    let aggregate = service.aggregate("dashboard.refresh");
    assert_eq!(aggregate.count, 5);
    assert_eq!(aggregate.error_count, 0);

    let keys = service.list_series_keys();
    assert!(keys.contains(&"dashboard.refresh".to_string()));
    assert!(keys.contains(&SERVICE_SERIES_KEY.to_string()));

    service.stop().await?;
    Ok(())
}

/// A single traced no-op call stays well under an intentionally generous
/// ceiling; catches pathological regressions in the sampling path
#[tokio::test]
async fn test_trace_overhead_within_baseline() -> Result<()> {
    test_setup!();

    let (config, _temp_dir) = fast_service_config("overhead");
    let service = VigilService::init(config).await?;

    let record = performance_test!(
        "single_traced_call",
        Duration::from_millis(250),
        service.trace("overhead.noop", traceable!(|| {}))?
    );

    assert_eq!(record.outcome, TraceOutcome::Completed);
    assert_eq!(service.aggregate("overhead.noop").count, 1);

    Ok(())
}
