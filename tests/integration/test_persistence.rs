use std::fs;
use std::time::Duration;

use anyhow::Result;

use vigil::{traceable, VigilService};

use crate::test_utils::wait_for_condition;
use crate::utils::fixtures::fast_service_config;
use crate::{test_setup, DEFAULT_TEST_TIMEOUT};

/// Corrupt on-disk artifacts never prevent startup; the service starts
/// fresh and overwrites them with good data on the next flush
#[tokio::test]
async fn test_corrupt_artifacts_are_tolerated() -> Result<()> {
    test_setup!();

    let (config, _temp_dir) = fast_service_config("sturdy");
    fs::write(config.identity_cache_path(), "{ not json")?;
    fs::write(config.metrics_path(), "]]]] definitely not json")?;

    let first_start;
    {
        let mut service = VigilService::init(config.clone()).await?;
        first_start = service.service_info().first_start_time;

        service.start().await?;
        service.trace("sturdy.work", traceable!(|| {}))?;
        service.stop().await?;
    }

    // The rewritten artifacts load cleanly on the next run.
    let reloaded = VigilService::init(config).await?;
    assert_eq!(reloaded.service_info().first_start_time, first_start);
    assert_eq!(reloaded.aggregate("sturdy.work").count, 1);
    assert!(!reloaded.is_degraded());

    Ok(())
}

/// The collector's periodic flush makes traces durable even when the
/// process never reaches a graceful stop
#[tokio::test]
async fn test_periodic_flush_survives_ungraceful_exit() -> Result<()> {
    test_setup!();

    let (config, _temp_dir) = fast_service_config("crashy");
    let metrics_path = config.metrics_path();

    {
        let mut service = VigilService::init(config.clone()).await?;
        service.start().await?;
        service.trace("crashy.work", traceable!(|| {}))?;

        wait_for_condition(
            || {
                fs::read_to_string(&metrics_path)
                    .map(|contents| contents.contains("crashy.work"))
                    .unwrap_or(false)
            },
            DEFAULT_TEST_TIMEOUT,
            Duration::from_millis(10),
        )
        .await?;

        // Dropped without stop(); the periodic flush already persisted.
    }

    let reloaded = VigilService::init(config).await?;
    assert_eq!(reloaded.aggregate("crashy.work").count, 1);

    Ok(())
}

/// Each session appends to the previous session's records, and the
/// service identity never changes
#[tokio::test]
async fn test_metrics_accumulate_across_sessions() -> Result<()> {
    test_setup!();

    let (config, _temp_dir) = fast_service_config("longhaul");
    let mut first_start = None;

    for session in 1..=3 {
        let mut service = VigilService::init(config.clone()).await?;

        let start = service.service_info().first_start_time;
        match first_start {
            None => first_start = Some(start),
            Some(expected) => assert_eq!(start, expected, "identity drifted"),
        }

        service.start().await?;
        service.trace("longhaul.work", traceable!(|| {}))?;
        assert_eq!(service.aggregate("longhaul.work").count, session);
        service.stop().await?;
    }

    Ok(())
}

/// Losing the metrics file loses records, nothing else; the identity
/// cache is a separate artifact and keeps the original first-start time
#[tokio::test]
async fn test_metrics_corruption_resets_records_but_not_identity() -> Result<()> {
    test_setup!();

    let (config, _temp_dir) = fast_service_config("amnesiac");

    let first_start;
    {
        let mut service = VigilService::init(config.clone()).await?;
        first_start = service.service_info().first_start_time;

        service.start().await?;
        service.trace("amnesiac.work", traceable!(|| {}))?;
        service.stop().await?;
    }

    fs::write(config.metrics_path(), "garbage")?;

    {
        let mut service = VigilService::init(config.clone()).await?;
        assert_eq!(service.aggregate("amnesiac.work").count, 0);
        assert_eq!(service.service_info().first_start_time, first_start);

        service.start().await?;
        service.trace("amnesiac.work", traceable!(|| {}))?;
        service.stop().await?;
    }

    let reloaded = VigilService::init(config).await?;
    assert_eq!(reloaded.aggregate("amnesiac.work").count, 1);
    assert_eq!(reloaded.service_info().first_start_time, first_start);

    Ok(())
}
