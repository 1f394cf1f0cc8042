use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;

use vigil::{traceable, MetricsStore, VigilService, SERVICE_SERIES_KEY};

use crate::utils::fixtures::{backdated_trace, fast_service_config};
use crate::{stress_test, test_setup, DEFAULT_STRESS_DURATION};

const PURGE_HORIZON: Duration = Duration::from_secs(3600);

/// Fresh appends racing a purge loop are never dropped
#[test]
fn test_appends_survive_concurrent_purges() {
    test_setup!();

    let store = Arc::new(MetricsStore::in_memory());
    let done = Arc::new(AtomicBool::new(false));

    let sweeper = {
        let store = store.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                store.purge_all(PURGE_HORIZON);
            }
        })
    };

    let writers: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    store.append("contended.op", backdated_trace("contended.op", Utc::now()));
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    sweeper.join().unwrap();

    store.purge_all(PURGE_HORIZON);
    assert_eq!(store.aggregate("contended.op").count, 8 * 200);
}

/// Old records keep getting purged while new old records arrive; a final
/// sweep leaves nothing behind
#[test]
fn test_concurrent_purge_eventually_clears_old_records() {
    test_setup!();

    let store = Arc::new(MetricsStore::in_memory());
    let done = Arc::new(AtomicBool::new(false));

    let sweeper = {
        let store = store.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                store.purge_all(PURGE_HORIZON);
            }
        })
    };

    let stale = Utc::now() - chrono::Duration::hours(2);
    let writers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    store.append("stale.op", backdated_trace("stale.op", stale));
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Relaxed);
    sweeper.join().unwrap();

    store.purge_all(PURGE_HORIZON);
    assert_eq!(store.aggregate("stale.op").count, 0);
}

/// Many threads tracing through clones of one tracer while the collector
/// ticks; every record arrives
#[tokio::test]
async fn test_concurrent_tracing_with_collector_running() -> Result<()> {
    test_setup!();

    let (config, _temp_dir) = fast_service_config("swarm");
    let mut service = VigilService::init(config).await?;
    service.start().await?;

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let tracer = service.tracer().clone();
            tokio::task::spawn_blocking(move || {
                let mut completed = 0;
                for _ in 0..4 {
                    if tracer.trace("swarm.op", traceable!(|| {})).is_ok() {
                        completed += 1;
                    }
                }
                completed
            })
        })
        .collect();

    let mut total = 0;
    for joined in join_all(handles).await {
        total += joined?;
    }

    assert_eq!(total, 200);
    assert_eq!(service.aggregate("swarm.op").count, 200);
    assert!(service.aggregate(SERVICE_SERIES_KEY).count >= 1);

    service.stop().await?;
    Ok(())
}

/// Sustained tracing in a tight loop; every successful call is stored
#[tokio::test]
async fn test_sustained_trace_loop() -> Result<()> {
    test_setup!();

    let (config, _temp_dir) = fast_service_config("grind");
    let service = VigilService::init(config).await?;

    let (iterations, errors, _success_rate) = stress_test!(
        "sustained_tracing",
        DEFAULT_STRESS_DURATION,
        service.trace("grind.op", traceable!(|| {}))
    );

    assert!(iterations > 0);
    assert_eq!(errors, 0);
    assert_eq!(service.aggregate("grind.op").count, iterations as usize);

    Ok(())
}
