//! Basic usage example for the Vigil monitoring library
//!
//! This example initializes a monitored service, traces functions of
//! several shapes, and reads the dashboard views back.

use std::time::Duration;

use vigil::{trace_args, traceable, VigilConfig, VigilService, SERVICE_SERIES_KEY};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    println!("Vigil - Basic Usage Example");
    println!("===========================");

    // Create configuration
    let mut config = VigilConfig::default();

    // Use a temporary directory for this example
    let temp_dir = tempfile::TempDir::new()?;
    config.service.name = "checkout".to_string();
    config.service.base_path = temp_dir.path().to_path_buf();
    config.collector.sync_frequency = "1s".to_string();

    println!("Configuration:");
    println!("  Service: {}", config.service.name);
    println!("  Base path: {}", config.service.base_path.display());
    println!("  Sync frequency: {}", config.collector.sync_frequency);
    println!("  Retention: {}", config.collector.retention_period);

    // Initialize the service
    println!("\nInitializing service...");
    let mut service = VigilService::init(config).await?;

    let info = service.service_info();
    println!("  First seen: {}", info.first_start_time);
    println!("  Process id: {}", info.process_id);
    println!("  Platform: {}/{}", info.os, info.arch);

    println!("Starting collection...");
    service.start().await?;

    // Trace a plain side-effecting function
    let record = service.trace(
        "checkout.warm_cache",
        traceable!(|| {
            std::thread::sleep(Duration::from_millis(20));
        }),
    )?;
    println!("\nwarm_cache took {:?}", record.duration());

    // Trace a function with arguments and a live return value
    let total = service
        .trace_with_return(
            "checkout.total",
            traceable!(|subtotal: i64, tax: i64| -> i64 { subtotal + tax }),
            trace_args![1199i64, 96i64],
        )?
        .and_then(|value| value.downcast::<i64>().ok());
    println!("total = {:?}", total.as_deref());

    // Trace a function returning a value plus an error-shaped companion
    let returns = service.trace_with_returns(
        "checkout.divide",
        traceable!(|a: i64, b: i64| -> (i64, Option<String>) {
            if b == 0 {
                (0, Some("division by zero".to_string()))
            } else {
                (a / b, None)
            }
        }),
        trace_args![10i64, 0i64],
    )?;
    println!(
        "divide = ({:?}, {:?})",
        returns[0].downcast_ref::<i64>(),
        returns[1].downcast_ref::<Option<String>>()
    );

    // A panicking target is recovered and recorded
    let record = service.trace("checkout.flaky", traceable!(|| { panic!("boom") }))?;
    println!("flaky outcome: {:?}", record.outcome);

    // Let the collector take a snapshot
    tokio::time::sleep(Duration::from_millis(1200)).await;

    // Read the dashboard views back
    println!("\nSeries: {:?}", service.list_series_keys());
    for key in ["checkout.total", "checkout.divide", "checkout.flaky"] {
        let aggregate = service.aggregate(key);
        println!(
            "  {}: {} calls, avg {:?}, {} errors",
            key, aggregate.count, aggregate.avg_duration, aggregate.error_count
        );
    }

    let health = service.health_report();
    println!(
        "\nHealth: healthy={} cpu={:.1}% mem={:.1}% threads={}",
        health.healthy, health.cpu_percent, health.mem_percent, health.thread_count
    );
    println!(
        "Snapshots collected: {}",
        service.aggregate(SERVICE_SERIES_KEY).count
    );

    // Stop the service
    println!("\nStopping service...");
    service.stop().await?;

    println!("\nExample completed successfully!");

    Ok(())
}
