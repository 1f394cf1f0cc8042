//! Shared fixtures and data generators for integration tests

use chrono::{DateTime, Utc};
use rand::Rng;
use tempfile::TempDir;

use vigil::{FunctionTraceRecord, MetricRecord, TraceOutcome, VigilConfig};

/// A validated configuration with fast collector ticks, rooted in a fresh
/// temporary directory. The directory guard must outlive the service.
pub fn fast_service_config(service_name: &str) -> (VigilConfig, TempDir) {
    let temp_dir = TempDir::new().unwrap();

    let mut config = VigilConfig::default();
    config.service.name = service_name.to_string();
    config.service.base_path = temp_dir.path().to_path_buf();
    config.collector.sync_frequency = crate::COLLECTOR_TEST_FREQUENCY.to_string();
    config.collector.retention_period = "7d".to_string();

    (config, temp_dir)
}

/// A completed trace record whose call ended at `end_time`
pub fn backdated_trace(function_key: &str, end_time: DateTime<Utc>) -> MetricRecord {
    let mut rng = rand::thread_rng();

    MetricRecord::Trace(FunctionTraceRecord {
        function_key: function_key.to_string(),
        start_time: end_time - chrono::Duration::milliseconds(rng.gen_range(1..20)),
        end_time,
        cpu_delta: 0.0,
        heap_alloc_delta: rng.gen_range(0..65_536),
        concurrency_delta: 0,
        outcome: TraceOutcome::Completed,
        return_values: Vec::new(),
    })
}

/// `count` completed records spaced one minute apart, oldest first, with
/// the newest ending one minute ago
pub fn spread_records(function_key: &str, count: usize) -> Vec<MetricRecord> {
    let newest = Utc::now() - chrono::Duration::minutes(1);

    (0..count)
        .map(|i| {
            let age = chrono::Duration::minutes((count - 1 - i) as i64);
            backdated_trace(function_key, newest - age)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_config_is_valid() {
        let (config, _temp_dir) = fast_service_config("fixture-check");
        assert!(config.validate().is_ok());
        assert_eq!(config.collector.sync_frequency, crate::COLLECTOR_TEST_FREQUENCY);
    }

    #[test]
    fn test_spread_records_are_ordered_and_past() {
        let records = spread_records("orders.place", 5);
        assert_eq!(records.len(), 5);

        for pair in records.windows(2) {
            assert!(pair[0].timestamp() < pair[1].timestamp());
        }
        assert!(records[4].timestamp() < Utc::now());
    }
}
