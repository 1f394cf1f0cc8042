//! Domain assertions shared across integration tests

use vigil::{MetricRecord, VigilService};

/// Assert the records are ordered oldest to newest
pub fn assert_ascending_timestamps(records: &[MetricRecord]) {
    for pair in records.windows(2) {
        assert!(
            pair[0].timestamp() <= pair[1].timestamp(),
            "records out of order: {} then {}",
            pair[0].timestamp(),
            pair[1].timestamp()
        );
    }
}

/// Assert each series holds exactly the expected number of records
pub fn assert_series_counts(service: &VigilService, expected: &[(&str, usize)]) {
    for (series_key, count) in expected {
        assert_eq!(
            service.aggregate(series_key).count,
            *count,
            "unexpected record count for series '{}'",
            series_key
        );
    }
}
