//! End-to-end integration tests for the Vigil monitoring library

pub mod test_concurrency;
pub mod test_full_pipeline;
pub mod test_persistence;
