//! Shared fixtures for the engine's test suites.

pub mod context;
pub mod fixtures;
pub mod proptest_generators;

pub use context::StoreContext;
pub use fixtures::{lob_store, simple_file_id, string_key_file_id};

/// Install the test logger once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
