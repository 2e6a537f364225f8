//! # scfuzz-test-utils
//!
//! Helpers shared by the tests of the scfuzz crates.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![allow(clippy::disallowed_macros)]

#[macro_use]
extern crate tracing;

pub mod fixtures;
pub use fixtures::{ArtifactProject, Deployment, ReceiptFixture};

mod mock;
pub use mock::{MockNode, Reply};

/// Initializes tracing for tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
