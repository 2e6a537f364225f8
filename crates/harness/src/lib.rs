//! # scfuzz
//!
//! Coverage-guided fuzzing of deployed Ethereum contracts.
//!
//! A [`Harness`] owns a chain node and the contracts migrated onto it. It turns [`TxIntent`]s
//! into transactions, traces them, and feeds the traces to the coverage tracker and the bug
//! oracle. A [`Session`] drives a [`Strategy`] against a harness within a [`Budget`].

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

pub mod build;
pub use build::{
    BuildStep, CommandBuildStep, NoopBuildStep, inject_network_config, is_truffle_project,
};

pub mod builder;
pub use builder::{EncodedCall, FALLBACK_PROBE_SELECTOR, PROBE_SELECTOR, TxBuilder};

pub mod dispatch;
pub use dispatch::{Dispatcher, TxOutput, TxResult};

mod harness;
pub use harness::Harness;

pub mod session;
pub use session::{Budget, Session, SessionReport, StopReason, strategy_from_config};

pub use scfuzz_common::{ErrorCategory, HarnessError, Result};
pub use scfuzz_config::HarnessConfig;
pub use scfuzz_evm_fuzz::{
    BugKind, BugRecord, CallTarget, Observation, RandomStrategy, StepFeedback, Strategy, Target,
    TxIntent,
};
