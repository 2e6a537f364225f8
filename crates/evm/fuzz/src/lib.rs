//! # scfuzz-evm-fuzz
//!
//! Bug oracle over struct-log traces and the transaction selection interface.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

mod error;
pub use error::ParseBugKindError;

mod intent;
pub use intent::{CallTarget, TxIntent};

pub mod oracle;
pub use oracle::{
    BugKind, BugOracle, BugRecord, CALL_STIPEND, Detector, InspectContext, Leaking, Reentrancy,
    Suicidal, UnhandledException,
};

pub mod strategies;
pub use strategies::{Observation, RandomStrategy, StepFeedback, Strategy, Target};
