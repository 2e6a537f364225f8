//! # scfuzz-evm-traces
//!
//! Struct-log trace retrieval and call frame attribution.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

pub mod frames;
mod reader;
pub mod types;

pub use frames::{Frame, FrameKind, FrameMap, annotate};
pub use reader::{TRACE_TIMEOUT, TraceReader};
pub use types::{DefaultFrame, StructLog, TraceOptions};
