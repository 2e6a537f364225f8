//! # scfuzz-node
//!
//! Starts, supervises and stops the chain node the harness talks to.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

mod args;
pub use args::node_args;

mod kill;
pub use kill::{kill_listener, listening_pids};

mod process;
pub use process::{ChainProcess, NetworkDescriptor, NodeStatus};
