//! Common types shared by the scfuzz crates.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

pub mod abi;
pub mod artifacts;
pub mod contracts;
pub mod errors;
pub mod provider;
pub mod serde_helpers;

pub use abi::{AbiModel, EventEntry, Method};
pub use artifacts::{Artifact, ArtifactStore};
pub use contracts::{Contract, ContractDirectory};
pub use errors::{ErrorCategory, HarnessError, Result};
pub use provider::{CallOutcome, CallRequest, NodeError, RpcClient, SendOutcome, TxReceipt};
