//! # scfuzz-wallets
//!
//! Accounts of the chain node, derived from the mnemonic the node was started with.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

mod accounts;
pub use accounts::{Account, AccountDirectory};
