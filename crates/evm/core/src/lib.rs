//! # scfuzz-evm-core
//!
//! Bytecode disassembly and static control-flow analysis.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

pub mod analysis;
pub mod bytecode;

pub use analysis::{Analysis, BasicBlock, DispatchEntry};
pub use bytecode::{
    Disassembly, DisassemblyCache, Inst, InstIter, InstIterWithPc, Instruction, UNKNOWN,
    disassemble, disassemble_hex, format_bytecode,
};
