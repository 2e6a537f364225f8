//! `debug_traceTransaction` payloads.

use alloy_primitives::{Address, U256};
use revm::bytecode::{OpCode, opcode};
use scfuzz_common::serde_helpers::{
    parse_word, u64_from_int_or_hex, u64_from_int_or_hex_opt, words,
};
use serde::{Deserialize, Deserializer, Serialize, de};
use std::{
    collections::{BTreeMap, HashMap},
    sync::LazyLock,
};

/// Mnemonic to opcode byte.
static OPCODES: LazyLock<HashMap<&'static str, u8>> = LazyLock::new(|| {
    (0..=u8::MAX).filter_map(|b| OpCode::new(b).map(|op| (op.as_str(), b))).collect()
});

/// One executed instruction.
///
/// Ganache reports stack and storage words as bare hex and counts depth from 0, geth style nodes
/// prefix `0x` and count from 1. Depths should only be compared relative to the first step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructLog {
    #[serde(deserialize_with = "u64_from_int_or_hex")]
    pub pc: u64,
    pub op: String,
    #[serde(default, deserialize_with = "u64_from_int_or_hex")]
    pub gas: u64,
    #[serde(default, deserialize_with = "u64_from_int_or_hex")]
    pub gas_cost: u64,
    #[serde(deserialize_with = "u64_from_int_or_hex")]
    pub depth: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Bottom to top.
    #[serde(default, deserialize_with = "words")]
    pub stack: Vec<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Vec<String>>,
    /// Storage slots known at this step.
    #[serde(default, deserialize_with = "storage", skip_serializing_if = "BTreeMap::is_empty")]
    pub storage: BTreeMap<U256, U256>,
    #[serde(
        default,
        rename = "refund",
        deserialize_with = "u64_from_int_or_hex_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub refund_counter: Option<u64>,
}

impl StructLog {
    /// The opcode byte, resolving the legacy mnemonics some nodes still emit.
    pub fn opcode(&self) -> Option<u8> {
        let name = match self.op.as_str() {
            "SHA3" => "KECCAK256",
            "SUICIDE" => "SELFDESTRUCT",
            "DIFFICULTY" => "PREVRANDAO",
            name => name,
        };
        OPCODES.get(name).copied()
    }

    /// The `n`th stack item from the top, `0` being the top.
    pub fn peek(&self, n: usize) -> Option<U256> {
        self.stack.len().checked_sub(n + 1).map(|i| self.stack[i])
    }

    /// The `n`th stack item from the top as an address.
    pub fn peek_address(&self, n: usize) -> Option<Address> {
        self.peek(n).map(|w| Address::from_word(w.into()))
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self.opcode(),
            Some(opcode::CALL | opcode::CALLCODE | opcode::DELEGATECALL | opcode::STATICCALL)
        )
    }

    pub fn is_create(&self) -> bool {
        matches!(self.opcode(), Some(opcode::CREATE | opcode::CREATE2))
    }
}

fn storage<'de, D>(deserializer: D) -> Result<BTreeMap<U256, U256>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, String>>::deserialize(deserializer)?.unwrap_or_default();
    raw.iter()
        .map(|(k, v)| {
            let key = parse_word(k).map_err(de::Error::custom)?;
            let value = parse_word(v).map_err(de::Error::custom)?;
            Ok((key, value))
        })
        .collect()
}

/// Options for `debug_traceTransaction`.
///
/// Both the geth (`enableMemory`) and the ganache (`disableMemory`) spelling are sent so that
/// every node captures the same data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceOptions {
    pub disable_storage: bool,
    pub disable_stack: bool,
    pub disable_memory: bool,
    pub enable_memory: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self::full()
    }
}

impl TraceOptions {
    /// Capture memory, stack and storage.
    pub const fn full() -> Self {
        Self {
            disable_storage: false,
            disable_stack: false,
            disable_memory: false,
            enable_memory: true,
        }
    }

    /// Only the stack, enough for coverage and the oracle.
    pub const fn stack_only() -> Self {
        Self {
            disable_storage: true,
            disable_stack: false,
            disable_memory: true,
            enable_memory: false,
        }
    }
}

/// The default struct-log tracer result.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultFrame {
    #[serde(default)]
    pub failed: bool,
    #[serde(default, deserialize_with = "u64_from_int_or_hex")]
    pub gas: u64,
    #[serde(default)]
    pub return_value: String,
    #[serde(default)]
    pub struct_logs: Vec<StructLog>,
}
