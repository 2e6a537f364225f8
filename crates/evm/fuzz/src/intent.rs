use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, B256, U256};
use std::{collections::BTreeMap, fmt};

/// What a [`TxIntent`] addresses on the target contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallTarget {
    /// A method, by name or full signature.
    Function(String),
    /// An event, by name or full signature.
    Event(String),
}

impl CallTarget {
    pub fn name(&self) -> &str {
        match self {
            Self::Function(name) | Self::Event(name) => name,
        }
    }
}

/// A transaction the caller wants executed.
#[derive(Clone, Debug, PartialEq)]
pub struct TxIntent {
    pub sender: Address,
    pub target: Address,
    pub call: CallTarget,
    /// Arguments by parameter name, unnamed parameters are `_0`, `_1`, ...
    pub args: BTreeMap<String, DynSolValue>,
    pub value: U256,
    /// Fetch the execution trace of the transaction.
    pub trace: bool,
    /// Receipt to decode events from, all matching logs of the chain when `None`.
    pub tx_hash: Option<B256>,
}

impl TxIntent {
    pub fn function(sender: Address, target: Address, name: impl Into<String>) -> Self {
        Self::new(sender, target, CallTarget::Function(name.into()))
    }

    pub fn event(target: Address, name: impl Into<String>, tx_hash: Option<B256>) -> Self {
        Self { tx_hash, ..Self::new(Address::ZERO, target, CallTarget::Event(name.into())) }
    }

    fn new(sender: Address, target: Address, call: CallTarget) -> Self {
        Self {
            sender,
            target,
            call,
            args: BTreeMap::new(),
            value: U256::ZERO,
            trace: false,
            tx_hash: None,
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: DynSolValue) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}

impl fmt::Display for TxIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.target, self.call.name())?;
        for (i, (name, value)) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value:?}")?;
        }
        write!(f, ") from {}", self.sender)?;
        if !self.value.is_zero() {
            write!(f, " value {}", self.value)?;
        }
        Ok(())
    }
}
