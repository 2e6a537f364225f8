use crate::NodeKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// BIP-44 prefix of Ethereum accounts.
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/60'/0'/0/";

/// Bug classes the oracle looks for by default.
pub const DEFAULT_BUG_KINDS: [&str; 4] =
    ["reentrancy", "suicidal", "leaking", "unhandled-exception"];

/// Accounts derived from the node's mnemonic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Number of accounts to derive, every account of the node if unset.
    pub count: Option<usize>,
    pub derivation_path: String,
    /// Overrides the node kind's set-balance method.
    pub set_balance_method: Option<String>,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            count: None,
            derivation_path: DEFAULT_DERIVATION_PATH.to_string(),
            set_balance_method: None,
        }
    }
}

impl AccountsConfig {
    pub fn set_balance_method(&self, kind: NodeKind) -> &str {
        self.set_balance_method.as_deref().unwrap_or(kind.set_balance_method())
    }
}

/// Budget of a fuzzing session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_steps: Option<u64>,
    pub max_duration_secs: Option<u64>,
    /// Episode coverage is reset every this many steps, never if zero.
    pub episode_length: u64,
    /// Seed of the random strategy, from entropy if unset.
    pub seed: Option<u64>,
    /// Chance that a payable call carries value.
    pub value_probability: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_steps: Some(1000),
            max_duration_secs: None,
            episode_length: 100,
            seed: None,
            value_probability: 0.1,
        }
    }
}

impl SessionConfig {
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Enabled bug kinds, by name.
    pub kinds: Vec<String>,
    /// Gas forwarded by `transfer` and `send`; calls above it may re-enter.
    pub call_stipend: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            kinds: DEFAULT_BUG_KINDS.iter().map(|k| k.to_string()).collect(),
            call_stipend: 2300,
        }
    }
}
