use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts of the JSON-RPC connection to the node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Attach to a node at this url instead of launching one.
    pub url: Option<String>,
    pub request_timeout_secs: u64,
    /// Upper bound on waiting for a transaction receipt.
    pub receipt_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Gas limit of every transaction; ganache's block gas limit by default.
    pub tx_gas_limit: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: None,
            request_timeout_secs: 45,
            receipt_timeout_secs: 30,
            poll_interval_ms: 50,
            tx_gas_limit: 6_721_975,
        }
    }
}

impl RpcConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// What `debug_traceTransaction` captures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Trace every fuzzing step; coverage and the oracle need it.
    pub enabled: bool,
    pub timeout_secs: u64,
    pub disable_storage: bool,
    pub disable_stack: bool,
    pub disable_memory: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 60,
            disable_storage: false,
            disable_stack: false,
            disable_memory: false,
        }
    }
}

impl TraceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
