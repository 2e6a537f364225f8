//! JSON-RPC client used to talk to the chain node.
//!
//! Every request goes through [`RpcClient::raw`], which separates three outcomes: the node
//! answered, the node answered with a JSON-RPC error, or the node could not be reached at all.
//! Payloads are decoded with our own lenient types since ganache and anvil disagree on several
//! encodings.

use crate::{
    errors::{HarnessError, Result},
    serde_helpers::{u64_from_int_or_hex, u64_from_int_or_hex_opt},
};
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types_eth::{BlockNumberOrTag, Log};
use alloy_transport::TransportError;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::{borrow::Cow, fmt, time::Duration};
use url::Url;

/// Default timeout for a single request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// A JSON-RPC error object returned by the node.
#[derive(Clone, Debug)]
pub struct NodeError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Optional error data.
    pub data: Option<Value>,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl NodeError {
    /// Extracts the transaction hash some nodes attach to the error of a reverted
    /// `eth_sendTransaction`.
    ///
    /// Both `{"hash": "0x.."}` and the older `{"0x<hash>": {"error": "revert"}}` shapes are
    /// recognized.
    pub fn tx_hash(&self) -> Option<B256> {
        let data = self.data.as_ref()?.as_object()?;
        if let Some(hash) = data.get("hash").and_then(Value::as_str) {
            return hash.parse().ok();
        }
        data.keys().find(|k| k.starts_with("0x") && k.len() == 66).and_then(|k| k.parse().ok())
    }

    /// Revert data attached to the error, if any.
    pub fn revert_data(&self) -> Option<Bytes> {
        match self.data.as_ref()? {
            Value::String(s) => s.parse().ok(),
            Value::Object(obj) => obj.get("data").and_then(Value::as_str)?.parse().ok(),
            _ => None,
        }
    }
}

/// Transaction request in the shape both ganache and anvil accept.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    /// Sender.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Target, `None` for contract creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    /// Gas limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U256>,
    /// Attached value in wei.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    /// Call data.
    pub data: Bytes,
}

/// The subset of a transaction receipt the harness consumes.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: B256,
    #[serde(default, deserialize_with = "u64_from_int_or_hex_opt")]
    pub block_number: Option<u64>,
    #[serde(default, deserialize_with = "u64_from_int_or_hex_opt")]
    pub transaction_index: Option<u64>,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default = "default_status", deserialize_with = "status_flag")]
    pub status: bool,
    #[serde(default, deserialize_with = "u64_from_int_or_hex")]
    pub gas_used: u64,
    #[serde(default)]
    pub logs: Vec<Log>,
}

const fn default_status() -> bool {
    true
}

fn status_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Status {
        Bool(bool),
        Num(#[serde(deserialize_with = "u64_from_int_or_hex")] u64),
    }
    Ok(match Status::deserialize(deserializer)? {
        Status::Bool(b) => b,
        Status::Num(n) => n == 1,
    })
}

#[derive(Deserialize)]
struct BlockTxHashes {
    #[serde(default)]
    transactions: Vec<TxHashOrObject>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TxHashOrObject {
    Hash(B256),
    Object { hash: B256 },
}

impl TxHashOrObject {
    fn hash(self) -> B256 {
        match self {
            Self::Hash(h) | Self::Object { hash: h } => h,
        }
    }
}

/// Outcome of a read-only `eth_call`.
#[derive(Clone, Debug)]
pub enum CallOutcome {
    /// The call returned normally.
    Success(Bytes),
    /// The call reverted. Reverts are reported by the node as JSON-RPC errors.
    Reverted { message: String, data: Option<Bytes> },
}

/// Outcome of `eth_sendTransaction`.
#[derive(Clone, Debug)]
pub enum SendOutcome {
    /// The transaction was accepted.
    Submitted(B256),
    /// The node reported an error but the transaction was mined anyway (older ganache versions).
    MinedWithError { hash: B256, message: String },
    /// The node refused the transaction, e.g. for lack of funds.
    Rejected(NodeError),
}

impl SendOutcome {
    /// The transaction hash, `None` when nothing was submitted.
    pub fn hash(&self) -> Option<B256> {
        match self {
            Self::Submitted(hash) | Self::MinedWithError { hash, .. } => Some(*hash),
            Self::Rejected(_) => None,
        }
    }
}

/// JSON-RPC client bound to one node endpoint.
#[derive(Clone, Debug)]
pub struct RpcClient {
    provider: RootProvider,
    url: Url,
    timeout: Duration,
}

impl RpcClient {
    /// Creates a new client for the given HTTP endpoint.
    pub fn new(url: Url) -> Self {
        Self { provider: RootProvider::new_http(url.clone()), url, timeout: REQUEST_TIMEOUT }
    }

    /// Parses `url` and creates a client; `localhost:8545` style URLs get an `http://` prefix.
    pub fn from_str_url(url: &str) -> Result<Self> {
        let url = if url.starts_with("localhost:") || url.starts_with("127.0.0.1:") {
            format!("http://{url}")
        } else {
            url.to_string()
        };
        let url = Url::parse(&url)
            .map_err(|e| HarnessError::InvalidProject(format!("invalid RPC url {url:?}: {e}")))?;
        Ok(Self::new(url))
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The endpoint this client talks to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends a request and separates node errors from transport errors.
    ///
    /// The outer result fails with `Connection` or `Timeout`, the inner one carries the node's
    /// JSON-RPC error.
    pub async fn raw(
        &self,
        method: impl Into<Cow<'static, str>>,
        params: Value,
    ) -> Result<Result<Value, NodeError>> {
        let method = method.into();
        trace!(target: "scfuzz::rpc", %method, %params, "request");
        let fut = self.provider.raw_request::<Value, Value>(method.clone(), params);
        match tokio::time::timeout(self.timeout, fut).await {
            Err(_) => Err(HarnessError::timeout(format!("`{method}` response"), self.timeout)),
            Ok(Ok(value)) => Ok(Ok(value)),
            Ok(Err(err)) => classify(&method, err),
        }
    }

    /// Sends a request and decodes the response; node errors become [`HarnessError::Rpc`].
    pub async fn request<R: DeserializeOwned>(
        &self,
        method: impl Into<Cow<'static, str>>,
        params: Value,
    ) -> Result<R> {
        let method = method.into();
        let value = self
            .raw(method.clone(), params)
            .await?
            .map_err(|e| HarnessError::Rpc(format!("{method}: {e}")))?;
        decode(&method, value)
    }

    pub async fn block_number(&self) -> Result<u64> {
        let n: Quantity = self.request("eth_blockNumber", json!([])).await?;
        Ok(n.0)
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let n: Quantity = self.request("eth_chainId", json!([])).await?;
        Ok(n.0)
    }

    /// Transaction hashes of block `number`, empty if the block does not exist.
    pub async fn block_transactions(&self, number: u64) -> Result<Vec<B256>> {
        let block: Option<BlockTxHashes> = self
            .request("eth_getBlockByNumber", json!([BlockNumberOrTag::Number(number), false]))
            .await?;
        Ok(block
            .map(|b| b.transactions.into_iter().map(TxHashOrObject::hash).collect())
            .unwrap_or_default())
    }

    pub async fn receipt(&self, hash: B256) -> Result<Option<TxReceipt>> {
        self.request("eth_getTransactionReceipt", json!([hash])).await
    }

    /// Polls for the receipt of `hash` every `poll` until `timeout` elapses.
    pub async fn wait_for_receipt(
        &self,
        hash: B256,
        timeout: Duration,
        poll: Duration,
    ) -> Result<TxReceipt> {
        let wait = async {
            loop {
                if let Some(receipt) = self.receipt(hash).await? {
                    return Ok(receipt);
                }
                tokio::time::sleep(poll).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| HarnessError::timeout(format!("receipt of {hash}"), timeout))?
    }

    pub async fn code_at(&self, address: Address) -> Result<Bytes> {
        self.request("eth_getCode", json!([address, "latest"])).await
    }

    pub async fn balance(&self, address: Address) -> Result<U256> {
        let n: HexU256 = self.request("eth_getBalance", json!([address, "latest"])).await?;
        Ok(n.0)
    }

    pub async fn nonce(&self, address: Address) -> Result<u64> {
        let n: Quantity =
            self.request("eth_getTransactionCount", json!([address, "latest"])).await?;
        Ok(n.0)
    }

    /// Accounts unlocked on the node, in slot order.
    pub async fn accounts(&self) -> Result<Vec<Address>> {
        self.request("eth_accounts", json!([])).await
    }

    /// Read-only call against the latest state.
    pub async fn call(&self, request: &CallRequest) -> Result<CallOutcome> {
        match self.raw("eth_call", json!([request, "latest"])).await? {
            Ok(value) => Ok(CallOutcome::Success(decode("eth_call", value)?)),
            Err(err) => {
                Ok(CallOutcome::Reverted { data: err.revert_data(), message: err.message })
            }
        }
    }

    /// Submits a transaction from an account unlocked on the node.
    ///
    /// Errors the node answers with are outcomes, only transport failures are errors.
    pub async fn send_transaction(&self, request: &CallRequest) -> Result<SendOutcome> {
        match self.raw("eth_sendTransaction", json!([request])).await? {
            Ok(value) => Ok(SendOutcome::Submitted(decode("eth_sendTransaction", value)?)),
            Err(err) => match err.tx_hash() {
                Some(hash) => Ok(SendOutcome::MinedWithError { hash, message: err.message }),
                None => Ok(SendOutcome::Rejected(err)),
            },
        }
    }

    /// All logs emitted by `address` with the given first topic.
    pub async fn logs(&self, address: Address, topic0: B256) -> Result<Vec<Log>> {
        let filter = json!({
            "fromBlock": "earliest",
            "toBlock": "latest",
            "address": address,
            "topics": [topic0],
        });
        self.request("eth_getLogs", json!([filter])).await
    }

    /// Invokes the node's privileged set-balance method, `evm_setAccountBalance` on ganache.
    pub async fn set_balance(&self, method: &str, address: Address, wei: U256) -> Result<()> {
        let _: Value = self.request(method.to_string(), json!([address, wei])).await?;
        Ok(())
    }

    /// Whether the node answers `eth_blockNumber`.
    pub async fn is_reachable(&self) -> bool {
        self.block_number().await.is_ok()
    }
}

fn classify(method: &str, err: TransportError) -> Result<Result<Value, NodeError>> {
    if let Some(payload) = err.as_error_resp() {
        let data = payload.data.as_ref().and_then(|d| serde_json::from_str(d.get()).ok());
        return Ok(Err(NodeError {
            code: payload.code,
            message: payload.message.to_string(),
            data,
        }));
    }
    debug!(target: "scfuzz::rpc", %method, %err, "transport failure");
    Err(HarnessError::Connection(format!("{method}: {err}")))
}

fn decode<R: DeserializeOwned>(method: &str, value: Value) -> Result<R> {
    serde_json::from_value(value).map_err(|e| HarnessError::Decode {
        what: format!("`{method}` response"),
        reason: e.to_string(),
    })
}

/// A `u64` quantity, hex or integer.
#[derive(Deserialize)]
struct Quantity(#[serde(deserialize_with = "u64_from_int_or_hex")] u64);

#[derive(Deserialize)]
struct HexU256(#[serde(deserialize_with = "crate::serde_helpers::from_int_or_hex")] U256);
