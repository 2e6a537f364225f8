//! An in-process JSON-RPC node with scripted answers.

use crate::fixtures::{Deployment, ReceiptFixture};
use alloy_primitives::{Address, B256, Bytes};
use axum::{Json, Router, extract::State, routing::post};
use scfuzz_common::RpcClient;
use serde_json::{Value, json};
use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::{net::TcpListener, sync::oneshot};
use url::Url;

/// The answer to one request.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Result(Value),
    Error { code: i64, message: String, data: Option<Value> },
}

impl Reply {
    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Self::Error { code, message: message.into(), data: None }
    }

    fn into_response(self, id: Value) -> Value {
        match self {
            Self::Result(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Self::Error { code, message, data } => {
                let mut error = json!({ "code": code, "message": message });
                if let Some(data) = data {
                    error["data"] = data;
                }
                json!({ "jsonrpc": "2.0", "id": id, "error": error })
            }
        }
    }
}

type Responder = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

#[derive(Default)]
struct MockState {
    responders: Mutex<HashMap<String, Responder>>,
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<(String, Value)>>,
    receipts: Mutex<HashMap<B256, Value>>,
    code: Mutex<HashMap<Address, Bytes>>,
    traces: Mutex<HashMap<B256, Value>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockState {
    fn answer(&self, request: &Value) -> Value {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let params = request.get("params").cloned().unwrap_or(Value::Null);
        trace!(target: "mock_node", method, %params, "request");
        lock(&self.requests).push((method.to_string(), params.clone()));

        let queued = lock(&self.queued).get_mut(method).and_then(VecDeque::pop_front);
        let reply = match queued {
            Some(reply) => reply,
            None => {
                let responder = lock(&self.responders).get(method).cloned();
                match responder {
                    Some(responder) => responder(&params),
                    None => self.builtin(method, &params),
                }
            }
        };
        reply.into_response(id)
    }

    fn builtin(&self, method: &str, params: &Value) -> Reply {
        let hash = || params.get(0).and_then(|h| serde_json::from_value::<B256>(h.clone()).ok());
        match method {
            "eth_getTransactionReceipt" => Reply::Result(
                hash().and_then(|h| lock(&self.receipts).get(&h).cloned()).unwrap_or(Value::Null),
            ),
            "eth_getCode" => {
                let address = params.get(0).and_then(|a| serde_json::from_value(a.clone()).ok());
                let code = address
                    .and_then(|a: Address| lock(&self.code).get(&a).cloned())
                    .unwrap_or_default();
                Reply::Result(json!(code))
            }
            "debug_traceTransaction" => {
                match hash().and_then(|h| lock(&self.traces).get(&h).cloned()) {
                    Some(trace) => Reply::Result(trace),
                    None => Reply::error(-32000, "unknown transaction"),
                }
            }
            _ => Reply::error(-32601, format!("Method {method} not found")),
        }
    }
}

async fn handle(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
    match body {
        Value::Array(batch) => Json(Value::Array(batch.iter().map(|r| state.answer(r)).collect())),
        request => Json(state.answer(&request)),
    }
}

/// A JSON-RPC node served on a random local port until dropped.
///
/// Methods without a scripted answer fail with `-32601`, except receipts, code and traces which
/// are served from the maps filled by [`Self::add_receipt`], [`Self::set_code`] and
/// [`Self::add_trace`].
pub struct MockNode {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockNode {
    /// Binds `127.0.0.1:0` and serves in the background.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("failed to bind mock node");
        let addr = listener.local_addr().expect("no local address");
        let state = Arc::new(MockState::default());
        let app = Router::new().route("/", post(handle)).with_state(state.clone());
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
                error!(target: "mock_node", %err, "server failed");
            }
        });
        Self { addr, state, shutdown: Some(tx) }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).expect("valid url")
    }

    pub fn client(&self) -> RpcClient {
        RpcClient::new(self.url())
    }

    /// Always answers `method` with `result`.
    pub fn respond(&self, method: &str, result: Value) {
        self.respond_with(method, move |_| Reply::Result(result.clone()));
    }

    /// Always answers `method` with a JSON-RPC error.
    pub fn respond_error(&self, method: &str, code: i64, message: &str, data: Option<Value>) {
        let reply = Reply::Error { code, message: message.to_string(), data };
        self.respond_with(method, move |_| reply.clone());
    }

    /// Answers `method` by calling `f` with the request params.
    pub fn respond_with(&self, method: &str, f: impl Fn(&Value) -> Reply + Send + Sync + 'static) {
        lock(&self.state.responders).insert(method.to_string(), Arc::new(f));
    }

    /// Answers the next call of `method` with `reply`, before any other answer.
    pub fn enqueue(&self, method: &str, reply: Reply) {
        lock(&self.state.queued).entry(method.to_string()).or_default().push_back(reply);
    }

    pub fn add_receipt(&self, receipt: &ReceiptFixture) {
        lock(&self.state.receipts).insert(receipt.hash, receipt.to_json());
    }

    pub fn set_code(&self, address: Address, code: impl Into<Bytes>) {
        lock(&self.state.code).insert(address, code.into());
    }

    pub fn add_trace(&self, hash: B256, trace: Value) {
        lock(&self.state.traces).insert(hash, trace);
    }

    /// Params of every call of `method`, in order.
    pub fn requests(&self, method: &str) -> Vec<Value> {
        lock(&self.state.requests)
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Every method called so far, in order.
    pub fn methods(&self) -> Vec<String> {
        lock(&self.state.requests).iter().map(|(m, _)| m.clone()).collect()
    }

    /// Serves a chain whose block `i + 1` holds the creation of `deployments[i]`.
    pub fn install_chain(&self, accounts: &[Address], deployments: &[Deployment]) {
        self.respond("eth_accounts", json!(accounts));
        self.respond("eth_chainId", json!("0x539"));
        self.respond("eth_blockNumber", json!(format!("{:#x}", deployments.len())));

        let blocks = deployments.iter().map(|d| d.tx_hash).collect::<Vec<_>>();
        self.respond_with("eth_getBlockByNumber", move |params| {
            let number = params
                .get(0)
                .and_then(Value::as_str)
                .and_then(|n| u64::from_str_radix(n.trim_start_matches("0x"), 16).ok());
            let block = match number {
                Some(0) => json!({ "number": "0x0", "transactions": [] }),
                Some(n) if n as usize <= blocks.len() => json!({
                    "number": format!("{n:#x}"),
                    "transactions": [blocks[n as usize - 1]],
                }),
                _ => Value::Null,
            };
            Reply::Result(block)
        });

        for (i, deployment) in deployments.iter().enumerate() {
            self.set_code(deployment.address, deployment.code.clone());
            self.add_receipt(&ReceiptFixture {
                hash: deployment.tx_hash,
                block: i as u64 + 1,
                from: deployment.creator,
                contract_address: Some(deployment.address),
                ..Default::default()
            });
        }
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl std::fmt::Debug for MockNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNode").field("addr", &self.addr).finish_non_exhaustive()
    }
}
