use crate::builder::EncodedCall;
use alloy_dyn_abi::{DecodedEvent, DynSolValue};
use alloy_primitives::{Address, B256, U256};
use scfuzz_common::{
    CallOutcome, CallRequest, Contract, ErrorCategory, HarnessError, Method, Result, RpcClient,
    SendOutcome, TxReceipt,
};
use scfuzz_evm_traces::{StructLog, TraceReader};
use std::time::Duration;

/// Gas limit of dispatched transactions, ganache's default block gas limit.
pub const DEFAULT_GAS_LIMIT: u64 = 6_721_975;

/// Default bound on waiting for a receipt.
pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default receipt polling interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What a dispatched call produced.
#[derive(Clone, Debug, Default)]
pub enum TxOutput {
    #[default]
    None,
    /// Decoded return values of a constant call.
    Values(Vec<DynSolValue>),
    Receipt(TxReceipt),
    Events(Vec<DecodedEvent>),
}

/// Outcome of one call.
///
/// Reverts are reported with `success = false`, never as errors.
#[derive(Clone, Debug, Default)]
pub struct TxResult {
    pub success: bool,
    /// Set for every submitted transaction, never for constant calls.
    pub tx_hash: Option<B256>,
    pub output: TxOutput,
    /// Revert reason, decoding failure, or why the receipt or trace is missing.
    pub message: Option<String>,
    pub trace: Option<Vec<StructLog>>,
    /// The call was replaced by the invalid selector probe.
    pub probe: bool,
}

impl TxResult {
    pub fn receipt(&self) -> Option<&TxReceipt> {
        match &self.output {
            TxOutput::Receipt(receipt) => Some(receipt),
            _ => None,
        }
    }

    pub fn values(&self) -> Option<&[DynSolValue]> {
        match &self.output {
            TxOutput::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn events(&self) -> Option<&[DecodedEvent]> {
        match &self.output {
            TxOutput::Events(events) => Some(events),
            _ => None,
        }
    }
}

/// Sends encoded calls to the node and collects their outcome.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    client: RpcClient,
    traces: TraceReader,
    receipt_timeout: Duration,
    poll_interval: Duration,
    gas_limit: u64,
}

impl Dispatcher {
    pub fn new(client: RpcClient) -> Self {
        Self {
            traces: TraceReader::new(client.clone()),
            client,
            receipt_timeout: RECEIPT_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            gas_limit: DEFAULT_GAS_LIMIT,
        }
    }

    pub fn with_traces(mut self, traces: TraceReader) -> Self {
        self.traces = traces;
        self
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn traces(&self) -> &TraceReader {
        &self.traces
    }

    /// Executes `call` from `sender`.
    ///
    /// Constant methods run through `eth_call` and are never traced. Everything else is sent as
    /// a transaction from the node-unlocked `sender` and waited for; `trace` fetches its struct
    /// logs once it is mined.
    ///
    /// A transaction the node refuses is `success = false` without a hash. Once the node
    /// accepted the transaction its hash is always returned: a receipt that never
    /// arrives yields `success = false`, a missing trace yields `trace = None`, both with the
    /// cause in `message`. Only transport failures are errors.
    pub async fn dispatch(
        &self,
        call: &EncodedCall,
        sender: Address,
        value: U256,
        trace: bool,
    ) -> Result<TxResult> {
        let request = CallRequest {
            from: Some(sender),
            to: Some(call.to),
            gas: None,
            value: (!value.is_zero()).then_some(value),
            data: call.data.clone(),
        };
        match call.method.as_ref().filter(|m| m.is_constant()) {
            Some(method) => self.call_constant(method, &request).await,
            None => self.send(call, request, trace).await,
        }
    }

    async fn call_constant(&self, method: &Method, request: &CallRequest) -> Result<TxResult> {
        let result = match self.client.call(request).await? {
            CallOutcome::Success(data) => match method.decode_output(&data) {
                Ok(values) => TxResult {
                    success: true,
                    output: TxOutput::Values(values),
                    ..Default::default()
                },
                Err(err) => {
                    debug!(method = %method.signature, %err, "undecodable return data");
                    TxResult { message: Some(err.to_string()), ..Default::default() }
                }
            },
            CallOutcome::Reverted { message, .. } => {
                TxResult { message: Some(message), ..Default::default() }
            }
        };
        trace!(method = %method.signature, success = result.success, "constant call");
        Ok(result)
    }

    async fn send(
        &self,
        call: &EncodedCall,
        mut request: CallRequest,
        trace: bool,
    ) -> Result<TxResult> {
        request.gas = Some(U256::from(self.gas_limit));
        let (hash, mut message) = match self.client.send_transaction(&request).await? {
            SendOutcome::Submitted(hash) => (hash, None),
            SendOutcome::MinedWithError { hash, message } => (hash, Some(message)),
            SendOutcome::Rejected(err) => {
                debug!(contract = %call.contract, %err, "transaction rejected");
                return Ok(TxResult {
                    message: Some(err.to_string()),
                    probe: call.is_probe(),
                    ..Default::default()
                });
            }
        };

        let waited = self.client.wait_for_receipt(hash, self.receipt_timeout, self.poll_interval);
        let receipt = match waited.await {
            Ok(receipt) => receipt,
            Err(err) if err.category() == ErrorCategory::Transport => return Err(err),
            Err(err) => {
                warn!(%hash, %err, "submitted transaction has no receipt");
                return Ok(TxResult {
                    tx_hash: Some(hash),
                    message: Some(err.to_string()),
                    probe: call.is_probe(),
                    ..Default::default()
                });
            }
        };
        if !receipt.status && message.is_none() {
            message = Some("transaction reverted".to_string());
        }
        debug!(
            contract = %call.contract,
            method = call.signature().unwrap_or("<probe>"),
            %hash,
            success = receipt.status,
            gas_used = receipt.gas_used,
            "transaction mined"
        );

        let trace = if trace {
            match self.traces.trace(hash, None).await {
                Ok(steps) => Some(steps),
                Err(err) if err.category() == ErrorCategory::Transport => return Err(err),
                Err(err) => {
                    warn!(%hash, %err, "mined transaction has no trace");
                    message.get_or_insert_with(|| err.to_string());
                    None
                }
            }
        } else {
            None
        };
        Ok(TxResult {
            success: receipt.status,
            tx_hash: Some(hash),
            output: TxOutput::Receipt(receipt),
            message,
            trace,
            probe: call.is_probe(),
        })
    }

    /// Decodes the `name` events emitted by `contract`.
    ///
    /// Only the receipt of `tx_hash` is searched when given, otherwise every block.
    pub async fn events(
        &self,
        contract: &Contract,
        name: &str,
        tx_hash: Option<B256>,
    ) -> Result<Vec<DecodedEvent>> {
        let label = contract.label();
        let event = contract.abi()?.resolve_event(&label, name, None)?;
        let logs = match tx_hash {
            Some(hash) => {
                self.client
                    .receipt(hash)
                    .await?
                    .ok_or_else(|| HarnessError::Rpc(format!("no receipt for transaction {hash}")))?
                    .logs
            }
            None => self.client.logs(contract.address, event.topic).await?,
        };
        logs.iter()
            .map(|log| &log.inner)
            .filter(|log| {
                log.address == contract.address && log.data.topics().first() == Some(&event.topic)
            })
            .map(|log| event.decode(&log.data))
            .collect()
    }
}
