use crate::types::{DefaultFrame, StructLog, TraceOptions};
use alloy_primitives::B256;
use scfuzz_common::{HarnessError, Result, RpcClient};
use serde_json::{Value, json};
use std::time::Duration;

/// Default bound on a single `debug_traceTransaction` call.
pub const TRACE_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches struct-log traces of mined transactions.
#[derive(Clone, Debug)]
pub struct TraceReader {
    client: RpcClient,
    timeout: Duration,
    options: TraceOptions,
}

impl TraceReader {
    pub fn new(client: RpcClient) -> Self {
        Self { client, timeout: TRACE_TIMEOUT, options: TraceOptions::default() }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Options used when [`Self::trace`] is called without any.
    pub fn with_options(mut self, options: TraceOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the steps executed by transaction `hash`.
    pub async fn trace(
        &self,
        hash: B256,
        options: Option<TraceOptions>,
    ) -> Result<Vec<StructLog>> {
        Ok(self.trace_frame(hash, options).await?.struct_logs)
    }

    /// Returns the full default tracer result of transaction `hash`.
    ///
    /// Unknown or pending hashes fail with [`HarnessError::TraceUnavailable`]; exceeding the
    /// timeout fails with a retryable [`HarnessError::Timeout`].
    pub async fn trace_frame(
        &self,
        hash: B256,
        options: Option<TraceOptions>,
    ) -> Result<DefaultFrame> {
        let options = options.unwrap_or(self.options);
        let unavailable = |reason: String| HarnessError::TraceUnavailable { hash, reason };

        let request = self.client.raw("debug_traceTransaction", json!([hash, options]));
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| HarnessError::timeout(format!("trace of {hash}"), self.timeout))??;
        let value = response.map_err(|e| unavailable(e.to_string()))?;
        if value.is_null() {
            return Err(unavailable("node returned no trace".to_string()));
        }
        let frame: DefaultFrame = serde_json::from_value(value).map_err(|e| {
            HarnessError::Decode { what: format!("trace of {hash}"), reason: e.to_string() }
        })?;
        trace!(%hash, steps = frame.struct_logs.len(), failed = frame.failed, "fetched trace");
        Ok(frame)
    }

    /// Raw tracer output, for custom tracers.
    pub async fn trace_raw(&self, hash: B256, options: Value) -> Result<Value> {
        self.client
            .raw("debug_traceTransaction", json!([hash, options]))
            .await?
            .map_err(|e| HarnessError::TraceUnavailable { hash, reason: e.to_string() })
    }
}
