//! Commonly used errors

use alloy_primitives::{Address, B256};
use std::{error::Error, path::PathBuf, time::Duration};

/// Convenience alias used throughout the harness crates.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

/// The coarse class of a [`HarnessError`].
///
/// The strategy loop uses the category to decide whether to retry, skip or abort.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing artifacts, duplicate bytecode, bad project layout, seed mismatch.
    Configuration,
    /// The node could not be reached.
    Transport,
    /// Method/event resolution or argument errors.
    Resolution,
    /// A bounded wait was exceeded.
    Timeout,
    /// The node process could not be managed or answered with an unexpected error.
    Node,
}

/// Every failure the harness can report.
///
/// On-chain failures (reverts) are *not* errors: they are reported as `success = false` results.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("a node is already listening on {host}:{port} but is not managed by this harness")]
    AlreadyRunningUnmanaged { host: String, port: u16 },
    #[error("failed to spawn node `{program}`: {source}")]
    NodeSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("node exited during startup ({status})")]
    NodeExited { status: String },
    #[error("failed to stop the process listening on port {port}: {reason}")]
    NodeStop { port: u16, reason: String },

    #[error("artifact directory not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),
    #[error("corrupt artifact {}: {reason}", path.display())]
    CorruptArtifact { path: PathBuf, reason: String },
    #[error("duplicate artifacts {names:?} share the same {what}; remove the duplicated compiled json files")]
    DuplicateArtifact { names: Vec<String>, what: String },
    #[error(
        "derived address of account {index} ({derived}) does not match the node ({reported:?}); check the mnemonic or derivation path"
    )]
    DerivationMismatch { index: usize, derived: Address, reported: Option<Address> },
    #[error("invalid project: {0}")]
    InvalidProject(String),
    #[error("build step `{command}` failed: {reason}")]
    BuildFailed { command: String, reason: String },
    #[error("invalid mnemonic or derivation path: {0}")]
    InvalidMnemonic(String),

    #[error("contract {contract} has no ABI; only low-level calls are possible")]
    UnknownContract { contract: Address },
    #[error("function `{name}` not found in the ABI of {contract}")]
    MethodNotFound { contract: String, name: String },
    #[error("event `{name}` not found in the ABI of {contract}")]
    EventNotFound { contract: String, name: String },
    #[error("`{name}` is ambiguous, candidates: {candidates:?}; use the full signature")]
    AmbiguousOverload { name: String, candidates: Vec<String> },
    #[error("missing argument(s) for `{method}`: {}", missing.join(", "))]
    MissingArgument { method: String, missing: Vec<String> },
    #[error("invalid argument `{param}` for `{method}`: {reason}")]
    InvalidArgument { method: String, param: String, reason: String },

    #[error("connection error: {0}")]
    Connection(String),
    #[error("RPC error from node: {0}")]
    Rpc(String),
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("trace unavailable for {hash}: {reason}")]
    TraceUnavailable { hash: B256, reason: String },
    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },
}

impl HarnessError {
    /// Returns the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AlreadyRunningUnmanaged { .. }
            | Self::NodeSpawn { .. }
            | Self::NodeExited { .. }
            | Self::NodeStop { .. }
            | Self::Rpc(_)
            | Self::Decode { .. } => ErrorCategory::Node,
            Self::ArtifactNotFound(_)
            | Self::CorruptArtifact { .. }
            | Self::DuplicateArtifact { .. }
            | Self::DerivationMismatch { .. }
            | Self::InvalidProject(_)
            | Self::BuildFailed { .. }
            | Self::InvalidMnemonic(_) => ErrorCategory::Configuration,
            Self::UnknownContract { .. }
            | Self::MethodNotFound { .. }
            | Self::EventNotFound { .. }
            | Self::AmbiguousOverload { .. }
            | Self::MissingArgument { .. }
            | Self::InvalidArgument { .. } => ErrorCategory::Resolution,
            Self::Connection(_) => ErrorCategory::Transport,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            // a trace for an unknown or pending hash is a hard failure
            Self::TraceUnavailable { .. } => ErrorCategory::Node,
        }
    }

    /// Only timeouts may be retried.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Timeout
    }

    /// Whether this error should abort a fuzzing session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Transport | ErrorCategory::Node
        ) && !matches!(self, Self::TraceUnavailable { .. })
    }

    /// Shorthand for a [`HarnessError::Timeout`].
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout { what: what.into(), after }
    }
}

/// Displays a chain of errors in a single line.
pub fn display_chain(error: &(dyn Error + 'static)) -> String {
    dedup_chain(error).join("; ")
}

/// Deduplicates a chain of errors.
pub fn dedup_chain(error: &(dyn Error + 'static)) -> Vec<String> {
    let mut causes = all_sources(error);
    // Deduplicate the common pattern `msg1: msg2; msg2` -> `msg1: msg2`.
    causes.dedup_by(|b, a| a.contains(b.as_str()));
    causes
}

fn all_sources(err: &(dyn Error + 'static)) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = Some(err);
    while let Some(cause) = current {
        out.push(cause.to_string().trim().to_string());
        current = cause.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_contained() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = HarnessError::NodeSpawn { program: "ganache".into(), source: io };
        assert_eq!(all_sources(&err).len(), 2);
        assert_eq!(display_chain(&err), "failed to spawn node `ganache`: no such file");
    }

    #[test]
    fn categories() {
        let timeout = HarnessError::timeout("receipt", Duration::from_secs(1));
        assert!(timeout.is_retryable());
        assert!(!timeout.is_fatal());

        let conn = HarnessError::Connection("refused".into());
        assert_eq!(conn.category(), ErrorCategory::Transport);
        assert!(conn.is_fatal());

        let missing =
            HarnessError::MissingArgument { method: "transfer".into(), missing: vec!["to".into()] };
        assert_eq!(missing.category(), ErrorCategory::Resolution);
        assert!(!missing.is_fatal());
        assert_eq!(missing.to_string(), "missing argument(s) for `transfer`: to");
    }
}
