//! Errors related to the bug oracle.

/// An unrecognized bug kind name.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown bug kind `{0}`, expected one of reentrancy, suicidal, leaking, unhandled-exception")]
pub struct ParseBugKindError(pub String);
