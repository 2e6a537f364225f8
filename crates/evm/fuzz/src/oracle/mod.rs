//! Signature based bug detection over struct-log traces.
//!
//! Every [`Detector`] looks at the frames of one transaction. The oracle keeps one
//! [`BugRecord`] per (kind, contract, method) whose first sighting is never overwritten.

use crate::error::ParseBugKindError;
use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use scfuzz_evm_traces::{Frame, FrameMap, StructLog};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, btree_map::Entry},
    fmt, mem,
    str::FromStr,
};

mod detectors;
pub use detectors::{CALL_STIPEND, Leaking, Reentrancy, Suicidal, UnhandledException};

/// Method label of transactions that hit no ABI method.
pub const FALLBACK_METHOD: &str = "<fallback>";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BugKind {
    Reentrancy,
    /// The contract can be destroyed.
    Suicidal,
    /// Ether leaves the contract to a sender that is not privileged.
    Leaking,
    /// The success flag of an external call is ignored.
    UnhandledException,
}

impl BugKind {
    pub const ALL: [Self; 4] =
        [Self::Reentrancy, Self::Suicidal, Self::Leaking, Self::UnhandledException];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reentrancy => "reentrancy",
            Self::Suicidal => "suicidal",
            Self::Leaking => "leaking",
            Self::UnhandledException => "unhandled-exception",
        }
    }
}

impl fmt::Display for BugKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BugKind {
    type Err = ParseBugKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "reentrancy" => Self::Reentrancy,
            "suicidal" | "selfdestruct" => Self::Suicidal,
            "leaking" | "leaking-funds" => Self::Leaking,
            "unhandled-exception" | "unhandledexception" | "unhandled" => {
                Self::UnhandledException
            }
            _ => return Err(ParseBugKindError(s.to_string())),
        })
    }
}

/// First sighting and count of one bug.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BugRecord {
    pub kind: BugKind,
    pub contract: String,
    pub address: Address,
    pub method: String,
    pub first_seen: DateTime<Utc>,
    /// Transaction that first triggered the bug.
    pub first_tx: Option<B256>,
    pub occurrences: u64,
}

/// Everything a detector may look at for one transaction.
#[derive(Clone, Copy, Debug)]
pub struct InspectContext<'a> {
    pub target: Address,
    /// Label of the target contract.
    pub contract: &'a str,
    pub method: Option<&'a str>,
    pub sender: Address,
    pub creator: Address,
    pub deployer: Address,
    pub success: bool,
    pub tx_hash: Option<B256>,
    pub steps: &'a [StructLog],
    pub frames: &'a FrameMap,
}

impl InspectContext<'_> {
    /// Whether `frame` reads and writes the target's storage.
    pub fn is_target_frame(&self, frame: &Frame) -> bool {
        frame.storage_address == Some(self.target)
    }

    /// Steps run against the target's storage, with their index.
    pub fn target_steps(&self) -> impl Iterator<Item = (usize, &StructLog)> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(i, _)| self.frames.frame_of(*i).is_some_and(|f| self.is_target_frame(f)))
    }

    /// Whether the sender is the contract's creator or the deployer account.
    pub fn sender_is_privileged(&self) -> bool {
        self.sender == self.creator || self.sender == self.deployer
    }
}

pub trait Detector: fmt::Debug + Send + Sync {
    fn kind(&self) -> BugKind;

    fn detect(&self, ctx: &InspectContext<'_>) -> bool;
}

/// Runs the detectors and accumulates their findings for a session.
#[derive(Debug)]
pub struct BugOracle {
    detectors: Vec<Box<dyn Detector>>,
    records: BTreeMap<(BugKind, String, String), BugRecord>,
    fresh: Vec<BugRecord>,
}

impl Default for BugOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl BugOracle {
    /// An oracle running every built-in detector.
    pub fn new() -> Self {
        Self::with_kinds(BugKind::ALL)
    }

    /// An oracle running only the built-in detectors of `kinds`.
    pub fn with_kinds(kinds: impl IntoIterator<Item = BugKind>) -> Self {
        let detectors = kinds
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|kind| -> Box<dyn Detector> {
                match kind {
                    BugKind::Reentrancy => Box::new(Reentrancy::default()),
                    BugKind::Suicidal => Box::new(Suicidal),
                    BugKind::Leaking => Box::new(Leaking),
                    BugKind::UnhandledException => Box::new(UnhandledException),
                }
            })
            .collect();
        Self::with_detectors(detectors)
    }

    pub fn with_detectors(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self { detectors, records: BTreeMap::new(), fresh: Vec::new() }
    }

    pub fn add_detector(&mut self, detector: Box<dyn Detector>) {
        self.detectors.push(detector);
    }

    /// Kinds of the installed detectors, in installation order.
    pub fn kinds(&self) -> impl Iterator<Item = BugKind> + '_ {
        self.detectors.iter().map(|d| d.kind())
    }

    /// Runs every detector on a transaction and records what they found.
    ///
    /// Reverted transactions leave no effects behind and are never reported.
    pub fn inspect(&mut self, ctx: &InspectContext<'_>) -> BTreeSet<BugKind> {
        if !ctx.success || ctx.steps.is_empty() {
            return BTreeSet::new();
        }
        let found = self
            .detectors
            .iter()
            .filter(|d| d.detect(ctx))
            .map(|d| d.kind())
            .collect::<BTreeSet<_>>();

        let method = ctx.method.unwrap_or(FALLBACK_METHOD);
        for &kind in &found {
            match self.records.entry((kind, ctx.contract.to_string(), method.to_string())) {
                Entry::Vacant(entry) => {
                    let tx = ctx.tx_hash;
                    info!(%kind, contract = ctx.contract, method, ?tx, "new bug found");
                    let record = entry.insert(BugRecord {
                        kind,
                        contract: ctx.contract.to_string(),
                        address: ctx.target,
                        method: method.to_string(),
                        first_seen: Utc::now(),
                        first_tx: ctx.tx_hash,
                        occurrences: 1,
                    });
                    self.fresh.push(record.clone());
                }
                Entry::Occupied(mut entry) => entry.get_mut().occurrences += 1,
            }
        }
        found
    }

    /// Records first seen since the previous call.
    pub fn take_new(&mut self) -> Vec<BugRecord> {
        mem::take(&mut self.fresh)
    }

    pub fn records(&self) -> impl Iterator<Item = &BugRecord> {
        self.records.values()
    }

    pub fn record(&self, kind: BugKind, contract: &str, method: &str) -> Option<&BugRecord> {
        self.records.get(&(kind, contract.to_string(), method.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
