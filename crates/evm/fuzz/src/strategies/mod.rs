//! Transaction selection.
//!
//! A [`Strategy`] sees an [`Observation`] of the session after every step and proposes the next
//! transaction. Learned policies live outside this workspace and plug in through the same trait.

use crate::{BugKind, BugRecord, TxIntent};
use alloy_primitives::Address;
use scfuzz_common::{AbiModel, Method};
use scfuzz_evm_coverage::CoverageSnapshot;
use serde::Serialize;
use std::{collections::BTreeSet, sync::Arc};

mod param;
pub use param::{MAX_ARRAY_LEN, fuzz_param};

mod random;
pub use random::RandomStrategy;

/// A known contract transactions may be sent to.
#[derive(Clone, Debug)]
pub struct Target {
    pub address: Address,
    pub name: String,
    pub abi: Arc<AbiModel>,
}

impl Target {
    /// Methods that change state.
    pub fn callable(&self) -> impl Iterator<Item = &Method> {
        self.abi.mutating_methods()
    }
}

/// What the previous step produced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StepFeedback {
    pub success: bool,
    /// The call was replaced by an invalid selector probe.
    pub probe: bool,
    pub new_instructions: usize,
    pub new_blocks: usize,
    pub bugs: BTreeSet<BugKind>,
}

/// Session state handed to the strategy before every step.
#[derive(Clone, Debug, Default)]
pub struct Observation {
    pub step: u64,
    pub episode: u64,
    /// Steps since the episode counters were last reset.
    pub episode_step: u64,
    pub targets: Vec<Target>,
    /// Accounts allowed to send transactions, deployer first.
    pub senders: Vec<Address>,
    pub coverage: CoverageSnapshot,
    pub bugs: Vec<BugRecord>,
    /// Bugs first seen by the previous step.
    pub new_bugs: Vec<BugRecord>,
    pub last: Option<StepFeedback>,
}

impl Observation {
    /// Addresses worth passing as `address` arguments.
    pub fn addresses(&self) -> Vec<Address> {
        self.senders.iter().copied().chain(self.targets.iter().map(|t| t.address)).collect()
    }
}

/// Proposes transactions.
pub trait Strategy {
    fn name(&self) -> &str;

    /// The next transaction, `None` ends the session.
    fn select_transaction(&mut self, observation: &Observation) -> Option<TxIntent>;
}
