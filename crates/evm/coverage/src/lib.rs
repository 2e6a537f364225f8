//! # scfuzz-evm-coverage
//!
//! Instruction and basic block coverage of deployed contracts, rebuilt from struct-log traces.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

use alloy_primitives::{Address, map::HashMap};
use scfuzz_common::Contract;
use scfuzz_evm_core::{Analysis, Disassembly};
use scfuzz_evm_traces::{FrameMap, StructLog, annotate};
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// Hit counters keyed by program counter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HitMap {
    pub hits: BTreeMap<usize, u64>,
}

impl HitMap {
    /// Increase the hit counter for the given program counter, returns `true` on the first hit.
    pub fn hit(&mut self, pc: usize) -> bool {
        let count = self.hits.entry(pc).or_default();
        *count += 1;
        *count == 1
    }

    pub fn get(&self, pc: usize) -> u64 {
        self.hits.get(&pc).copied().unwrap_or_default()
    }

    /// Number of distinct program counters hit.
    pub fn covered(&self) -> usize {
        self.hits.len()
    }

    pub fn clear(&mut self) {
        self.hits.clear();
    }

    pub fn merge(&mut self, other: &Self) {
        for (pc, hits) in &other.hits {
            *self.hits.entry(*pc).or_default() += hits;
        }
    }
}

/// Block coverage of one method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct MethodCoverage {
    /// `covered / total`, `0` when the method region is unknown.
    pub block_cov: f64,
    pub covered: usize,
    pub total: usize,
    /// Number of recorded transactions that called this method.
    pub calls: u64,
}

/// Coverage state of one deployed contract.
#[derive(Clone, Debug)]
pub struct ContractCoverage {
    pub address: Address,
    pub name: String,
    code: Arc<Disassembly>,
    analysis: Analysis,
    cumulative: HitMap,
    episode: HitMap,
    /// Relative call depths each pc executed at.
    states: BTreeMap<usize, BTreeSet<usize>>,
    covered_blocks: BTreeSet<usize>,
    episode_blocks: BTreeSet<usize>,
    /// Method key to its reachable blocks.
    regions: BTreeMap<String, BTreeSet<usize>>,
    calls: BTreeMap<String, u64>,
}

impl ContractCoverage {
    pub fn new(contract: &Contract) -> Self {
        let analysis = Analysis::new(&contract.code);
        let mut regions = BTreeMap::new();
        if let Some(abi) = contract.abi.as_deref() {
            let by_selector = analysis.method_regions();
            for method in &abi.methods {
                let overloaded =
                    abi.methods.iter().filter(|m| m.name() == method.name()).count() > 1;
                let key = if overloaded {
                    method.signature.clone()
                } else {
                    method.name().to_string()
                };
                let region = by_selector.get(&method.selector).cloned().unwrap_or_default();
                if region.is_empty() {
                    trace!(contract = %contract, method = %method.signature, "no dispatch entry");
                }
                regions.insert(key, region);
            }
        }
        Self {
            address: contract.address,
            name: contract.label(),
            code: contract.code.clone(),
            analysis,
            cumulative: HitMap::default(),
            episode: HitMap::default(),
            states: BTreeMap::new(),
            covered_blocks: BTreeSet::new(),
            episode_blocks: BTreeSet::new(),
            regions,
            calls: BTreeMap::new(),
        }
    }

    /// Records one executed pc at the given relative depth.
    ///
    /// Returns `(new_instruction, new_block)`. Program counters that do not start an instruction
    /// are ignored.
    fn hit(&mut self, pc: usize, depth: usize) -> Option<(bool, bool)> {
        let index = self.code.index_of(pc)?;
        let new_instruction = self.cumulative.hit(pc);
        self.episode.hit(pc);
        self.states.entry(pc).or_default().insert(depth);
        let block = self.analysis.block_of_index(index)?;
        self.episode_blocks.insert(block);
        Some((new_instruction, self.covered_blocks.insert(block)))
    }

    pub fn instruction_count(&self) -> usize {
        self.code.len()
    }

    pub fn block_count(&self) -> usize {
        self.analysis.blocks().len()
    }

    /// `(instruction ratio, block ratio)` over the whole session.
    pub fn coverage(&self) -> (f64, f64) {
        (
            ratio(self.cumulative.covered(), self.instruction_count()),
            ratio(self.covered_blocks.len(), self.block_count()),
        )
    }

    /// `(instruction ratio, block ratio)` since the last episode reset.
    pub fn episode_coverage(&self) -> (f64, f64) {
        (
            ratio(self.episode.covered(), self.instruction_count()),
            ratio(self.episode_blocks.len(), self.block_count()),
        )
    }

    pub fn method_coverage(&self) -> BTreeMap<String, MethodCoverage> {
        self.regions
            .iter()
            .map(|(name, region)| {
                let covered = region.intersection(&self.covered_blocks).count();
                let cov = MethodCoverage {
                    block_cov: ratio(covered, region.len()),
                    covered,
                    total: region.len(),
                    calls: self.calls.get(name).copied().unwrap_or_default(),
                };
                (name.clone(), cov)
            })
            .collect()
    }

    /// Cumulative hit count of `pc`.
    pub fn hits(&self, pc: usize) -> u64 {
        self.cumulative.get(pc)
    }

    /// Hit count of `pc` in the current episode.
    pub fn episode_hits(&self, pc: usize) -> u64 {
        self.episode.get(pc)
    }

    pub fn cumulative(&self) -> &HitMap {
        &self.cumulative
    }

    /// Relative call depths `pc` was observed executing at.
    pub fn states(&self, pc: usize) -> Option<&BTreeSet<usize>> {
        self.states.get(&pc)
    }

    /// Zeroes the per-episode counters, cumulative counts are left untouched.
    pub fn reset_episode(&mut self) {
        self.episode.clear();
        self.episode_blocks.clear();
    }

    pub fn snapshot(&self) -> ContractSnapshot {
        let (instruction_cov, block_cov) = self.coverage();
        let (episode_instruction_cov, episode_block_cov) = self.episode_coverage();
        ContractSnapshot {
            address: self.address,
            name: self.name.clone(),
            instruction_cov,
            block_cov,
            episode_instruction_cov,
            episode_block_cov,
            covered_instructions: self.cumulative.covered(),
            total_instructions: self.instruction_count(),
            covered_blocks: self.covered_blocks.len(),
            total_blocks: self.block_count(),
            methods: self.method_coverage(),
        }
    }
}

fn ratio(covered: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { covered as f64 / total as f64 }
}

/// What a single [`CoverageTracker::record`] call added.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub steps: usize,
    /// Steps that ran code of a registered contract.
    pub attributed: usize,
    pub new_instructions: usize,
    pub new_blocks: usize,
}

impl RecordSummary {
    /// Whether the trace reached code never covered before.
    pub fn is_novel(&self) -> bool {
        self.new_instructions > 0
    }
}

/// Serializable coverage of one contract.
#[derive(Clone, Debug, Serialize)]
pub struct ContractSnapshot {
    pub address: Address,
    pub name: String,
    pub instruction_cov: f64,
    pub block_cov: f64,
    pub episode_instruction_cov: f64,
    pub episode_block_cov: f64,
    pub covered_instructions: usize,
    pub total_instructions: usize,
    pub covered_blocks: usize,
    pub total_blocks: usize,
    pub methods: BTreeMap<String, MethodCoverage>,
}

/// Serializable coverage of every registered contract.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CoverageSnapshot {
    pub contracts: Vec<ContractSnapshot>,
}

/// Coverage of every registered contract.
///
/// Counters only grow within a session; [`Self::reset_episode`] clears the episode view only.
#[derive(Clone, Debug, Default)]
pub struct CoverageTracker {
    contracts: BTreeMap<Address, ContractCoverage>,
}

impl CoverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `contract`. Registering an address twice keeps the existing counters.
    pub fn register(&mut self, contract: &Contract) {
        self.contracts.entry(contract.address).or_insert_with(|| {
            debug!(contract = %contract, instructions = contract.code.len(), "tracking coverage");
            ContractCoverage::new(contract)
        });
    }

    pub fn is_registered(&self, address: Address) -> bool {
        self.contracts.contains_key(&address)
    }

    pub fn get(&self, address: Address) -> Option<&ContractCoverage> {
        self.contracts.get(&address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContractCoverage> {
        self.contracts.values()
    }

    /// Walks a trace of a transaction sent to `root`, see [`Self::record_frames`].
    pub fn record(
        &mut self,
        root: Address,
        method: Option<&str>,
        steps: &[StructLog],
    ) -> RecordSummary {
        let frames = annotate(steps, root);
        self.record_frames(root, method, steps, &frames)
    }

    /// Walks a trace whose frames were already rebuilt.
    ///
    /// Each step is attributed to the contract whose code executes in its frame, so nested calls
    /// into other registered contracts are covered too.
    pub fn record_frames(
        &mut self,
        root: Address,
        method: Option<&str>,
        steps: &[StructLog],
        frames: &FrameMap,
    ) -> RecordSummary {
        let mut summary = RecordSummary { steps: steps.len(), ..Default::default() };
        let mut novel: HashMap<Address, usize> = HashMap::default();
        for (i, step) in steps.iter().enumerate() {
            let Some(frame) = frames.frame_of(i) else { continue };
            let Some(address) = frame.code_address else { continue };
            let Some(contract) = self.contracts.get_mut(&address) else { continue };
            let Some((new_inst, new_block)) = contract.hit(step.pc as usize, frame.depth) else {
                continue;
            };
            summary.attributed += 1;
            summary.new_instructions += new_inst as usize;
            summary.new_blocks += new_block as usize;
            if new_inst {
                *novel.entry(address).or_default() += 1;
            }
        }
        for (address, count) in &novel {
            debug!(%address, new_instructions = count, "new coverage");
        }

        if let (Some(method), Some(contract)) = (method, self.contracts.get_mut(&root)) {
            let name = method.split('(').next().unwrap_or(method);
            let key = contract
                .regions
                .keys()
                .find(|k| k.as_str() == method || k.as_str() == name)
                .cloned()
                .unwrap_or_else(|| method.to_string());
            *contract.calls.entry(key).or_default() += 1;
        }
        trace!(%root, ?method, ?summary, "recorded coverage");
        summary
    }

    /// `(instruction ratio, block ratio)` of `address`.
    pub fn coverage(&self, address: Address) -> Option<(f64, f64)> {
        self.get(address).map(ContractCoverage::coverage)
    }

    pub fn method_coverage(&self, address: Address) -> Option<BTreeMap<String, MethodCoverage>> {
        self.get(address).map(ContractCoverage::method_coverage)
    }

    /// Zeroes the episode counters of `address`, returns `false` if it is not registered.
    pub fn reset_episode(&mut self, address: Address) -> bool {
        self.contracts.get_mut(&address).map(ContractCoverage::reset_episode).is_some()
    }

    pub fn reset_all_episodes(&mut self) {
        self.contracts.values_mut().for_each(ContractCoverage::reset_episode);
    }

    pub fn snapshot(&self) -> CoverageSnapshot {
        CoverageSnapshot { contracts: self.contracts.values().map(|c| c.snapshot()).collect() }
    }
}
