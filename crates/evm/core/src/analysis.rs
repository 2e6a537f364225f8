//! Static control-flow recovery over disassembled bytecode.
//!
//! Jump targets are only recovered when they are pushed as constants, which covers the code
//! solc emits for dispatch and internal calls. Dynamic jumps (internal returns) get no
//! successors of their own; their targets become successors of the block that pushed them.

use crate::bytecode::{Disassembly, Instruction};
use alloy_primitives::{Selector, map::HashMap};
use revm::bytecode::opcode as op;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Number of instructions after a selector push in which the `EQ` must appear.
const DISPATCH_WINDOW: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BasicBlock {
    pub start_pc: usize,
    pub end_pc: usize,
    /// Index of the first instruction.
    pub first: usize,
    /// Index of the last instruction.
    pub last: usize,
    pub successors: Vec<usize>,
}

impl BasicBlock {
    pub fn instruction_count(&self) -> usize {
        self.last - self.first + 1
    }
}

/// A selector compared against the call data and the pc it dispatches to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DispatchEntry {
    pub selector: Selector,
    pub entry_pc: usize,
}

/// Basic blocks, successors and dispatch table of one bytecode.
#[derive(Clone, Debug, Default)]
pub struct Analysis {
    blocks: Vec<BasicBlock>,
    /// Instruction index -> block index.
    block_of: Vec<usize>,
    /// Instruction pc -> block index.
    block_by_pc: HashMap<usize, usize>,
    dispatch: Vec<DispatchEntry>,
}

impl Analysis {
    pub fn new(code: &Disassembly) -> Self {
        let insts = code.instructions();
        if insts.is_empty() {
            return Self::default();
        }
        let jumpdests = insts
            .iter()
            .filter(|i| i.opcode == op::JUMPDEST)
            .map(|i| i.pc)
            .collect::<BTreeSet<_>>();

        let mut blocks = Vec::new();
        let mut block_of = Vec::with_capacity(insts.len());
        let mut first = 0;
        for (idx, inst) in insts.iter().enumerate() {
            if idx > first && inst.opcode == op::JUMPDEST {
                blocks.push(block(insts, first, idx - 1));
                first = idx;
            }
            block_of.push(blocks.len());
            if ends_block(inst) {
                blocks.push(block(insts, first, idx));
                first = idx + 1;
            }
        }
        if first < insts.len() {
            blocks.push(block(insts, first, insts.len() - 1));
        }

        let block_by_pc =
            insts.iter().zip(&block_of).map(|(inst, &b)| (inst.pc, b)).collect::<HashMap<_, _>>();
        let block_at_start =
            blocks.iter().enumerate().map(|(i, b)| (b.start_pc, i)).collect::<HashMap<_, _>>();

        let count = blocks.len();
        for (id, b) in blocks.iter_mut().enumerate() {
            let mut succ = BTreeSet::new();
            if falls_through(&insts[b.last]) && id + 1 < count {
                succ.insert(id + 1);
            }
            for inst in &insts[b.first..=b.last] {
                if let Some(target) = push_value(inst).filter(|t| jumpdests.contains(t)) {
                    if let Some(&target) = block_at_start.get(&target) {
                        succ.insert(target);
                    }
                }
            }
            b.successors = succ.into_iter().collect();
        }

        let dispatch = dispatch_table(insts, &jumpdests);
        Self { blocks, block_of, block_by_pc, dispatch }
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Block containing the instruction at `index`.
    pub fn block_of_index(&self, index: usize) -> Option<usize> {
        self.block_of.get(index).copied()
    }

    /// Block containing the instruction starting at `pc`.
    pub fn block_of_pc(&self, pc: usize) -> Option<usize> {
        self.block_by_pc.get(&pc).copied()
    }

    pub fn dispatch(&self) -> &[DispatchEntry] {
        &self.dispatch
    }

    /// Blocks reachable from the block starting at `pc`, itself included.
    pub fn reachable_from(&self, pc: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let Some(start) = self.block_of_pc(pc) else { return seen };
        let mut stack = vec![start];
        while let Some(b) = stack.pop() {
            if seen.insert(b) {
                stack.extend(self.blocks[b].successors.iter().filter(|s| !seen.contains(s)));
            }
        }
        seen
    }

    /// Reachable block region of every dispatched selector.
    pub fn method_regions(&self) -> BTreeMap<Selector, BTreeSet<usize>> {
        self.dispatch.iter().map(|d| (d.selector, self.reachable_from(d.entry_pc))).collect()
    }
}

fn block(insts: &[Instruction], first: usize, last: usize) -> BasicBlock {
    BasicBlock {
        start_pc: insts[first].pc,
        end_pc: insts[last].pc,
        first,
        last,
        successors: Vec::new(),
    }
}

fn is_halt(inst: &Instruction) -> bool {
    matches!(inst.opcode, op::STOP | op::RETURN | op::REVERT | op::INVALID | op::SELFDESTRUCT)
        || inst.name == crate::bytecode::UNKNOWN
}

fn ends_block(inst: &Instruction) -> bool {
    is_halt(inst) || matches!(inst.opcode, op::JUMP | op::JUMPI)
}

fn falls_through(inst: &Instruction) -> bool {
    !is_halt(inst) && inst.opcode != op::JUMP
}

/// Value of a push immediate if it fits a `usize`.
fn push_value(inst: &Instruction) -> Option<usize> {
    let imm = inst.immediate.as_ref()?;
    imm.iter().try_fold(0usize, |acc, &b| acc.checked_mul(256).map(|v| v | b as usize))
}

/// Finds `PUSHn selector; [DUPn]; EQ; PUSHn dest; JUMPI` sequences.
///
/// Selectors with leading zero bytes are pushed with fewer than four bytes by the optimizer.
fn dispatch_table(insts: &[Instruction], jumpdests: &BTreeSet<usize>) -> Vec<DispatchEntry> {
    let mut out = Vec::<DispatchEntry>::new();
    for (i, inst) in insts.iter().enumerate() {
        if !(op::PUSH1..=op::PUSH4).contains(&inst.opcode) {
            continue;
        }
        let Some(imm) = inst.immediate.as_ref() else { continue };
        let Some(eq) = (i + 1..=i + DISPATCH_WINDOW)
            .take_while(|&j| j < insts.len())
            .find(|&j| insts[j].opcode == op::EQ)
        else {
            continue;
        };
        let (Some(dest), Some(jumpi)) = (insts.get(eq + 1), insts.get(eq + 2)) else { continue };
        if jumpi.opcode != op::JUMPI {
            continue;
        }
        let Some(entry_pc) = push_value(dest).filter(|d| jumpdests.contains(d)) else { continue };
        // PUSH1..PUSH4 carry at most four bytes, unless built by hand
        let Some(start) = 4usize.checked_sub(imm.len()) else { continue };
        let mut selector = [0u8; 4];
        selector[start..].copy_from_slice(imm);
        let selector = Selector::from(selector);
        if !out.iter().any(|d| d.selector == selector) {
            out.push(DispatchEntry { selector, entry_pc });
        }
    }
    out
}
