use alloy_primitives::{B256, Bytes, hex, keccak256, map::HashMap};
use revm::bytecode::{OpCode, opcode};
use serde::Serialize;
use std::{fmt, slice, sync::Arc};

/// Mnemonic reported for bytes that are not an assigned opcode.
pub const UNKNOWN: &str = "UNKNOWN";

/// An iterator that yields opcodes and their immediate data.
///
/// Unassigned opcode bytes are yielded as [`UNKNOWN`] instructions instead of stopping. A push
/// that runs past the end of the code takes whatever bytes are left as its immediate.
#[derive(Clone, Debug)]
pub struct InstIter<'a> {
    iter: slice::Iter<'a, u8>,
}

impl fmt::Display for InstIter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.clone().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

impl<'a> InstIter<'a> {
    /// Create a new iterator over the given bytecode slice.
    #[inline]
    pub fn new(slice: &'a [u8]) -> Self {
        Self { iter: slice.iter() }
    }

    /// Returns a new iterator that also yields the program counter alongside the opcode and
    /// immediate data.
    #[inline]
    pub fn with_pc(self) -> InstIterWithPc<'a> {
        InstIterWithPc { iter: self, pc: 0 }
    }
}

impl<'a> Iterator for InstIter<'a> {
    type Item = Inst<'a>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|&op| {
            let rest = self.iter.as_slice();
            let len = (imm_len(op) as usize).min(rest.len());
            let (immediate, rest) = rest.split_at(len);
            self.iter = rest.iter();
            Inst { opcode: op, immediate }
        })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.iter.len();
        ((len != 0) as usize, Some(len))
    }
}

impl std::iter::FusedIterator for InstIter<'_> {}

/// A bytecode iterator that yields opcodes and their immediate data, alongside the program counter.
///
/// Created by calling [`InstIter::with_pc`].
#[derive(Clone, Debug)]
pub struct InstIterWithPc<'a> {
    iter: InstIter<'a>,
    pc: usize,
}

impl<'a> Iterator for InstIterWithPc<'a> {
    type Item = (usize, Inst<'a>);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next().map(|inst| {
            let pc = self.pc;
            self.pc += 1 + inst.immediate.len();
            (pc, inst)
        })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl std::iter::FusedIterator for InstIterWithPc<'_> {}

/// An opcode byte and its immediate data. Returned by [`InstIter`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Inst<'a> {
    /// The raw opcode byte.
    pub opcode: u8,
    /// The immediate data, empty for non-push opcodes.
    pub immediate: &'a [u8],
}

impl Inst<'_> {
    /// The mnemonic of this opcode, [`UNKNOWN`] for unassigned bytes.
    pub fn name(&self) -> &'static str {
        OpCode::new(self.opcode).map_or(UNKNOWN, |op| op.as_str())
    }

    /// Whether this is an assigned opcode.
    pub fn is_known(&self) -> bool {
        OpCode::new(self.opcode).is_some()
    }
}

impl fmt::Debug for Inst<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Inst<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        match self.immediate {
            [] => Ok(()),
            imm => write!(f, " {:#x}", hex::display(imm)),
        }
    }
}

/// Returns the length of the immediate data for the given opcode, or `0` if none.
#[inline]
pub const fn imm_len(op: u8) -> u8 {
    match op {
        opcode::PUSH1..=opcode::PUSH32 => op - opcode::PUSH0,
        _ => 0,
    }
}

/// A decoded instruction at a fixed program counter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub pc: usize,
    pub opcode: u8,
    pub name: &'static str,
    /// Operand of push-class opcodes.
    pub immediate: Option<Bytes>,
}

impl From<(usize, Inst<'_>)> for Instruction {
    fn from((pc, inst): (usize, Inst<'_>)) -> Self {
        let immediate = (imm_len(inst.opcode) > 0).then(|| Bytes::copy_from_slice(inst.immediate));
        Self { pc, opcode: inst.opcode, name: inst.name(), immediate }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5}: {}", self.pc, self.name)?;
        if let Some(imm) = &self.immediate {
            write!(f, " {imm}")?;
        }
        Ok(())
    }
}

/// The instruction list of one bytecode, indexed by program counter.
#[derive(Clone, Debug)]
pub struct Disassembly {
    code_hash: B256,
    instructions: Arc<[Instruction]>,
    by_pc: HashMap<usize, usize>,
}

impl Disassembly {
    pub fn code_hash(&self) -> B256 {
        self.code_hash
    }

    pub fn instructions(&self) -> &Arc<[Instruction]> {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Index of the instruction starting at `pc`; `None` if `pc` points into push data.
    pub fn index_of(&self, pc: usize) -> Option<usize> {
        self.by_pc.get(&pc).copied()
    }

    pub fn at_pc(&self, pc: usize) -> Option<&Instruction> {
        self.index_of(pc).map(|i| &self.instructions[i])
    }
}

/// Disassembles the given bytecode into an indexed instruction list.
pub fn disassemble(code: &[u8]) -> Disassembly {
    let instructions: Arc<[Instruction]> =
        InstIter::new(code).with_pc().map(Instruction::from).collect();
    let by_pc = instructions.iter().enumerate().map(|(i, inst)| (inst.pc, i)).collect();
    Disassembly { code_hash: keccak256(code), instructions, by_pc }
}

/// Disassembles hex encoded bytecode, with or without a `0x` prefix.
pub fn disassemble_hex(code: &str) -> Result<Disassembly, hex::FromHexError> {
    Ok(disassemble(&hex::decode(code.trim())?))
}

/// Memoizes disassembly per unique bytecode.
#[derive(Clone, Debug, Default)]
pub struct DisassemblyCache {
    cache: HashMap<B256, Arc<Disassembly>>,
}

impl DisassemblyCache {
    pub fn get_or_disassemble(&mut self, code: &[u8]) -> Arc<Disassembly> {
        let hash = keccak256(code);
        self.cache
            .entry(hash)
            .or_insert_with(|| {
                trace!(%hash, len = code.len(), "disassembling");
                Arc::new(disassemble(code))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Returns a string representation of the given bytecode.
pub fn format_bytecode(bytecode: &[u8]) -> String {
    InstIter::new(bytecode).to_string()
}
