//! Attribution of struct-log steps to call frames.
//!
//! A struct log is a flat list of steps with a call depth. Frames are rebuilt by watching the
//! depth change right after a CALL-family or CREATE-family step.

use crate::types::StructLog;
use alloy_primitives::{Address, U256};
use revm::bytecode::opcode;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FrameKind {
    /// The transaction's own frame.
    Root,
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
}

impl FrameKind {
    fn from_opcode(op: u8) -> Option<Self> {
        Some(match op {
            opcode::CALL => Self::Call,
            opcode::CALLCODE => Self::CallCode,
            opcode::DELEGATECALL => Self::DelegateCall,
            opcode::STATICCALL => Self::StaticCall,
            opcode::CREATE | opcode::CREATE2 => Self::Create,
            _ => return None,
        })
    }

    /// Whether the callee runs against the caller's storage.
    pub fn shares_storage(self) -> bool {
        matches!(self, Self::CallCode | Self::DelegateCall)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub id: usize,
    pub parent: Option<usize>,
    pub kind: FrameKind,
    /// Address whose code runs in this frame; `None` for contract creation.
    pub code_address: Option<Address>,
    /// Address whose storage this frame reads and writes.
    pub storage_address: Option<Address>,
    /// Value attached by the caller.
    pub value: U256,
    /// Depth relative to the first step, the root frame is `0`.
    pub depth: usize,
    /// The code of this frame is already executing in an outer frame.
    pub reentrant: bool,
    pub first_step: usize,
    pub last_step: usize,
}

/// Frames of one trace plus the frame of every step.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FrameMap {
    pub frames: Vec<Frame>,
    pub step_frames: Vec<usize>,
    /// Steps of each frame, indexed by frame id.
    #[serde(skip)]
    frame_steps: Vec<Vec<usize>>,
}

impl FrameMap {
    pub fn frame_of(&self, step: usize) -> Option<&Frame> {
        self.step_frames.get(step).map(|&f| &self.frames[f])
    }

    /// Frames whose code is `address`.
    pub fn frames_of(&self, address: Address) -> impl Iterator<Item = &Frame> {
        self.frames.iter().filter(move |f| f.code_address == Some(address))
    }

    /// Steps executed by frame `id`, in order.
    pub fn steps_of(&self, id: usize) -> impl Iterator<Item = usize> + '_ {
        self.frame_steps.get(id).into_iter().flatten().copied()
    }

    /// Whether any frame re-entered code that was still executing.
    pub fn has_reentry(&self) -> bool {
        self.frames.iter().any(|f| f.reentrant)
    }
}

struct PendingCall {
    kind: FrameKind,
    code_address: Option<Address>,
    value: U256,
}

/// Rebuilds the call frames of `steps`, the transaction's target being `root`.
pub fn annotate(steps: &[StructLog], root: Address) -> FrameMap {
    let Some(first) = steps.first() else { return FrameMap::default() };
    let base = first.depth;

    let mut frames = vec![Frame {
        id: 0,
        parent: None,
        kind: FrameKind::Root,
        code_address: Some(root),
        storage_address: Some(root),
        value: U256::ZERO,
        depth: 0,
        reentrant: false,
        first_step: 0,
        last_step: 0,
    }];
    let mut active = vec![0usize];
    let mut step_frames = Vec::with_capacity(steps.len());
    let mut frame_steps = vec![Vec::new()];
    let mut pending: Option<PendingCall> = None;

    for (i, step) in steps.iter().enumerate() {
        let depth = step.depth.saturating_sub(base) as usize;
        let current = active.len() - 1;

        if depth > current {
            let call = pending.take().unwrap_or(PendingCall {
                kind: FrameKind::Call,
                code_address: None,
                value: U256::ZERO,
            });
            let parent = active[current];
            let storage_address = if call.kind.shares_storage() {
                frames[parent].storage_address
            } else {
                call.code_address
            };
            let reentrant = call.code_address.is_some()
                && active.iter().any(|&f| frames[f].code_address == call.code_address);
            let id = frames.len();
            frames.push(Frame {
                id,
                parent: Some(parent),
                kind: call.kind,
                code_address: call.code_address,
                storage_address,
                value: call.value,
                depth,
                reentrant,
                first_step: i,
                last_step: i,
            });
            active.push(id);
            frame_steps.push(Vec::new());
        }
        while active.len() > depth + 1 && active.len() > 1 {
            active.pop();
        }

        let id = active[active.len() - 1];
        frames[id].last_step = i;
        step_frames.push(id);
        frame_steps[id].push(i);

        pending = step.opcode().and_then(FrameKind::from_opcode).map(|kind| PendingCall {
            kind,
            code_address: if kind == FrameKind::Create { None } else { step.peek_address(1) },
            value: match kind {
                FrameKind::Call | FrameKind::CallCode => step.peek(2).unwrap_or_default(),
                FrameKind::Create => step.peek(0).unwrap_or_default(),
                _ => U256::ZERO,
            },
        });
    }

    FrameMap { frames, step_frames, frame_steps }
}
