use super::{BugKind, Detector, InspectContext};
use alloy_primitives::U256;
use revm::bytecode::{OpCode, opcode as op};
use scfuzz_evm_traces::StructLog;

/// Gas forwarded by `transfer` and `send`, too little to re-enter.
pub const CALL_STIPEND: u64 = 2300;

fn failed(step: &StructLog) -> bool {
    step.error.as_deref().is_some_and(|e| !e.is_empty())
}

fn is_call_family(op: Option<u8>) -> bool {
    matches!(op, Some(op::CALL | op::CALLCODE | op::DELEGATECALL | op::STATICCALL))
}

/// Value sent by a `CALL`, `CALLCODE` or `SELFDESTRUCT` step.
fn transfers_value(step: &StructLog) -> bool {
    match step.opcode() {
        Some(op::CALL | op::CALLCODE) => step.peek(2).is_some_and(|v| !v.is_zero()),
        Some(op::SELFDESTRUCT) => true,
        _ => false,
    }
}

/// `SELFDESTRUCT` executed against the target's account.
#[derive(Clone, Copy, Debug, Default)]
pub struct Suicidal;

impl Detector for Suicidal {
    fn kind(&self) -> BugKind {
        BugKind::Suicidal
    }

    fn detect(&self, ctx: &InspectContext<'_>) -> bool {
        ctx.target_steps().any(|(_, s)| s.opcode() == Some(op::SELFDESTRUCT) && !failed(s))
    }
}

/// Ether sent out by an unprivileged sender without a caller check in the sending frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct Leaking;

impl Detector for Leaking {
    fn kind(&self) -> BugKind {
        BugKind::Leaking
    }

    fn detect(&self, ctx: &InspectContext<'_>) -> bool {
        if ctx.sender_is_privileged() {
            return false;
        }
        ctx.frames.frames.iter().filter(|f| ctx.is_target_frame(f)).any(|frame| {
            let mut caller_seen = false;
            let mut guarded = false;
            for i in ctx.frames.steps_of(frame.id) {
                let step = &ctx.steps[i];
                match step.opcode() {
                    Some(op::CALLER) => caller_seen = true,
                    Some(op::EQ) if caller_seen => guarded = true,
                    _ => {}
                }
                if !guarded && !failed(step) && transfers_value(step) {
                    trace!(pc = step.pc, frame = frame.id, "unguarded value transfer");
                    return true;
                }
            }
            false
        })
    }
}

/// Storage written after the target was re-entered, or after a value call that forwards
/// enough gas to re-enter.
#[derive(Clone, Copy, Debug)]
pub struct Reentrancy {
    /// Forwarded gas up to which a value call cannot re-enter.
    pub stipend: u64,
}

impl Default for Reentrancy {
    fn default() -> Self {
        Self { stipend: CALL_STIPEND }
    }
}

impl Reentrancy {
    fn reentered(ctx: &InspectContext<'_>) -> bool {
        ctx.frames.frames.iter().filter(|f| f.reentrant && f.code_address == Some(ctx.target)).any(
            |frame| {
                ctx.target_steps()
                    .any(|(i, s)| i >= frame.first_step && s.opcode() == Some(op::SSTORE))
            },
        )
    }

    fn write_after_call(&self, ctx: &InspectContext<'_>) -> bool {
        let stipend = U256::from(self.stipend);
        ctx.target_steps().any(|(i, step)| {
            if step.opcode() != Some(op::CALL) || failed(step) {
                return false;
            }
            let forwards = step.peek(0).is_some_and(|gas| gas > stipend);
            let valued = step.peek(2).is_some_and(|v| !v.is_zero());
            if !(forwards && valued) {
                return false;
            }
            let Some(frame) = ctx.frames.frame_of(i) else { return false };
            ctx.frames
                .steps_of(frame.id)
                .any(|j| j > i && ctx.steps[j].opcode() == Some(op::SSTORE))
        })
    }
}

impl Detector for Reentrancy {
    fn kind(&self) -> BugKind {
        BugKind::Reentrancy
    }

    fn detect(&self, ctx: &InspectContext<'_>) -> bool {
        Self::reentered(ctx) || self.write_after_call(ctx)
    }
}

/// The success flag pushed by an external call is popped, or still on the stack when the
/// frame ends, without having been consumed by a check.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnhandledException;

impl UnhandledException {
    /// Follows the flag pushed by the call at step `call` through its frame.
    fn flag_ignored(ctx: &InspectContext<'_>, call: usize) -> bool {
        let Some(frame) = ctx.frames.frame_of(call) else { return false };
        let mut rest = ctx.frames.steps_of(frame.id).skip_while(|&j| j <= call).peekable();
        let Some(&resumed) = rest.peek() else { return false };
        let Some(top) = ctx.steps[resumed].stack.len().checked_sub(1) else { return false };

        // stack positions holding the flag or a copy of it, counted from the bottom
        let mut flag = vec![top];
        for j in rest {
            let step = &ctx.steps[j];
            let len = step.stack.len();
            let Some(code) = step.opcode() else { continue };
            match code {
                op::DUP1..=op::DUP16 => {
                    let n = (code - op::DUP1 + 1) as usize;
                    if len.checked_sub(n).is_some_and(|src| flag.contains(&src)) {
                        flag.push(len);
                    }
                }
                op::SWAP1..=op::SWAP16 => {
                    let n = (code - op::SWAP1 + 1) as usize;
                    let Some(other) = len.checked_sub(n + 1) else { continue };
                    for pos in &mut flag {
                        if *pos == len - 1 {
                            *pos = other;
                        } else if *pos == other {
                            *pos = len - 1;
                        }
                    }
                }
                _ => {
                    let inputs = OpCode::new(code).map_or(0, |o| o.inputs()) as usize;
                    let floor = len.saturating_sub(inputs);
                    if flag.iter().any(|&p| p >= floor) {
                        if code != op::POP {
                            return false;
                        }
                        flag.retain(|&p| p < floor);
                        if flag.is_empty() {
                            return true;
                        }
                    }
                }
            }
        }
        !flag.is_empty()
    }
}

impl Detector for UnhandledException {
    fn kind(&self) -> BugKind {
        BugKind::UnhandledException
    }

    fn detect(&self, ctx: &InspectContext<'_>) -> bool {
        ctx.target_steps()
            .filter(|(_, s)| is_call_family(s.opcode()) && !failed(s))
            .any(|(i, _)| Self::flag_ignored(ctx, i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::tests::{ATTACKER, DEPLOYER, OTHER, TARGET, call, ctx, step};
    use alloy_primitives::Address;
    use scfuzz_evm_traces::annotate;

    fn detects(detector: &dyn Detector, steps: &[StructLog], sender: Address) -> bool {
        let frames = annotate(steps, TARGET);
        detector.detect(&ctx(steps, &frames, sender))
    }

    #[test]
    fn suicidal_only_in_target_frames() {
        let own = [step("PUSH1", 1, &[]), step("SELFDESTRUCT", 1, &[2])];
        assert!(detects(&Suicidal, &own, ATTACKER));

        let other = [
            call(1, OTHER, 0, 50_000),
            step("SELFDESTRUCT", 2, &[2]),
            step("POP", 1, &[1]),
            step("STOP", 1, &[]),
        ];
        assert!(!detects(&Suicidal, &other, ATTACKER));
    }

    #[test]
    fn leaking_needs_unprivileged_unguarded_sender() {
        let pay = [call(1, ATTACKER, 5, 2_300), step("POP", 1, &[1]), step("STOP", 1, &[])];
        assert!(detects(&Leaking, &pay, ATTACKER));
        assert!(!detects(&Leaking, &pay, DEPLOYER));

        let guarded = [
            step("CALLER", 1, &[]),
            step("PUSH20", 1, &[2]),
            step("EQ", 1, &[2, 2]),
            step("POP", 1, &[1]),
            call(1, ATTACKER, 5, 2_300),
            step("STOP", 1, &[1]),
        ];
        assert!(!detects(&Leaking, &guarded, ATTACKER));

        let free = [call(1, ATTACKER, 0, 2_300), step("POP", 1, &[1]), step("STOP", 1, &[])];
        assert!(!detects(&Leaking, &free, ATTACKER));
    }

    #[test]
    fn reentrancy_through_callback() {
        let steps = [
            call(1, OTHER, 0, 50_000),
            step("PUSH1", 2, &[]),
            call(2, TARGET, 0, 40_000),
            step("SSTORE", 3, &[1, 0]),
            step("STOP", 3, &[]),
            step("STOP", 2, &[1]),
            step("POP", 1, &[1]),
            step("STOP", 1, &[]),
        ];
        assert!(detects(&Reentrancy::default(), &steps, ATTACKER));
    }

    #[test]
    fn reentrancy_write_after_value_call() {
        let steps = |gas| {
            vec![
                call(1, OTHER, 1, gas),
                step("STOP", 2, &[]),
                step("POP", 1, &[1]),
                step("SSTORE", 1, &[0, 0]),
                step("STOP", 1, &[]),
            ]
        };
        assert!(detects(&Reentrancy::default(), &steps(10_000), ATTACKER));
        assert!(!detects(&Reentrancy::default(), &steps(2_300), ATTACKER));
    }

    #[test]
    fn unhandled_flag_popped() {
        let steps = [
            call(1, OTHER, 0, 50_000),
            step("STOP", 2, &[]),
            step("POP", 1, &[1]),
            step("STOP", 1, &[]),
        ];
        assert!(detects(&UnhandledException, &steps, ATTACKER));

        // no code at the callee, the flag is on the very next step
        let steps = [call(1, OTHER, 0, 50_000), step("POP", 1, &[1]), step("STOP", 1, &[])];
        assert!(detects(&UnhandledException, &steps, ATTACKER));
    }

    #[test]
    fn unhandled_flag_checked() {
        let steps = [
            call(1, OTHER, 0, 50_000),
            step("STOP", 2, &[]),
            step("DUP1", 1, &[1]),
            step("ISZERO", 1, &[1, 1]),
            step("POP", 1, &[1, 0]),
            step("POP", 1, &[1]),
            step("STOP", 1, &[]),
        ];
        assert!(!detects(&UnhandledException, &steps, ATTACKER));
    }

    #[test]
    fn unhandled_flag_swapped_then_popped() {
        let steps = [
            call(1, OTHER, 0, 50_000),
            step("PUSH1", 1, &[1]),
            step("SWAP1", 1, &[1, 0]),
            step("POP", 1, &[0, 1]),
            step("STOP", 1, &[0]),
        ];
        assert!(detects(&UnhandledException, &steps, ATTACKER));
    }

    #[test]
    fn unhandled_flag_left_on_stack() {
        let steps = [call(1, OTHER, 0, 50_000), step("PUSH1", 1, &[1]), step("STOP", 1, &[1, 0])];
        assert!(detects(&UnhandledException, &steps, ATTACKER));
    }
}
