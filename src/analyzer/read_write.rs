//! This module contains the read/write analysis, which finds how far into a
//! method execution can begin without changing anything observable.
//!
//! # How it Works
//!
//! The method is executed symbolically from its declared entry offset, with
//! its arguments and the caller's stack unknown. The scan stops before the
//! first instruction whose effect could be observed outside the method's own
//! evaluation stack, and the method's entry offset moves to that instruction.
//!
//! - In the method's own frame, the effectful instructions are slot
//!   initialization, system calls and any access to a static field.
//! - In a called frame, which is only entered when calls are followed, they
//!   are system calls, static field stores and static slot initialization.
//!   The scan then stops at the call in the method's own frame.
//!
//! A method that returns or faults before reaching any such instruction is
//! left as it is, as is a method whose prefix the concrete VM would reject.

use tracing::{debug, warn};

use crate::{
    analyzer::{
        manifest::MethodDescriptor,
        report::{MethodReport, StopReason},
    },
    disassembly::{Instruction, Script},
    error::execution::LocatedError,
    opcode::OpCode,
    vm::{Config, Outcome, SymbolicVM},
    watchdog::DynWatchdog,
};

/// Analyzes the method described by `method` within `script`, returning where
/// its entry offset should move to.
///
/// The analysis never fails. Any problem analyzing the method leaves its
/// offset as it is, with the reason recorded in the report.
#[must_use]
pub fn analyze_method(
    script: &Script,
    method: &MethodDescriptor,
    config: &Config,
    watchdog: DynWatchdog,
) -> MethodReport {
    let original = method.offset;
    let mut vm = SymbolicVM::new(config.clone(), watchdog);
    if let Err(error) = vm.load_script(script.clone(), original) {
        warn!(method = %method.name, %error, "cannot start the method");
        return report(method, &vm, original, StopReason::Aborted, Some(error));
    }

    let mut scan = Scan::new(original, config.follow_calls);
    let outcome = vm.run(|vm, instruction| scan.should_stop(vm.invocation_depth(), instruction));

    let (offset, reason, error) = match outcome {
        Ok(Outcome::Stopped(_)) => {
            let (offset, reason) = scan.stop.unwrap_or((original, StopReason::Halted));
            (offset, reason, None)
        }
        Ok(Outcome::Unresolved(error)) => {
            let offset = if vm.invocation_depth() > 1 {
                scan.call_site.unwrap_or(original)
            } else {
                error.location
            };
            debug!(method = %method.name, %error, offset, "cannot resolve instruction");
            (offset, StopReason::Unresolved, Some(error))
        }
        Ok(_) => (original, StopReason::Halted, None),
        Err(error) => {
            warn!(
                method = %method.name,
                class = ?error.payload.class(),
                %error,
                "method analysis aborted"
            );
            (original, StopReason::Aborted, Some(error))
        }
    };

    let report = report(method, &vm, offset, reason, error);
    debug!(
        method = %report.name,
        from = report.original_offset,
        to = report.new_offset,
        reason = %report.reason,
        "analyzed method"
    );
    report
}

/// Builds the report for `method` from the accesses `vm` recorded.
fn report(
    method: &MethodDescriptor,
    vm: &SymbolicVM,
    new_offset: u32,
    reason: StopReason,
    error: Option<LocatedError>,
) -> MethodReport {
    let accesses = vm.accesses();
    MethodReport {
        name: method.name.clone(),
        original_offset: method.offset,
        new_offset,
        reason,
        reads: accesses.read_set(),
        writes: accesses.write_set(),
        error,
    }
}

/// The state of the scan through a method.
#[derive(Clone, Debug)]
struct Scan {
    original:     u32,
    follow_calls: bool,

    /// The offset of the call in the method's own frame that the current
    /// called frame descends from.
    call_site: Option<u32>,

    /// Where the scan stopped and why, once it has.
    stop: Option<(u32, StopReason)>,
}

impl Scan {
    fn new(original: u32, follow_calls: bool) -> Self {
        Self {
            original,
            follow_calls,
            call_site: None,
            stop: None,
        }
    }

    /// Decides whether to stop before `instruction`, which is about to run in
    /// a frame at `depth` on the invocation stack.
    fn should_stop(&mut self, depth: usize, instruction: &Instruction) -> bool {
        let decision = if depth <= 1 {
            self.in_method(instruction)
        } else {
            self.in_callee(instruction)
        };
        if decision.is_some() {
            self.stop = decision;
        }
        decision.is_some()
    }

    fn in_method(&mut self, instruction: &Instruction) -> Option<(u32, StopReason)> {
        let offset = instruction.offset();
        let opcode = instruction.opcode();

        if matches!(opcode, OpCode::InitSlot | OpCode::InitSSlot | OpCode::Syscall)
            || opcode.is_static_field_load()
            || opcode.is_static_field_store()
        {
            return Some((offset, StopReason::EffectfulInstruction));
        }
        if !opcode.is_block_terminator() {
            return None;
        }

        match opcode {
            OpCode::Ret => Some((self.original, StopReason::Halted)),
            OpCode::Abort | OpCode::AbortMsg | OpCode::Throw => {
                Some((self.original, StopReason::Aborted))
            }
            OpCode::Call | OpCode::CallL if self.follow_calls => {
                self.call_site = Some(offset);
                None
            }
            _ => Some((offset, StopReason::BlockBoundary)),
        }
    }

    fn in_callee(&self, instruction: &Instruction) -> Option<(u32, StopReason)> {
        let opcode = instruction.opcode();
        let site = self.call_site.unwrap_or(self.original);

        if matches!(opcode, OpCode::InitSSlot | OpCode::Syscall) || opcode.is_static_field_store() {
            return Some((site, StopReason::EffectfulInstruction));
        }
        match opcode {
            OpCode::Ret => None,
            OpCode::Call | OpCode::CallL if self.follow_calls => None,
            _ if opcode.is_block_terminator() => Some((site, StopReason::BlockBoundary)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        analyzer::{
            manifest::MethodDescriptor,
            read_write::analyze_method,
            report::{MethodReport, StopReason},
        },
        disassembly::{Instruction, Script},
        opcode::OpCode,
        script,
        vm::{
            state::{slot::SlotKind, tracking::Access},
            Config,
        },
        watchdog::LazyWatchdog,
    };

    fn analyze(script: &Script, offset: u32, config: &Config) -> MethodReport {
        let method = MethodDescriptor::new("main", offset);
        analyze_method(script, &method, config, LazyWatchdog.in_arc())
    }

    #[test]
    fn stops_at_a_static_field_store() -> anyhow::Result<()> {
        let script = script![
            OpCode::Push0,
            OpCode::StSFld0,
            OpCode::LdSFld0,
            OpCode::LdArg0,
            OpCode::Ret
        ];
        let report = analyze(&script, 0, &Config::default());
        assert_eq!(report.new_offset, 1);
        assert_eq!(report.reason, StopReason::EffectfulInstruction);
        assert!(report.writes.is_empty());

        Ok(())
    }

    #[test]
    fn skips_stack_shuffles_before_slot_initialization() -> anyhow::Result<()> {
        let script = script![
            OpCode::Dup,
            OpCode::Swap,
            OpCode::Drop,
            OpCode::Push1,
            Instruction::new(OpCode::InitSlot, vec![1, 1])?,
            OpCode::Ret
        ];
        let report = analyze(&script, 0, &Config::default());
        assert_eq!(report.new_offset, 4);
        assert!(report.is_changed());

        let again = analyze(&script, report.new_offset, &Config::default());
        assert_eq!(again.new_offset, 4);
        assert!(!again.is_changed());

        Ok(())
    }

    #[test]
    fn stops_at_an_unresolved_copy() -> anyhow::Result<()> {
        let script = script![
            OpCode::Push2,
            OpCode::NewBuffer,
            OpCode::LdArg0,
            Instruction::new(OpCode::PushData1, vec![0xaa])?,
            OpCode::Push0,
            OpCode::Push1,
            OpCode::Memcpy,
            OpCode::Ret
        ];
        let report = analyze(&script, 0, &Config::default());
        assert_eq!(report.new_offset, 8);
        assert_eq!(report.reason, StopReason::Unresolved);
        assert_eq!(
            report.reads,
            vec![Access::Slot {
                kind:  SlotKind::Argument,
                index: 0,
            }]
        );

        Ok(())
    }

    #[test]
    fn leaves_faulting_methods_alone() {
        let script = script![OpCode::PushM1, OpCode::NewBuffer, OpCode::Ret];
        let report = analyze(&script, 0, &Config::default());
        assert_eq!(report.new_offset, 0);
        assert_eq!(report.reason, StopReason::Aborted);
    }

    #[test]
    fn leaves_returning_methods_alone() {
        let script = script![OpCode::Push1, OpCode::Push2, OpCode::Add, OpCode::Ret];
        let report = analyze(&script, 0, &Config::default());
        assert_eq!(report.new_offset, 0);
        assert_eq!(report.reason, StopReason::Halted);

        let script = script![OpCode::Nop, OpCode::Throw];
        assert_eq!(analyze(&script, 0, &Config::default()).reason, StopReason::Aborted);
    }

    #[test]
    fn stops_at_jumps() -> anyhow::Result<()> {
        let script = script![
            OpCode::Push1,
            Instruction::new(OpCode::Jmp, vec![2])?,
            OpCode::Ret
        ];
        let report = analyze(&script, 0, &Config::default());
        assert_eq!(report.new_offset, 1);
        assert_eq!(report.reason, StopReason::BlockBoundary);

        Ok(())
    }

    #[test]
    fn calls_stop_the_scan_unless_followed() -> anyhow::Result<()> {
        // 0: NOP, 1: CALL -> 6, 3: INITSLOT, 6: LDSFLD0, 7: DROP, 8: RET
        let script = script![
            OpCode::Nop,
            Instruction::new(OpCode::Call, vec![5])?,
            Instruction::new(OpCode::InitSlot, vec![1, 0])?,
            OpCode::LdSFld0,
            OpCode::Drop,
            OpCode::Ret
        ];

        let stopped = analyze(&script, 0, &Config::default());
        assert_eq!(stopped.new_offset, 1);
        assert_eq!(stopped.reason, StopReason::BlockBoundary);

        let followed = analyze(&script, 0, &Config::default().with_follow_calls(true));
        assert_eq!(followed.new_offset, 3);
        assert_eq!(followed.reason, StopReason::EffectfulInstruction);
        assert_eq!(
            followed.reads,
            vec![Access::Slot {
                kind:  SlotKind::Static,
                index: 0,
            }]
        );

        Ok(())
    }

    #[test]
    fn callee_stores_stop_at_the_call_site() -> anyhow::Result<()> {
        // 0: NOP, 1: CALL -> 6, 3: INITSLOT, 6: PUSH1, 7: STSFLD0, 8: RET
        let script = script![
            OpCode::Nop,
            Instruction::new(OpCode::Call, vec![5])?,
            Instruction::new(OpCode::InitSlot, vec![1, 0])?,
            OpCode::Push1,
            OpCode::StSFld0,
            OpCode::Ret
        ];
        let report = analyze(&script, 0, &Config::default().with_follow_calls(true));
        assert_eq!(report.new_offset, 1);
        assert_eq!(report.reason, StopReason::EffectfulInstruction);

        Ok(())
    }

    #[test]
    fn offsets_outside_the_script_are_left_alone() {
        let script = script![OpCode::Ret];
        let report = analyze(&script, 9, &Config::default());
        assert_eq!(report.new_offset, 9);
        assert_eq!(report.reason, StopReason::Aborted);
    }
}
