//! This module is an integration test that checks where the optimization moves
//! the entry offsets of hand-assembled methods.
#![cfg(test)]

use std::sync::{atomic::AtomicBool, Arc};

use neovm_symbolic as nvs;
use neovm_symbolic::{
    analyzer::report::StopReason,
    constant::{STORAGE_GET, STORAGE_GET_CONTEXT},
    disassembly::{Instruction, Script, ScriptBuilder},
    error::execution::Error,
    opcode::OpCode,
    script,
    vm::{
        state::{slot::SlotKind, tracking::Access},
        Config,
    },
    watchdog::FlagWatchdog,
};

mod common;

#[test]
fn stops_at_the_first_static_field_store() -> anyhow::Result<()> {
    let script = script![
        OpCode::Push0,
        Instruction::new(OpCode::StSFld, vec![0])?,
        OpCode::LdSFld0,
        OpCode::LdArg0,
        OpCode::Ret
    ];
    let analyzer = common::optimize(common::contract(script, &[("main", 0)]), Config::default());

    assert_eq!(common::offsets(analyzer.contract()), vec![1]);
    let report = analyzer.report("main").expect("main was analyzed");
    assert_eq!(report.reason, StopReason::EffectfulInstruction);
    assert!(report.reads.is_empty());
    assert!(report.writes.is_empty());

    Ok(())
}

#[test]
fn skips_shuffles_up_to_slot_initialization() -> anyhow::Result<()> {
    let script = script![
        OpCode::Dup,
        OpCode::Swap,
        OpCode::Drop,
        OpCode::Push1,
        Instruction::new(OpCode::InitSlot, vec![1, 1])?,
        OpCode::LdArg0,
        OpCode::Ret
    ];
    let analyzer = common::optimize(common::contract(script, &[("main", 0)]), Config::default());

    assert_eq!(common::offsets(analyzer.contract()), vec![4]);
    assert!(analyzer.reports()[0].is_changed());

    Ok(())
}

#[test]
fn stops_at_a_copy_into_an_unknown_offset() -> anyhow::Result<()> {
    // 0: PUSH4, 1: NEWBUFFER, 2: LDARG0, 3: PUSHDATA1, 7: PUSH0, 8: PUSH2,
    // 9: MEMCPY, 10: RET
    let script = script![
        OpCode::Push4,
        OpCode::NewBuffer,
        OpCode::LdArg0,
        Instruction::new(OpCode::PushData1, vec![0xaa, 0xbb])?,
        OpCode::Push0,
        OpCode::Push2,
        OpCode::Memcpy,
        OpCode::Ret
    ];
    let analyzer = common::optimize(common::contract(script, &[("main", 0)]), Config::default());

    let report = &analyzer.reports()[0];
    assert_eq!(report.reason, StopReason::Unresolved);
    assert_eq!(report.new_offset, 9);

    Ok(())
}

#[test]
fn leaves_a_negative_buffer_length_alone() -> anyhow::Result<()> {
    let script = script![
        OpCode::PushM1,
        OpCode::NewBuffer,
        OpCode::Push0,
        OpCode::StSFld0,
        OpCode::Ret
    ];
    let analyzer = common::optimize(common::contract(script, &[("main", 0)]), Config::default());

    assert_eq!(common::offsets(analyzer.contract()), vec![0]);
    assert_eq!(analyzer.reports()[0].reason, StopReason::Aborted);

    Ok(())
}

#[test]
fn running_twice_equals_running_once() -> anyhow::Result<()> {
    // a: 0..4 shuffles then INITSLOT at 4
    // b: 7 PUSH1, 8 STSFLD0
    // c: 9 PUSH2, 10 JMP +2, 12 RET
    // d: 13 PUSH1, 14 RET
    let script = script![
        OpCode::Dup,
        OpCode::Swap,
        OpCode::Drop,
        OpCode::Push1,
        Instruction::new(OpCode::InitSlot, vec![1, 1])?,
        OpCode::Push1,
        OpCode::StSFld0,
        OpCode::Push2,
        Instruction::new(OpCode::Jmp, vec![2])?,
        OpCode::Ret,
        OpCode::Push1,
        OpCode::Ret
    ];
    let methods = [("a", 0), ("b", 7), ("c", 9), ("d", 13)];

    let once = common::optimize(common::contract(script, &methods), Config::default());
    let once = once.into_contract();
    assert_eq!(common::offsets(&once), vec![4, 8, 10, 13]);

    let twice = common::optimize(once.clone(), Config::default());
    assert!(twice.reports().iter().all(|report| !report.is_changed()));
    assert_eq!(twice.into_contract(), once);

    Ok(())
}

#[test]
fn followed_calls_are_stepped_into() -> anyhow::Result<()> {
    // 0: NOP, 1: CALL -> 7, 3: INITSLOT 1 0, 6: RET,
    // 7: LDSFLD0, 8: DROP, 9: RET
    let script = script![
        OpCode::Nop,
        Instruction::new(OpCode::Call, vec![6])?,
        Instruction::new(OpCode::InitSlot, vec![1, 0])?,
        OpCode::Ret,
        OpCode::LdSFld0,
        OpCode::Drop,
        OpCode::Ret
    ];
    let contract = common::contract(script, &[("main", 0)]);

    let stopped = common::optimize(contract.clone(), Config::default());
    assert_eq!(stopped.reports()[0].new_offset, 1);
    assert_eq!(stopped.reports()[0].reason, StopReason::BlockBoundary);

    let followed = common::optimize(contract.clone(), Config::default().with_follow_calls(true));
    let report = &followed.reports()[0];
    assert_eq!(report.new_offset, 3);
    assert_eq!(
        report.reads,
        vec![Access::Slot {
            kind:  SlotKind::Static,
            index: 0,
        }]
    );

    let again = common::optimize(followed.into_contract(), Config::default().with_follow_calls(true));
    assert_eq!(again.reports()[0].new_offset, 3);

    Ok(())
}

#[test]
fn system_calls_are_effectful() -> anyhow::Result<()> {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::Dup)
        .emit(OpCode::Drop)
        .emit_syscall(STORAGE_GET_CONTEXT)
        .emit_push_data(&[0x01])?
        .emit(OpCode::Swap)
        .emit_syscall(STORAGE_GET)
        .emit(OpCode::Ret);
    let script = builder.build();

    let analyzer = common::optimize(common::contract(script, &[("main", 0)]), Config::default());
    assert_eq!(analyzer.reports()[0].new_offset, 2);
    assert_eq!(analyzer.reports()[0].reason, StopReason::EffectfulInstruction);

    Ok(())
}

#[test]
fn one_bad_method_does_not_spoil_the_others() -> anyhow::Result<()> {
    // bad: 0 PUSHDATA1, 3 PUSH3, 4 LEFT (past the end), 5 RET
    // good: 6 DUP, 7 STSFLD0, 8 RET
    let script = script![
        Instruction::new(OpCode::PushData1, vec![0x01])?,
        OpCode::Push3,
        OpCode::Left,
        OpCode::Ret,
        OpCode::Dup,
        OpCode::StSFld0,
        OpCode::Ret
    ];
    let analyzer = common::optimize(
        common::contract(script, &[("bad", 0), ("good", 6), ("missing", 99)]),
        Config::default(),
    );

    assert_eq!(common::offsets(analyzer.contract()), vec![0, 7, 99]);
    let reasons: Vec<_> = analyzer.reports().iter().map(|r| r.reason).collect();
    assert_eq!(
        reasons,
        vec![
            StopReason::Aborted,
            StopReason::EffectfulInstruction,
            StopReason::Aborted
        ]
    );

    Ok(())
}

#[test]
fn undecodable_trailing_bytes_do_not_stop_the_pass() {
    // 0: PUSH0, 1: STSFLD0, 2: RET, 3: PUSHDATA1 announcing 5 bytes with none
    let script = Script::new(vec![0x10, 0x60, 0x40, 0x0c, 0x05]);
    let analyzer = common::optimize(common::contract(script, &[("main", 0)]), Config::default());

    assert_eq!(common::offsets(analyzer.contract()), vec![1]);
    assert!(analyzer.errors().is_empty());
}

#[test]
fn a_raised_stop_flag_leaves_every_method_alone() {
    let script = script![
        OpCode::Dup,
        OpCode::Drop,
        OpCode::Push0,
        OpCode::StSFld0,
        OpCode::Ret
    ];
    let watchdog = FlagWatchdog::new(Arc::new(AtomicBool::new(true))).polling_every(1);
    let analyzer = nvs::new(
        common::contract(script, &[("store", 2), ("main", 0)]),
        Config::default(),
        watchdog.in_arc(),
    )
    .optimize();

    assert_eq!(common::offsets(analyzer.contract()), vec![2, 0]);
    let errors = analyzer.errors();
    let located: Vec<_> = errors
        .payloads()
        .iter()
        .map(|error| (error.location, error.payload.clone()))
        .collect();
    assert_eq!(
        located,
        vec![(0, Error::StoppedByWatchdog), (2, Error::StoppedByWatchdog)]
    );
}
