//! This module is an integration test that exercises the interpreter's value
//! model and dispatch through the public interface.
#![cfg(test)]

use std::collections::HashMap;

use neovm_symbolic::{
    disassembly::{Instruction, ScriptBuilder},
    opcode::{OpCode, OperandSize},
    vm::{
        jump_table::{HandlerKind, JumpTable},
        state::stack::EvaluationStack,
        value::{Heap, StackItem, Unknown},
        Config,
        SymbolicVM,
    },
    watchdog::LazyWatchdog,
};

#[test]
fn every_opcode_executes_without_panicking() -> anyhow::Result<()> {
    let table = JumpTable::default();
    for opcode in OpCode::ALL {
        let operand = match opcode.operand_size() {
            OperandSize::Fixed(size) => vec![0; size],
            OperandSize::Prefixed(_) => vec![],
        };
        let mut builder = ScriptBuilder::new();
        builder
            .emit_item(&Instruction::new(*opcode, operand)?)
            .emit(OpCode::Ret);
        let script = builder.build();

        let mut vm = SymbolicVM::new(Config::default(), LazyWatchdog.in_arc());
        vm.load_script(script, 0)?;

        // Failing is fine, as long as it is reported rather than a panic.
        let result = vm.execute_next();
        if table.kind(opcode.byte()) == HandlerKind::Unimplemented {
            let error = result.expect_err("unimplemented opcodes report so");
            assert!(error.payload.is_unresolved(), "{opcode}");
        }
    }

    Ok(())
}

#[test]
fn stack_reads_past_the_bottom_never_fail() {
    let mut stack = EvaluationStack::new();
    let extension = |index| StackItem::Unknown(Unknown::extension(index));

    stack.push(StackItem::integer(7));
    stack.reverse(3);
    assert_eq!(stack.peek(0), &extension(1));
    assert_eq!(stack.peek(2), &StackItem::integer(7));

    stack.insert(5, StackItem::integer(8));
    assert_eq!(stack.remove_at(6), extension(4));
    assert_eq!(stack.remove_at(5), StackItem::integer(8));
    assert_eq!(stack.extensions(), 5);

    stack.clear();
    assert_eq!(stack.pop(), extension(5));
}

#[test]
fn struct_copies_share_nested_arrays() -> anyhow::Result<()> {
    let mut heap = Heap::new();
    let array = heap.new_array(vec![StackItem::integer(1)]);
    let nested = heap.new_struct(vec![StackItem::bytes(vec![2])]);
    let outer = heap.new_struct(vec![array.clone(), nested.clone()]);

    let copy = heap.deep_copy(&outer, &mut HashMap::new(), false)?;
    let copied = heap.items(copy.heap_ref().expect("a struct"))?.to_vec();

    assert_eq!(copied[0], array);
    assert_ne!(copied[1], nested);
    assert_eq!(heap.equals(&copy, &outer)?, Some(true));

    // Mutating the shared array shows through both, so they stay equal.
    heap.items_mut(array.heap_ref().expect("an array"))?
        .push(StackItem::integer(3));
    assert_eq!(heap.equals(&copy, &outer)?, Some(true));

    Ok(())
}

#[test]
fn cyclic_structs_copy_and_compare() -> anyhow::Result<()> {
    let mut heap = Heap::new();
    let a = heap.new_struct(vec![StackItem::integer(1)]);
    heap.items_mut(a.heap_ref().expect("a struct"))?
        .push(a.clone());

    let b = heap.deep_copy(&a, &mut HashMap::new(), false)?;
    assert_ne!(a, b);
    assert_eq!(heap.equals(&a, &b)?, Some(true));

    Ok(())
}
