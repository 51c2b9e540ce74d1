//! Utilities for testing opcode handlers.

use crate::{
    disassembly::Script,
    vm::{value::StackItem, Config, Outcome, SymbolicVM},
    watchdog::LazyWatchdog,
};

/// Creates a virtual machine positioned at the start of `script`.
pub fn new_vm(script: Script) -> anyhow::Result<SymbolicVM> {
    let mut vm = SymbolicVM::new(Config::default(), LazyWatchdog.in_arc());
    vm.load_script(script, 0)?;
    Ok(vm)
}

/// Executes `script` until it reaches its end, leaving the implicit return
/// unexecuted so that the stack can be inspected.
pub fn execute(script: Script) -> anyhow::Result<(SymbolicVM, Outcome)> {
    let end = script.len();
    let mut vm = new_vm(script)?;
    let outcome = vm.run(|_, instruction| instruction.offset() as usize >= end)?;
    Ok((vm, outcome))
}

/// Gets the items on the evaluation stack, top first.
pub fn stack(vm: &SymbolicVM) -> anyhow::Result<Vec<StackItem>> {
    Ok(vm
        .current_context()?
        .shared()
        .evaluation_stack
        .iter()
        .cloned()
        .collect())
}

/// Executes `script` to its end and returns the resulting stack, failing if
/// execution stopped anywhere else.
pub fn final_stack(script: Script) -> anyhow::Result<Vec<StackItem>> {
    let end = script.len();
    let (vm, outcome) = execute(script)?;
    match outcome {
        Outcome::Stopped(instruction) if instruction.offset() as usize == end => stack(&vm),
        other => anyhow::bail!("execution ended early with {other:?}"),
    }
}
