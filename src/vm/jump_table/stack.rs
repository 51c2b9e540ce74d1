//! Handlers for the instructions that rearrange the evaluation stack.
//!
//! None of these inspect the values they move, so they execute identically
//! over concrete and symbolic items. Only their count operands must be known.

use num_bigint::BigInt;

use crate::{
    constant::MAX_STACK_SIZE,
    disassembly::Instruction,
    error::execution::Error,
    opcode::OpCode,
    vm::{
        jump_table::HandlerResult,
        value::{StackItem, SymbolicVariable},
        SymbolicVM,
    },
};

/// Pops a stack index for `opcode`, which the concrete VM bounds by its
/// maximum stack size.
fn pop_index(vm: &mut SymbolicVM, opcode: OpCode) -> Result<usize, Error> {
    let index = vm.pop_count(opcode)?;
    if index >= MAX_STACK_SIZE {
        return Err(Error::OutOfRange {
            opcode,
            value: BigInt::from(index),
        });
    }
    Ok(index)
}

/// `DEPTH` cannot be known, as the analysis never sees the bottom of the
/// stack.
pub fn depth(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    vm.push(StackItem::variable(SymbolicVariable::StackDepth))
}

pub fn drop(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    vm.pop().map(|_| ())
}

pub fn nip(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    vm.shared_mut()?.evaluation_stack.remove_at(1);
    Ok(())
}

pub fn xdrop(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let n = pop_index(vm, instruction.opcode())?;
    vm.shared_mut()?.evaluation_stack.remove_at(n);
    Ok(())
}

pub fn clear(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    vm.shared_mut()?.evaluation_stack.clear();
    Ok(())
}

pub fn dup(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    let top = vm.peek(0)?;
    vm.push(top)
}

pub fn over(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    let second = vm.peek(1)?;
    vm.push(second)
}

pub fn pick(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let n = pop_index(vm, instruction.opcode())?;
    let item = vm.peek(n)?;
    vm.push(item)
}

/// `TUCK` copies the top item below the second.
pub fn tuck(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    let mut shared = vm.shared_mut()?;
    let top = shared.evaluation_stack.peek(0).clone();
    shared.evaluation_stack.insert(2, top);
    Ok(())
}

pub fn swap(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    let mut shared = vm.shared_mut()?;
    let second = shared.evaluation_stack.remove_at(1);
    shared.evaluation_stack.push(second);
    Ok(())
}

/// `ROT` moves the third item to the top.
pub fn rot(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    let mut shared = vm.shared_mut()?;
    let third = shared.evaluation_stack.remove_at(2);
    shared.evaluation_stack.push(third);
    Ok(())
}

/// `ROLL` moves the `n`th item to the top.
pub fn roll(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let n = pop_index(vm, instruction.opcode())?;
    if n == 0 {
        return Ok(());
    }
    let mut shared = vm.shared_mut()?;
    let item = shared.evaluation_stack.remove_at(n);
    shared.evaluation_stack.push(item);
    Ok(())
}

/// `REVERSE3` and `REVERSE4`.
pub fn reverse_fixed(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let count = if instruction.opcode() == OpCode::Reverse3 {
        3
    } else {
        4
    };
    vm.shared_mut()?.evaluation_stack.reverse(count);
    Ok(())
}

pub fn reverse_n(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let n = pop_index(vm, instruction.opcode())?;
    vm.shared_mut()?.evaluation_stack.reverse(n);
    Ok(())
}
