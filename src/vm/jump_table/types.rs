//! Handlers for the instructions that compare, test and convert item types.
//!
//! Questions about a symbolic item are answered with an unknown boolean
//! rather than a fault, as they never affect sizes or control flow directly.

use crate::{
    disassembly::Instruction,
    error::execution::Error,
    opcode::OpCode,
    vm::{
        jump_table::HandlerResult,
        value::{StackItem, StackItemType},
        SymbolicVM,
    },
};

/// Decodes the type operand of `ISTYPE` or `CONVERT`, which may not be
/// [`StackItemType::Any`].
fn type_operand(instruction: &Instruction) -> Result<StackItemType, Error> {
    let invalid = Error::InvalidOperand {
        opcode: instruction.opcode(),
    };
    match StackItemType::try_from(instruction.token_u8()?) {
        Ok(StackItemType::Any) | Err(_) => Err(invalid),
        Ok(ty) => Ok(ty),
    }
}

/// `EQUAL` and `NOTEQUAL`.
pub fn equal(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let x2 = vm.pop()?;
    let x1 = vm.pop()?;
    let equals = vm.shared_mut()?.heap.equals(&x1, &x2)?;
    let result = match equals {
        Some(equals) => StackItem::boolean(equals == (instruction.opcode() == OpCode::Equal)),
        None => StackItem::unknown(StackItemType::Boolean),
    };
    vm.push(result)
}

pub fn is_null(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    let x = vm.pop()?;
    let result = if x.is_symbolic() {
        StackItem::unknown(StackItemType::Boolean)
    } else {
        StackItem::boolean(x.is_null())
    };
    vm.push(result)
}

/// `ISTYPE` tests the type of the top item. Null has no type, so it never
/// matches.
pub fn is_type(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let ty = type_operand(instruction)?;
    let x = vm.pop()?;
    let result = match x.known() {
        Some(known) => StackItem::boolean(!known.is_null() && known.item_type() == ty),
        None => StackItem::unknown(StackItemType::Boolean),
    };
    vm.push(result)
}

pub fn convert(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let ty = type_operand(instruction)?;
    let x = vm.pop()?;
    let converted = vm.shared_mut()?.heap.convert_to(&x, ty)?;
    vm.push(converted)
}
