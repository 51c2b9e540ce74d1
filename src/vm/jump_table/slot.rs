//! Handlers for the instructions that initialize, load and store slot
//! variables.
//!
//! Every load and store is recorded with the access tracker of the shared
//! state, keyed by the kind of slot and the index within it.

use crate::{
    disassembly::Instruction,
    error::execution::Error,
    opcode::OpCode,
    vm::{
        jump_table::HandlerResult,
        state::{slot::SlotKind, tracking::Access},
        value::StackItem,
        SymbolicVM,
    },
};

/// The number of variables of each kind with dedicated short-form opcodes.
const SHORT_FORMS: u8 = 7;

/// Decodes the variable index of a load or store whose short forms start at
/// `first`.
fn index(instruction: &Instruction, first: OpCode) -> Result<usize, Error> {
    let short = instruction.opcode().byte() - first.byte();
    if short < SHORT_FORMS {
        Ok(usize::from(short))
    } else {
        Ok(usize::from(instruction.token_u8()?))
    }
}

fn load(vm: &mut SymbolicVM, kind: SlotKind, index: usize) -> Result<StackItem, Error> {
    match kind {
        SlotKind::Static => vm.shared_mut()?.static_fields.load(index),
        _ => vm
            .current_context_mut()?
            .variables_mut(kind)
            .ok_or(Error::NoCurrentContext)?
            .load(index),
    }
}

fn store(vm: &mut SymbolicVM, kind: SlotKind, index: usize, item: StackItem) -> Result<(), Error> {
    match kind {
        SlotKind::Static => vm.shared_mut()?.static_fields.store(index, item),
        _ => vm
            .current_context_mut()?
            .variables_mut(kind)
            .ok_or(Error::NoCurrentContext)?
            .store(index, item),
    }
}

fn load_variable(
    vm: &mut SymbolicVM,
    instruction: &Instruction,
    kind: SlotKind,
    first: OpCode,
) -> HandlerResult {
    let index = index(instruction, first)?;
    let item = load(vm, kind, index)?;
    if is_tracked(vm, kind) {
        vm.record_read(Access::Slot { kind, index }, instruction.offset())?;
    }
    vm.push(item)
}

fn store_variable(
    vm: &mut SymbolicVM,
    instruction: &Instruction,
    kind: SlotKind,
    first: OpCode,
) -> HandlerResult {
    let index = index(instruction, first)?;
    let item = vm.pop()?;
    store(vm, kind, index, item)?;
    if is_tracked(vm, kind) {
        vm.record_write(Access::Slot { kind, index }, instruction.offset())?;
    }
    Ok(())
}

/// Locals and arguments belong to their frame, so only those of the entry
/// frame are tracked. A callee's are gone once it returns.
fn is_tracked(vm: &SymbolicVM, kind: SlotKind) -> bool {
    kind == SlotKind::Static || vm.invocation_depth() <= 1
}

/// `INITSSLOT` creates the static fields.
pub fn init_static_slot(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let count = instruction.token_u8()?;
    if count == 0 {
        return Err(Error::InvalidOperand {
            opcode: instruction.opcode(),
        });
    }
    vm.shared_mut()?
        .static_fields
        .initialize(usize::from(count))
}

/// `INITSLOT` creates the locals and arguments of the current frame, moving
/// the arguments off the stack with the top item as argument zero.
pub fn init_slot(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let locals = usize::from(instruction.token_u8()?);
    let arguments = usize::from(instruction.token_u8_1()?);
    if locals == 0 && arguments == 0 {
        return Err(Error::InvalidOperand {
            opcode: instruction.opcode(),
        });
    }

    let context = vm.current_context()?;
    if context.locals().is_initialized() || context.arguments().is_initialized() {
        let kind = if context.locals().is_initialized() {
            SlotKind::Local
        } else {
            SlotKind::Argument
        };
        return Err(Error::SlotAlreadyInitialized { kind });
    }

    let items = (0..arguments)
        .map(|_| vm.pop())
        .collect::<Result<Vec<_>, _>>()?;
    let context = vm.current_context_mut()?;
    context.locals_mut().initialize(locals)?;
    context.arguments_mut().initialize_with(items)
}

pub fn load_static(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    load_variable(vm, instruction, SlotKind::Static, OpCode::LdSFld0)
}

pub fn store_static(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    store_variable(vm, instruction, SlotKind::Static, OpCode::StSFld0)
}

pub fn load_local(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    load_variable(vm, instruction, SlotKind::Local, OpCode::LdLoc0)
}

pub fn store_local(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    store_variable(vm, instruction, SlotKind::Local, OpCode::StLoc0)
}

pub fn load_argument(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    load_variable(vm, instruction, SlotKind::Argument, OpCode::LdArg0)
}

pub fn store_argument(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    store_variable(vm, instruction, SlotKind::Argument, OpCode::StArg0)
}
