//! Handlers for the instructions that create, inspect and mutate arrays,
//! structs and buffers.
//!
//! Compounds live in the heap of the shared state. Mutating one requires
//! knowing exactly which compound it is, so a symbolic target is unresolved.
//! Structs keep value semantics: a struct stored into a compound is copied.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

use crate::{
    constant::MAX_STACK_SIZE,
    disassembly::Instruction,
    error::execution::Error,
    opcode::OpCode,
    vm::{
        jump_table::HandlerResult,
        value::{HeapRef, StackItem, StackItemType, SymbolicVariable, NULL},
        SymbolicVM,
    },
};

/// What an instruction found when it resolved its compound operand.
enum Target {
    /// An array or struct.
    Items(HeapRef),
    Buffer(HeapRef),
}

/// Resolves the compound that `opcode` operates on.
fn target(opcode: OpCode, item: &StackItem) -> Result<Target, Error> {
    match item.known() {
        Some(StackItem::Array(handle) | StackItem::Struct(handle)) => Ok(Target::Items(*handle)),
        Some(StackItem::Buffer(handle)) => Ok(Target::Buffer(*handle)),
        Some(other) => Err(Error::InvalidCast {
            from: other.item_type(),
            to:   StackItemType::Array,
        }),
        None => Err(Error::NonConstantOperand { opcode }),
    }
}

/// Resolves the array or struct that `opcode` operates on.
fn items_target(opcode: OpCode, item: &StackItem) -> Result<HeapRef, Error> {
    match target(opcode, item)? {
        Target::Items(handle) => Ok(handle),
        Target::Buffer(_) => Err(Error::InvalidCast {
            from: StackItemType::Buffer,
            to:   StackItemType::Array,
        }),
    }
}

/// Checks `key` as an index into a compound of `len` elements.
fn index(opcode: OpCode, key: &StackItem, len: usize) -> Result<usize, Error> {
    let value = key.to_integer()?.ok_or(Error::NonConstantOperand { opcode })?;
    if value.is_negative() {
        return Err(Error::OutOfRange { opcode, value });
    }
    value
        .to_usize()
        .filter(|index| *index < len)
        .ok_or(Error::OutOfRange { opcode, value })
}

/// Pops an element count, which the concrete VM bounds by its maximum stack
/// size.
fn pop_size(vm: &mut SymbolicVM, opcode: OpCode) -> Result<usize, Error> {
    let size = vm.pop_count(opcode)?;
    if size > MAX_STACK_SIZE {
        return Err(Error::OutOfRange {
            opcode,
            value: BigInt::from(size),
        });
    }
    Ok(size)
}

fn allocate(vm: &mut SymbolicVM, is_struct: bool, items: Vec<StackItem>) -> HandlerResult {
    let item = {
        let mut shared = vm.shared_mut()?;
        if is_struct {
            shared.heap.new_struct(items)
        } else {
            shared.heap.new_array(items)
        }
    };
    vm.push(item)
}

/// `PACK` and `PACKSTRUCT` collect the top `n` items, the topmost first.
pub fn pack(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let size = pop_size(vm, opcode)?;
    let items = (0..size).map(|_| vm.pop()).collect::<Result<Vec<_>, _>>()?;
    allocate(vm, opcode == OpCode::PackStruct, items)
}

/// `UNPACK` pushes the elements so that the first ends on top, followed by
/// their count.
pub fn unpack(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let compound = vm.pop()?;
    let handle = items_target(instruction.opcode(), &compound)?;
    let items = vm.shared_mut()?.heap.items(handle)?.to_vec();
    let count = items.len();
    for item in items.into_iter().rev() {
        vm.push(item)?;
    }
    vm.push(StackItem::integer(count))
}

/// `NEWARRAY0` and `NEWSTRUCT0`.
pub fn new_empty(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    allocate(vm, instruction.opcode() == OpCode::NewStruct0, vec![])
}

/// `NEWARRAY` and `NEWSTRUCT` create `n` null elements.
pub fn new_sized(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let size = pop_size(vm, opcode)?;
    allocate(vm, opcode == OpCode::NewStruct, vec![NULL; size])
}

/// `NEWARRAY_T` creates `n` elements holding the default of the operand type.
pub fn new_array_typed(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let ty = StackItemType::try_from(instruction.token_u8()?)
        .map_err(|_| Error::InvalidOperand { opcode })?;
    let size = pop_size(vm, opcode)?;
    let default = match ty {
        StackItemType::Boolean => StackItem::boolean(false),
        StackItemType::Integer => StackItem::integer(0),
        StackItemType::ByteString => StackItem::bytes(vec![]),
        _ => StackItem::constant(NULL),
    };
    allocate(vm, false, vec![default; size])
}

/// `SIZE` of a symbolic item is derived from it.
pub fn size(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let x = vm.pop()?;
    let Some(known) = x.known() else {
        return vm.push(StackItem::variable(SymbolicVariable::Derived {
            opcode:   instruction.opcode(),
            operands: vec![x],
        }));
    };
    let size = {
        let shared = vm.shared_mut()?;
        match known {
            StackItem::Array(handle) | StackItem::Struct(handle) | StackItem::Buffer(handle) => {
                shared.heap.get(*handle)?.len()
            }
            StackItem::Null | StackItem::Pointer(_) => {
                return Err(Error::InvalidCast {
                    from: known.item_type(),
                    to:   StackItemType::ByteString,
                })
            }
            primitive => shared.heap.bytes_of(primitive)?.map_or(0, |bytes| bytes.len()),
        }
    };
    vm.push(StackItem::integer(size))
}

/// `PICKITEM` reads an element of a compound or a byte of a byte sequence.
pub fn pick_item(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let key = vm.pop()?;
    let x = vm.pop()?;
    if x.is_symbolic() || key.is_symbolic() {
        return vm.push(StackItem::variable(SymbolicVariable::Derived {
            opcode,
            operands: vec![x, key],
        }));
    }

    let item = {
        let shared = vm.shared_mut()?;
        match target(opcode, &x) {
            Ok(Target::Items(handle)) => {
                let items = shared.heap.items(handle)?;
                items[index(opcode, &key, items.len())?].clone()
            }
            _ => {
                let bytes = shared.heap.bytes_of(&x)?.unwrap_or_default();
                StackItem::integer(bytes[index(opcode, &key, bytes.len())?])
            }
        }
    };
    vm.push(item)
}

/// `APPEND` adds an element to the end of an array or struct.
pub fn append(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let item = vm.pop()?;
    let compound = vm.pop()?;
    let handle = items_target(opcode, &compound)?;

    let mut shared = vm.shared_mut()?;
    let item = shared.heap.clone_struct(&item)?;
    let items = shared.heap.items_mut(handle)?;
    if items.len() >= MAX_STACK_SIZE {
        return Err(Error::OutOfRange {
            opcode,
            value: BigInt::from(items.len() + 1),
        });
    }
    items.push(item);
    Ok(())
}

/// `SETITEM` replaces an element of a compound or a byte of a buffer.
pub fn set_item(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let value = vm.pop()?;
    let key = vm.pop()?;
    let compound = vm.pop()?;

    let mut shared = vm.shared_mut()?;
    match target(opcode, &compound)? {
        Target::Items(handle) => {
            let value = shared.heap.clone_struct(&value)?;
            let items = shared.heap.items_mut(handle)?;
            let index = index(opcode, &key, items.len())?;
            items[index] = value;
        }
        Target::Buffer(handle) => {
            let byte = value
                .to_integer()?
                .ok_or(Error::NonConstantOperand { opcode })?;
            let byte = byte
                .to_i16()
                .filter(|b| (-128..=255).contains(b))
                .ok_or_else(|| Error::OutOfRange {
                    opcode,
                    value: byte.clone(),
                })?;
            // The range check above makes the truncation exact.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let byte = byte as u8;
            let buffer = shared.heap.buffer_mut(handle)?;
            let index = index(opcode, &key, buffer.len())?;
            buffer[index] = byte;
        }
    }
    Ok(())
}

/// `REVERSEITEMS` reverses an array, struct or buffer in place.
pub fn reverse_items(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let compound = vm.pop()?;
    let mut shared = vm.shared_mut()?;
    match target(instruction.opcode(), &compound)? {
        Target::Items(handle) => shared.heap.items_mut(handle)?.reverse(),
        Target::Buffer(handle) => shared.heap.buffer_mut(handle)?.reverse(),
    }
    Ok(())
}

/// `REMOVE` deletes the element at an index.
pub fn remove(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let key = vm.pop()?;
    let compound = vm.pop()?;
    let handle = items_target(opcode, &compound)?;

    let mut shared = vm.shared_mut()?;
    let items = shared.heap.items_mut(handle)?;
    let index = index(opcode, &key, items.len())?;
    items.remove(index);
    Ok(())
}

pub fn clear_items(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let compound = vm.pop()?;
    let handle = items_target(instruction.opcode(), &compound)?;
    vm.shared_mut()?.heap.items_mut(handle)?.clear();
    Ok(())
}

/// `POPITEM` removes the last element and pushes it.
pub fn pop_item(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let compound = vm.pop()?;
    let handle = items_target(opcode, &compound)?;

    let item = vm
        .shared_mut()?
        .heap
        .items_mut(handle)?
        .pop()
        .ok_or(Error::OutOfRange {
            opcode,
            value: BigInt::from(-1),
        })?;
    vm.push(item)
}
