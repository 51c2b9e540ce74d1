//! Handlers for the instructions that create and slice byte buffers.
//!
//! Lengths, offsets and indices must be known and are bounds-checked exactly
//! as the concrete VM checks them. The byte operands themselves may be
//! symbolic, in which case the result is derived from them.

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

use crate::{
    disassembly::Instruction,
    error::execution::Error,
    opcode::OpCode,
    vm::{
        jump_table::HandlerResult,
        value::{StackItem, StackItemType, SymbolicVariable},
        SymbolicVM,
    },
};

fn derived(opcode: OpCode, operands: Vec<StackItem>) -> StackItem {
    StackItem::variable(SymbolicVariable::Derived { opcode, operands })
}

fn out_of_range(opcode: OpCode, value: usize) -> Error {
    Error::OutOfRange {
        opcode,
        value: BigInt::from(value),
    }
}

/// Checks a new item of `size` bytes against the configured item size limit.
fn check_size(vm: &SymbolicVM, size: usize) -> Result<(), Error> {
    let limit = vm.config().max_item_size;
    if size > limit {
        return Err(Error::ItemTooLarge { size, limit });
    }
    Ok(())
}

/// Gets the bytes of `item`, or [`None`] if it is symbolic.
fn bytes_of(vm: &SymbolicVM, item: &StackItem) -> Result<Option<Vec<u8>>, Error> {
    vm.shared_mut()?.heap.bytes_of(item)
}

fn new_buffer_item(vm: &mut SymbolicVM, bytes: Vec<u8>) -> Result<StackItem, Error> {
    Ok(vm.shared_mut()?.heap.new_buffer(bytes))
}

/// `NEWBUFFER` allocates a zeroed buffer of the popped length.
pub fn new_buffer(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let length = vm.pop()?;
    let Some(value) = length.to_integer()? else {
        return vm.push(derived(opcode, vec![length]));
    };
    if value.is_negative() {
        return Err(Error::OutOfRange { opcode, value });
    }
    let size = value.to_usize().ok_or(Error::OutOfRange { opcode, value })?;
    check_size(vm, size)?;

    let buffer = new_buffer_item(vm, vec![0; size])?;
    vm.push(buffer)
}

/// `MEMCPY` copies `count` bytes from `src[si..]` into the buffer `dst[di..]`.
pub fn memcpy(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let count = vm.pop_count(opcode)?;
    let source_index = vm.pop_count(opcode)?;
    let source = vm.pop()?;
    let source = bytes_of(vm, &source)?.ok_or(Error::NonConstantOperand { opcode })?;
    let source_end = source_index
        .checked_add(count)
        .filter(|end| *end <= source.len())
        .ok_or_else(|| out_of_range(opcode, source_index.saturating_add(count)))?;

    let destination_index = vm.pop_count(opcode)?;
    let destination = vm.pop()?;
    let handle = match destination.known() {
        Some(StackItem::Buffer(handle)) => *handle,
        Some(other) => {
            return Err(Error::InvalidCast {
                from: other.item_type(),
                to:   StackItemType::Buffer,
            })
        }
        None => return Err(Error::NonConstantOperand { opcode }),
    };

    let mut shared = vm.shared_mut()?;
    let target = shared.heap.buffer_mut(handle)?;
    let destination_end = destination_index
        .checked_add(count)
        .filter(|end| *end <= target.len())
        .ok_or_else(|| out_of_range(opcode, destination_index.saturating_add(count)))?;
    target[destination_index..destination_end].copy_from_slice(&source[source_index..source_end]);
    Ok(())
}

/// `CAT` concatenates the top two items into a new buffer.
pub fn cat(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let x2 = vm.pop()?;
    let x1 = vm.pop()?;
    let (Some(mut first), Some(second)) = (bytes_of(vm, &x1)?, bytes_of(vm, &x2)?) else {
        return vm.push(derived(instruction.opcode(), vec![x1, x2]));
    };
    check_size(vm, first.len() + second.len())?;

    first.extend(second);
    let buffer = new_buffer_item(vm, first)?;
    vm.push(buffer)
}

/// `SUBSTR` takes `count` bytes starting at `index`.
pub fn substr(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let count = vm.pop_count(opcode)?;
    let index = vm.pop_count(opcode)?;
    let x = vm.pop()?;
    let Some(bytes) = bytes_of(vm, &x)? else {
        let operands = vec![x, StackItem::integer(index), StackItem::integer(count)];
        return vm.push(derived(opcode, operands));
    };
    let end = index
        .checked_add(count)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| out_of_range(opcode, index.saturating_add(count)))?;

    let buffer = new_buffer_item(vm, bytes[index..end].to_vec())?;
    vm.push(buffer)
}

/// `LEFT` takes the first `count` bytes.
pub fn left(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let count = vm.pop_count(opcode)?;
    let x = vm.pop()?;
    let Some(bytes) = bytes_of(vm, &x)? else {
        return vm.push(derived(opcode, vec![x, StackItem::integer(count)]));
    };
    if count > bytes.len() {
        return Err(out_of_range(opcode, count));
    }

    let buffer = new_buffer_item(vm, bytes[..count].to_vec())?;
    vm.push(buffer)
}

/// `RIGHT` takes the last `count` bytes.
pub fn right(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let count = vm.pop_count(opcode)?;
    let x = vm.pop()?;
    let Some(bytes) = bytes_of(vm, &x)? else {
        return vm.push(derived(opcode, vec![x, StackItem::integer(count)]));
    };
    if count > bytes.len() {
        return Err(out_of_range(opcode, count));
    }

    let buffer = new_buffer_item(vm, bytes[bytes.len() - count..].to_vec())?;
    vm.push(buffer)
}

#[cfg(test)]
mod test {
    use num_bigint::BigInt;

    use crate::{
        disassembly::ScriptBuilder,
        error::execution::{Error, ErrorClass},
        opcode::OpCode,
        script,
        vm::{
            jump_table::test_util::{execute, final_stack, new_vm, stack},
            value::{StackItem, SymbolicVariable},
            Outcome,
        },
    };

    /// Gets the bytes of the buffer on top of the stack after running
    /// `script`.
    fn top_bytes(builder: &mut ScriptBuilder) -> anyhow::Result<Vec<u8>> {
        let (vm, _) = execute(builder.build())?;
        let top = stack(&vm)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty stack"))?;
        let bytes = vm
            .current_context()?
            .shared()
            .heap
            .bytes_of(&top)?
            .ok_or_else(|| anyhow::anyhow!("symbolic result"))?;
        Ok(bytes)
    }

    #[test]
    fn buffers_are_zeroed() -> anyhow::Result<()> {
        let bytes = top_bytes(ScriptBuilder::new().emit(OpCode::Push3).emit(OpCode::NewBuffer))?;
        assert_eq!(bytes, vec![0, 0, 0]);

        Ok(())
    }

    #[test]
    fn memcpy_copies_into_the_destination() -> anyhow::Result<()> {
        // dst = NEWBUFFER 4; MEMCPY dst 1 "abc" 1 2; leaves dst on the stack.
        let mut builder = ScriptBuilder::new();
        builder
            .emit(OpCode::Push4)
            .emit(OpCode::NewBuffer)
            .emit(OpCode::Dup)
            .emit(OpCode::Push1)
            .emit_push_data(b"abc")?
            .emit(OpCode::Push1)
            .emit(OpCode::Push2)
            .emit(OpCode::Memcpy);
        assert_eq!(top_bytes(&mut builder)?, vec![0, b'b', b'c', 0]);

        Ok(())
    }

    #[test]
    fn slices_follow_their_bounds() -> anyhow::Result<()> {
        let mut builder = ScriptBuilder::new();
        builder
            .emit_push_data(b"hello")?
            .emit(OpCode::Push1)
            .emit(OpCode::Push3)
            .emit(OpCode::Substr);
        assert_eq!(top_bytes(&mut builder)?, b"ell".to_vec());

        builder.emit_push_data(b"hello")?.emit(OpCode::Push2).emit(OpCode::Right);
        assert_eq!(top_bytes(&mut builder)?, b"lo".to_vec());

        builder
            .emit_push_data(b"ab")?
            .emit_push_data(b"cd")?
            .emit(OpCode::Cat)
            .emit(OpCode::Push3)
            .emit(OpCode::Left);
        assert_eq!(top_bytes(&mut builder)?, b"abc".to_vec());

        Ok(())
    }

    #[test]
    fn negative_lengths_are_range_violations() -> anyhow::Result<()> {
        let error = new_vm(script![OpCode::PushM1, OpCode::NewBuffer])?
            .run(|_, _| false)
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected a fault"))?;
        assert_eq!(error.location, 1);
        assert_eq!(
            error.payload,
            Error::OutOfRange {
                opcode: OpCode::NewBuffer,
                value:  BigInt::from(-1),
            }
        );
        assert_eq!(error.payload.class(), ErrorClass::RangeViolation);

        Ok(())
    }

    #[test]
    fn slices_past_the_end_are_range_violations() -> anyhow::Result<()> {
        let script = ScriptBuilder::new()
            .emit_push_data(b"ab")?
            .emit(OpCode::Push3)
            .emit(OpCode::Left)
            .build();
        let error = new_vm(script)?.run(|_, _| false).err().map(|e| e.payload);
        assert_eq!(
            error,
            Some(Error::OutOfRange {
                opcode: OpCode::Left,
                value:  BigInt::from(3),
            })
        );

        Ok(())
    }

    #[test]
    fn symbolic_destination_offsets_are_unresolved() -> anyhow::Result<()> {
        // The destination offset is loaded from an unwritten static field.
        let script = ScriptBuilder::new()
            .emit(OpCode::Push1)
            .emit(OpCode::NewBuffer)
            .emit(OpCode::LdSFld0)
            .emit_push_data(b"a")?
            .emit(OpCode::Push0)
            .emit(OpCode::Push1)
            .emit(OpCode::Memcpy)
            .build();
        let (_, outcome) = execute(script)?;
        let Outcome::Unresolved(error) = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(
            error.payload,
            Error::NonConstantOperand {
                opcode: OpCode::Memcpy,
            }
        );

        Ok(())
    }

    #[test]
    fn symbolic_contents_produce_derived_items() -> anyhow::Result<()> {
        let stack = final_stack(script![OpCode::LdSFld0, OpCode::Push1, OpCode::Cat])?;
        let StackItem::Variable(variable) = &stack[0] else {
            anyhow::bail!("expected a variable, got {}", stack[0]);
        };
        let SymbolicVariable::Derived { opcode, operands } = variable.as_ref() else {
            anyhow::bail!("expected a derived variable, got {variable}");
        };
        assert_eq!(*opcode, OpCode::Cat);
        assert_eq!(operands[1], StackItem::integer(1));

        Ok(())
    }
}
