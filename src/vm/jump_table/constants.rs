//! Handlers for the instructions that push constants.

use num_bigint::BigInt;

use crate::{
    disassembly::Instruction,
    error::execution::Error,
    opcode::OpCode,
    vm::{
        jump_table::HandlerResult,
        value::{StackItem, NULL},
        SymbolicVM,
    },
};

/// `PUSHINT8` to `PUSHINT256`.
pub fn push_int(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    vm.push(StackItem::integer(BigInt::from_signed_bytes_le(
        instruction.operand(),
    )))
}

/// `PUSHT` and `PUSHF`.
pub fn push_bool(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    vm.push(StackItem::boolean(instruction.opcode() == OpCode::PushT))
}

/// `PUSHA` pushes a pointer into the script, which may point at its end.
pub fn push_a(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let target = instruction
        .branch_targets()?
        .first()
        .copied()
        .ok_or(Error::InvalidOperand {
            opcode: instruction.opcode(),
        })?;
    let available = vm.current_context()?.script().len();
    let position = u32::try_from(target)
        .ok()
        .filter(|position| *position as usize <= available)
        .ok_or(Error::InvalidPointer { target })?;

    vm.push(StackItem::Pointer(position))
}

pub fn push_null(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    vm.push(NULL)
}

/// `PUSHDATA1`, `PUSHDATA2` and `PUSHDATA4`.
pub fn push_data(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let data = instruction.operand();
    let limit = vm.config().max_item_size;
    if data.len() > limit {
        return Err(Error::ItemTooLarge {
            size: data.len(),
            limit,
        });
    }

    vm.push(StackItem::bytes(data))
}

/// `PUSHM1` and `PUSH0` to `PUSH16`.
pub fn push_small(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let value = i16::from(instruction.opcode().byte()) - i16::from(OpCode::Push0.byte());
    vm.push(StackItem::integer(value))
}

#[cfg(test)]
mod test {
    use crate::{
        disassembly::{Instruction, ScriptBuilder},
        error::execution::Error,
        opcode::OpCode,
        vm::{
            jump_table::test_util::{final_stack, new_vm},
            value::{StackItem, NULL},
        },
    };

    #[test]
    fn pushes_integers_in_every_encoding() -> anyhow::Result<()> {
        let script = ScriptBuilder::new()
            .emit(OpCode::PushM1)
            .emit(OpCode::Push16)
            .emit_push_int(-200)?
            .emit_push_int(1_i64 << 40)?
            .build();

        let stack = final_stack(script)?;
        assert_eq!(
            stack,
            vec![
                StackItem::integer(1_i64 << 40),
                StackItem::integer(-200),
                StackItem::integer(16),
                StackItem::integer(-1),
            ]
        );

        Ok(())
    }

    #[test]
    fn pushes_data_booleans_and_null() -> anyhow::Result<()> {
        let script = ScriptBuilder::new()
            .emit(OpCode::PushT)
            .emit(OpCode::PushNull)
            .emit_push_data(&[0xde, 0xad])?
            .build();

        let stack = final_stack(script)?;
        assert_eq!(
            stack,
            vec![
                StackItem::bytes(vec![0xde, 0xad]),
                StackItem::constant(NULL),
                StackItem::boolean(true),
            ]
        );

        Ok(())
    }

    #[test]
    fn pointers_must_stay_within_the_script() -> anyhow::Result<()> {
        let valid = ScriptBuilder::new()
            .emit_with(OpCode::PushA, &5_i32.to_le_bytes())
            .build();
        assert_eq!(
            final_stack(valid)?,
            vec![StackItem::constant(StackItem::Pointer(5))]
        );

        let invalid = ScriptBuilder::new()
            .emit(OpCode::Nop)
            .emit_item(&Instruction::new(
                OpCode::PushA,
                (-2_i32).to_le_bytes().to_vec(),
            )?)
            .build();
        let error = new_vm(invalid)?.run(|_, _| false).err();
        assert_eq!(
            error.map(|e| (e.location, e.payload)),
            Some((1, Error::InvalidPointer { target: -1 }))
        );

        Ok(())
    }
}
