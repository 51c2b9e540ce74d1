//! Handlers for the instructions that transfer control: jumps, calls,
//! returns, assertions and exception handling.
//!
//! Every transfer must be decidable. A jump whose condition is symbolic stops
//! execution with a non-constant operand rather than exploring both paths.

use crate::{
    constant::MAX_TRY_NESTING_DEPTH,
    disassembly::Instruction,
    error::execution::Error,
    opcode::OpCode,
    vm::{
        context::{ExceptionHandlingContext, ExceptionHandlingState},
        jump_table::HandlerResult,
        value::{StackItem, StackItemType},
        SymbolicVM,
    },
};

/// Gets the absolute target of a jump, call or `ENDTRY`.
fn target(instruction: &Instruction) -> Result<i64, Error> {
    instruction
        .branch_targets()?
        .first()
        .copied()
        .ok_or(Error::InvalidOperand {
            opcode: instruction.opcode(),
        })
}

pub fn nop(_: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    Ok(())
}

/// `JMP` and `JMP_L`.
pub fn jmp(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    vm.jump_to(target(instruction)?)
}

/// `JMPIF` and `JMPIF_L`.
pub fn jmp_if(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    if vm.pop_bool(instruction.opcode())? {
        vm.jump_to(target(instruction)?)?;
    }
    Ok(())
}

/// `JMPIFNOT` and `JMPIFNOT_L`.
pub fn jmp_if_not(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    if !vm.pop_bool(instruction.opcode())? {
        vm.jump_to(target(instruction)?)?;
    }
    Ok(())
}

/// The jumps that compare two integers.
pub fn jmp_compare(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let x2 = vm.pop_integer(opcode)?;
    let x1 = vm.pop_integer(opcode)?;
    let taken = match opcode {
        OpCode::JmpEq | OpCode::JmpEqL => x1 == x2,
        OpCode::JmpNe | OpCode::JmpNeL => x1 != x2,
        OpCode::JmpGt | OpCode::JmpGtL => x1 > x2,
        OpCode::JmpGe | OpCode::JmpGeL => x1 >= x2,
        OpCode::JmpLt | OpCode::JmpLtL => x1 < x2,
        OpCode::JmpLe | OpCode::JmpLeL => x1 <= x2,
        _ => return Err(Error::InvalidOperand { opcode }),
    };
    if taken {
        vm.jump_to(target(instruction)?)?;
    }
    Ok(())
}

/// `CALL` and `CALL_L` start a new frame at the target, sharing the caller's
/// stack.
pub fn call(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    vm.call(target(instruction)?)
}

/// `CALLA` calls the pointer on top of the stack.
pub fn call_a(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let pointer = vm.pop()?;
    match pointer.known() {
        Some(StackItem::Pointer(position)) => vm.call(i64::from(*position)),
        Some(other) => Err(Error::InvalidCast {
            from: other.item_type(),
            to:   StackItemType::Pointer,
        }),
        None => Err(Error::NonConstantOperand {
            opcode: instruction.opcode(),
        }),
    }
}

pub fn abort(_: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    Err(Error::Aborted { message: None })
}

/// `ABORTMSG` aborts with the message on top of the stack.
pub fn abort_msg(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    let message = pop_message(vm)?;
    Err(Error::Aborted { message })
}

pub fn assert(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    if vm.pop_bool(instruction.opcode())? {
        Ok(())
    } else {
        Err(Error::AssertionFailed { message: None })
    }
}

/// `ASSERTMSG` pops the message and then the condition.
pub fn assert_msg(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let message = pop_message(vm)?;
    if vm.pop_bool(instruction.opcode())? {
        Ok(())
    } else {
        Err(Error::AssertionFailed { message })
    }
}

pub fn throw(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    let exception = vm.pop()?;
    vm.throw(exception)
}

/// `TRY` and `TRY_L` open a protected region. A zero catch or finally offset
/// means the region has no such handler, but it must have one of them.
pub fn try_block(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let (catch_offset, finally_offset) = match opcode {
        OpCode::Try => (
            i32::from(instruction.token_i8()?),
            i32::from(instruction.token_i8_1()?),
        ),
        _ => (instruction.token_i32()?, instruction.token_i32_1()?),
    };
    if catch_offset == 0 && finally_offset == 0 {
        return Err(Error::InvalidTryState { opcode });
    }

    let base = i64::from(instruction.offset());
    let pointer = |offset: i32| -> Result<Option<u32>, Error> {
        if offset == 0 {
            return Ok(None);
        }
        let target = base + i64::from(offset);
        u32::try_from(target)
            .map(Some)
            .map_err(|_| Error::InvalidPointer { target })
    };
    let handler = ExceptionHandlingContext::new(pointer(catch_offset)?, pointer(finally_offset)?);

    let context = vm.current_context_mut()?;
    if context.try_stack().len() >= MAX_TRY_NESTING_DEPTH {
        return Err(Error::InvalidTryState { opcode });
    }
    context.try_stack_mut().push(handler);
    Ok(())
}

/// `ENDTRY` and `ENDTRY_L` leave a `try` or `catch` block, running the
/// `finally` block first if there is one.
pub fn end_try(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let end = target(instruction)?;
    let end_pointer = u32::try_from(end).map_err(|_| Error::InvalidPointer { target: end })?;

    let context = vm.current_context_mut()?;
    let handler = context
        .try_stack_mut()
        .last_mut()
        .ok_or(Error::InvalidTryState { opcode })?;
    if handler.state == ExceptionHandlingState::Finally {
        return Err(Error::InvalidTryState { opcode });
    }

    match handler.finally_pointer {
        Some(finally) => {
            handler.state = ExceptionHandlingState::Finally;
            handler.end_pointer = Some(end_pointer);
            vm.jump_to(i64::from(finally))
        }
        None => {
            context.try_stack_mut().pop();
            vm.jump_to(end)
        }
    }
}

/// `ENDFINALLY` leaves a `finally` block, resuming either after the protected
/// region or the propagation of the pending exception.
pub fn end_finally(vm: &mut SymbolicVM, instruction: &Instruction) -> HandlerResult {
    let opcode = instruction.opcode();
    let handler = vm
        .current_context_mut()?
        .try_stack_mut()
        .pop()
        .ok_or(Error::InvalidTryState { opcode })?;

    if vm.uncaught_exception().is_some() {
        vm.handle_exception()
    } else {
        let end = handler.end_pointer.ok_or(Error::InvalidTryState { opcode })?;
        vm.jump_to(i64::from(end))
    }
}

pub fn ret(vm: &mut SymbolicVM, _: &Instruction) -> HandlerResult {
    vm.ret()
}

/// Pops a message operand, which is only informative and so may be symbolic.
fn pop_message(vm: &mut SymbolicVM) -> Result<Option<String>, Error> {
    let item = vm.pop()?;
    let bytes = vm.shared_mut()?.heap.bytes_of(&item).ok().flatten();
    Ok(bytes.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}

#[cfg(test)]
mod test {
    use crate::{
        disassembly::{Instruction, ScriptBuilder},
        error::execution::Error,
        opcode::OpCode,
        script,
        vm::{
            jump_table::test_util::{execute, final_stack, new_vm},
            value::StackItem,
            ExecutionState,
            Outcome,
        },
    };

    #[test]
    fn constant_conditions_decide_jumps() -> anyhow::Result<()> {
        // PUSH1 PUSH2 JMPLT +3 PUSH5 PUSH7
        let script = script![
            OpCode::Push1,
            OpCode::Push2,
            Instruction::new(OpCode::JmpLt, vec![3])?,
            OpCode::Push5,
            OpCode::Push7
        ];
        assert_eq!(final_stack(script)?, vec![StackItem::integer(7)]);

        Ok(())
    }

    #[test]
    fn symbolic_conditions_are_unresolved() -> anyhow::Result<()> {
        // The condition comes from below the observed stack.
        let script = script![Instruction::new(OpCode::JmpIf, vec![2])?, OpCode::Push1];
        let (_, outcome) = execute(script)?;
        match outcome {
            Outcome::Unresolved(error) => {
                assert_eq!(error.location, 0);
                assert_eq!(
                    error.payload,
                    Error::NonConstantOperand {
                        opcode: OpCode::JmpIf,
                    }
                );
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn calls_return_to_the_caller() -> anyhow::Result<()> {
        // 0: CALL +4  2: PUSH2  3: RET  4: PUSH1  5: RET
        let script = script![
            Instruction::new(OpCode::Call, vec![4])?,
            OpCode::Push2,
            OpCode::Ret,
            OpCode::Push1,
            OpCode::Push3,
            OpCode::Ret
        ];
        let mut vm = new_vm(script)?;
        let outcome = vm.run(|_, _| false)?;

        assert_eq!(outcome, Outcome::Halted);
        assert_eq!(vm.state(), ExecutionState::Halt);
        let results: Vec<_> = vm.result_stack().iter().cloned().collect();
        assert_eq!(
            results,
            vec![
                StackItem::integer(2),
                StackItem::integer(3),
                StackItem::integer(1)
            ]
        );

        Ok(())
    }

    #[test]
    fn calls_may_target_the_end_of_the_script() -> anyhow::Result<()> {
        // 0: PUSH1  1: CALL +2 -> 3, which is the end of the script
        let script = script![OpCode::Push1, Instruction::new(OpCode::Call, vec![2])?];
        let mut vm = new_vm(script)?;
        let outcome = vm.run(|_, _| false)?;

        assert_eq!(outcome, Outcome::Halted);
        let results: Vec<_> = vm.result_stack().iter().cloned().collect();
        assert_eq!(results, vec![StackItem::integer(1)]);

        Ok(())
    }

    #[test]
    fn calls_past_the_end_of_the_script_fail() -> anyhow::Result<()> {
        let mut vm = new_vm(script![Instruction::new(OpCode::Call, vec![3])?])?;
        let error = vm.run(|_, _| false).err().map(|e| e.payload);

        assert_eq!(
            error,
            Some(Error::InstructionPointerOutOfBounds {
                requested: 3,
                available: 2,
            })
        );

        Ok(())
    }

    #[test]
    fn thrown_exceptions_reach_the_catch_block() -> anyhow::Result<()> {
        // 0: TRY +5 0  3: PUSH1  4: THROW  5: PUSH2 (catch)  6: ENDTRY +2  8: PUSH3
        let script = script![
            Instruction::new(OpCode::Try, vec![5, 0])?,
            OpCode::Push1,
            OpCode::Throw,
            OpCode::Push2,
            Instruction::new(OpCode::EndTry, vec![2])?,
            OpCode::Push3
        ];
        assert_eq!(
            final_stack(script)?,
            vec![
                StackItem::integer(3),
                StackItem::integer(2),
                StackItem::integer(1)
            ]
        );

        Ok(())
    }

    #[test]
    fn finally_blocks_run_before_leaving_the_region() -> anyhow::Result<()> {
        // 0: TRY 0 +6  3: PUSH1  4: ENDTRY +4  6: PUSH2 (finally)  7: ENDFINALLY  8: PUSH3
        let script = script![
            Instruction::new(OpCode::Try, vec![0, 6])?,
            OpCode::Push1,
            Instruction::new(OpCode::EndTry, vec![4])?,
            OpCode::Push2,
            OpCode::EndFinally,
            OpCode::Push3
        ];
        assert_eq!(
            final_stack(script)?,
            vec![
                StackItem::integer(3),
                StackItem::integer(2),
                StackItem::integer(1)
            ]
        );

        Ok(())
    }

    #[test]
    fn uncaught_exceptions_fault() -> anyhow::Result<()> {
        let mut vm = new_vm(script![OpCode::Push1, OpCode::Throw])?;
        let error = vm.run(|_, _| false).err().map(|e| e.payload);

        assert_eq!(error, Some(Error::UnhandledException));
        assert_eq!(vm.state(), ExecutionState::Fault);

        Ok(())
    }

    #[test]
    fn failed_assertions_carry_their_message() -> anyhow::Result<()> {
        let script = ScriptBuilder::new()
            .emit(OpCode::PushF)
            .emit_push_data(b"nope")?
            .emit(OpCode::AssertMsg)
            .build();
        let error = new_vm(script)?.run(|_, _| false).err().map(|e| e.payload);
        assert_eq!(
            error,
            Some(Error::AssertionFailed {
                message: Some("nope".into()),
            })
        );

        Ok(())
    }
}
