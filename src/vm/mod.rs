//! This module contains the symbolic virtual machine.
//!
//! The machine executes NeoVM instructions over [`value::StackItem`]s, which
//! may be concrete or symbolic. It does not reason about branches: any
//! instruction whose effect on control flow or sizes depends on a symbolic
//! operand stops execution with an unresolved error, leaving the caller to
//! decide what that means for its analysis.

pub mod context;
pub mod jump_table;
pub mod state;
pub mod value;

use std::cell::RefMut;

use derivative::Derivative;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};
use tracing::{debug, trace};

use crate::{
    constant::{
        DEFAULT_FOLLOW_CALLS,
        DEFAULT_INSTRUCTION_LIMIT,
        DEFAULT_MAX_INVOCATION_DEPTH,
        DEFAULT_MAX_ITEM_SIZE,
    },
    disassembly::{Instruction, Script},
    error::{
        container::Locatable,
        execution::{Error, LocatedError, Result},
    },
    opcode::OpCode,
    vm::{
        context::{ExceptionHandlingState, ExecutionContext},
        jump_table::JumpTable,
        state::{
            stack::EvaluationStack,
            tracking::{Access, AccessTracker},
            SharedState,
        },
        value::StackItem,
    },
    watchdog::DynWatchdog,
};

/// The coarse state of the machine.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ExecutionState {
    /// Execution is in progress or has not started.
    #[default]
    None,

    /// The entry frame returned.
    Halt,

    /// Execution failed for a reason other than an unresolved operand.
    Fault,
}

/// Why a call to [`SymbolicVM::run`] or [`SymbolicVM::execute_block`]
/// returned without an error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The entry frame returned, or there was nothing left to execute.
    Halted,

    /// The next instruction is the terminator of the block being executed. It
    /// has not been executed.
    BlockEnd(Instruction),

    /// Execution of the block fell through to the instruction after it.
    Completed,

    /// The caller's predicate asked to stop before this instruction. It has
    /// not been executed.
    Stopped(Instruction),

    /// The instruction at the error's location could not be executed
    /// statically.
    Unresolved(LocatedError),
}

/// The virtual machine used to perform symbolic execution of NeoVM scripts.
///
/// It is designed to match the semantics of the concrete NeoVM wherever those
/// semantics can be expressed over symbolic values, and to refuse to guess
/// wherever they cannot.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SymbolicVM {
    /// The frames being executed, with the current frame last.
    invocation_stack: Vec<ExecutionContext>,

    /// The values returned by the entry frame.
    result_stack: EvaluationStack,

    state: ExecutionState,

    /// The configuration of the virtual machine.
    config: Config,

    /// The handler for every opcode byte.
    #[derivative(Debug = "ignore")]
    jump_table: JumpTable,

    /// The number of instructions executed so far.
    executed: usize,

    /// A watchdog that gets polled at intervals to check whether the analysis
    /// needs to exit.
    watchdog: DynWatchdog,

    /// The exception being propagated by `THROW`, if any.
    uncaught_exception: Option<StackItem>,

    /// Whether the executing instruction moved the instruction pointer itself.
    is_jumping: bool,
}

impl SymbolicVM {
    /// Constructs a new virtual machine with no frames loaded, dispatching
    /// through the standard jump table.
    #[must_use]
    pub fn new(config: Config, watchdog: DynWatchdog) -> Self {
        Self {
            invocation_stack: Vec::new(),
            result_stack: EvaluationStack::new(),
            state: ExecutionState::default(),
            config,
            jump_table: JumpTable::default(),
            executed: 0,
            watchdog,
            uncaught_exception: None,
            is_jumping: false,
        }
    }

    /// Replaces the jump table the machine dispatches through.
    #[must_use]
    pub fn with_jump_table(mut self, jump_table: JumpTable) -> Self {
        self.jump_table = jump_table;
        self
    }

    /// Loads a new entry frame for `script` positioned at `offset`, with fresh
    /// shared state.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `offset` lies outside the script or the invocation
    /// stack is full.
    pub fn load_script(&mut self, script: Script, offset: u32) -> Result<()> {
        let context = ExecutionContext::new(script, -1, offset)?;
        self.load_context(context).locate(offset)
    }

    /// Pushes `context` onto the invocation stack, making it current.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the invocation stack is full.
    pub fn load_context(&mut self, context: ExecutionContext) -> std::result::Result<(), Error> {
        if self.invocation_stack.len() >= self.config.max_invocation_depth {
            return Err(Error::InvocationDepthExceeded {
                limit: self.config.max_invocation_depth,
            });
        }
        self.invocation_stack.push(context);
        Ok(())
    }

    /// Pops the current frame from the invocation stack.
    pub fn unload_context(&mut self) -> Option<ExecutionContext> {
        self.invocation_stack.pop()
    }

    /// Gets the frame being executed.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no frame is loaded.
    pub fn current_context(&self) -> std::result::Result<&ExecutionContext, Error> {
        self.invocation_stack.last().ok_or(Error::NoCurrentContext)
    }

    /// Gets the frame being executed for modification.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no frame is loaded.
    pub fn current_context_mut(&mut self) -> std::result::Result<&mut ExecutionContext, Error> {
        self.invocation_stack
            .last_mut()
            .ok_or(Error::NoCurrentContext)
    }

    /// Gets the frame the machine was started in.
    #[must_use]
    pub fn entry_context(&self) -> Option<&ExecutionContext> {
        self.invocation_stack.first()
    }

    #[must_use]
    pub fn invocation_stack(&self) -> &[ExecutionContext] {
        &self.invocation_stack
    }

    /// Gets the number of frames on the invocation stack.
    #[must_use]
    pub fn invocation_depth(&self) -> usize {
        self.invocation_stack.len()
    }

    #[must_use]
    pub fn result_stack(&self) -> &EvaluationStack {
        &self.result_stack
    }

    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Gets a reference to the virtual machine's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gets the number of instructions executed so far.
    #[must_use]
    pub fn executed(&self) -> usize {
        self.executed
    }

    #[must_use]
    pub fn uncaught_exception(&self) -> Option<&StackItem> {
        self.uncaught_exception.as_ref()
    }

    /// Gets the instruction that [`Self::execute_next`] would execute, or
    /// [`None`] if no frame is loaded.
    ///
    /// Running off the end of the script executes an implicit `RET`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the next instruction is malformed.
    pub fn next_to_execute(&self) -> Result<Option<Instruction>> {
        let Some(context) = self.invocation_stack.last() else {
            return Ok(None);
        };
        match context.current_instruction()? {
            Some(instruction) => Ok(Some(instruction)),
            None => {
                let offset = context.instruction_pointer();
                Ok(Some(Instruction::new(OpCode::Ret, vec![])?.at(offset)))
            }
        }
    }

    /// Executes a single instruction of the current frame.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the instruction cannot be executed, located at the
    /// instruction's offset.
    pub fn execute_next(&mut self) -> Result<()> {
        let Some(instruction) = self.next_to_execute()? else {
            self.state = ExecutionState::Halt;
            return Ok(());
        };
        let offset = instruction.offset();
        let frame = self.invocation_stack.len() - 1;

        self.executed += 1;
        if self.executed > self.config.instruction_limit {
            self.state = ExecutionState::Fault;
            return Err(Error::InstructionLimitExceeded {
                limit: self.config.instruction_limit,
            }
            .locate(offset));
        }

        // If we have been told to stop, stop and return an error.
        if self.executed % self.watchdog.poll_every().max(1) == 0 && self.watchdog.should_stop()
        {
            return Err(Error::StoppedByWatchdog.locate(offset));
        }

        trace!(
            offset,
            opcode = %instruction.opcode(),
            depth = frame + 1,
            "executing instruction"
        );
        let handler = self.jump_table.handler(instruction.opcode().byte());
        let result = handler(self, &instruction);
        let jumped = std::mem::take(&mut self.is_jumping);

        if let Err(error) = result {
            if !error.is_unresolved() {
                self.state = ExecutionState::Fault;
            }
            return Err(error.locate(offset));
        }

        // The frame may have been unloaded by the instruction, in which case
        // there is nothing left to advance.
        if !jumped {
            if let Some(context) = self.invocation_stack.get_mut(frame) {
                context
                    .set_instruction_pointer(i64::from(instruction.next_offset()))
                    .locate(offset)?;
            }
        }

        Ok(())
    }

    /// Executes instructions until the machine halts, an instruction cannot
    /// be resolved, or `stop_before` returns `true` for the next instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if execution fails for any reason other than an
    /// unresolved instruction.
    pub fn run(
        &mut self,
        mut stop_before: impl FnMut(&Self, &Instruction) -> bool,
    ) -> Result<Outcome> {
        loop {
            if self.state == ExecutionState::Halt {
                debug!(executed = self.executed, "halted");
                return Ok(Outcome::Halted);
            }
            let Some(instruction) = self.next_to_execute()? else {
                self.state = ExecutionState::Halt;
                return Ok(Outcome::Halted);
            };
            if stop_before(self, &instruction) {
                debug!(
                    offset = instruction.offset(),
                    opcode = %instruction.opcode(),
                    "stopped before instruction"
                );
                return Ok(Outcome::Stopped(instruction));
            }

            match self.execute_next() {
                Ok(()) => {}
                Err(error) if error.payload.is_unresolved() => {
                    debug!(%error, "unresolved instruction");
                    return Ok(Outcome::Unresolved(error));
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Executes the body of `block` in the current frame, starting at the
    /// block's first instruction.
    ///
    /// Execution stops before the block's terminator, which is left for the
    /// caller to handle, or when control leaves the block. The instructions are
    /// taken as given, so a run that ends in a transfer of control before its
    /// last instruction is rejected rather than executed.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a terminator appears before the end of the block, or
    /// if execution fails for any reason other than an unresolved instruction.
    pub fn execute_block(&mut self, block: &[Instruction]) -> Result<Outcome> {
        let Some((_, body)) = block.split_last() else {
            return Ok(Outcome::Completed);
        };
        if let Some(misplaced) = body.iter().find(|i| i.opcode().is_block_terminator()) {
            return Err(Error::TerminatorInsideBlock {
                opcode: misplaced.opcode(),
            }
            .locate(misplaced.offset()));
        }

        let start = block[0].offset();
        let in_block = |offset: u32| {
            block
                .binary_search_by_key(&offset, Instruction::offset)
                .is_ok()
        };
        self.current_context_mut()
            .and_then(|context| context.set_instruction_pointer(i64::from(start)))
            .locate(start)?;
        let depth = self.invocation_depth();

        loop {
            let Some(instruction) = self.next_to_execute()? else {
                return Ok(Outcome::Halted);
            };
            if self.invocation_depth() != depth || !in_block(instruction.offset()) {
                return Ok(Outcome::Completed);
            }
            if instruction.opcode().is_block_terminator() {
                return Ok(Outcome::BlockEnd(instruction));
            }

            match self.execute_next() {
                Ok(()) => {}
                Err(error) if error.payload.is_unresolved() => {
                    return Ok(Outcome::Unresolved(error));
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Borrows the shared state of the current frame.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no frame is loaded.
    pub fn shared_mut(&self) -> std::result::Result<RefMut<'_, SharedState>, Error> {
        Ok(self.current_context()?.shared_mut())
    }

    /// Pushes `item` onto the evaluation stack, wrapping concrete values as
    /// constants.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no frame is loaded.
    pub fn push(&mut self, item: StackItem) -> std::result::Result<(), Error> {
        self.shared_mut()?
            .evaluation_stack
            .push(StackItem::constant(item));
        Ok(())
    }

    /// Pops the top of the evaluation stack.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no frame is loaded.
    pub fn pop(&mut self) -> std::result::Result<StackItem, Error> {
        Ok(self.shared_mut()?.evaluation_stack.pop())
    }

    /// Reads the item `index` places below the top of the evaluation stack.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no frame is loaded.
    pub fn peek(&mut self, index: usize) -> std::result::Result<StackItem, Error> {
        Ok(self.shared_mut()?.evaluation_stack.peek(index).clone())
    }

    /// Pops an integer operand that `opcode` must be able to fold.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is symbolic or not an integer.
    pub fn pop_integer(&mut self, opcode: OpCode) -> std::result::Result<BigInt, Error> {
        self.pop()?
            .to_integer()?
            .ok_or(Error::NonConstantOperand { opcode })
    }

    /// Pops a count, length, offset or index operand of `opcode`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is symbolic, or is negative or too large
    /// to address anything.
    pub fn pop_count(&mut self, opcode: OpCode) -> std::result::Result<usize, Error> {
        let value = self.pop_integer(opcode)?;
        if value.is_negative() {
            return Err(Error::OutOfRange { opcode, value });
        }
        value.to_usize().ok_or(Error::OutOfRange { opcode, value })
    }

    /// Pops a condition that `opcode` must be able to decide.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is symbolic or has no truth value.
    pub fn pop_bool(&mut self, opcode: OpCode) -> std::result::Result<bool, Error> {
        self.pop()?
            .to_boolean()?
            .ok_or(Error::NonConstantOperand { opcode })
    }

    /// Moves the current frame to the instruction at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `target` is not the offset of an instruction in the
    /// script.
    pub fn jump_to(&mut self, target: i64) -> std::result::Result<(), Error> {
        let context = self.current_context_mut()?;
        let available = context.script().len();
        if usize::try_from(target).map_or(true, |t| t >= available) {
            return Err(Error::InstructionPointerOutOfBounds {
                requested: target,
                available,
            });
        }
        context.set_instruction_pointer(target)?;
        self.is_jumping = true;
        Ok(())
    }

    /// Starts executing a clone of the current frame at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `target` lies outside the script or the invocation
    /// stack is full.
    pub fn call(&mut self, target: i64) -> std::result::Result<(), Error> {
        let context = self.current_context()?;
        let available = context.script().len();
        let position = u32::try_from(target)
            .ok()
            .filter(|t| usize::try_from(*t).map_or(false, |t| t <= available))
            .ok_or(Error::InstructionPointerOutOfBounds {
                requested: target,
                available,
            })?;
        let callee = context.clone_at(position)?;
        self.load_context(callee)
    }

    /// Returns from the current frame.
    ///
    /// The values left on the stack by the entry frame move to the result
    /// stack and the machine halts.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no frame is loaded or the frame left the wrong
    /// number of values.
    pub fn ret(&mut self) -> std::result::Result<(), Error> {
        let returning = self.unload_context().ok_or(Error::NoCurrentContext)?;
        let shares_stack = self
            .invocation_stack
            .last()
            .map_or(false, |caller| caller.shares_state_with(&returning));

        if !shares_stack {
            let mut shared = returning.shared_mut();
            let count = returning.return_count();
            if let Ok(expected) = usize::try_from(count) {
                if shared.evaluation_stack.len() != expected {
                    return Err(Error::ReturnCountMismatch {
                        expected: count,
                        actual:   shared.evaluation_stack.len(),
                    });
                }
            }
            match self.invocation_stack.last() {
                Some(caller) => {
                    let mut caller_shared = caller.shared_mut();
                    shared
                        .evaluation_stack
                        .move_to(&mut caller_shared.evaluation_stack, None);
                }
                None => shared
                    .evaluation_stack
                    .move_to(&mut self.result_stack, None),
            }
        }

        if self.invocation_stack.is_empty() {
            self.state = ExecutionState::Halt;
        }
        self.is_jumping = true;
        Ok(())
    }

    /// Throws `exception`, transferring control to the nearest handler.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no frame handles the exception.
    pub fn throw(&mut self, exception: StackItem) -> std::result::Result<(), Error> {
        self.uncaught_exception = Some(exception);
        self.handle_exception()
    }

    /// Routes the uncaught exception to the innermost `catch` or `finally`
    /// block, unloading every frame without one.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no frame handles the exception.
    pub fn handle_exception(&mut self) -> std::result::Result<(), Error> {
        let mut unwound = 0;
        for frame in (0..self.invocation_stack.len()).rev() {
            loop {
                let context = &mut self.invocation_stack[frame];
                let Some(handler) = context.try_stack().last().copied() else {
                    break;
                };
                if handler.state == ExceptionHandlingState::Finally
                    || (handler.state == ExceptionHandlingState::Catch && !handler.has_finally())
                {
                    context.try_stack_mut().pop();
                    continue;
                }

                self.invocation_stack.truncate(frame + 1);
                let (state, target) = match (handler.state, handler.catch_pointer) {
                    (ExceptionHandlingState::Try, Some(catch)) => {
                        (ExceptionHandlingState::Catch, catch)
                    }
                    _ => (
                        ExceptionHandlingState::Finally,
                        handler.finally_pointer.unwrap_or_default(),
                    ),
                };
                if state == ExceptionHandlingState::Catch {
                    let exception = self.uncaught_exception.take().unwrap_or_default();
                    self.push(exception)?;
                }
                let context = self.current_context_mut()?;
                if let Some(entry) = context.try_stack_mut().last_mut() {
                    entry.state = state;
                }
                context.set_instruction_pointer(i64::from(target))?;
                self.is_jumping = true;
                return Ok(());
            }
            unwound += 1;
        }

        debug!(unwound, "exception left every frame");
        Err(Error::UnhandledException)
    }

    /// Records a read of `access` by the instruction at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no frame is loaded.
    pub fn record_read(&self, access: Access, offset: u32) -> std::result::Result<(), Error> {
        self.shared_mut()?.tracker()?.record_read(access, offset);
        Ok(())
    }

    /// Records a write of `access` by the instruction at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no frame is loaded.
    pub fn record_write(&self, access: Access, offset: u32) -> std::result::Result<(), Error> {
        self.shared_mut()?.tracker()?.record_write(access, offset);
        Ok(())
    }

    /// Gets a copy of the accesses recorded in the entry frame's shared state.
    #[must_use]
    pub fn accesses(&self) -> AccessTracker {
        self.entry_context()
            .and_then(|context| context.shared().state::<AccessTracker>().cloned())
            .unwrap_or_default()
    }
}

/// The configuration for the virtual machine instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The maximum number of instructions executed in a single run.
    ///
    /// Defaults to [`DEFAULT_INSTRUCTION_LIMIT`].
    pub instruction_limit: usize,

    /// The maximum size in bytes of any buffer or byte string created during
    /// execution.
    ///
    /// Defaults to [`DEFAULT_MAX_ITEM_SIZE`].
    pub max_item_size: usize,

    /// The maximum number of frames on the invocation stack.
    ///
    /// Defaults to [`DEFAULT_MAX_INVOCATION_DEPTH`].
    pub max_invocation_depth: usize,

    /// Whether the read/write analysis executes `CALL` instructions rather
    /// than stopping at them.
    ///
    /// Defaults to [`DEFAULT_FOLLOW_CALLS`].
    pub follow_calls: bool,
}

impl Config {
    /// Sets the `instruction_limit` config parameter to `value`.
    #[must_use]
    pub fn with_instruction_limit(mut self, value: usize) -> Self {
        self.instruction_limit = value;
        self
    }

    /// Sets the `max_item_size` config parameter to `value`.
    #[must_use]
    pub fn with_max_item_size(mut self, value: usize) -> Self {
        self.max_item_size = value;
        self
    }

    /// Sets the `max_invocation_depth` config parameter to `value`.
    #[must_use]
    pub fn with_max_invocation_depth(mut self, value: usize) -> Self {
        self.max_invocation_depth = value;
        self
    }

    /// Sets the `follow_calls` config parameter to `value`.
    #[must_use]
    pub fn with_follow_calls(mut self, value: bool) -> Self {
        self.follow_calls = value;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instruction_limit:    DEFAULT_INSTRUCTION_LIMIT,
            max_item_size:        DEFAULT_MAX_ITEM_SIZE,
            max_invocation_depth: DEFAULT_MAX_INVOCATION_DEPTH,
            follow_calls:         DEFAULT_FOLLOW_CALLS,
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        disassembly::{blocks::basic_blocks, Instruction},
        error::execution::Error,
        opcode::OpCode,
        script,
        vm::{
            jump_table::test_util::{new_vm, stack},
            value::StackItem,
            Outcome,
        },
    };

    #[test]
    fn straight_line_blocks_run_into_the_next_block() -> anyhow::Result<()> {
        // 0: PUSH1, 1: PUSH2, 2: ADD | 3: PUSH3, 4: RET
        let script = script![
            OpCode::Push1,
            OpCode::Push2,
            OpCode::Add,
            OpCode::Push3,
            OpCode::Ret
        ];
        let blocks = basic_blocks(&script, [3])?;
        let mut vm = new_vm(script)?;

        let outcome = vm.execute_block(blocks[0].instructions())?;
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(stack(&vm)?, vec![StackItem::integer(3)]);
        assert_eq!(vm.current_context()?.instruction_pointer(), 3);

        Ok(())
    }

    #[test]
    fn blocks_stop_before_their_terminator() -> anyhow::Result<()> {
        // 0: PUSH1, 1: JMP +3 | 3: PUSH2 | 4: PUSH3
        let script = script![
            OpCode::Push1,
            Instruction::new(OpCode::Jmp, vec![3])?,
            OpCode::Push2,
            OpCode::Push3
        ];
        let blocks = basic_blocks(&script, [])?;
        let mut vm = new_vm(script)?;

        match vm.execute_block(blocks[0].instructions())? {
            Outcome::BlockEnd(terminator) => {
                assert_eq!(terminator.offset(), 1);
                assert_eq!(terminator.opcode(), OpCode::Jmp);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(stack(&vm)?, vec![StackItem::integer(1)]);

        Ok(())
    }

    #[test]
    fn terminators_inside_a_block_are_rejected_before_running() -> anyhow::Result<()> {
        let script = script![OpCode::Push1, OpCode::Ret, OpCode::Push2];
        let block = vec![
            Instruction::new(OpCode::Push1, vec![])?.at(0),
            Instruction::new(OpCode::Ret, vec![])?.at(1),
            Instruction::new(OpCode::Push2, vec![])?.at(2),
        ];
        let mut vm = new_vm(script)?;

        let error = vm.execute_block(&block).expect_err("RET is not last");
        assert_eq!(error.location, 1);
        assert_eq!(
            error.payload,
            Error::TerminatorInsideBlock {
                opcode: OpCode::Ret,
            }
        );
        assert!(stack(&vm)?.is_empty());

        Ok(())
    }
}
