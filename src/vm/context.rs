//! This module contains the execution context, the interpreter's call frame.
//!
//! A context is split between state it owns (the instruction pointer, locals,
//! arguments, return count and exception handling stack) and state it shares
//! with every context cloned from it (the script, evaluation stack, static
//! fields and heap). Cloning a context is how the interpreter starts a call or
//! explores another position without copying anything already observed.

use std::{
    cell::{Ref, RefMut},
    rc::Rc,
};

use crate::{
    disassembly::{Instruction, Script},
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    vm::state::{
        slot::{SlotKind, Variables},
        AnalysisState,
        SharedState,
        SharedStateHandle,
    },
};

/// The phases of a `TRY` block.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ExceptionHandlingState {
    Try,
    Catch,
    Finally,
}

/// One entry of a frame's exception handling stack, pushed by `TRY`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExceptionHandlingContext {
    pub catch_pointer:   Option<u32>,
    pub finally_pointer: Option<u32>,

    /// Where execution resumes after the `finally` block, set by `ENDTRY`.
    pub end_pointer: Option<u32>,
    pub state:       ExceptionHandlingState,
}

impl ExceptionHandlingContext {
    #[must_use]
    pub fn new(catch_pointer: Option<u32>, finally_pointer: Option<u32>) -> Self {
        Self {
            catch_pointer,
            finally_pointer,
            end_pointer: None,
            state: ExceptionHandlingState::Try,
        }
    }

    #[must_use]
    pub fn has_catch(&self) -> bool {
        self.catch_pointer.is_some()
    }

    #[must_use]
    pub fn has_finally(&self) -> bool {
        self.finally_pointer.is_some()
    }
}

/// A call frame of the symbolic interpreter.
#[derive(Debug)]
pub struct ExecutionContext {
    shared:              SharedStateHandle,
    instruction_pointer: u32,

    /// The number of items the frame must leave on the stack when it returns,
    /// or `-1` if any number is allowed.
    return_count: i32,
    locals:       Variables,
    arguments:    Variables,
    try_stack:    Vec<ExceptionHandlingContext>,
}

impl ExecutionContext {
    /// Creates a context positioned at `position` in `script`, with fresh
    /// shared state.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `position` lies outside the script.
    pub fn new(script: Script, return_count: i32, position: u32) -> Result<Self> {
        let shared = SharedState::new(script).into_handle();
        Self::with_shared(shared, return_count, position)
    }

    /// Creates a context positioned at `position` that operates on the
    /// existing `shared` state.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `position` lies outside the script.
    pub fn with_shared(
        shared: SharedStateHandle,
        return_count: i32,
        position: u32,
    ) -> Result<Self> {
        let mut context = Self {
            shared,
            instruction_pointer: 0,
            return_count,
            locals: Variables::new(SlotKind::Local),
            arguments: Variables::new(SlotKind::Argument),
            try_stack: Vec::new(),
        };
        context
            .set_instruction_pointer(i64::from(position))
            .locate(position)?;

        Ok(context)
    }

    /// Produces a sibling context at `address` that shares this context's
    /// script, evaluation stack, static fields and heap, but has its own
    /// instruction pointer, locals and arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `address` lies outside the script.
    pub fn clone_at(&self, address: u32) -> Result<Self> {
        Self::with_shared(Rc::clone(&self.shared), -1, address)
    }

    /// Produces a sibling context at this context's instruction pointer.
    ///
    /// # Errors
    ///
    /// Never in practice, as the current position is always valid.
    pub fn clone_context(&self) -> Result<Self> {
        self.clone_at(self.instruction_pointer)
    }

    /// Borrows the shared state.
    ///
    /// # Panics
    ///
    /// Panics if the shared state is mutably borrowed, which the single
    /// threaded interpreter never does across calls.
    #[must_use]
    pub fn shared(&self) -> Ref<'_, SharedState> {
        self.shared.borrow()
    }

    /// Borrows the shared state for mutation.
    ///
    /// # Panics
    ///
    /// Panics if the shared state is already borrowed, which the single
    /// threaded interpreter never does across calls.
    #[must_use]
    pub fn shared_mut(&self) -> RefMut<'_, SharedState> {
        self.shared.borrow_mut()
    }

    /// Gets a new handle to the shared state.
    #[must_use]
    pub fn shared_handle(&self) -> SharedStateHandle {
        Rc::clone(&self.shared)
    }

    /// Checks if `other` operates on the same shared state as `self`.
    #[must_use]
    pub fn shares_state_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Gets the script this context executes.
    #[must_use]
    pub fn script(&self) -> Script {
        self.shared.borrow().script.clone()
    }

    #[must_use]
    pub fn instruction_pointer(&self) -> u32 {
        self.instruction_pointer
    }

    /// Moves the instruction pointer to `position`.
    ///
    /// The end of the script is a valid position, at which the frame returns.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `position` is negative or past the end of the
    /// script.
    pub fn set_instruction_pointer(&mut self, position: i64) -> std::result::Result<(), Error> {
        let available = self.shared.borrow().script.len();
        match u32::try_from(position) {
            Ok(position) if position as usize <= available => {
                self.instruction_pointer = position;
                Ok(())
            }
            _ => Err(Error::InstructionPointerOutOfBounds {
                requested: position,
                available,
            }),
        }
    }

    /// Advances the instruction pointer past the current instruction.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the current instruction cannot be decoded.
    pub fn move_next(&mut self) -> Result<()> {
        if let Some(instruction) = self.current_instruction()? {
            self.instruction_pointer = instruction.next_offset();
        }
        Ok(())
    }

    /// Decodes the instruction at the instruction pointer, or returns
    /// [`None`] at the end of the script.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the instruction is malformed.
    pub fn current_instruction(&self) -> Result<Option<Instruction>> {
        Ok(self
            .shared
            .borrow()
            .script
            .instruction_at(self.instruction_pointer)?)
    }

    /// Decodes the instruction after the current one, or returns [`None`] if
    /// either lies at or past the end of the script.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if either instruction is malformed.
    pub fn next_instruction(&self) -> Result<Option<Instruction>> {
        let Some(current) = self.current_instruction()? else {
            return Ok(None);
        };
        Ok(self
            .shared
            .borrow()
            .script
            .instruction_at(current.next_offset())?)
    }

    /// Gets the number of values this frame must return, or `-1` for any.
    #[must_use]
    pub fn return_count(&self) -> i32 {
        self.return_count
    }

    #[must_use]
    pub fn locals(&self) -> &Variables {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut Variables {
        &mut self.locals
    }

    #[must_use]
    pub fn arguments(&self) -> &Variables {
        &self.arguments
    }

    pub fn arguments_mut(&mut self) -> &mut Variables {
        &mut self.arguments
    }

    /// Gets the variables of the owned slot `kind`, or [`None`] for static
    /// fields as they live in the shared state.
    pub fn variables_mut(&mut self, kind: SlotKind) -> Option<&mut Variables> {
        match kind {
            SlotKind::Local => Some(&mut self.locals),
            SlotKind::Argument => Some(&mut self.arguments),
            SlotKind::Static => None,
        }
    }

    #[must_use]
    pub fn try_stack(&self) -> &[ExceptionHandlingContext] {
        &self.try_stack
    }

    pub fn try_stack_mut(&mut self) -> &mut Vec<ExceptionHandlingContext> {
        &mut self.try_stack
    }

    /// Gets the side table of type `T` from the shared state, creating it with
    /// `factory` on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the entry for `T` holds a value of another type.
    ///
    /// # Panics
    ///
    /// Panics if the shared state is already borrowed.
    pub fn get_or_create_state<T: AnalysisState>(
        &self,
        factory: impl FnOnce() -> T,
    ) -> std::result::Result<RefMut<'_, T>, Error> {
        let mut shared = self.shared.borrow_mut();
        shared.get_or_create_state(factory)?;
        RefMut::filter_map(shared, SharedState::state_mut::<T>).map_err(|_| {
            Error::AnalysisStateMismatch {
                name: std::any::type_name::<T>(),
            }
        })
    }
}
