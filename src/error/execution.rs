//! This module contains errors pertaining to the symbolic execution of a
//! script.

use num_bigint::BigInt;
use thiserror::Error;

use crate::{
    error::{container, disassembly},
    opcode::OpCode,
    vm::{state::slot::SlotKind, value::StackItemType},
};

/// Errors that occur during the execution of a script by the
/// [`crate::vm::SymbolicVM`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Instruction pointer {requested} is out of bounds in a script of length {available}")]
    InstructionPointerOutOfBounds { requested: i64, available: usize },

    #[error("There is no execution context to run")]
    NoCurrentContext,

    #[error(transparent)]
    Disassembly(#[from] disassembly::Error),

    #[error("The block terminator {opcode} appears before the end of the basic block")]
    TerminatorInsideBlock { opcode: OpCode },

    #[error("The {opcode} instruction has an invalid operand")]
    InvalidOperand { opcode: OpCode },

    #[error("The {opcode} instruction requires a constant operand")]
    NonConstantOperand { opcode: OpCode },

    #[error("The value {value} is out of range for {opcode}")]
    OutOfRange { opcode: OpCode, value: BigInt },

    #[error("The pointer target {target} lies outside the script")]
    InvalidPointer { target: i64 },

    #[error("An item of {size} bytes exceeds the maximum item size of {limit}")]
    ItemTooLarge { size: usize, limit: usize },

    #[error("Index {index} is out of range for the {kind} slot of size {size}")]
    SlotIndexOutOfRange {
        kind:  SlotKind,
        index: usize,
        size:  usize,
    },

    #[error("The {kind} slot has already been initialized")]
    SlotAlreadyInitialized { kind: SlotKind },

    #[error("The opcode {opcode} is not implemented for symbolic execution")]
    UnimplementedOpcode { opcode: OpCode },

    #[error("The byte {byte:#04x} is not a defined opcode")]
    UndefinedOpcode { byte: u8 },

    #[error("The interop service {hash:#010x} is not supported for symbolic execution")]
    UnsupportedSyscall { hash: u32 },

    #[error("Attempted to mutate a read-only compound item")]
    Immutable,

    #[error("Cannot convert an item of type {from} to {to}")]
    InvalidCast {
        from: StackItemType,
        to:   StackItemType,
    },

    #[error("The heap handle {handle} does not refer to a live compound item")]
    InvalidHeapHandle { handle: usize },

    #[error("Expected {expected} return values but the stack holds {actual}")]
    ReturnCountMismatch { expected: i32, actual: usize },

    #[error("Execution was aborted: {message:?}")]
    Aborted { message: Option<String> },

    #[error("An assertion failed: {message:?}")]
    AssertionFailed { message: Option<String> },

    #[error("An exception was thrown and not handled")]
    UnhandledException,

    #[error("The exception handling state does not permit {opcode}")]
    InvalidTryState { opcode: OpCode },

    #[error("The invocation stack exceeded its limit of {limit} frames")]
    InvocationDepthExceeded { limit: usize },

    #[error("Execution exceeded the limit of {limit} instructions")]
    InstructionLimitExceeded { limit: usize },

    #[error("Execution was stopped by the watchdog")]
    StoppedByWatchdog,

    #[error("More than one handler was registered for {opcode}")]
    DuplicateHandler { opcode: OpCode },

    #[error("The analysis state registered for {name} has a different type")]
    AnalysisStateMismatch { name: &'static str },
}

/// The broad classes into which execution errors fall.
///
/// Consumers of the interpreter decide how to react to an error from its class
/// alone.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorClass {
    /// The script or block is not well-formed.
    MalformedInput,

    /// A value that must fold was not a constant.
    NonConstantOperand,

    /// A length, offset, index or pointer that the concrete VM would also
    /// reject.
    RangeViolation,

    /// The instruction has no symbolic semantics.
    Unimplemented,

    /// A frozen compound was mutated.
    Immutability,

    /// Execution faulted for a reason the concrete VM would also fault for.
    Fault,

    /// A resource bound of the interpreter itself was hit.
    Limit,
}

impl Error {
    /// Gets the class of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Disassembly(_)
            | Self::TerminatorInsideBlock { .. }
            | Self::InvalidOperand { .. }
            | Self::UndefinedOpcode { .. } => ErrorClass::MalformedInput,
            Self::NonConstantOperand { .. } => ErrorClass::NonConstantOperand,
            Self::InstructionPointerOutOfBounds { .. }
            | Self::OutOfRange { .. }
            | Self::InvalidPointer { .. }
            | Self::ItemTooLarge { .. }
            | Self::SlotIndexOutOfRange { .. } => ErrorClass::RangeViolation,
            Self::UnimplementedOpcode { .. } | Self::UnsupportedSyscall { .. } => {
                ErrorClass::Unimplemented
            }
            Self::Immutable => ErrorClass::Immutability,
            Self::NoCurrentContext
            | Self::SlotAlreadyInitialized { .. }
            | Self::InvalidCast { .. }
            | Self::InvalidHeapHandle { .. }
            | Self::ReturnCountMismatch { .. }
            | Self::Aborted { .. }
            | Self::AssertionFailed { .. }
            | Self::UnhandledException
            | Self::InvalidTryState { .. }
            | Self::DuplicateHandler { .. }
            | Self::AnalysisStateMismatch { .. } => ErrorClass::Fault,
            Self::InvocationDepthExceeded { .. }
            | Self::InstructionLimitExceeded { .. }
            | Self::StoppedByWatchdog => ErrorClass::Limit,
        }
    }

    /// Checks whether this error means the interpreter could not resolve the
    /// instruction statically, rather than that the script is faulty.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::NonConstantOperand | ErrorClass::Unimplemented
        )
    }
}

/// An execution error with an associated location in the script.
pub type LocatedError = container::Located<Error>;

/// A container of execution errors used for aggregation of errors during
/// execution.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have execution errors.
pub type Result<T> = std::result::Result<T, LocatedError>;

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, instruction_pointer: u32) -> Self::Located {
        container::Located {
            location: instruction_pointer,
            payload:  self,
        }
    }
}

/// Drops the location of an error so that it can be relocated.
///
/// Opcode handlers report unlocated errors and the dispatcher attaches the
/// offset of the executing instruction, which is where any located error
/// raised by the handler already points.
impl From<LocatedError> for Error {
    fn from(value: LocatedError) -> Self {
        value.payload
    }
}

/// Decoding failures surface during execution at the offset they were found.
impl From<disassembly::LocatedError> for LocatedError {
    fn from(value: disassembly::LocatedError) -> Self {
        Self {
            location: value.location,
            payload:  Error::from(value.payload),
        }
    }
}
