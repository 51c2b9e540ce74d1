//! This module contains the error type that pertains to decoding NeoVM
//! scripts into instructions.

use thiserror::Error;

use crate::{error::container, opcode::OpCode};

/// Errors that occur while decoding the script bytes into
/// [`crate::disassembly::Instruction`]s, or while encoding instructions back
/// into bytes.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("The byte {byte:#04x} is not an assigned opcode")]
    UnknownOpcode { byte: u8 },

    #[error("The operand of {opcode} needs {needed} bytes but only {available} remain")]
    TruncatedOperand {
        opcode:    OpCode,
        needed:    usize,
        available: usize,
    },

    #[error("{opcode} takes an operand of {expected} bytes but {actual} were provided")]
    OperandSizeMismatch {
        opcode:   OpCode,
        expected: usize,
        actual:   usize,
    },

    #[error("An operand of {size} bytes cannot be encoded by {opcode}")]
    OperandTooLarge { opcode: OpCode, size: usize },

    #[error("The provided hexadecimal input had an odd length")]
    InvalidHexLength,

    #[error("Encountered invalid hex char {_0:?} at index {_1:?}")]
    InvalidHexCharacter(char, usize),

    #[error("The length of the script exceeded {}", u32::MAX)]
    ScriptTooLarge,
}

/// A disassembly error with an associated location in the script.
pub type LocatedError = container::Located<Error>;

/// The result type for functions that may return disassembly errors.
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
