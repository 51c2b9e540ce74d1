//! This module contains the primary error type for the library's interface.
//! It also re-exports the more specific error types that are
//! subsystem-specific.

pub mod container;
pub mod disassembly;
pub mod execution;

use thiserror::Error;

/// The interface result type for the library.
///
/// Any function considered to be part of the public interface of the library
/// should return this result type. Subsystems return the more-specific child
/// error types as appropriate.
pub type Result<T> = std::result::Result<T, Errors>;

/// The interface error type for the library.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Errors that come from decoding the script.
    #[error(transparent)]
    Disassembly(#[from] disassembly::Error),

    /// Errors from the symbolic interpreter.
    #[error(transparent)]
    Execution(#[from] execution::Error),

    /// The contract manifest could not be read or written.
    #[error("Invalid manifest: {_0}")]
    Manifest(String),

    /// An unknown error, represented as a string.
    #[error("Unknown Error: {_0:?}")]
    Other(String),
}

impl Error {
    /// Constructs an unknown error with the provided `message`.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Manifest(value.to_string())
    }
}

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

/// A library error with an associated script location.
pub type LocatedError = container::Located<Error>;

/// A container of errors that may occur in the library.
pub type Errors = container::Errors<LocatedError>;

impl From<disassembly::LocatedError> for LocatedError {
    fn from(value: disassembly::LocatedError) -> Self {
        value.map(Error::from)
    }
}

impl From<disassembly::LocatedError> for Errors {
    fn from(value: disassembly::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}

impl From<execution::LocatedError> for LocatedError {
    fn from(value: execution::LocatedError) -> Self {
        value.map(Error::from)
    }
}

impl From<execution::LocatedError> for Errors {
    fn from(value: execution::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}

/// Manifest errors have no script location, so they are reported at offset
/// zero.
impl From<serde_json::Error> for Errors {
    fn from(value: serde_json::Error) -> Self {
        LocatedError {
            location: 0,
            payload:  value.into(),
        }
        .into()
    }
}
