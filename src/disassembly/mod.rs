//! This module contains the implementation of the [`Script`], the immutable
//! byte sequence that the interpreter executes, along with the decoded
//! [`Instruction`] view over it.

pub mod blocks;
pub mod builder;
pub mod instruction;

use std::sync::Arc;

use hex::FromHexError;

pub use self::{
    builder::{Emit, ScriptBuilder},
    instruction::Instruction,
};
use crate::error::{
    container::Locatable,
    disassembly::{self, Error},
};

/// A NeoVM script.
///
/// # Decoding
///
/// Instructions are decoded on demand with [`Self::instruction_at`], so a
/// script constructed with [`Self::new`] is not required to be well-formed.
/// The [`TryFrom`] conversions validate every instruction eagerly instead.
///
/// # Sharing
///
/// Cloning a script is cheap, as the bytes are shared between clones. This
/// allows every execution context to hold the script it executes.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Script {
    bytes: Arc<[u8]>,
}

impl Script {
    /// Wraps the provided `bytes` without validating them.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            bytes: bytes.into(),
        }
    }

    /// Gets the length of the script in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decodes the instruction at `offset`.
    ///
    /// Returns `Ok(None)` if `offset` is at or past the end of the script.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the instruction at `offset` cannot be decoded.
    pub fn instruction_at(&self, offset: u32) -> disassembly::Result<Option<Instruction>> {
        Instruction::decode(&self.bytes, offset)
    }

    /// Iterates over the instructions of the script from its start.
    ///
    /// The iterator ends after the first decoding error.
    #[must_use]
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            script: self,
            offset: Some(0),
        }
    }

    /// Checks that the entire script decodes.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] with the first decoding failure.
    pub fn validate(&self) -> disassembly::Result<()> {
        if u32::try_from(self.len()).is_err() {
            return Err(Error::ScriptTooLarge.locate(u32::MAX));
        }
        self.instructions().try_for_each(|instruction| instruction.map(|_| ()))
    }
}

/// An iterator over the instructions of a [`Script`].
#[derive(Clone, Debug)]
pub struct Instructions<'a> {
    script: &'a Script,
    offset: Option<u32>,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = disassembly::Result<Instruction>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset?;
        match self.script.instruction_at(offset) {
            Ok(Some(instruction)) => {
                self.offset = Some(instruction.next_offset());
                Some(Ok(instruction))
            }
            Ok(None) => {
                self.offset = None;
                None
            }
            Err(error) => {
                self.offset = None;
                Some(Err(error))
            }
        }
    }
}

/// A [`Script`] is usually created from a byte array, which is validated.
impl<'a> TryFrom<&'a [u8]> for Script {
    type Error = disassembly::LocatedError;

    fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
        let script = Self::new(value);
        script.validate()?;
        Ok(script)
    }
}

/// A [`Script`] can be created from a string as long as that string is a
/// hexadecimal encoding of the script bytes, with or without a `0x` prefix.
impl TryFrom<&str> for Script {
    type Error = disassembly::LocatedError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.strip_prefix("0x").unwrap_or(value);
        let bytes = match hex::decode(value) {
            Ok(b) => b,
            Err(e) => {
                let error = if let FromHexError::InvalidHexCharacter { c, index } = e {
                    let location =
                        u32::try_from(index).map_err(|_| Error::ScriptTooLarge.locate(u32::MAX))?;
                    Error::InvalidHexCharacter(c, index).locate(location)
                } else {
                    Error::InvalidHexLength.locate(0)
                };

                return Err(error);
            }
        };

        Self::try_from(bytes.as_slice())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        disassembly::Script,
        error::disassembly::Error,
        opcode::OpCode,
    };

    #[test]
    fn decodes_a_script_from_hex() -> anyhow::Result<()> {
        let script = Script::try_from("0x11600c0201024540")?;
        let opcodes = script
            .instructions()
            .map(|instruction| instruction.map(|i| i.opcode()))
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(
            opcodes,
            vec![
                OpCode::Push1,
                OpCode::StSFld0,
                OpCode::PushData1,
                OpCode::Drop,
                OpCode::Ret
            ]
        );

        Ok(())
    }

    #[test]
    fn rejects_invalid_hex() {
        let error = Script::try_from("11zz").expect_err("not hex");
        assert_eq!(error.payload, Error::InvalidHexCharacter('z', 2));

        let error = Script::try_from("111").expect_err("odd length");
        assert_eq!(error.payload, Error::InvalidHexLength);
    }

    #[test]
    fn validation_reports_the_first_bad_instruction() {
        let error = Script::try_from([0x11, 0x11, 0x42].as_slice()).expect_err("0x42 is unassigned");
        assert_eq!(error.location, 2);
        assert_eq!(error.payload, Error::UnknownOpcode { byte: 0x42 });
    }

    #[test]
    fn unvalidated_scripts_decode_lazily() -> anyhow::Result<()> {
        let script = Script::new(vec![0x11, 0x42]);
        assert_eq!(
            script.instruction_at(0)?.map(|i| i.opcode()),
            Some(OpCode::Push1)
        );
        assert!(script.instruction_at(1).is_err());
        assert!(script.instruction_at(2)?.is_none());

        Ok(())
    }
}
