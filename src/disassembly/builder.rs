//! This module contains a builder for assembling scripts, used to construct
//! scripts programmatically and in tests.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::{
    constant::PUSHINT_MAX_BYTES,
    disassembly::{Instruction, Script},
    error::{container::Locatable, disassembly},
    opcode::OpCode,
    vm::jump_table::interop::interop_hash,
};

/// A type that can be written into a script.
pub trait Emit {
    /// Appends the encoding of `self` to `bytes`.
    fn emit_into(&self, bytes: &mut Vec<u8>);
}

/// A bare opcode encodes as its byte alone.
impl Emit for OpCode {
    fn emit_into(&self, bytes: &mut Vec<u8>) {
        bytes.push(self.byte());
    }
}

impl Emit for Instruction {
    fn emit_into(&self, bytes: &mut Vec<u8>) {
        bytes.extend(self.encode());
    }
}

/// An incremental builder for [`Script`]s.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the offset at which the next emitted instruction will be placed.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.bytes.len()
    }

    /// Emits any item that can be encoded into a script.
    pub fn emit_item<T: Emit + ?Sized>(&mut self, item: &T) -> &mut Self {
        item.emit_into(&mut self.bytes);
        self
    }

    /// Emits `opcode` without an operand.
    pub fn emit(&mut self, opcode: OpCode) -> &mut Self {
        self.emit_item(&opcode)
    }

    /// Emits `opcode` followed by the raw `operand` bytes.
    ///
    /// No validation is performed, which allows constructing malformed
    /// scripts deliberately.
    pub fn emit_with(&mut self, opcode: OpCode, operand: &[u8]) -> &mut Self {
        self.bytes.push(opcode.byte());
        self.bytes.extend_from_slice(operand);
        self
    }

    /// Emits the shortest instruction that pushes the integer `value`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the value does not fit in 256 bits.
    pub fn emit_push_int(&mut self, value: impl Into<BigInt>) -> disassembly::Result<&mut Self> {
        let value = value.into();
        if let Some(small) = value.to_i8().filter(|v| (-1..=16).contains(v)) {
            // The range check above makes the shifted value a valid opcode.
            #[allow(clippy::cast_sign_loss)]
            let byte = (i16::from(OpCode::Push0.byte()) + i16::from(small)) as u8;
            return Ok(self.emit_item(&OpCode::try_from(byte).locate(0)?));
        }

        let mut bytes = value.to_signed_bytes_le();
        let (opcode, width) = match bytes.len() {
            1 => (OpCode::PushInt8, 1),
            2 => (OpCode::PushInt16, 2),
            3..=4 => (OpCode::PushInt32, 4),
            5..=8 => (OpCode::PushInt64, 8),
            9..=16 => (OpCode::PushInt128, 16),
            17..=PUSHINT_MAX_BYTES => (OpCode::PushInt256, PUSHINT_MAX_BYTES),
            size => {
                return Err(disassembly::Error::OperandTooLarge {
                    opcode: OpCode::PushInt256,
                    size,
                }
                .locate(0))
            }
        };
        let padding = if value.sign() == num_bigint::Sign::Minus {
            0xff
        } else {
            0x00
        };
        bytes.resize(width, padding);

        Ok(self.emit_with(opcode, &bytes))
    }

    /// Emits `PUSHT` or `PUSHF`.
    pub fn emit_push_bool(&mut self, value: bool) -> &mut Self {
        self.emit(if value { OpCode::PushT } else { OpCode::PushF })
    }

    /// Emits the shortest `PUSHDATA` instruction carrying `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the data is too large to be encoded.
    pub fn emit_push_data(&mut self, data: &[u8]) -> disassembly::Result<&mut Self> {
        let opcode = if data.len() <= 0xff {
            OpCode::PushData1
        } else if data.len() <= 0xffff {
            OpCode::PushData2
        } else {
            OpCode::PushData4
        };
        let instruction = Instruction::new(opcode, data.to_vec())?;

        Ok(self.emit_item(&instruction))
    }

    /// Emits a `SYSCALL` to the interop service called `name`.
    pub fn emit_syscall(&mut self, name: &str) -> &mut Self {
        self.emit_with(OpCode::Syscall, &interop_hash(name).to_le_bytes())
    }

    /// Consumes the builder's contents into a script, leaving it empty.
    pub fn build(&mut self) -> Script {
        Script::new(std::mem::take(&mut self.bytes))
    }
}

#[cfg(test)]
mod test {
    use num_bigint::BigInt;

    use crate::{
        disassembly::{Instruction, ScriptBuilder},
        opcode::OpCode,
    };

    fn pushed(value: i64) -> anyhow::Result<Vec<u8>> {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_int(value)?;
        Ok(builder.build().as_bytes().to_vec())
    }

    #[test]
    fn small_integers_use_single_byte_pushes() -> anyhow::Result<()> {
        assert_eq!(pushed(-1)?, vec![OpCode::PushM1.byte()]);
        assert_eq!(pushed(0)?, vec![OpCode::Push0.byte()]);
        assert_eq!(pushed(16)?, vec![OpCode::Push16.byte()]);

        Ok(())
    }

    #[test]
    fn larger_integers_use_the_narrowest_width() -> anyhow::Result<()> {
        assert_eq!(pushed(17)?, vec![0x00, 0x11]);
        assert_eq!(pushed(-2)?, vec![0x00, 0xfe]);
        assert_eq!(pushed(128)?, vec![0x01, 0x80, 0x00]);
        assert_eq!(pushed(-70_000)?, vec![0x02, 0x90, 0xee, 0xfe, 0xff]);

        Ok(())
    }

    #[test]
    fn oversized_integers_are_rejected() {
        let mut builder = ScriptBuilder::new();
        let huge = BigInt::from(1) << 300;
        assert!(builder.emit_push_int(huge).is_err());
    }

    #[test]
    fn data_uses_the_narrowest_prefix() -> anyhow::Result<()> {
        let mut builder = ScriptBuilder::new();
        builder.emit_push_data(&[0xab; 3])?;
        builder.emit_push_data(&[0xcd; 300])?;
        let script = builder.build();

        let first = script.instruction_at(0)?.expect("first push");
        assert_eq!(first.opcode(), OpCode::PushData1);
        let second = script.instruction_at(first.next_offset())?.expect("second push");
        assert_eq!(second.opcode(), OpCode::PushData2);
        assert_eq!(second.operand().len(), 300);

        Ok(())
    }

    #[test]
    fn the_macro_matches_the_builder() -> anyhow::Result<()> {
        let from_macro = crate::script![
            OpCode::Push1,
            Instruction::new(OpCode::StSFld, vec![0x00])?,
            OpCode::Ret
        ];
        let mut builder = ScriptBuilder::new();
        builder
            .emit(OpCode::Push1)
            .emit_with(OpCode::StSFld, &[0x00])
            .emit(OpCode::Ret);
        assert_eq!(from_macro, builder.build());

        Ok(())
    }
}
