//! This module contains the decoded view of a single instruction in a script.

use crate::{
    error::{
        container::Locatable,
        disassembly::{self, Error},
        execution,
    },
    opcode::{OpCode, OperandSize},
};

/// A single decoded instruction.
///
/// The operand excludes the length prefix of the `PUSHDATA` family; that
/// prefix is accounted for in [`Self::size`] and reproduced by
/// [`Self::encode`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Instruction {
    offset:  u32,
    opcode:  OpCode,
    operand: Vec<u8>,
    size:    u32,
}

impl Instruction {
    /// Creates a new instruction for `opcode` with the provided `operand`,
    /// positioned at offset zero.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand does not fit the opcode's operand layout.
    pub fn new(opcode: OpCode, operand: Vec<u8>) -> disassembly::Result<Self> {
        let prefix = match opcode.operand_size() {
            OperandSize::Fixed(expected) => {
                if operand.len() != expected {
                    return Err(Error::OperandSizeMismatch {
                        opcode,
                        expected,
                        actual: operand.len(),
                    }
                    .locate(0));
                }
                0
            }
            OperandSize::Prefixed(prefix) => {
                let capacity = if prefix >= 4 {
                    u32::MAX as usize
                } else {
                    (1usize << (prefix * 8)) - 1
                };
                if operand.len() > capacity {
                    return Err(Error::OperandTooLarge {
                        opcode,
                        size: operand.len(),
                    }
                    .locate(0));
                }
                prefix
            }
        };
        let size = u32::try_from(1 + prefix + operand.len())
            .map_err(|_| Error::ScriptTooLarge.locate(0))?;

        Ok(Self {
            offset: 0,
            opcode,
            operand,
            size,
        })
    }

    /// Decodes the instruction starting at `offset` in `script`.
    ///
    /// Returns `Ok(None)` when `offset` is at or past the end of the script.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the byte at `offset` is not an opcode, or if its
    /// operand would extend past the end of the script.
    pub fn decode(script: &[u8], offset: u32) -> disassembly::Result<Option<Self>> {
        let start = offset as usize;
        let Some(&byte) = script.get(start) else {
            return Ok(None);
        };
        let opcode = OpCode::try_from(byte).locate(offset)?;

        let mut cursor = start + 1;
        let length = match opcode.operand_size() {
            OperandSize::Fixed(length) => length,
            OperandSize::Prefixed(prefix) => {
                let mut buffer = [0u8; 4];
                buffer[..prefix].copy_from_slice(read_operand(script, cursor, prefix, opcode, offset)?);
                cursor += prefix;
                u32::from_le_bytes(buffer) as usize
            }
        };
        let operand = read_operand(script, cursor, length, opcode, offset)?.to_vec();
        let size = u32::try_from(cursor + length - start)
            .map_err(|_| Error::ScriptTooLarge.locate(offset))?;

        Ok(Some(Self {
            offset,
            opcode,
            operand,
            size,
        }))
    }

    /// Gets the offset of the instruction in its script.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    #[must_use]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    #[must_use]
    pub fn operand(&self) -> &[u8] {
        &self.operand
    }

    /// Gets the total number of bytes the instruction occupies.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Gets the offset of the instruction immediately following this one.
    #[must_use]
    pub fn next_offset(&self) -> u32 {
        self.offset.saturating_add(self.size)
    }

    /// Encodes the instruction back into its script bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size as usize);
        bytes.push(self.opcode.byte());
        if let OperandSize::Prefixed(prefix) = self.opcode.operand_size() {
            // Construction guarantees the length fits in the prefix.
            #[allow(clippy::cast_possible_truncation)]
            let length = self.operand.len() as u32;
            bytes.extend_from_slice(&length.to_le_bytes()[..prefix]);
        }
        bytes.extend_from_slice(&self.operand);
        bytes
    }

    /// Reads the first operand byte as a signed offset or value.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is too short.
    pub fn token_i8(&self) -> execution::Result<i8> {
        self.token_bytes::<1>(0).map(i8::from_le_bytes)
    }

    /// Reads the second operand byte as a signed offset.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is too short.
    pub fn token_i8_1(&self) -> execution::Result<i8> {
        self.token_bytes::<1>(1).map(i8::from_le_bytes)
    }

    /// Reads the first operand byte.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is too short.
    pub fn token_u8(&self) -> execution::Result<u8> {
        self.token_bytes::<1>(0).map(u8::from_le_bytes)
    }

    /// Reads the second operand byte.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is too short.
    pub fn token_u8_1(&self) -> execution::Result<u8> {
        self.token_bytes::<1>(1).map(u8::from_le_bytes)
    }

    /// Reads the first two operand bytes as a little-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is too short.
    pub fn token_u16(&self) -> execution::Result<u16> {
        self.token_bytes::<2>(0).map(u16::from_le_bytes)
    }

    /// Reads the first four operand bytes as a little-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is too short.
    pub fn token_i32(&self) -> execution::Result<i32> {
        self.token_bytes::<4>(0).map(i32::from_le_bytes)
    }

    /// Reads operand bytes four to eight as a little-endian `i32`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is too short.
    pub fn token_i32_1(&self) -> execution::Result<i32> {
        self.token_bytes::<4>(4).map(i32::from_le_bytes)
    }

    /// Reads the first four operand bytes as a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is too short.
    pub fn token_u32(&self) -> execution::Result<u32> {
        self.token_bytes::<4>(0).map(u32::from_le_bytes)
    }

    /// Computes the absolute addresses this instruction may transfer control
    /// to, other than falling through to the next instruction.
    ///
    /// For `TRY` a zero catch or finally offset means the handler is absent and
    /// is not reported. `PUSHA` reports the address of the pushed pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is too short for the opcode.
    pub fn branch_targets(&self) -> execution::Result<Vec<i64>> {
        let base = i64::from(self.offset);
        let targets = match self.opcode {
            OpCode::Jmp
            | OpCode::JmpIf
            | OpCode::JmpIfNot
            | OpCode::JmpEq
            | OpCode::JmpNe
            | OpCode::JmpGt
            | OpCode::JmpGe
            | OpCode::JmpLt
            | OpCode::JmpLe
            | OpCode::Call
            | OpCode::EndTry => vec![base + i64::from(self.token_i8()?)],
            OpCode::JmpL
            | OpCode::JmpIfL
            | OpCode::JmpIfNotL
            | OpCode::JmpEqL
            | OpCode::JmpNeL
            | OpCode::JmpGtL
            | OpCode::JmpGeL
            | OpCode::JmpLtL
            | OpCode::JmpLeL
            | OpCode::CallL
            | OpCode::EndTryL
            | OpCode::PushA => vec![base + i64::from(self.token_i32()?)],
            OpCode::Try => [self.token_i8()?, self.token_i8_1()?]
                .into_iter()
                .filter(|offset| *offset != 0)
                .map(|offset| base + i64::from(offset))
                .collect(),
            OpCode::TryL => [self.token_i32()?, self.token_i32_1()?]
                .into_iter()
                .filter(|offset| *offset != 0)
                .map(|offset| base + i64::from(offset))
                .collect(),
            _ => vec![],
        };

        Ok(targets)
    }

    /// Returns a copy of this instruction positioned at `offset`.
    #[must_use]
    pub fn at(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    fn token_bytes<const N: usize>(&self, from: usize) -> execution::Result<[u8; N]> {
        self.operand
            .get(from..from + N)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| {
                execution::Error::InvalidOperand {
                    opcode: self.opcode,
                }
                .locate(self.offset)
            })
    }
}

/// Reads `needed` bytes of the operand of the `opcode` at `offset`, starting at
/// `from`.
fn read_operand(
    script: &[u8],
    from: usize,
    needed: usize,
    opcode: OpCode,
    offset: u32,
) -> disassembly::Result<&[u8]> {
    script.get(from..from + needed).ok_or_else(|| {
        Error::TruncatedOperand {
            opcode,
            needed,
            available: script.len().saturating_sub(from),
        }
        .locate(offset)
    })
}
