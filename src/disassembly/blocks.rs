//! This module splits a script into basic blocks: maximal runs of
//! instructions with a single entry at the start and any transfer of control
//! only at the end.

use std::collections::BTreeSet;

use crate::{
    disassembly::{Instruction, Script},
    error::{
        container::Locatable,
        execution::{self, Error},
    },
};

/// A basic block of a script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BasicBlock {
    instructions: Vec<Instruction>,
}

impl BasicBlock {
    /// Creates a block from a run of consecutive instructions.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any instruction other than the last one ends a block.
    pub fn new(instructions: Vec<Instruction>) -> execution::Result<Self> {
        let body = instructions.len().saturating_sub(1);
        if let Some(inner) = instructions[..body]
            .iter()
            .find(|instruction| instruction.opcode().is_block_terminator())
        {
            return Err(Error::TerminatorInsideBlock {
                opcode: inner.opcode(),
            }
            .locate(inner.offset()));
        }

        Ok(Self { instructions })
    }

    /// Gets the offset of the first instruction in the block.
    #[must_use]
    pub fn start(&self) -> u32 {
        self.instructions.first().map_or(0, Instruction::offset)
    }

    /// Gets the offset immediately after the last instruction in the block.
    #[must_use]
    pub fn end(&self) -> u32 {
        self.instructions
            .last()
            .map_or(self.start(), Instruction::next_offset)
    }

    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Gets the instruction that ends the block, if the block ends in a
    /// transfer of control rather than falling through into the next one.
    #[must_use]
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions
            .last()
            .filter(|instruction| instruction.opcode().is_block_terminator())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Checks if `offset` is the start of an instruction in this block.
    #[must_use]
    pub fn contains(&self, offset: u32) -> bool {
        self.instructions
            .binary_search_by_key(&offset, Instruction::offset)
            .is_ok()
    }
}

/// Splits `script` into its basic blocks, in address order.
///
/// The block leaders are the start of the script, each of the `entries` (such
/// as method offsets), each constant branch target, and each instruction that
/// follows a block terminator. Leaders that do not fall on an instruction
/// boundary are ignored.
///
/// # Errors
///
/// Returns [`Err`] if the script does not decode.
pub fn basic_blocks(
    script: &Script,
    entries: impl IntoIterator<Item = u32>,
) -> execution::Result<Vec<BasicBlock>> {
    let instructions = script
        .instructions()
        .collect::<Result<Vec<_>, _>>()?;

    let mut leaders: BTreeSet<u32> = entries.into_iter().collect();
    leaders.insert(0);
    for instruction in &instructions {
        for target in instruction.branch_targets()? {
            if let Ok(target) = u32::try_from(target) {
                leaders.insert(target);
            }
        }
        if instruction.opcode().is_block_terminator() {
            leaders.insert(instruction.next_offset());
        }
    }

    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for instruction in instructions {
        if leaders.contains(&instruction.offset()) && !current.is_empty() {
            blocks.push(BasicBlock::new(std::mem::take(&mut current))?);
        }
        current.push(instruction);
    }
    if !current.is_empty() {
        blocks.push(BasicBlock::new(current)?);
    }

    Ok(blocks)
}

#[cfg(test)]
mod test {
    use crate::{
        disassembly::{
            blocks::{basic_blocks, BasicBlock},
            Instruction,
            ScriptBuilder,
        },
        error::execution::Error,
        opcode::OpCode,
    };

    #[test]
    fn splits_at_terminators_and_targets() -> anyhow::Result<()> {
        // 0: PUSH1, 1: JMPIF +4 -> 5, 3: PUSH2, 4: RET, 5: PUSH3, 6: RET
        let mut builder = ScriptBuilder::new();
        builder
            .emit(OpCode::Push1)
            .emit_with(OpCode::JmpIf, &[0x04])
            .emit(OpCode::Push2)
            .emit(OpCode::Ret)
            .emit(OpCode::Push3)
            .emit(OpCode::Ret);
        let script = builder.build();

        let blocks = basic_blocks(&script, [])?;
        let bounds: Vec<_> = blocks.iter().map(|b| (b.start(), b.end())).collect();
        assert_eq!(bounds, vec![(0, 3), (3, 5), (5, 7)]);
        assert_eq!(
            blocks[0].terminator().map(Instruction::opcode),
            Some(OpCode::JmpIf)
        );
        assert!(blocks[1].contains(4));
        assert!(!blocks[1].contains(5));

        Ok(())
    }

    #[test]
    fn entries_start_new_blocks() -> anyhow::Result<()> {
        let mut builder = ScriptBuilder::new();
        builder
            .emit(OpCode::Push1)
            .emit(OpCode::Push2)
            .emit(OpCode::Add)
            .emit(OpCode::Ret);
        let script = builder.build();

        let blocks = basic_blocks(&script, [2])?;
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].start(), 2);
        assert!(blocks[0].terminator().is_none());

        Ok(())
    }

    #[test]
    fn rejects_terminators_inside_a_block() -> anyhow::Result<()> {
        let instructions = vec![
            Instruction::new(OpCode::Ret, vec![])?.at(0),
            Instruction::new(OpCode::Push1, vec![])?.at(1),
        ];
        let error = BasicBlock::new(instructions).expect_err("RET is not last");
        assert_eq!(error.location, 0);
        assert_eq!(
            error.payload,
            Error::TerminatorInsideBlock {
                opcode: OpCode::Ret,
            }
        );

        Ok(())
    }
}
