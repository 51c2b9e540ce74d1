//! This module contains the per-method results of the read/write analysis.

use std::fmt::{Display, Formatter};

use crate::{error::execution::LocatedError, vm::state::tracking::Access};

/// Why the analysis of a method stopped advancing its entry offset.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StopReason {
    /// The next instruction has an effect that cannot be skipped.
    EffectfulInstruction,

    /// The next instruction transfers control.
    BlockBoundary,

    /// The next instruction could not be executed statically.
    Unresolved,

    /// The method returned without reaching an effectful instruction, so it is
    /// left as it is.
    Halted,

    /// The method faults or exceeded a limit of the interpreter, so it is left
    /// as it is.
    Aborted,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::EffectfulInstruction => "effectful instruction",
            Self::BlockBoundary => "block boundary",
            Self::Unresolved => "unresolved instruction",
            Self::Halted => "halted",
            Self::Aborted => "aborted",
        };
        write!(f, "{name}")
    }
}

/// The result of analyzing a single method.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MethodReport {
    pub name: String,

    /// The entry offset declared by the manifest before the analysis.
    pub original_offset: u32,

    /// The entry offset after the analysis.
    pub new_offset: u32,

    pub reason: StopReason,

    /// The locations read by the skipped prefix, in sorted order.
    pub reads: Vec<Access>,

    /// The locations written by the skipped prefix, in sorted order.
    pub writes: Vec<Access>,

    /// The interpreter error that ended the scan, for methods that stopped
    /// because an instruction was unresolved or the method was aborted.
    pub error: Option<LocatedError>,
}

impl MethodReport {
    /// Checks whether the analysis moved the method's entry offset.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.new_offset != self.original_offset
    }

    /// Gets the number of script bytes skipped by the new entry offset.
    #[must_use]
    pub fn skipped(&self) -> u32 {
        self.new_offset.saturating_sub(self.original_offset)
    }
}
