//! This module contains the symbolic variants of stack items: values whose
//! concrete identity is not determined at analysis time.

use std::fmt::{Display, Formatter};

use itertools::Itertools;
use uuid::Uuid;

use crate::{
    opcode::OpCode,
    vm::{
        state::slot::SlotKind,
        value::{StackItem, StackItemType},
    },
};

/// Where an [`Unknown`] came from.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum UnknownOrigin {
    /// The value sat below the observed top of the evaluation stack when
    /// analysis began; the index counts how many such values have been
    /// materialized before this one.
    Extension(usize),

    /// The value is the result of an operation the analysis could not carry
    /// out.
    Fresh(Uuid),
}

/// A value whose concrete identity is not determined at analysis time,
/// tagged with a best-effort type.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Unknown {
    ty:     StackItemType,
    origin: UnknownOrigin,
}

impl Unknown {
    /// Creates the unknown materialized for the `index`th read past the
    /// bottom of an evaluation stack.
    #[must_use]
    pub fn extension(index: usize) -> Self {
        Self {
            ty:     StackItemType::Any,
            origin: UnknownOrigin::Extension(index),
        }
    }

    /// Creates a new unknown of type `ty`, distinct from every other unknown.
    #[must_use]
    pub fn fresh(ty: StackItemType) -> Self {
        Self {
            ty,
            origin: UnknownOrigin::Fresh(Uuid::new_v4()),
        }
    }

    #[must_use]
    pub fn ty(&self) -> StackItemType {
        self.ty
    }

    #[must_use]
    pub fn origin(&self) -> UnknownOrigin {
        self.origin
    }

    /// Gets the extension index if this unknown was materialized by the
    /// evaluation stack.
    #[must_use]
    pub fn extension_index(&self) -> Option<usize> {
        match self.origin {
            UnknownOrigin::Extension(index) => Some(index),
            UnknownOrigin::Fresh(_) => None,
        }
    }
}

impl Display for Unknown {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.origin {
            UnknownOrigin::Extension(index) => write!(f, "?{index}: {}", self.ty),
            UnknownOrigin::Fresh(id) => write!(f, "?{}: {}", id.simple(), self.ty),
        }
    }
}

/// An opaque reference to an unresolved value, tagged by its provenance.
///
/// Equality is structural over the provenance, so two reads of the same slot
/// or storage key within one run are the same variable.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SymbolicVariable {
    /// The value held by a slot before the analyzed code ran.
    Slot { kind: SlotKind, index: usize },

    /// The value held in contract storage under `key`.
    Storage { key: StackItem },

    /// The result of `opcode` applied to operands it could not fold.
    Derived {
        opcode:   OpCode,
        operands: Vec<StackItem>,
    },

    /// The depth of the evaluation stack, which is not known when analysis
    /// begins mid-execution.
    StackDepth,
}

impl Display for SymbolicVariable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slot { kind, index } => write!(f, "{kind}[{index}]"),
            Self::Storage { key } => write!(f, "storage[{key}]"),
            Self::Derived { opcode, operands } => {
                write!(f, "{opcode}({})", operands.iter().join(", "))
            }
            Self::StackDepth => write!(f, "depth"),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        opcode::OpCode,
        vm::{
            state::slot::SlotKind,
            value::{StackItem, StackItemType, SymbolicVariable, Unknown},
        },
    };

    #[test]
    fn fresh_unknowns_are_distinct() {
        let a = Unknown::fresh(StackItemType::Boolean);
        let b = Unknown::fresh(StackItemType::Boolean);
        assert_ne!(a, b);
        assert!(a.extension_index().is_none());
    }

    #[test]
    fn extension_unknowns_are_identified_by_index() {
        assert_eq!(Unknown::extension(3), Unknown::extension(3));
        assert_ne!(Unknown::extension(3), Unknown::extension(4));
        assert_eq!(Unknown::extension(3).extension_index(), Some(3));
    }

    #[test]
    fn variables_compare_by_provenance() {
        let a = SymbolicVariable::Slot {
            kind:  SlotKind::Static,
            index: 2,
        };
        let b = SymbolicVariable::Slot {
            kind:  SlotKind::Static,
            index: 2,
        };
        assert_eq!(a, b);

        let derived = SymbolicVariable::Derived {
            opcode:   OpCode::NewBuffer,
            operands: vec![StackItem::variable(a)],
        };
        assert_eq!(derived.to_string(), "NEWBUFFER(static[2])");
    }
}
