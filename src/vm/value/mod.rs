//! This module contains the value model of the symbolic interpreter: the
//! [`StackItem`]s that live on the evaluation stack and in slots.
//!
//! # Concrete and Symbolic Items
//!
//! An item is either _known_, meaning the analysis knows exactly what value it
//! would hold at runtime, or _symbolic_, meaning it stands in for whatever the
//! value would be at runtime. Operations that must fold their operands use
//! [`StackItem::known`] to get at the concrete value, and report a
//! non-constant operand when there is none.
//!
//! Compound items (buffers, arrays and structs) live in the
//! [`heap::Heap`] and are referred to by [`heap::HeapRef`], which makes
//! reference identity explicit and lets self-referential values exist.

pub mod heap;
pub mod symbolic;

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

use num_bigint::BigInt;
use num_traits::{One, Zero};

pub use self::{
    heap::{Heap, HeapObject, HeapRef},
    symbolic::{SymbolicVariable, Unknown, UnknownOrigin},
};
use crate::{constant::PUSHINT_MAX_BYTES, error::execution::Error};

/// The canonical `true` item.
pub const TRUE: StackItem = StackItem::Boolean(true);

/// The canonical `false` item.
pub const FALSE: StackItem = StackItem::Boolean(false);

/// The canonical `null` item.
pub const NULL: StackItem = StackItem::Null;

/// The type tags of NeoVM stack items, with their encoding as an operand of
/// `NEWARRAY_T`, `ISTYPE` and `CONVERT`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum StackItemType {
    Any              = 0x00,
    Pointer          = 0x10,
    Boolean          = 0x20,
    Integer          = 0x21,
    ByteString       = 0x28,
    Buffer           = 0x30,
    Array            = 0x40,
    Struct           = 0x41,
    Map              = 0x48,
    InteropInterface = 0x60,
}

impl StackItemType {
    /// Checks if items of this type are compounds stored on the heap.
    #[must_use]
    pub fn is_compound(self) -> bool {
        matches!(self, Self::Array | Self::Struct | Self::Map)
    }
}

impl TryFrom<u8> for StackItemType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Self::Any,
            0x10 => Self::Pointer,
            0x20 => Self::Boolean,
            0x21 => Self::Integer,
            0x28 => Self::ByteString,
            0x30 => Self::Buffer,
            0x40 => Self::Array,
            0x41 => Self::Struct,
            0x48 => Self::Map,
            0x60 => Self::InteropInterface,
            other => return Err(other),
        })
    }
}

impl Display for StackItemType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A value on the evaluation stack or in a slot.
///
/// The ordering is arbitrary but total, so that items can key ordered maps and
/// reports are deterministic.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StackItem {
    Null,
    Boolean(bool),
    Integer(BigInt),
    ByteString(Vec<u8>),

    /// A position in the script, as pushed by `PUSHA`.
    Pointer(u32),

    /// A mutable byte array on the heap.
    Buffer(HeapRef),

    /// An array on the heap, shared by reference.
    Array(HeapRef),

    /// A struct on the heap, copied by value when stored into a compound.
    Struct(HeapRef),

    /// A value the analysis has no information about.
    Unknown(Unknown),

    /// A fully concrete value produced by a constant push or by folding
    /// constants.
    Const(Box<StackItem>),

    /// An unresolved read or an un-foldable computation, tagged with where it
    /// came from.
    Variable(Arc<SymbolicVariable>),
}

impl StackItem {
    /// Wraps a concrete `item` as a constant.
    ///
    /// Wrapping an item that is already constant or symbolic returns it as is.
    #[must_use]
    pub fn constant(item: StackItem) -> Self {
        match item {
            Self::Const(_) | Self::Unknown(_) | Self::Variable(_) => item,
            other => Self::Const(Box::new(other)),
        }
    }

    /// Creates a constant integer item.
    #[must_use]
    pub fn integer(value: impl Into<BigInt>) -> Self {
        Self::constant(Self::Integer(value.into()))
    }

    /// Creates a constant boolean item.
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::constant(Self::Boolean(value))
    }

    /// Creates a constant byte string item.
    #[must_use]
    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        Self::constant(Self::ByteString(value.into()))
    }

    /// Creates a symbolic variable item with the provided provenance.
    #[must_use]
    pub fn variable(variable: SymbolicVariable) -> Self {
        Self::Variable(Arc::new(variable))
    }

    /// Creates a fresh unknown item of type `ty`.
    #[must_use]
    pub fn unknown(ty: StackItemType) -> Self {
        Self::Unknown(Unknown::fresh(ty))
    }

    /// Gets the concrete value of the item, looking through constant
    /// wrappers, or [`None`] if the item is symbolic.
    #[must_use]
    pub fn known(&self) -> Option<&StackItem> {
        match self {
            Self::Const(inner) => inner.known(),
            Self::Unknown(_) | Self::Variable(_) => None,
            concrete => Some(concrete),
        }
    }

    #[must_use]
    pub fn is_symbolic(&self) -> bool {
        self.known().is_none()
    }

    /// Gets the type of the item.
    ///
    /// Unknown items report their inferred type, and symbolic variables report
    /// [`StackItemType::Any`].
    #[must_use]
    pub fn item_type(&self) -> StackItemType {
        match self {
            Self::Null => StackItemType::Any,
            Self::Boolean(_) => StackItemType::Boolean,
            Self::Integer(_) => StackItemType::Integer,
            Self::ByteString(_) => StackItemType::ByteString,
            Self::Pointer(_) => StackItemType::Pointer,
            Self::Buffer(_) => StackItemType::Buffer,
            Self::Array(_) => StackItemType::Array,
            Self::Struct(_) => StackItemType::Struct,
            Self::Unknown(unknown) => unknown.ty(),
            Self::Const(inner) => inner.item_type(),
            Self::Variable(_) => StackItemType::Any,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.known(), Some(Self::Null))
    }

    /// Gets the heap handle of a compound item.
    #[must_use]
    pub fn heap_ref(&self) -> Option<HeapRef> {
        match self.known()? {
            Self::Buffer(handle) | Self::Array(handle) | Self::Struct(handle) => Some(*handle),
            _ => None,
        }
    }

    /// Coerces the item to a boolean following the VM's truthiness rules.
    ///
    /// Returns `Ok(None)` for symbolic items.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a byte string is too long to be interpreted as an
    /// integer.
    pub fn to_boolean(&self) -> Result<Option<bool>, Error> {
        let Some(known) = self.known() else {
            return Ok(None);
        };
        let value = match known {
            Self::Null => false,
            Self::Boolean(value) => *value,
            Self::Integer(value) => !value.is_zero(),
            Self::ByteString(bytes) => {
                if bytes.len() > PUSHINT_MAX_BYTES {
                    return Err(Error::InvalidCast {
                        from: StackItemType::ByteString,
                        to:   StackItemType::Boolean,
                    });
                }
                bytes.iter().any(|byte| *byte != 0)
            }
            _ => true,
        };

        Ok(Some(value))
    }

    /// Interprets the item as an integer.
    ///
    /// Returns `Ok(None)` for symbolic items.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the concrete item has no integer interpretation.
    pub fn to_integer(&self) -> Result<Option<BigInt>, Error> {
        let Some(known) = self.known() else {
            return Ok(None);
        };
        let value = match known {
            Self::Integer(value) => value.clone(),
            Self::Boolean(value) => {
                if *value {
                    BigInt::one()
                } else {
                    BigInt::zero()
                }
            }
            Self::ByteString(bytes) if bytes.len() <= PUSHINT_MAX_BYTES => {
                BigInt::from_signed_bytes_le(bytes)
            }
            other => {
                return Err(Error::InvalidCast {
                    from: other.item_type(),
                    to:   StackItemType::Integer,
                })
            }
        };

        Ok(Some(value))
    }
}

impl Default for StackItem {
    fn default() -> Self {
        NULL
    }
}

impl Display for StackItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::ByteString(bytes) => write!(f, "0x{}", hex::encode(bytes)),
            Self::Pointer(position) => write!(f, "&{position:#06x}"),
            Self::Buffer(handle) => write!(f, "buffer{handle}"),
            Self::Array(handle) => write!(f, "array{handle}"),
            Self::Struct(handle) => write!(f, "struct{handle}"),
            Self::Unknown(unknown) => write!(f, "{unknown}"),
            Self::Const(inner) => write!(f, "{inner}"),
            Self::Variable(variable) => write!(f, "{variable}"),
        }
    }
}

/// Converts an integer to its minimal two's-complement little-endian bytes,
/// with zero encoding as the empty sequence.
#[must_use]
pub fn integer_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        Vec::new()
    } else {
        value.to_signed_bytes_le()
    }
}
