//! This module contains the arena that owns every compound item (buffers,
//! arrays and structs) created during interpretation.
//!
//! Stack items refer to compounds by [`HeapRef`], so two items are the same
//! compound exactly when their handles are equal. Cycles, such as an array
//! that contains itself, are just handles that point back into the arena.

use std::{
    collections::{HashMap, HashSet},
    fmt::{Display, Formatter},
};

use num_bigint::BigInt;

use crate::{
    constant::PUSHINT_MAX_BYTES,
    error::execution::Error,
    vm::value::{integer_bytes, StackItem, StackItemType},
};

/// A handle to a compound item in the [`Heap`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HeapRef(usize);

impl HeapRef {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for HeapRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A compound item stored in the heap.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HeapObject {
    Buffer(Vec<u8>),
    Array {
        items:     Vec<StackItem>,
        read_only: bool,
    },
    Struct {
        items:     Vec<StackItem>,
        read_only: bool,
    },
}

impl HeapObject {
    #[must_use]
    pub fn item_type(&self) -> StackItemType {
        match self {
            Self::Buffer(_) => StackItemType::Buffer,
            Self::Array { .. } => StackItemType::Array,
            Self::Struct { .. } => StackItemType::Struct,
        }
    }

    /// Checks if the object has been frozen against in-place mutation.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        match self {
            Self::Buffer(_) => false,
            Self::Array { read_only, .. } | Self::Struct { read_only, .. } => *read_only,
        }
    }

    /// Gets the number of elements (or bytes, for a buffer) in the object.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Buffer(bytes) => bytes.len(),
            Self::Array { items, .. } | Self::Struct { items, .. } => items.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The arena of compound items for one shared execution state.
///
/// Objects are never freed; the heap lives exactly as long as the analysis
/// that created it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of objects ever allocated in the heap.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Places `object` in the heap and returns its handle.
    pub fn allocate(&mut self, object: HeapObject) -> HeapRef {
        self.objects.push(object);
        HeapRef(self.objects.len() - 1)
    }

    /// Allocates a buffer holding `bytes`.
    pub fn new_buffer(&mut self, bytes: Vec<u8>) -> StackItem {
        StackItem::Buffer(self.allocate(HeapObject::Buffer(bytes)))
    }

    /// Allocates a mutable array holding `items`.
    pub fn new_array(&mut self, items: Vec<StackItem>) -> StackItem {
        StackItem::Array(self.allocate(HeapObject::Array {
            items,
            read_only: false,
        }))
    }

    /// Allocates a mutable struct holding `items`.
    pub fn new_struct(&mut self, items: Vec<StackItem>) -> StackItem {
        StackItem::Struct(self.allocate(HeapObject::Struct {
            items,
            read_only: false,
        }))
    }

    /// Gets the object behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the handle was not allocated by this heap.
    pub fn get(&self, handle: HeapRef) -> Result<&HeapObject, Error> {
        self.objects
            .get(handle.0)
            .ok_or(Error::InvalidHeapHandle { handle: handle.0 })
    }

    fn get_mut(&mut self, handle: HeapRef) -> Result<&mut HeapObject, Error> {
        self.objects
            .get_mut(handle.0)
            .ok_or(Error::InvalidHeapHandle { handle: handle.0 })
    }

    /// Gets the elements of the array or struct behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the handle is invalid or refers to a buffer.
    pub fn items(&self, handle: HeapRef) -> Result<&[StackItem], Error> {
        match self.get(handle)? {
            HeapObject::Array { items, .. } | HeapObject::Struct { items, .. } => Ok(items),
            HeapObject::Buffer(_) => Err(Error::InvalidCast {
                from: StackItemType::Buffer,
                to:   StackItemType::Array,
            }),
        }
    }

    /// Gets the elements of the array or struct behind `handle` for in-place
    /// mutation.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the handle is invalid, refers to a buffer, or the
    /// compound is read-only.
    pub fn items_mut(&mut self, handle: HeapRef) -> Result<&mut Vec<StackItem>, Error> {
        match self.get_mut(handle)? {
            HeapObject::Array {
                read_only: true, ..
            }
            | HeapObject::Struct {
                read_only: true, ..
            } => Err(Error::Immutable),
            HeapObject::Array { items, .. } | HeapObject::Struct { items, .. } => Ok(items),
            HeapObject::Buffer(_) => Err(Error::InvalidCast {
                from: StackItemType::Buffer,
                to:   StackItemType::Array,
            }),
        }
    }

    /// Gets the bytes of the buffer behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the handle is invalid or does not refer to a buffer.
    pub fn buffer(&self, handle: HeapRef) -> Result<&[u8], Error> {
        match self.get(handle)? {
            HeapObject::Buffer(bytes) => Ok(bytes),
            other => Err(Error::InvalidCast {
                from: other.item_type(),
                to:   StackItemType::Buffer,
            }),
        }
    }

    /// Gets the bytes of the buffer behind `handle` for in-place mutation.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the handle is invalid or does not refer to a buffer.
    pub fn buffer_mut(&mut self, handle: HeapRef) -> Result<&mut Vec<u8>, Error> {
        match self.get_mut(handle)? {
            HeapObject::Buffer(bytes) => Ok(bytes),
            other => Err(Error::InvalidCast {
                from: other.item_type(),
                to:   StackItemType::Buffer,
            }),
        }
    }

    /// Freezes the array or struct behind `handle` against mutation.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the handle is invalid.
    pub fn freeze(&mut self, handle: HeapRef) -> Result<(), Error> {
        match self.get_mut(handle)? {
            HeapObject::Array { read_only, .. } | HeapObject::Struct { read_only, .. } => {
                *read_only = true;
            }
            HeapObject::Buffer(_) => {}
        }
        Ok(())
    }

    /// Produces the stack item that refers to the object behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the handle is invalid.
    pub fn item_for(&self, handle: HeapRef) -> Result<StackItem, Error> {
        Ok(match self.get(handle)? {
            HeapObject::Buffer(_) => StackItem::Buffer(handle),
            HeapObject::Array { .. } => StackItem::Array(handle),
            HeapObject::Struct { .. } => StackItem::Struct(handle),
        })
    }

    /// Gets the byte representation of a primitive item or buffer.
    ///
    /// Returns `Ok(None)` for symbolic items.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the item has no byte representation.
    pub fn bytes_of(&self, item: &StackItem) -> Result<Option<Vec<u8>>, Error> {
        let Some(known) = item.known() else {
            return Ok(None);
        };
        let bytes = match known {
            StackItem::ByteString(bytes) => bytes.clone(),
            StackItem::Buffer(handle) => self.buffer(*handle)?.to_vec(),
            StackItem::Integer(value) => integer_bytes(value),
            StackItem::Boolean(value) => vec![u8::from(*value)],
            other => {
                return Err(Error::InvalidCast {
                    from: other.item_type(),
                    to:   StackItemType::ByteString,
                })
            }
        };

        Ok(Some(bytes))
    }

    /// Copies `item` with value semantics.
    ///
    /// The top-level array or struct is always duplicated, as is every struct
    /// nested in it. Any other nested compound, such as an array inside a
    /// struct, is shared with the source. The `visited` map takes each source
    /// compound to its copy, so self-referential values terminate and shared
    /// substructure stays shared within the copy. When `freeze` is set every
    /// new compound is made read-only.
    ///
    /// Items that are not arrays or structs are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the item refers to an invalid handle.
    pub fn deep_copy(
        &mut self,
        item: &StackItem,
        visited: &mut HashMap<HeapRef, HeapRef>,
        freeze: bool,
    ) -> Result<StackItem, Error> {
        match item.known() {
            Some(StackItem::Array(handle) | StackItem::Struct(handle)) => {
                self.copy_compound(*handle, visited, freeze)
            }
            _ => Ok(item.clone()),
        }
    }

    /// Produces the copy of a struct that is stored when a struct is placed
    /// into another compound.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the item refers to an invalid handle.
    pub fn clone_struct(&mut self, item: &StackItem) -> Result<StackItem, Error> {
        match item.known() {
            Some(StackItem::Struct(_)) => self.deep_copy(item, &mut HashMap::new(), false),
            _ => Ok(item.clone()),
        }
    }

    fn copy_compound(
        &mut self,
        source: HeapRef,
        visited: &mut HashMap<HeapRef, HeapRef>,
        freeze: bool,
    ) -> Result<StackItem, Error> {
        if let Some(copy) = visited.get(&source) {
            return self.item_for(*copy);
        }

        let (is_struct, items) = match self.get(source)? {
            HeapObject::Array { items, .. } => (false, items.clone()),
            HeapObject::Struct { items, .. } => (true, items.clone()),
            HeapObject::Buffer(_) => return Ok(StackItem::Buffer(source)),
        };
        let copy = if is_struct {
            self.new_struct(vec![])
        } else {
            self.new_array(vec![])
        };
        let Some(copy_handle) = copy.heap_ref() else {
            return Ok(copy);
        };
        visited.insert(source, copy_handle);

        let mut copied = Vec::with_capacity(items.len());
        for child in &items {
            match child.known() {
                Some(StackItem::Struct(nested)) => {
                    copied.push(self.copy_compound(*nested, visited, freeze)?);
                }
                _ => copied.push(child.clone()),
            }
        }
        *self.items_mut(copy_handle)? = copied;
        if freeze {
            self.freeze(copy_handle)?;
        }

        Ok(copy)
    }

    /// Compares two items with the VM's equality semantics.
    ///
    /// Structs compare field by field, with nested structs compared
    /// structurally as well. Arrays and buffers compare by identity, and
    /// primitives by type and value. Returns `Ok(None)` when the answer
    /// depends on a symbolic value.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if either item refers to an invalid handle.
    pub fn equals(&self, a: &StackItem, b: &StackItem) -> Result<Option<bool>, Error> {
        let (Some(a), Some(b)) = (a.known(), b.known()) else {
            return Ok(None);
        };
        match (a, b) {
            (StackItem::Struct(x), StackItem::Struct(y)) => self.struct_equals(*x, *y),
            _ => Ok(Some(a == b)),
        }
    }

    /// Compares two structs iteratively, treating a pair that is already being
    /// compared as equal so that cyclic structs terminate.
    fn struct_equals(&self, x: HeapRef, y: HeapRef) -> Result<Option<bool>, Error> {
        let mut pending = vec![(x, y)];
        let mut seen = HashSet::new();
        let mut uncertain = false;

        while let Some((x, y)) = pending.pop() {
            if x == y || !seen.insert((x, y)) {
                continue;
            }
            let (left, right) = (self.items(x)?, self.items(y)?);
            if left.len() != right.len() {
                return Ok(Some(false));
            }
            for (a, b) in left.iter().zip(right) {
                if let (Some(StackItem::Struct(p)), Some(StackItem::Struct(q))) =
                    (a.known(), b.known())
                {
                    pending.push((*p, *q));
                    continue;
                }
                match self.equals(a, b)? {
                    Some(true) => {}
                    Some(false) => return Ok(Some(false)),
                    None => uncertain = true,
                }
            }
        }

        Ok(if uncertain { None } else { Some(true) })
    }

    /// Converts `item` to the type `target`.
    ///
    /// Conversion to the item's own type is the identity. Symbolic items
    /// convert to an unknown of the target type.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the concrete item cannot be converted.
    pub fn convert_to(
        &mut self,
        item: &StackItem,
        target: StackItemType,
    ) -> Result<StackItem, Error> {
        let Some(known) = item.known().cloned() else {
            return Ok(StackItem::unknown(target));
        };
        let source = known.item_type();
        if source == target {
            return Ok(item.clone());
        }
        let invalid = Error::InvalidCast {
            from: source,
            to:   target,
        };

        match (&known, target) {
            (StackItem::Null, _) => Err(invalid),
            (_, StackItemType::Boolean) => Ok(StackItem::boolean(
                known.to_boolean()?.unwrap_or_default(),
            )),
            (
                StackItem::Boolean(_) | StackItem::Integer(_) | StackItem::ByteString(_),
                StackItemType::Integer,
            ) => Ok(StackItem::integer(
                known.to_integer()?.unwrap_or_default(),
            )),
            (StackItem::Buffer(handle), StackItemType::Integer) => {
                let bytes = self.buffer(*handle)?;
                if bytes.len() > PUSHINT_MAX_BYTES {
                    return Err(invalid);
                }
                Ok(StackItem::integer(BigInt::from_signed_bytes_le(bytes)))
            }
            (
                StackItem::Boolean(_)
                | StackItem::Integer(_)
                | StackItem::ByteString(_)
                | StackItem::Buffer(_),
                StackItemType::ByteString,
            ) => Ok(StackItem::bytes(self.bytes_of(&known)?.unwrap_or_default())),
            (
                StackItem::Boolean(_) | StackItem::Integer(_) | StackItem::ByteString(_),
                StackItemType::Buffer,
            ) => {
                let bytes = self.bytes_of(&known)?.unwrap_or_default();
                Ok(self.new_buffer(bytes))
            }
            (StackItem::Array(handle), StackItemType::Struct) => {
                let items = self.items(*handle)?.to_vec();
                Ok(self.new_struct(items))
            }
            (StackItem::Struct(handle), StackItemType::Array) => {
                let items = self.items(*handle)?.to_vec();
                Ok(self.new_array(items))
            }
            _ => Err(invalid),
        }
    }
}
