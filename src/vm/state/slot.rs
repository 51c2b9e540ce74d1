//! This module contains the fixed-size slots that hold arguments, locals and
//! static fields.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use crate::{
    error::execution::Error,
    vm::value::{StackItem, SymbolicVariable, NULL},
};

/// The kinds of slot a NeoVM program can address.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SlotKind {
    Static,
    Local,
    Argument,
}

impl Display for SlotKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Static => "static",
            Self::Local => "local",
            Self::Argument => "argument",
        };
        write!(f, "{name}")
    }
}

/// A fixed-length array of items, pre-filled with [`NULL`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Slot {
    kind:  SlotKind,
    items: Vec<StackItem>,
}

impl Slot {
    /// Creates a slot of `kind` with `size` null entries.
    #[must_use]
    pub fn new(kind: SlotKind, size: usize) -> Self {
        Self {
            kind,
            items: vec![NULL; size],
        }
    }

    /// Creates a slot of `kind` holding exactly `items`.
    #[must_use]
    pub fn with_items(kind: SlotKind, items: Vec<StackItem>) -> Self {
        Self { kind, items }
    }

    #[must_use]
    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Gets the item at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `index` lies outside the slot.
    pub fn get(&self, index: usize) -> Result<&StackItem, Error> {
        self.items.get(index).ok_or_else(|| self.out_of_range(index))
    }

    /// Replaces the item at `index` with `item`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `index` lies outside the slot.
    pub fn set(&mut self, index: usize, item: StackItem) -> Result<(), Error> {
        let error = self.out_of_range(index);
        let entry = self.items.get_mut(index).ok_or(error)?;
        *entry = item;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &StackItem> {
        self.items.iter()
    }

    fn out_of_range(&self, index: usize) -> Error {
        Error::SlotIndexOutOfRange {
            kind: self.kind,
            index,
            size: self.items.len(),
        }
    }
}

/// The variables of one kind visible to a frame.
///
/// Until the frame initializes its slot with `INITSLOT` or `INITSSLOT` the
/// variables are _open_: the analysis started somewhere after the
/// initialization, so a load of an unwritten index yields a symbolic variable
/// naming it and stores are remembered per index. Once initialized, the
/// fixed-size [`Slot`] bounds every access.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Variables {
    kind: SlotKind,
    slot: Option<Slot>,
    open: BTreeMap<usize, StackItem>,
}

impl Variables {
    /// Creates open variables of `kind`.
    #[must_use]
    pub fn new(kind: SlotKind) -> Self {
        Self {
            kind,
            slot: None,
            open: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    /// Checks whether the fixed-size slot has been created.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.slot.is_some()
    }

    #[must_use]
    pub fn slot(&self) -> Option<&Slot> {
        self.slot.as_ref()
    }

    /// Loads the variable at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the slot is initialized and `index` lies outside it.
    pub fn load(&self, index: usize) -> Result<StackItem, Error> {
        match &self.slot {
            Some(slot) => slot.get(index).cloned(),
            None => Ok(self.open.get(&index).cloned().unwrap_or_else(|| {
                StackItem::variable(SymbolicVariable::Slot {
                    kind: self.kind,
                    index,
                })
            })),
        }
    }

    /// Stores `item` into the variable at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the slot is initialized and `index` lies outside it.
    pub fn store(&mut self, index: usize, item: StackItem) -> Result<(), Error> {
        match &mut self.slot {
            Some(slot) => slot.set(index, item),
            None => {
                self.open.insert(index, item);
                Ok(())
            }
        }
    }

    /// Initializes the slot with `size` null entries.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the slot was already initialized.
    pub fn initialize(&mut self, size: usize) -> Result<(), Error> {
        self.initialize_with(vec![NULL; size])
    }

    /// Initializes the slot with exactly `items`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the slot was already initialized.
    pub fn initialize_with(&mut self, items: Vec<StackItem>) -> Result<(), Error> {
        if self.slot.is_some() {
            return Err(Error::SlotAlreadyInitialized { kind: self.kind });
        }
        self.slot = Some(Slot::with_items(self.kind, items));
        self.open.clear();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        error::execution::Error,
        vm::{
            state::slot::{Slot, SlotKind, Variables},
            value::{StackItem, SymbolicVariable, NULL},
        },
    };

    #[test]
    fn slots_are_prefilled_with_null() -> anyhow::Result<()> {
        let mut slot = Slot::new(SlotKind::Local, 2);
        assert_eq!(slot.get(1)?, &NULL);

        slot.set(1, StackItem::integer(3))?;
        assert_eq!(slot.get(1)?, &StackItem::integer(3));
        assert_eq!(slot.len(), 2);

        Ok(())
    }

    #[test]
    fn slots_do_not_grow() {
        let mut slot = Slot::new(SlotKind::Argument, 1);
        let expected = Error::SlotIndexOutOfRange {
            kind:  SlotKind::Argument,
            index: 1,
            size:  1,
        };
        assert_eq!(slot.get(1).err(), Some(expected.clone()));
        assert_eq!(slot.set(1, NULL).err(), Some(expected));
    }

    #[test]
    fn open_variables_are_symbolic_until_stored() -> anyhow::Result<()> {
        let mut statics = Variables::new(SlotKind::Static);
        assert_eq!(
            statics.load(4)?,
            StackItem::variable(SymbolicVariable::Slot {
                kind:  SlotKind::Static,
                index: 4,
            })
        );

        statics.store(4, StackItem::integer(1))?;
        assert_eq!(statics.load(4)?, StackItem::integer(1));

        Ok(())
    }

    #[test]
    fn initialization_happens_once() -> anyhow::Result<()> {
        let mut locals = Variables::new(SlotKind::Local);
        locals.store(0, StackItem::integer(1))?;
        locals.initialize(1)?;

        // Initialization replaces whatever was stored while open.
        assert_eq!(locals.load(0)?, NULL);
        assert!(locals.load(1).is_err());
        assert_eq!(
            locals.initialize(1).err(),
            Some(Error::SlotAlreadyInitialized {
                kind: SlotKind::Local,
            })
        );

        Ok(())
    }

    #[test]
    fn kinds_display_in_lowercase() {
        assert_eq!(SlotKind::Static.to_string(), "static");
        assert_eq!(SlotKind::Argument.to_string(), "argument");
    }
}
