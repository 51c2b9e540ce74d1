//! The state representation for the symbolic virtual machine, and utilities for
//! dealing with said representation.
//!
//! State is split in two. The [`SharedState`] holds everything that sibling
//! frames of one analysis observe together, and is handed to each frame by
//! reference. Each [`crate::vm::context::ExecutionContext`] owns the rest.

pub mod slot;
pub mod stack;
pub mod tracking;

use std::{
    any::{type_name, Any, TypeId},
    cell::RefCell,
    collections::HashMap,
    fmt::Debug,
    rc::Rc,
};

use downcast_rs::Downcast;

use crate::{
    disassembly::Script,
    error::execution::Error,
    vm::{
        state::{
            slot::{SlotKind, Variables},
            stack::EvaluationStack,
            tracking::AccessTracker,
        },
        value::Heap,
    },
};

/// Auxiliary per-script state that analyses attach to the shared state.
pub trait AnalysisState
where
    Self: Any + Debug + Downcast,
{
}

/// The state shared by every frame cloned from one entry context.
#[derive(Debug)]
pub struct SharedState {
    /// The script being executed.
    pub script: Script,

    /// The evaluation stack.
    pub evaluation_stack: EvaluationStack,

    /// The static fields of the contract.
    pub static_fields: Variables,

    /// The arena of compound items.
    pub heap: Heap,

    /// Analysis side tables, keyed by their type.
    states: HashMap<TypeId, Box<dyn AnalysisState>>,
}

/// A reference-counted handle to a [`SharedState`].
pub type SharedStateHandle = Rc<RefCell<SharedState>>;

impl SharedState {
    /// Creates fresh shared state for executing `script`.
    #[must_use]
    pub fn new(script: Script) -> Self {
        Self {
            script,
            evaluation_stack: EvaluationStack::new(),
            static_fields: Variables::new(SlotKind::Static),
            heap: Heap::new(),
            states: HashMap::new(),
        }
    }

    /// Moves the state behind a shareable handle.
    #[must_use]
    pub fn into_handle(self) -> SharedStateHandle {
        Rc::new(RefCell::new(self))
    }

    /// Gets the side table of type `T`, if one has been created.
    #[must_use]
    pub fn state<T: AnalysisState>(&self) -> Option<&T> {
        self.states
            .get(&TypeId::of::<T>())
            .and_then(|s| s.as_ref().as_any().downcast_ref::<T>())
    }

    /// Gets the side table of type `T` for mutation, if one has been created.
    pub fn state_mut<T: AnalysisState>(&mut self) -> Option<&mut T> {
        self.states
            .get_mut(&TypeId::of::<T>())
            .and_then(|s| s.as_mut().as_any_mut().downcast_mut::<T>())
    }

    /// Gets the side table of type `T`, creating it with `factory` if it does
    /// not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the entry for `T` holds a value of another type.
    pub fn get_or_create_state<T: AnalysisState>(
        &mut self,
        factory: impl FnOnce() -> T,
    ) -> Result<&mut T, Error> {
        self.states
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(factory()))
            .as_mut()
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(Error::AnalysisStateMismatch {
                name: type_name::<T>(),
            })
    }

    /// Gets the access tracker, creating it if this is the first access.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the tracker entry is corrupt.
    pub fn tracker(&mut self) -> Result<&mut AccessTracker, Error> {
        self.get_or_create_state(AccessTracker::new)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        disassembly::Script,
        vm::state::{
            slot::SlotKind,
            tracking::{Access, AccessTracker},
            AnalysisState,
            SharedState,
        },
    };

    #[derive(Debug, Default)]
    struct Counter(usize);

    impl AnalysisState for Counter {}

    #[test]
    fn side_tables_are_keyed_by_type() -> anyhow::Result<()> {
        let mut state = SharedState::new(Script::new(vec![0x40]));
        assert!(state.state::<Counter>().is_none());

        state.get_or_create_state(Counter::default)?.0 += 1;
        state.get_or_create_state(|| Counter(10))?.0 += 1;
        assert_eq!(state.state::<Counter>().map(|c| c.0), Some(2));

        state.tracker()?.record_write(
            Access::Slot {
                kind:  SlotKind::Static,
                index: 0,
            },
            0,
        );
        assert_eq!(
            state.state::<AccessTracker>().map(AccessTracker::write_set).map(|s| s.len()),
            Some(1)
        );

        Ok(())
    }
}
