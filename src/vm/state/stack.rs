//! This module contains the implementation of the symbolic virtual machine's
//! evaluation stack.

use std::collections::VecDeque;

use crate::vm::value::{StackItem, Unknown};

/// The evaluation stack shared by the frames of one analysis.
///
/// # Indexing
///
/// Indexing into this stack is zero-based, where index 0 is the top of the
/// stack.
///
/// # Extension
///
/// Analysis usually begins part way through an execution, so the stack holds
/// only the items pushed since then. Any access below the bottom of the
/// observed items first _extends_ the stack downwards with
/// [`Unknown::extension`] placeholders, numbered in the order they are
/// materialized. No positive index is ever out of bounds.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EvaluationStack {
    items:      VecDeque<StackItem>,
    extensions: usize,
}

impl EvaluationStack {
    /// Creates a new stack without any items on it.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of items currently materialized on the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Gets the number of unknowns the stack has materialized below its
    /// observed bottom.
    #[must_use]
    pub fn extensions(&self) -> usize {
        self.extensions
    }

    /// Pushes `item` onto the top of the stack.
    pub fn push(&mut self, item: StackItem) {
        self.items.push_front(item);
    }

    /// Pops the top item from the stack, materializing an unknown if the stack
    /// is empty.
    pub fn pop(&mut self) -> StackItem {
        self.remove_at(0)
    }

    /// Reads the item at `index` without removing it.
    pub fn peek(&mut self, index: usize) -> &StackItem {
        self.extend_to(index);
        &self.items[index]
    }

    /// Removes and returns the item at `index`.
    pub fn remove_at(&mut self, index: usize) -> StackItem {
        self.extend_to(index);
        self.items.remove(index).unwrap_or_default()
    }

    /// Inserts `item` at `index`, so that it ends up with exactly `index`
    /// items above it.
    pub fn insert(&mut self, index: usize, item: StackItem) {
        if index > 0 {
            self.extend_to(index - 1);
        }
        self.items.insert(index, item);
    }

    /// Reverses the order of the top `count` items.
    pub fn reverse(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.extend_to(count - 1);
        self.items.make_contiguous()[..count].reverse();
    }

    /// Pushes copies of the top `count` items onto `dest`, keeping their order,
    /// or of every materialized item if `count` is [`None`].
    pub fn copy_to(&mut self, dest: &mut EvaluationStack, count: Option<usize>) {
        let count = self.prepare_transfer(count);
        for item in self.items.iter().take(count).rev() {
            dest.push(item.clone());
        }
    }

    /// Moves the top `count` items onto `dest`, keeping their order, or every
    /// materialized item if `count` is [`None`].
    pub fn move_to(&mut self, dest: &mut EvaluationStack, count: Option<usize>) {
        let count = self.prepare_transfer(count);
        for item in self.items.drain(..count).rev() {
            dest.push(item);
        }
    }

    /// Removes every materialized item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterates over the materialized items from the top down.
    pub fn iter(&self) -> impl Iterator<Item = &StackItem> {
        self.items.iter()
    }

    fn prepare_transfer(&mut self, count: Option<usize>) -> usize {
        match count {
            Some(0) => 0,
            Some(count) => {
                self.extend_to(count - 1);
                count
            }
            None => self.items.len(),
        }
    }

    /// Materializes unknowns at the bottom until `index` is valid.
    fn extend_to(&mut self, index: usize) {
        while self.items.len() <= index {
            self.items
                .push_back(StackItem::Unknown(Unknown::extension(self.extensions)));
            self.extensions += 1;
        }
    }
}

#[cfg(test)]
mod test {
    use crate::vm::{
        state::stack::EvaluationStack,
        value::{StackItem, Unknown},
    };

    fn extension(index: usize) -> StackItem {
        StackItem::Unknown(Unknown::extension(index))
    }

    #[test]
    fn pops_past_the_bottom_materialize_distinct_unknowns() {
        let mut stack = EvaluationStack::new();
        stack.push(StackItem::integer(1));

        assert_eq!(stack.pop(), StackItem::integer(1));
        assert_eq!(stack.pop(), extension(0));
        assert_eq!(stack.pop(), extension(1));
        assert_eq!(stack.extensions(), 2);
        assert!(stack.is_empty());
    }

    #[test]
    fn peeks_extend_below_the_observed_items() {
        let mut stack = EvaluationStack::new();
        stack.push(StackItem::integer(1));

        assert_eq!(stack.peek(2), &extension(1));
        assert_eq!(stack.len(), 3);

        // Extensions are stable once materialized.
        assert_eq!(stack.peek(1), &extension(0));
        assert_eq!(stack.extensions(), 2);
    }

    #[test]
    fn insert_and_remove_work_at_depth() {
        let mut stack = EvaluationStack::new();
        stack.push(StackItem::integer(1));
        stack.insert(3, StackItem::integer(2));

        assert_eq!(stack.len(), 4);
        assert_eq!(stack.remove_at(3), StackItem::integer(2));
        assert_eq!(stack.remove_at(5), extension(4));
    }

    #[test]
    fn reverses_the_top_items() {
        let mut stack = EvaluationStack::new();
        for value in 1..=3 {
            stack.push(StackItem::integer(value));
        }
        stack.reverse(4);

        let items: Vec<_> = stack.iter().cloned().collect();
        assert_eq!(
            items,
            vec![
                extension(0),
                StackItem::integer(1),
                StackItem::integer(2),
                StackItem::integer(3)
            ]
        );
    }

    #[test]
    fn copies_and_moves_preserve_order() {
        let mut source = EvaluationStack::new();
        source.push(StackItem::integer(1));
        source.push(StackItem::integer(2));

        let mut copy = EvaluationStack::new();
        source.copy_to(&mut copy, None);
        assert_eq!(copy, source);

        let mut moved = EvaluationStack::new();
        source.move_to(&mut moved, Some(1));
        assert_eq!(moved.pop(), StackItem::integer(2));
        assert_eq!(source.pop(), StackItem::integer(1));
    }

    #[test]
    fn arbitrary_operation_sequences_never_fail() {
        let mut stack = EvaluationStack::new();
        for step in 0..64_usize {
            match step % 5 {
                0 => stack.push(StackItem::integer(step)),
                1 => {
                    stack.pop();
                }
                2 => {
                    stack.peek(step % 7);
                }
                3 => stack.insert(step % 4, StackItem::integer(step)),
                _ => stack.reverse(step % 6),
            }
        }
        assert!(stack.extensions() > 0);
    }
}
