//! This module contains generic containers for errors: a wrapper attaching a
//! script offset to an error and an ordered collection of errors.

use std::fmt::Formatter;

use thiserror::Error;

/// An error that is localised to a particular byte offset in the script.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Located<E>
where
    E: Clone,
{
    /// The byte offset in the script where the error occurred.
    pub location: u32,

    /// The error data
    pub payload: E,
}

impl<E> Located<E>
where
    E: Clone,
{
    /// Transforms the payload of the error while keeping its location.
    pub fn map<F>(self, transform: impl FnOnce(E) -> F) -> Located<F>
    where
        F: Clone,
    {
        Located {
            location: self.location,
            payload:  transform(self.payload),
        }
    }
}

/// Displays the error prefixed by the script offset where it occurred.
impl<E> std::fmt::Display for Located<E>
where
    E: std::fmt::Display + Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:#06x}]: {}", self.location, self.payload)
    }
}

/// A trait for types that can have a script offset attached to them.
pub trait Locatable
where
    Self: Sized,
{
    /// The return type with the attached offset.
    type Located;

    /// Attach the location described by `instruction_pointer` (a byte offset in
    /// the script) to the error.
    fn locate(self, instruction_pointer: u32) -> Self::Located;
}

/// A blanket implementation that allows for attaching a location to any result.
impl<T, E> Locatable for Result<T, E>
where
    E: std::error::Error + Clone,
{
    type Located = Result<T, Located<E>>;

    fn locate(self, instruction_pointer: u32) -> Self::Located {
        self.map_err(|e| Located {
            location: instruction_pointer,
            payload:  e,
        })
    }
}

/// An error that is a collection of errors, kept in the order they were added.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Errors<E> {
    payloads: Vec<E>,
}

impl<E> Errors<E> {
    /// Creates a new, empty, container for errors.
    #[must_use]
    pub fn new() -> Self {
        Self { payloads: vec![] }
    }

    /// Gets the errors contained within this error.
    #[must_use]
    pub fn payloads(&self) -> &[E] {
        self.payloads.as_slice()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Adds the provided `error` to the container.
    pub fn add(&mut self, error: E) {
        self.payloads.push(error);
    }
}

/// Located errors are kept in script order, with errors at the same offset in
/// the order they were added.
impl<E> Errors<Located<E>>
where
    E: Clone,
{
    /// Adds `error` at its place in script order.
    pub fn add_located(&mut self, error: Located<E>) {
        let index = self
            .payloads
            .partition_point(|existing| existing.location <= error.location);
        self.payloads.insert(index, error);
    }

    /// Gets the errors raised by the instruction at `offset`.
    pub fn at(&self, offset: u32) -> impl Iterator<Item = &E> {
        self.payloads
            .iter()
            .filter(move |error| error.location == offset)
            .map(|error| &error.payload)
    }
}

impl<E> Default for Errors<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> From<E> for Errors<E>
where
    E: std::error::Error,
{
    fn from(value: E) -> Self {
        Self {
            payloads: vec![value],
        }
    }
}

impl<E> From<Errors<E>> for Vec<E> {
    fn from(value: Errors<E>) -> Self {
        value.payloads
    }
}

impl<E> From<Vec<E>> for Errors<E> {
    fn from(value: Vec<E>) -> Self {
        Self { payloads: value }
    }
}

/// Displays a header with the error count followed by one error per line.
impl<E> std::fmt::Display for Errors<E>
where
    E: std::fmt::Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.payloads.is_empty() {
            write!(f, "Encountered no errors")?;
        } else {
            writeln!(f, "Encountered {} errors:", self.payloads.len())?;
            for error in &self.payloads {
                writeln!(f, "{error}")?;
            }
        }

        Ok(())
    }
}
