//! Batch accumulators and the factories that produce them.
//!
//! A [`BatchOperations`] implementation decides the shape of a batch for a given
//! deployment: which item type it accepts, what the accumulator looks like while
//! items are being appended, and what immutable value comes out when the
//! accumulator is finalized. The emitter only ever talks to these two traits, so
//! swapping the payload format never touches scheduling code.
//!
//! Finalizing consumes the accumulator by value. A builder can therefore never be
//! appended to, or built twice, after it has produced its batch.

use std::ops::Deref;

/// Append-only accumulator for items pending delivery.
///
/// Exactly one builder is live inside an emitter at any time. The emitter
/// enforces the size threshold; builders are unbounded.
pub trait BatchBuilder: Send {
    /// Item type accepted by this builder.
    type Item;
    /// Immutable batch produced by [`build`](BatchBuilder::build).
    type Batch;

    /// Appends an item.
    fn add(&mut self, item: Self::Item);

    /// Consumes the builder and produces the finalized batch.
    fn build(self) -> Self::Batch;
}

/// Factory for fresh, empty [`BatchBuilder`]s.
///
/// Implementations should be cheap to call: a new builder is created on the
/// flush path while producers are briefly held off.
pub trait BatchOperations: Send + Sync + 'static {
    /// Item type accepted by producers.
    type Item: Send + 'static;
    /// Immutable batch handed to the delivery callback.
    type Batch: Send + 'static;
    /// Accumulator type.
    type Builder: BatchBuilder<Item = Self::Item, Batch = Self::Batch> + 'static;

    /// Returns a new, empty builder.
    fn create_batch_builder(&self) -> Self::Builder;
}

/// Immutable, finalized group of items.
///
/// Dereferences to a slice in append order. There is no way to push into or
/// remove from a `Batch` once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    items: Box<[T]>,
}

impl<T> Batch<T> {
    /// Returns the items in append order.
    #[inline]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Consumes the batch, returning the items in append order.
    pub fn into_vec(self) -> Vec<T> {
        self.items.into_vec()
    }
}

impl<T> Deref for Batch<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> IntoIterator for Batch<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_vec().into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Batch<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// `Vec`-backed builder producing a [`Batch<T>`].
#[derive(Debug)]
pub struct VecBatchBuilder<T> {
    items: Vec<T>,
}

impl<T> VecBatchBuilder<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Number of items appended so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing has been appended.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Send> BatchBuilder for VecBatchBuilder<T> {
    type Item = T;
    type Batch = Batch<T>;

    #[inline]
    fn add(&mut self, item: T) {
        self.items.push(item);
    }

    fn build(self) -> Batch<T> {
        Batch {
            items: self.items.into_boxed_slice(),
        }
    }
}

/// Default factory: items are collected into a `Vec` and finalized into a
/// [`Batch<T>`].
///
/// `capacity_hint` pre-sizes every new builder. Setting it to the emitter's
/// `max_size` avoids regrowth on the producer path for threshold-sized batches.
#[derive(Debug)]
pub struct VecBatchOperations<T> {
    capacity_hint: usize,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> VecBatchOperations<T> {
    /// Creates a factory whose builders start empty and grow on demand.
    pub fn new() -> Self {
        Self::with_capacity_hint(0)
    }

    /// Creates a factory whose builders pre-allocate `capacity_hint` slots.
    pub fn with_capacity_hint(capacity_hint: usize) -> Self {
        Self {
            capacity_hint,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Default for VecBatchOperations<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for VecBatchOperations<T> {
    fn clone(&self) -> Self {
        Self::with_capacity_hint(self.capacity_hint)
    }
}

impl<T: Send + 'static> BatchOperations for VecBatchOperations<T> {
    type Item = T;
    type Batch = Batch<T>;
    type Builder = VecBatchBuilder<T>;

    fn create_batch_builder(&self) -> VecBatchBuilder<T> {
        VecBatchBuilder::with_capacity(self.capacity_hint)
    }
}
