//! Fixed-capacity ring buffer used by [`crate::pool`] for the live-poolable
//! list and the pending-acquisition queue.
//!
//! `FifoBuffer` never checks bounds: callers (the pool) are responsible for
//! never pushing past `capacity`. This mirrors the source design — the
//! buffer is a mechanical building block, not a place to put policy.

use std::collections::VecDeque;

/// A fixed-capacity double-ended queue.
///
/// Internally backed by a `VecDeque` sized `capacity + 1` the way the
/// source's ring buffer is, though the one-extra-slot detail is an
/// implementation artifact of that design rather than something this type
/// needs to expose: `VecDeque` already grows/shrinks safely, so the real
/// invariant this type upholds is purely "never exceed `capacity` elements
/// as a result of normal pool operation" — callers must honor that, since
/// none of the methods below enforce it.
#[derive(Debug)]
pub struct FifoBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> FifoBuffer<T> {
    /// Creates an empty buffer with room for `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Current number of elements.
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pushes `item` onto the front of the buffer.
    pub fn add_first(&mut self, item: T) {
        self.items.push_front(item);
    }

    /// Pushes `item` onto the back of the buffer.
    pub fn add_last(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Removes and returns the front element, if any.
    pub fn remove_first(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Removes and returns the back element, if any.
    pub fn remove_last(&mut self) -> Option<T> {
        self.items.pop_back()
    }

    /// Alias for [`FifoBuffer::remove_first`]; kept distinct from it because
    /// the source distinguishes a partial (possibly-empty) removal from one
    /// that is expected to always succeed. Here both return `Option<T>`,
    /// but the name documents caller intent at the call site.
    pub fn remove_first_or_null(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Removes elements from the front, one at a time, until (and
    /// including) the first element for which `pred` returns `true`.
    /// Returns that last-removed element, or `None` if the buffer was
    /// drained without `pred` ever matching.
    ///
    /// Used by the pool's selection loop to implement "remove-until-first-
    /// alive, then reinsert at the back" in one pass.
    pub fn remove_until_first_inclusive_or_null<P>(&mut self, mut pred: P) -> Option<T>
    where
        P: FnMut(&T) -> bool,
    {
        while let Some(item) = self.items.pop_front() {
            if pred(&item) {
                return Some(item);
            }
        }
        None
    }

    /// Removes every element satisfying `pred`, preserving the relative
    /// order of the rest. Each element is tested exactly once.
    pub fn remove_all<P>(&mut self, mut pred: P)
    where
        P: FnMut(&T) -> bool,
    {
        self.items.retain(|item| !pred(item));
    }

    /// Iterates over the elements from front to back without removing them.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Iterates mutably over the elements from front to back.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }
}
