//! Fixed-capacity ring buffer with logical indexing.
//!
//! Slots live in a single `Vec` arena. Element `0` is always the oldest
//! element and `len() - 1` the newest, whatever the physical layout is, so
//! callers can scan the history with plain index arithmetic.

use std::ops::Index;

/// Ring buffer that overwrites its oldest element when full.
#[derive(Debug, Clone)]
pub struct SampleRing<T> {
    slots: Vec<Option<T>>,
    /// Physical slot of logical index 0.
    head: usize,
    len: usize,
}

impl<T> SampleRing<T> {
    /// Create an empty ring holding at most `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    /// Maximum number of elements.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of stored elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the ring holds no element.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if the next `push_back` evicts the oldest element.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    #[inline]
    fn physical(&self, index: usize) -> usize {
        (self.head + index) % self.slots.len()
    }

    /// Element at logical `index` (0 = oldest).
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.slots[self.physical(index)].as_ref()
    }

    /// Oldest element.
    #[inline]
    pub fn front(&self) -> Option<&T> {
        self.get(0)
    }

    /// Newest element.
    #[inline]
    pub fn back(&self) -> Option<&T> {
        self.len.checked_sub(1).and_then(|last| self.get(last))
    }

    /// Append `value`, returning the evicted oldest element if the ring was full.
    ///
    /// A zero-capacity ring hands `value` straight back.
    pub fn push_back(&mut self, value: T) -> Option<T> {
        if self.slots.is_empty() {
            return Some(value);
        }
        if self.is_full() {
            let slot = self.head;
            let evicted = self.slots[slot].replace(value);
            self.head = (self.head + 1) % self.slots.len();
            return evicted;
        }
        let slot = self.physical(self.len);
        self.slots[slot] = Some(value);
        self.len += 1;
        None
    }

    /// Remove and return the oldest element.
    pub fn pop_front(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        value
    }

    /// Remove the `count` oldest elements (all of them if `count >= len`).
    pub fn drain_front(&mut self, count: usize) {
        for _ in 0..count.min(self.len) {
            self.pop_front();
        }
    }

    /// Remove every element, keeping the capacity.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }

    /// Change the capacity.
    ///
    /// When shrinking below `len()`, the newest elements are discarded.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity == self.slots.len() {
            return;
        }
        let keep = self.len.min(capacity);
        let mut slots: Vec<Option<T>> = Vec::with_capacity(capacity);
        for index in 0..keep {
            let slot = self.physical(index);
            slots.push(self.slots[slot].take());
        }
        slots.resize_with(capacity, || None);
        self.slots = slots;
        self.head = 0;
        self.len = keep;
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |index| self.get(index))
    }
}

impl<T> Index<usize> for SampleRing<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Some(value) => value,
            None => panic!("ring index {} out of range (len {})", index, self.len),
        }
    }
}
