//! Fixed-capacity history of recent items.
//!
//! [`BoundedHistory`] is a ring buffer that keeps the most recent `capacity`
//! items. Pushing into a full buffer evicts the oldest item; it is a sliding
//! window, not an error condition.

/// Ring buffer retaining the most recent `capacity` items.
///
/// The engine never owns one of these; callers push each
/// [`RoundResult`](crate::RoundResult) they receive and summarize the window
/// with [`WindowStats`](crate::WindowStats).
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    slots: Vec<Option<T>>,
    /// Index of the oldest retained item.
    head: usize,
    /// Index the next push writes to.
    tail: usize,
    count: usize,
}

impl<T> BoundedHistory<T> {
    /// Create an empty history holding at most `capacity` items.
    ///
    /// Returns `None` for a zero capacity or one that cannot be allocated.
    pub fn new(capacity: usize) -> Option<Self> {
        if capacity == 0 {
            return None;
        }
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).ok()?;
        slots.resize_with(capacity, || None);
        Some(Self {
            slots,
            head: 0,
            tail: 0,
            count: 0,
        })
    }

    /// Append an item, evicting and returning the oldest one when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.is_full() {
            let old = self.slots[self.head].take();
            self.head = self.advance(self.head);
            self.count -= 1;
            old
        } else {
            None
        };
        self.slots[self.tail] = Some(item);
        self.tail = self.advance(self.tail);
        self.count += 1;
        evicted
    }

    /// Remove and return the oldest retained item.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = self.advance(self.head);
        self.count -= 1;
        item
    }

    /// The most recently pushed item, if any.
    pub fn latest(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        let idx = (self.tail + self.capacity() - 1) % self.capacity();
        self.slots[idx].as_ref()
    }

    /// Iterate over retained items, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.count).filter_map(move |i| self.slots[(self.head + i) % self.capacity()].as_ref())
    }

    /// Drop every retained item.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    fn advance(&self, idx: usize) -> usize {
        (idx + 1) % self.capacity()
    }
}
