//! Insertion-ordered, token-addressed storage for a handful of elements.
//!
//! Observer lists and middleware lists almost always hold zero, one or two
//! entries. [`Bag`] keeps the first two entries inline and only moves to the
//! heap when a third one arrives, so the common path never allocates.
//!
//! # Example
//!
//! ```
//! use alice_core::Bag;
//!
//! let mut bag = Bag::new();
//! let a = bag.append("a");
//! let b = bag.append("b");
//! bag.append("c");
//!
//! assert_eq!(bag.remove_value(b), Some("b"));
//! assert_eq!(bag.remove_value(b), None);
//! assert_eq!(bag.iter().copied().collect::<Vec<_>>(), vec!["a", "c"]);
//! assert_eq!(bag.value(a), Some(&"a"));
//! ```

use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BAG_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque handle for an element stored in a [`Bag`].
///
/// A token only addresses elements of the bag that issued it; handing it to
/// another bag finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BagToken {
    bag: u64,
    seq: u64,
}

/// Insertion-ordered collection addressed by [`BagToken`]s.
///
/// Sequence numbers grow monotonically and are never reused, so entries stay
/// sorted by sequence and lookups are a binary search. The bag has no
/// synchronisation of its own; wrap it in a [`Lock`](crate::Lock) to share it.
#[derive(Debug)]
pub struct Bag<T> {
    id: u64,
    next: u64,
    entries: SmallVec<[(u64, T); 2]>,
}

impl<T> Bag<T> {
    /// Create an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_BAG_ID.fetch_add(1, Ordering::Relaxed),
            next: 0,
            entries: SmallVec::new(),
        }
    }

    /// Append `value`, returning the token that addresses it.
    pub fn append(&mut self, value: T) -> BagToken {
        let seq = self.next;
        self.next += 1;
        self.entries.push((seq, value));
        BagToken { bag: self.id, seq }
    }

    fn position(&self, token: BagToken) -> Option<usize> {
        if token.bag != self.id {
            return None;
        }
        self.entries
            .binary_search_by_key(&token.seq, |(seq, _)| *seq)
            .ok()
    }

    /// Look up the element for `token`, if it is still present.
    #[must_use]
    pub fn value(&self, token: BagToken) -> Option<&T> {
        self.position(token).map(|idx| &self.entries[idx].1)
    }

    /// Remove and return the element for `token`.
    ///
    /// Removing the same token twice returns `None` the second time.
    pub fn remove_value(&mut self, token: BagToken) -> Option<T> {
        let idx = self.position(token)?;
        Some(self.entries.remove(idx).1)
    }

    /// Remove every element. Tokens issued earlier stay invalid.
    pub fn remove_all(&mut self) {
        self.entries.clear();
    }

    /// Remove every element, yielding them in insertion order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..).map(|(_, value)| value)
    }

    /// Number of elements currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bag holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the elements still live in the inline slots.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        !self.entries.spilled()
    }

    /// Iterate over the elements in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter().map(|(_, value)| value)
    }
}

impl<T> Default for Bag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IntoIterator for Bag<T> {
    type Item = T;
    type IntoIter = std::iter::Map<smallvec::IntoIter<[(u64, T); 2]>, fn((u64, T)) -> T>;

    fn into_iter(self) -> Self::IntoIter {
        fn value<T>((_, value): (u64, T)) -> T {
            value
        }
        self.entries.into_iter().map(value as fn((u64, T)) -> T)
    }
}

impl<T> FromIterator<T> for Bag<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut bag = Self::new();
        for value in iter {
            bag.append(value);
        }
        bag
    }
}
