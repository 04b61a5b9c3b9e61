//! The list of a task's running timers, sorted by expiration time
use crate::time::Timestamp;

/// Arena keys of running timers, in ascending order of their `end`. Timers
/// with equal `end` are kept in the order they were inserted.
///
/// A task seldom runs more than a few tens of timers at once, so a linear
/// scan beats maintaining a heap here.
#[derive(Debug, Default, Clone)]
pub(crate) struct ActiveList {
    keys: Vec<usize>,
}

impl ActiveList {
    pub(crate) const fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// The key of the timer that expires first.
    #[inline]
    pub(crate) fn first(&self) -> Option<usize> {
        self.keys.first().copied()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub(crate) fn contains(&self, key: usize) -> bool {
        self.keys.contains(&key)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.keys.iter().copied()
    }

    /// Insert `key` after every entry expiring at or before `end_of(key)`.
    ///
    /// `key` must not be in the list already.
    pub(crate) fn insert(&mut self, key: usize, end_of: impl Fn(usize) -> Timestamp) {
        debug_assert!(!self.contains(key));
        let end = end_of(key);
        let pos = self
            .keys
            .iter()
            .position(|&other| end_of(other) > end)
            .unwrap_or(self.keys.len());
        self.keys.insert(pos, key);
    }

    /// Unlink `key`. Returns `false` if it wasn't in the list.
    pub(crate) fn remove(&mut self, key: usize) -> bool {
        if let Some(pos) = self.keys.iter().position(|&other| other == key) {
            self.keys.remove(pos);
            true
        } else {
            false
        }
    }

    /// Remove and return the first entry.
    pub(crate) fn pop_first(&mut self) -> Option<usize> {
        if self.keys.is_empty() {
            None
        } else {
            Some(self.keys.remove(0))
        }
    }

    pub(crate) fn clear(&mut self) {
        self.keys.clear();
    }
}
