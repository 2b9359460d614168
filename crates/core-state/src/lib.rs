//! Last-known device words and the populated range of the active class.
//!
//! `WordCache` is the single source of truth for word values shown by the
//! monitor. Every writer (fetch results, poll results, push events and the
//! zero placeholders written ahead of a fetch) goes through `put`, which masks
//! to 16 bits and extends the `RangeTracker`.
//!
//! Invariants:
//! * `get(key, addr) == Some(w & 0xFFFF)` after `put(key, addr, w)`.
//! * The tracked range only grows between clears; `remove` leaves it alone.
//! * Not thread-safe; mutated from the single event-loop task.

pub mod range;

pub use range::{RangeTracker, WordRange};

use ahash::AHashMap;
use core_device::WordLookup;
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Debug, Default)]
pub struct WordCache {
    words: AHashMap<String, BTreeMap<u32, u16>>,
    range: RangeTracker,
}

impl WordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `word & 0xFFFF` at `(key, addr)` and extend the range to cover it.
    /// Returns true when the stored value changed (or was absent).
    pub fn put(&mut self, key: &str, addr: u32, word: u32) -> bool {
        let masked = (word & 0xFFFF) as u16;
        if !self.words.contains_key(key) {
            self.words.insert(key.to_string(), BTreeMap::new());
        }
        let previous = self
            .words
            .get_mut(key)
            .and_then(|slot| slot.insert(addr, masked));
        self.range.extend(key, addr);
        previous != Some(masked)
    }

    pub fn get(&self, key: &str, addr: u32) -> Option<u16> {
        self.words.get(key).and_then(|slot| slot.get(&addr)).copied()
    }

    /// Drop a single entry (eviction). The range is intentionally untouched.
    pub fn remove(&mut self, key: &str, addr: u32) -> Option<u16> {
        let slot = self.words.get_mut(key)?;
        let removed = slot.remove(&addr);
        if slot.is_empty() {
            self.words.remove(key);
        }
        removed
    }

    /// Cached word indices of `key` in ascending order.
    pub fn addrs(&self, key: &str) -> impl Iterator<Item = u32> + '_ {
        self.words
            .get(key)
            .into_iter()
            .flat_map(|slot| slot.keys().copied())
    }

    /// Every cached `(key, addr)` pair, ascending by address within a class.
    pub fn entries(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.words
            .iter()
            .flat_map(|(key, slot)| slot.keys().map(move |addr| (key.as_str(), *addr)))
    }

    /// Number of cached words for `key`.
    pub fn len(&self, key: &str) -> usize {
        self.words.get(key).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn range(&self) -> &RangeTracker {
        &self.range
    }

    /// Bound of the tracked class, if any.
    pub fn bounds(&self) -> Option<WordRange> {
        self.range.bounds()
    }

    /// Re-seed the range for a newly selected class.
    pub fn reset_range(&mut self, key: &str, start: u32, end: u32) {
        self.range.reset(key, start, end);
    }

    /// Empty every class and reset the range to none.
    pub fn clear(&mut self) {
        let dropped: usize = self.words.values().map(BTreeMap::len).sum();
        self.words.clear();
        self.range.clear();
        trace!(target: "state.cache", dropped, "cache_cleared");
    }
}

impl WordLookup for WordCache {
    fn word(&self, key: &str, addr: u32) -> Option<u16> {
        self.get(key, addr)
    }
}
