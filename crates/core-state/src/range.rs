//! Populated word-index bound for the active device class.
//!
//! The tracker is a bounding box: it grows outward to cover every index ever
//! written for the tracked class and never shrinks on its own. Eviction can
//! therefore leave holes inside the bound; only `clear` (or an explicit
//! `reset`) brings it back in.

/// Inclusive `[start, end]` word-index bound. Invariant: `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WordRange {
    pub start: u32,
    pub end: u32,
}

impl WordRange {
    /// Construct a range, swapping the endpoints if given out of order.
    pub fn new(a: u32, b: u32) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.start <= addr && addr <= self.end
    }

    /// Number of indices covered.
    pub fn span(&self) -> u64 {
        u64::from(self.end - self.start) + 1
    }

    fn cover(&mut self, addr: u32) -> bool {
        if addr < self.start {
            self.start = addr;
            true
        } else if addr > self.end {
            self.end = addr;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RangeTracker {
    class: Option<String>,
    bounds: Option<WordRange>,
}

impl RangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device class whose indices are tracked, if any.
    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    pub fn bounds(&self) -> Option<WordRange> {
        self.bounds
    }

    /// Extend the bound to cover `addr`. Writes for a class other than the
    /// tracked one are ignored; with no class tracked yet, `key` is adopted.
    /// Returns true when the bound moved.
    pub fn extend(&mut self, key: &str, addr: u32) -> bool {
        match self.class.as_deref() {
            Some(class) if class != key => return false,
            Some(_) => {}
            None => self.class = Some(key.to_string()),
        }
        match self.bounds.as_mut() {
            Some(bounds) => bounds.cover(addr),
            None => {
                self.bounds = Some(WordRange::new(addr, addr));
                true
            }
        }
    }

    /// Replace the tracked class and bound (target selection).
    pub fn reset(&mut self, key: &str, start: u32, end: u32) {
        self.class = Some(key.to_string());
        self.bounds = Some(WordRange::new(start, end));
    }

    pub fn clear(&mut self) {
        self.class = None;
        self.bounds = None;
    }
}
