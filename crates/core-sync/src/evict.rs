//! Eviction planning.
//!
//! Rows are ranked by distance from the keep-window center, farthest first,
//! and removed until the count fits the cap. Rows inside the keep-window are
//! never removed, so the cap stays exceeded when the window alone is larger.

use core_state::WordRange;

/// Inclusive word-index span eviction must never touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepWindow {
    pub start: u32,
    pub end: u32,
}

impl KeepWindow {
    /// `range` widened by `margin` on both sides, saturating at the ends of the
    /// address space.
    pub fn around(range: WordRange, margin: u32) -> Self {
        Self {
            start: range.start.saturating_sub(margin),
            end: range.end.saturating_add(margin),
        }
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.start <= addr && addr <= self.end
    }

    // Twice the distance from the center, kept integral.
    fn distance2(&self, addr: u32) -> u64 {
        let center2 = u64::from(self.start) + u64::from(self.end);
        (2 * u64::from(addr)).abs_diff(center2)
    }
}

/// Rows to remove so that at most `max_rows` remain, never touching `keep`.
pub fn plan(rows: &[u32], keep: KeepWindow, max_rows: usize) -> Vec<u32> {
    let mut excess = rows.len().saturating_sub(max_rows);
    if excess == 0 {
        return Vec::new();
    }
    let mut ranked: Vec<u32> = rows.iter().copied().filter(|a| !keep.contains(*a)).collect();
    ranked.sort_by(|a, b| keep.distance2(*b).cmp(&keep.distance2(*a)).then(a.cmp(b)));

    let mut victims = Vec::with_capacity(excess.min(ranked.len()));
    for addr in ranked {
        if excess == 0 {
            break;
        }
        victims.push(addr);
        excess -= 1;
    }
    victims
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn nothing_inside_keep_window_is_removed() {
        let rows: Vec<u32> = (0..=320).collect();
        let keep = KeepWindow { start: 0, end: 320 };
        assert!(plan(&rows, keep, 300).is_empty());
    }

    #[test]
    fn farthest_rows_go_first() {
        let rows: Vec<u32> = (0..20).collect();
        let keep = KeepWindow { start: 8, end: 12 };
        let victims = plan(&rows, keep, 16);
        assert_eq!(victims, vec![0, 1, 19, 2]);
    }

    #[test]
    fn under_cap_is_noop() {
        let keep = KeepWindow { start: 0, end: 0 };
        assert!(plan(&[5, 6, 7], keep, 3).is_empty());
    }

    #[test]
    fn window_saturates_at_zero() {
        let keep = KeepWindow::around(WordRange::new(10, 40), 50);
        assert_eq!(keep, KeepWindow { start: 0, end: 90 });
        let top = KeepWindow::around(WordRange::new(u32::MAX - 1, u32::MAX), 50);
        assert_eq!(top.end, u32::MAX);
    }

    proptest! {
        #[test]
        fn plan_respects_window_and_cap(
            rows in proptest::collection::btree_set(0u32..2_000, 0..400),
            start in 0u32..2_000,
            len in 0u32..400,
            cap in 0usize..400,
        ) {
            let rows: Vec<u32> = rows.into_iter().collect();
            let keep = KeepWindow { start, end: start + len };
            let victims = plan(&rows, keep, cap);
            prop_assert!(victims.iter().all(|a| !keep.contains(*a)));
            let outside = rows.iter().filter(|a| !keep.contains(**a)).count();
            let expected = rows.len().saturating_sub(cap).min(outside);
            prop_assert_eq!(victims.len(), expected);
        }
    }
}
