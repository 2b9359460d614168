//! Windowed synchronization engine.
//!
//! Keeps a window of device words fresh around the monitored target: the
//! `ViewportController` owns the word cache, issues single-flight range
//! fetches through a `WordReader`, applies push and poll updates for the
//! active target, evicts rows far from the populated range and pushes decoded
//! rows into a `RenderSink`.
//!
//! All mutation happens on the task that owns the controller. Reads and the
//! poll timer run as spawned tasks and report back over channels drained by
//! `ViewportController::next_activity`.

pub mod controller;
pub mod dual_source;
pub mod evict;
pub mod fetch;
pub mod metrics;
pub mod reader;
pub mod sink;

pub use controller::{Activity, ViewportController};
pub use dual_source::{DualSourceSync, PollUpdate};
pub use evict::KeepWindow;
pub use fetch::{FetchCompletion, FetchCoordinator, FetchOutcome};
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};
pub use reader::WordReader;
pub use sink::RenderSink;

use core_device::DeviceAddress;
use core_state::{WordCache, WordRange};

/// Active `(key, addr)` focus of the monitor.
pub type MonitorTarget = DeviceAddress;

/// Write `words[i]` at `start + i`, stopping at the end of the address space.
/// Returns the written span, or `None` when nothing was written.
pub(crate) fn store_words<I>(
    cache: &mut WordCache,
    key: &str,
    start: u32,
    words: I,
) -> Option<WordRange>
where
    I: IntoIterator<Item = u32>,
{
    let mut last = None;
    for (offset, word) in words.into_iter().enumerate() {
        let Some(addr) = u32::try_from(offset).ok().and_then(|o| start.checked_add(o)) else {
            break;
        };
        cache.put(key, addr, word);
        last = Some(addr);
    }
    last.map(|end| WordRange::new(start, end))
}
