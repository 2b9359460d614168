//! Viewport controller: the single owner of monitor state.
//!
//! Lifecycle: `new` → `select_target` → scroll / push / activity handling →
//! `clear` or another `select_target` → `dispose`. Each decoded row is
//! remembered so the sink only hears about rows whose rendering changed.

use crate::MonitorTarget;
use crate::dual_source::{DualSourceSync, PollUpdate};
use crate::evict::{self, KeepWindow};
use crate::fetch::{FetchCompletion, FetchCoordinator};
use crate::metrics::{SyncMetrics, SyncMetricsSnapshot};
use crate::reader::WordReader;
use crate::sink::RenderSink;
use ahash::AHashMap;
use core_config::{Config, ViewportLimits};
use core_device::{BitConfig, DecodedWord, FormatMode, bit_config, decode};
use core_events::PushEvent;
use core_state::{WordCache, WordRange};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Work produced by spawned tasks, to be applied with `handle_activity`.
#[derive(Debug)]
pub enum Activity {
    Fetched(FetchCompletion),
    Polled(PollUpdate),
}

pub struct ViewportController<R: WordReader, S: RenderSink> {
    reader: Arc<R>,
    sink: S,
    limits: ViewportLimits,
    poll_enabled: bool,
    poll_count: u32,
    poll_interval: Duration,
    push_available: bool,
    format: FormatMode,
    cache: WordCache,
    fetch: FetchCoordinator<R>,
    sources: DualSourceSync,
    rendered: AHashMap<(String, u32), DecodedWord>,
    armed: bool,
    metrics: Arc<SyncMetrics>,
}

impl<R: WordReader, S: RenderSink> ViewportController<R, S> {
    pub fn new(reader: Arc<R>, sink: S, config: &Config) -> Self {
        let metrics = Arc::new(SyncMetrics::default());
        Self {
            fetch: FetchCoordinator::new(Arc::clone(&reader), Arc::clone(&metrics)),
            sources: DualSourceSync::new(Arc::clone(&metrics)),
            reader,
            sink,
            limits: config.effective,
            poll_enabled: config.file.poll.enabled,
            poll_count: config.file.poll.count,
            poll_interval: config.poll_interval(),
            push_available: true,
            format: FormatMode::default(),
            cache: WordCache::new(),
            rendered: AHashMap::new(),
            armed: false,
            metrics,
        }
    }

    /// Whether push delivery reaches this controller. When it does not and
    /// polling is enabled, `select_target` starts the poll timer.
    pub fn set_push_available(&mut self, available: bool) {
        self.push_available = available;
    }

    pub fn target(&self) -> Option<&MonitorTarget> {
        self.sources.target()
    }

    pub fn format(&self) -> FormatMode {
        self.format
    }

    pub fn cache(&self) -> &WordCache {
        &self.cache
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_polling(&self) -> bool {
        self.sources.is_polling()
    }

    pub fn fetch_in_flight(&self) -> bool {
        self.fetch.is_in_flight()
    }

    pub fn metrics_snapshot(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Drop all state and start monitoring `(key, addr)`: zero rows for the
    /// visible window, an initial fetch of the window plus the forward
    /// prefetch, and the poll timer when push delivery is unavailable.
    pub fn select_target(&mut self, key: &str, addr: u32) {
        self.clear();
        let target = MonitorTarget::new(key, addr);
        self.sources.set_target(Some(target.clone()));
        self.sink.target_changed(Some(&target), bit_config(key));

        let end = addr.saturating_add(self.limits.visible_count.saturating_sub(1));
        self.cache.reset_range(key, addr, end);
        self.write_placeholders(key, addr, end);

        let room = u64::from(u32::MAX) - u64::from(addr) + 1;
        let wanted = u64::from(self.limits.visible_count) + u64::from(self.limits.prefetch_after);
        let count = u32::try_from(wanted.min(room)).unwrap_or(u32::MAX);
        self.fetch.fetch_range(key, addr, count);
        self.armed = true;

        if !self.push_available && self.poll_enabled {
            self.sources.start_polling(
                Arc::clone(&self.reader),
                target,
                self.poll_count,
                self.poll_interval,
            );
        }
        info!(target: "sync.viewport", key, addr, fetch = count, polling = self.is_polling(), "target_selected");
    }

    /// React to the visible area approaching either end of the rendered rows.
    /// Placeholders are always written; the read itself is dropped while
    /// another one is outstanding.
    pub fn on_scroll_proximity(&mut self, from_top: u32, from_bottom: u32) {
        if !self.armed {
            return;
        }
        let Some(key) = self.sources.target().map(|t| t.key.clone()) else {
            return;
        };
        let threshold = self.limits.scroll_threshold;

        if from_top < threshold {
            self.prepend(&key);
        }
        if from_bottom < threshold {
            self.append(&key);
        }
    }

    fn prepend(&mut self, key: &str) {
        let Some(bounds) = self.cache.bounds() else {
            return;
        };
        let count = self.limits.prefetch_before.min(bounds.start);
        if count == 0 {
            return;
        }
        let start = bounds.start - count;
        self.write_placeholders(key, start, bounds.start - 1);
        let issued = self.fetch.fetch_range(key, start, count);
        debug!(target: "sync.viewport", key, start, count, issued, "prepend_requested");
    }

    fn append(&mut self, key: &str) {
        let Some(start) = self.cache.bounds().and_then(|b| b.end.checked_add(1)) else {
            return;
        };
        let count = self.limits.prefetch_after.min(u32::MAX - start + 1);
        if count == 0 {
            return;
        }
        self.write_placeholders(key, start, start + (count - 1));
        let issued = self.fetch.fetch_range(key, start, count);
        debug!(target: "sync.viewport", key, start, count, issued, "append_requested");
        self.evict(key);
    }

    /// Stop polling, drop every cached and rendered row, disarm the scroll
    /// signal and forget the target. An outstanding read is left to finish but
    /// its result is discarded.
    pub fn clear(&mut self) {
        self.sources.stop_polling();
        self.fetch.invalidate();
        let had_target = self.sources.target().is_some();
        self.sources.set_target(None);
        for (key, addr) in self.rendered.keys() {
            self.sink.remove_row(key, *addr);
        }
        self.rendered.clear();
        self.cache.clear();
        self.armed = false;
        if had_target {
            self.sink.target_changed(None, BitConfig::HEX16);
            debug!(target: "sync.viewport", "viewport_cleared");
        }
    }

    /// Clear and hand the sink back.
    pub fn dispose(mut self) -> S {
        self.clear();
        let Self { sink, .. } = self;
        sink
    }

    /// Switch the display format and re-render every cached row.
    pub fn set_format(&mut self, mode: FormatMode) {
        if mode == self.format {
            return;
        }
        self.format = mode;
        let rows: Vec<(String, u32)> = self
            .cache
            .entries()
            .map(|(key, addr)| (key.to_string(), addr))
            .collect();
        for (key, addr) in &rows {
            self.render_row(key, *addr);
        }
        debug!(target: "sync.viewport", format = %mode, rows = rows.len(), "format_changed");
    }

    /// Apply a push event for the active target; others are ignored.
    pub fn on_push(&mut self, event: &PushEvent) {
        if let Some(span) = self.sources.apply_push(event, &mut self.cache) {
            self.render_span(&event.key, span);
        }
    }

    /// Wait for the next fetch completion or poll result. Cancel safe.
    pub async fn next_activity(&mut self) -> Option<Activity> {
        tokio::select! {
            Some(done) = self.fetch.next_completion() => Some(Activity::Fetched(done)),
            Some(update) = self.sources.next_poll() => Some(Activity::Polled(update)),
            else => None,
        }
    }

    pub fn handle_activity(&mut self, activity: Activity) {
        match activity {
            Activity::Fetched(done) => {
                let key = done.key.clone();
                if let Some(span) = self.fetch.settle(done, &mut self.cache) {
                    self.render_span(&key, span);
                }
            }
            Activity::Polled(update) => {
                let key = update.key.clone();
                if let Some(span) = self.sources.apply_poll(update, &mut self.cache) {
                    self.render_span(&key, span);
                }
            }
        }
    }

    fn write_placeholders(&mut self, key: &str, start: u32, end: u32) {
        for addr in start..=end {
            self.cache.put(key, addr, 0);
        }
        self.render_span(key, WordRange::new(start, end));
    }

    fn render_span(&mut self, key: &str, span: WordRange) {
        // An even row under a paired mode depends on the odd row after it.
        if self.format.is_paired() && span.start % 2 == 1 {
            self.render_row(key, span.start - 1);
        }
        for addr in span.start..=span.end {
            self.render_row(key, addr);
        }
    }

    fn render_row(&mut self, key: &str, addr: u32) {
        let Some(decoded) = decode(&self.cache, key, addr, self.format) else {
            return;
        };
        let slot = (key.to_string(), addr);
        let was_continuation = match self.rendered.get(&slot) {
            Some(prev) if *prev == decoded => return,
            Some(prev) => prev.continuation,
            None => false,
        };
        if decoded.continuation != was_continuation {
            self.sink
                .mark_paired_continuation(key, addr, decoded.continuation);
        }
        self.sink
            .upsert_row(key, addr, &decoded.bits, &decoded.display, &decoded.raw);
        self.metrics.incr_rendered();
        self.rendered.insert(slot, decoded);
    }

    fn evict(&mut self, key: &str) {
        let Some(bounds) = self.cache.bounds() else {
            return;
        };
        let keep = KeepWindow::around(bounds, self.limits.prefetch_after);
        let rows: Vec<u32> = self.cache.addrs(key).collect();
        let victims = evict::plan(&rows, keep, self.limits.max_rendered_rows);
        if victims.is_empty() {
            return;
        }
        for addr in &victims {
            self.cache.remove(key, *addr);
            self.rendered.remove(&(key.to_string(), *addr));
            self.sink.remove_row(key, *addr);
        }
        self.metrics.add_evicted(victims.len() as u64);
        debug!(
            target: "sync.evict",
            key,
            removed = victims.len(),
            remaining = self.cache.len(key),
            keep_start = keep.start,
            keep_end = keep.end,
            "rows_evicted"
        );
    }
}
