//! Push and poll update sources for the monitored target.
//!
//! Updates are accepted only when their origin `(key, addr)` equals the active
//! target; with no target set everything is ignored. Push events are applied
//! synchronously by the caller. Polling runs as one spawned interval task whose
//! results come back over a channel; each result carries the poll generation so
//! anything queued before `stop_polling` is discarded.

use crate::MonitorTarget;
use crate::metrics::SyncMetrics;
use crate::reader::WordReader;
use crate::store_words;
use core_events::PushEvent;
use core_state::{WordCache, WordRange};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

/// Words read by the poll timer for `addr..addr + words.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollUpdate {
    generation: u64,
    pub key: String,
    pub addr: u32,
    pub words: Vec<u16>,
}

pub struct DualSourceSync {
    target: Option<MonitorTarget>,
    poll: Option<JoinHandle<()>>,
    poll_generation: u64,
    tx: UnboundedSender<PollUpdate>,
    rx: UnboundedReceiver<PollUpdate>,
    metrics: Arc<SyncMetrics>,
}

impl DualSourceSync {
    pub fn new(metrics: Arc<SyncMetrics>) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            target: None,
            poll: None,
            poll_generation: 0,
            tx,
            rx,
            metrics,
        }
    }

    pub fn target(&self) -> Option<&MonitorTarget> {
        self.target.as_ref()
    }

    pub fn set_target(&mut self, target: Option<MonitorTarget>) {
        self.target = target;
    }

    /// True only when a target is set and equals the origin pair.
    pub fn accepts(&self, key: &str, addr: u32) -> bool {
        self.target
            .as_ref()
            .is_some_and(|t| t.key == key && t.addr == addr)
    }

    /// Apply a push event. An empty payload writes zero at `addr`. Returns the
    /// written span, or `None` when the event was filtered.
    pub fn apply_push(&self, event: &PushEvent, cache: &mut WordCache) -> Option<WordRange> {
        if !self.accepts(&event.key, event.addr) {
            self.metrics.incr_push_filtered();
            trace!(target: "sync.push", key = %event.key, addr = event.addr, "push_filtered");
            return None;
        }
        self.metrics.incr_push_applied();
        if event.words.is_empty() {
            cache.put(&event.key, event.addr, 0);
            return Some(WordRange::new(event.addr, event.addr));
        }
        trace!(target: "sync.push", key = %event.key, addr = event.addr, words = event.words.len(), "push_applied");
        store_words(cache, &event.key, event.addr, event.words.iter().copied())
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    /// Start reading `count` words from `origin` every `interval`, replacing any
    /// running timer. The first read happens one interval after the call.
    pub fn start_polling<R: WordReader>(
        &mut self,
        reader: Arc<R>,
        origin: MonitorTarget,
        count: u32,
        interval: Duration,
    ) {
        self.stop_polling();
        let generation = self.poll_generation;
        let tx = self.tx.clone();
        debug!(target: "sync.poll", key = %origin.key, addr = origin.addr, count, interval_ms = interval.as_millis() as u64, "poll_started");
        self.poll = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match reader.read_words(&origin.key, origin.addr, count as usize).await {
                    Ok(words) => {
                        let update = PollUpdate {
                            generation,
                            key: origin.key.clone(),
                            addr: origin.addr,
                            words,
                        };
                        if tx.send(update).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(target: "sync.poll", key = %origin.key, addr = origin.addr, error = %format!("{e:#}"), "poll_read_failed");
                    }
                }
            }
        }));
    }

    /// Abort the poll timer. Results already queued are discarded on apply.
    pub fn stop_polling(&mut self) {
        self.poll_generation = self.poll_generation.wrapping_add(1);
        if let Some(handle) = self.poll.take() {
            handle.abort();
            debug!(target: "sync.poll", "poll_stopped");
        }
    }

    /// Next poll result. Pending while no timer produces results.
    pub async fn next_poll(&mut self) -> Option<PollUpdate> {
        self.rx.recv().await
    }

    pub fn apply_poll(&self, update: PollUpdate, cache: &mut WordCache) -> Option<WordRange> {
        if update.generation != self.poll_generation {
            self.metrics.incr_stale();
            trace!(target: "sync.poll", key = %update.key, addr = update.addr, "poll_stale_discarded");
            return None;
        }
        if !self.accepts(&update.key, update.addr) {
            return None;
        }
        self.metrics.incr_poll_applied();
        store_words(cache, &update.key, update.addr, update.words.into_iter().map(u32::from))
    }
}

impl Drop for DualSourceSync {
    fn drop(&mut self) {
        if let Some(handle) = self.poll.take() {
            handle.abort();
        }
    }
}
