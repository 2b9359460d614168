//! Single-flight range fetching.
//!
//! At most one read is outstanding. A `fetch_range` issued while another is in
//! flight is dropped, not queued; the caller retries on the next scroll signal.
//! Every issued read reports exactly one `FetchCompletion`, including when the
//! read fails or its task is torn down, so the in-flight ticket is always
//! released by `settle`.
//!
//! Completions carry the coordinator generation at issue time. `invalidate`
//! bumps it, and a completion from an older generation is discarded without
//! touching the cache.

use crate::metrics::SyncMetrics;
use crate::reader::WordReader;
use crate::store_words;
use core_state::{WordCache, WordRange};
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Words(Vec<u16>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCompletion {
    id: u64,
    generation: u64,
    pub key: String,
    pub start: u32,
    pub count: u32,
    pub outcome: FetchOutcome,
}

/// Sends the completion when the read finishes, or a failure when the task is
/// dropped before it could.
struct CompletionGuard {
    tx: UnboundedSender<FetchCompletion>,
    pending: Option<FetchCompletion>,
}

impl CompletionGuard {
    fn finish(mut self, outcome: FetchOutcome) {
        if let Some(mut completion) = self.pending.take() {
            completion.outcome = outcome;
            let _ = self.tx.send(completion);
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(completion) = self.pending.take() {
            let _ = self.tx.send(completion);
        }
    }
}

pub struct FetchCoordinator<R> {
    reader: Arc<R>,
    in_flight: Option<u64>,
    generation: u64,
    next_id: u64,
    tx: UnboundedSender<FetchCompletion>,
    rx: UnboundedReceiver<FetchCompletion>,
    metrics: Arc<SyncMetrics>,
}

impl<R: WordReader> FetchCoordinator<R> {
    pub fn new(reader: Arc<R>, metrics: Arc<SyncMetrics>) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            reader,
            in_flight: None,
            generation: 0,
            next_id: 0,
            tx,
            rx,
            metrics,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start reading `count` words of `key` from `start`. Returns false (and
    /// does nothing) when a fetch is already outstanding or `count` is zero.
    pub fn fetch_range(&mut self, key: &str, start: u32, count: u32) -> bool {
        if let Some(outstanding) = self.in_flight {
            self.metrics.incr_dropped();
            debug!(target: "sync.fetch", key, start, count, outstanding, "fetch_dropped");
            return false;
        }
        if count == 0 {
            return false;
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.in_flight = Some(id);
        self.metrics.incr_issued();
        debug!(target: "sync.fetch", id, key, start, count, generation = self.generation, "fetch_issued");

        let guard = CompletionGuard {
            tx: self.tx.clone(),
            pending: Some(FetchCompletion {
                id,
                generation: self.generation,
                key: key.to_string(),
                start,
                count,
                outcome: FetchOutcome::Failed("fetch task dropped before completion".into()),
            }),
        };
        let reader = Arc::clone(&self.reader);
        let key = key.to_string();
        tokio::spawn(async move {
            let outcome = match reader.read_words(&key, start, count as usize).await {
                Ok(words) => FetchOutcome::Words(words),
                Err(e) => FetchOutcome::Failed(format!("{e:#}")),
            };
            guard.finish(outcome);
        });
        true
    }

    /// Next completion reported by a fetch task. Pending while nothing is
    /// outstanding.
    pub async fn next_completion(&mut self) -> Option<FetchCompletion> {
        self.rx.recv().await
    }

    /// Release the single-flight ticket and store the result. Words beyond
    /// `count` are ignored; a failure writes `count` zero placeholders. Returns
    /// the written span, or `None` for a stale completion.
    pub fn settle(&mut self, completion: FetchCompletion, cache: &mut WordCache) -> Option<WordRange> {
        if self.in_flight == Some(completion.id) {
            self.in_flight = None;
        }
        if completion.generation != self.generation {
            self.metrics.incr_stale();
            debug!(
                target: "sync.fetch",
                id = completion.id,
                completion_generation = completion.generation,
                generation = self.generation,
                "fetch_stale_discarded"
            );
            return None;
        }
        let FetchCompletion {
            key,
            start,
            count,
            outcome,
            ..
        } = completion;
        match outcome {
            FetchOutcome::Words(words) => {
                let take = words.len().min(count as usize);
                trace!(target: "sync.fetch", key = %key, start, received = words.len(), "fetch_settled");
                store_words(cache, &key, start, words.into_iter().take(take).map(u32::from))
            }
            FetchOutcome::Failed(error) => {
                self.metrics.incr_failed();
                warn!(target: "sync.fetch", key = %key, start, count, error = %error, "fetch_failed_zero_filled");
                store_words(cache, &key, start, std::iter::repeat_n(0, count as usize))
            }
        }
    }

    /// Abandon the outstanding ticket and discard every result issued so far.
    pub fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(id) = self.in_flight.take() {
            debug!(target: "sync.fetch", id, generation = self.generation, "fetch_abandoned");
        }
    }
}
