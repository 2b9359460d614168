//! Core event types and channel helpers for the register monitor.
//!
//! Everything that reaches the monitor from outside (push notifications and
//! status changes from the device backend, scroll proximity signals, operator
//! commands, periodic ticks) is normalized into [`Event`] and funneled through
//! one bounded channel consumed by the runtime loop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};

// -------------------------------------------------------------------------------------------------
// Channel Policy
// -------------------------------------------------------------------------------------------------
// The runtime loop consumes a bounded mpsc channel sized by `EVENT_CHANNEL_CAP`. Producers await
// `send`, so a slow consumer parks the sources instead of dropping push notifications. Push bursts
// are small (one event per backend scan), so the cap is generous rather than tight.
// -------------------------------------------------------------------------------------------------
pub const EVENT_CHANNEL_CAP: usize = 1024;

// -------------------------------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------------------------------
// Relaxed atomic counters, inspected by tests and logged by the runtime tick.
// -------------------------------------------------------------------------------------------------
pub static CHANNEL_SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
pub static SOURCE_EVENTS_FORWARDED: AtomicU64 = AtomicU64::new(0);

/// Top-level event enum consumed by the central event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Word values pushed by the backend for a monitored origin.
    Push(PushEvent),
    /// Coarse backend lifecycle change.
    Status(BackendStatus),
    /// Distance of the viewport edges from the ends of the rendered rows.
    Scroll(ScrollSignal),
    Command(CommandEvent),
    /// Periodic monotonic tick used for housekeeping (metrics logging).
    Tick,
    Shutdown,
}

/// Push notification: `words[i]` is the value at `addr + i`.
///
/// An empty `words` is a touch signal meaning "word `addr` is zero", not an
/// error. Values are raw as delivered by the transport; the cache masks them to
/// 16 bits on store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub key: String,
    pub addr: u32,
    pub words: Vec<u32>,
}

impl PushEvent {
    pub fn new(key: impl Into<String>, addr: u32, words: Vec<u32>) -> Self {
        Self {
            key: key.into(),
            addr,
            words,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    Running,
    Stopped,
    Other(String),
}

impl BackendStatus {
    /// Map a backend status label onto the known states.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "running" | "started" => BackendStatus::Running,
            "stopped" => BackendStatus::Stopped,
            _ => BackendStatus::Other(label.trim().to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, BackendStatus::Running)
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendStatus::Running => f.write_str("running"),
            BackendStatus::Stopped => f.write_str("stopped"),
            BackendStatus::Other(label) => f.write_str(label),
        }
    }
}

/// Scroll proximity: how far the visible area is from the first and last
/// rendered rows, in the unit the presentation layer measures scrolling in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollSignal {
    pub distance_from_top: u32,
    pub distance_from_bottom: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandEvent {
    /// Address text as typed by the operator (parsed by the runtime).
    SelectTarget(String),
    SetFormat(String),
    Clear,
    Quit,
}

// -------------------------------------------------------------------------------------------------
// Async Event Sources
// -------------------------------------------------------------------------------------------------
// Every producer (backend subscriptions, stdin commands, ticks) registers through one trait so the
// runtime can spawn them uniformly and cancel them through the returned handles. On channel send
// failure (consumer dropped) a source must terminate promptly.

/// Trait implemented by any async event producer. Implementors usually hold configuration and
/// spawn one background task that pushes `Event`s into the shared channel.
pub trait AsyncEventSource: Send + 'static {
    /// Human-readable stable identifier (used for logging / diagnostics).
    fn name(&self) -> &'static str;
    /// Consume self and spawn the background task, returning a JoinHandle. Implementors should
    /// stop when `tx.send(..).await` returns Err (channel closed) or on their own internal stop
    /// condition. Aborting the handle cancels the subscription.
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()>;
}

/// Registry of event sources spawned together at startup.
pub struct EventSourceRegistry {
    sources: Vec<Box<dyn AsyncEventSource>>,
}

impl Default for EventSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn register<S: AsyncEventSource>(&mut self, src: S) {
        self.sources.push(Box::new(src));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Spawn all registered sources, returning their JoinHandles. Each source receives its own
    /// clone of `tx`; during shutdown the caller drops its final `Sender` before awaiting the
    /// handles so the sources observe the closed channel and exit cooperatively.
    pub fn spawn_all(&mut self, tx: &Sender<Event>) -> Vec<JoinHandle<()>> {
        // Take ownership so duplicate spawns are prevented if called twice.
        let mut out = Vec::with_capacity(self.sources.len());
        for src in self.sources.drain(..) {
            let name = src.name();
            tracing::info!(target: "runtime.events", source = name, "spawning event source");
            out.push(src.spawn(tx.clone()));
        }
        out
    }
}

/// Built-in monotonic tick source. Emits `Event::Tick` every configured interval.
pub struct TickEventSource {
    interval: std::time::Duration,
}

impl TickEventSource {
    pub fn new(interval: std::time::Duration) -> Self {
        Self { interval }
    }
}

impl AsyncEventSource for TickEventSource {
    fn name(&self) -> &'static str {
        "tick"
    }
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let dur = self.interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dur);
            loop {
                interval.tick().await;
                if tx.send(Event::Tick).await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Forwards a stream of events (a backend push or status subscription, a
/// command reader) into the runtime channel until either side ends.
pub struct StreamEventSource<S> {
    name: &'static str,
    stream: S,
}

impl<S> StreamEventSource<S>
where
    S: Stream<Item = Event> + Send + Unpin + 'static,
{
    pub fn new(name: &'static str, stream: S) -> Self {
        Self { name, stream }
    }
}

impl<S> AsyncEventSource for StreamEventSource<S>
where
    S: Stream<Item = Event> + Send + Unpin + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let StreamEventSource { name, mut stream } = *self;
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = tx.closed() => break,
                    next = stream.next() => next,
                };
                let Some(event) = next else {
                    tracing::debug!(target: "runtime.events", source = name, "source_stream_ended");
                    break;
                };
                if tx.send(event).await.is_err() {
                    CHANNEL_SEND_FAILURES.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                SOURCE_EVENTS_FORWARDED.fetch_add(1, Ordering::Relaxed);
            }
        })
    }
}

#[cfg(test)]
mod tests_async_sources {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct MockOnceSource {
        emitted: bool,
    }
    impl MockOnceSource {
        fn new() -> Self {
            Self { emitted: false }
        }
    }
    impl AsyncEventSource for MockOnceSource {
        fn name(&self) -> &'static str {
            "mock_once"
        }
        fn spawn(mut self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
            tokio::spawn(async move {
                if !self.emitted {
                    let _ = tx.send(Event::Shutdown).await;
                    self.emitted = true;
                }
            })
        }
    }

    #[tokio::test]
    async fn registry_spawns_and_emits() {
        let (tx, mut rx) = mpsc::channel::<Event>(8);
        let mut reg = EventSourceRegistry::new();
        reg.register(MockOnceSource::new());
        reg.register(TickEventSource::new(Duration::from_millis(10)));
        assert_eq!(reg.len(), 2);
        let handles = reg.spawn_all(&tx);
        assert!(reg.is_empty(), "spawn_all drains the registry");
        let mut got_shutdown = false;
        let mut got_tick = false;
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(100) && (!got_shutdown || !got_tick) {
            if let Ok(Some(ev)) = tokio::time::timeout(Duration::from_millis(5), rx.recv()).await
            {
                match ev {
                    Event::Shutdown => got_shutdown = true,
                    Event::Tick => got_tick = true,
                    _ => {}
                }
            }
        }
        assert!(got_shutdown, "expected mock source to emit");
        assert!(got_tick, "expected tick source to emit tick events");

        drop(tx);
        drop(rx);
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_millis(20), handle).await;
        }
    }

    struct MockCloseSource {
        flag: Arc<AtomicBool>,
    }

    impl AsyncEventSource for MockCloseSource {
        fn name(&self) -> &'static str {
            "mock_close"
        }

        fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
            let flag = self.flag;
            tokio::spawn(async move {
                tx.closed().await;
                flag.store(true, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test]
    async fn registry_sources_exit_on_channel_drop() {
        let (tx, rx) = mpsc::channel::<Event>(8);
        let mut reg = EventSourceRegistry::new();
        let flag = Arc::new(AtomicBool::new(false));
        reg.register(MockCloseSource { flag: flag.clone() });
        let handles = reg.spawn_all(&tx);

        drop(tx);
        drop(rx);

        for handle in handles {
            match tokio::time::timeout(Duration::from_millis(50), handle).await {
                Ok(join_res) => join_res.expect("source task should exit cleanly"),
                Err(_) => panic!("source task did not observe channel closure"),
            }
        }

        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stream_source_forwards_in_order_then_stops() {
        let (tx, mut rx) = mpsc::channel::<Event>(8);
        let events = vec![
            Event::Push(PushEvent::new("D", 0, vec![1, 2])),
            Event::Status(BackendStatus::Running),
        ];
        let source = StreamEventSource::new("backend", tokio_stream::iter(events.clone()));
        let handle = Box::new(source).spawn(tx);

        assert_eq!(rx.recv().await, Some(events[0].clone()));
        assert_eq!(rx.recv().await, Some(events[1].clone()));
        tokio::time::timeout(Duration::from_millis(50), handle)
            .await
            .expect("stream source should stop when its stream ends")
            .expect("join");
        assert_eq!(rx.recv().await, None, "sender dropped with the task");
    }

    #[tokio::test]
    async fn aborting_handle_cancels_subscription() {
        let (tx, mut rx) = mpsc::channel::<Event>(8);
        let source = StreamEventSource::new("pending", tokio_stream::pending::<Event>());
        let handle = Box::new(source).spawn(tx);
        handle.abort();
        let err = handle.await.expect_err("aborted task");
        assert!(err.is_cancelled());
        assert_eq!(rx.recv().await, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_map_to_states() {
        assert_eq!(BackendStatus::from_label("Running"), BackendStatus::Running);
        assert_eq!(BackendStatus::from_label(" stopped "), BackendStatus::Stopped);
        let other = BackendStatus::from_label("booting");
        assert_eq!(other, BackendStatus::Other("booting".into()));
        assert!(!other.is_running());
        assert_eq!(other.to_string(), "booting");
    }

    #[test]
    fn push_event_constructor() {
        let ev = PushEvent::new("W", 3, vec![]);
        assert_eq!(ev.key, "W");
        assert_eq!(ev.addr, 3);
        assert!(ev.words.is_empty());
    }
}
