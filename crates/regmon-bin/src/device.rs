//! In-memory device backend used by the demo binary.
//!
//! Words start from a deterministic seed and drift each time the push
//! simulator steps the watched window. Reads can be made to fail every Nth
//! call to exercise the zero-fill path.

use ahash::AHashMap;
use anyhow::{Result, anyhow};
use core_device::DeviceAddress;
use core_events::{AsyncEventSource, BackendStatus, Event, PushEvent};
use core_sync::WordReader;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

pub struct SimulatedDevice {
    words: Mutex<AHashMap<(String, u32), u16>>,
    reads: AtomicU64,
    fail_every: Option<u64>,
    latency: Duration,
}

impl SimulatedDevice {
    pub fn new(fail_every: Option<u64>, latency: Duration) -> Self {
        Self {
            words: Mutex::new(AHashMap::new()),
            reads: AtomicU64::new(0),
            fail_every: fail_every.filter(|n| *n > 0),
            latency,
        }
    }

    fn seed(key: &str, addr: u32) -> u16 {
        let salt = key
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        (addr.wrapping_mul(97).wrapping_add(salt) & 0x03FF) as u16
    }

    /// Current values of `count` words from `addr`.
    pub fn snapshot(&self, key: &str, addr: u32, count: usize) -> Result<Vec<u16>> {
        let words = self
            .words
            .lock()
            .map_err(|_| anyhow!("device state poisoned"))?;
        Ok((0..count)
            .map_while(|i| u32::try_from(i).ok().and_then(|i| addr.checked_add(i)))
            .map(|a| {
                words
                    .get(&(key.to_string(), a))
                    .copied()
                    .unwrap_or_else(|| Self::seed(key, a))
            })
            .collect())
    }

    /// Advance every word in the window by a small address-dependent step and
    /// return the new values.
    pub fn step(&self, key: &str, addr: u32, count: usize) -> Result<Vec<u32>> {
        let mut words = self
            .words
            .lock()
            .map_err(|_| anyhow!("device state poisoned"))?;
        let mut out = Vec::with_capacity(count);
        for offset in 0..count {
            let Some(a) = u32::try_from(offset).ok().and_then(|o| addr.checked_add(o)) else {
                break;
            };
            let slot = words
                .entry((key.to_string(), a))
                .or_insert_with(|| Self::seed(key, a));
            *slot = slot.wrapping_add((a % 7) as u16 + 1);
            out.push(u32::from(*slot));
        }
        Ok(out)
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl WordReader for SimulatedDevice {
    async fn read_words(&self, key: &str, addr: u32, count: usize) -> Result<Vec<u16>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let n = self.reads.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every.is_some_and(|every| n % every == 0) {
            return Err(anyhow!("simulated read failure on read #{n}"));
        }
        trace!(target: "device", key, addr, count, "read_words");
        self.snapshot(key, addr, count)
    }
}

/// Emits a `Running` status, then every interval steps the watched window
/// and (unless push delivery is disabled) pushes the new values.
pub struct PushSimulator {
    device: Arc<SimulatedDevice>,
    watched: watch::Receiver<Option<DeviceAddress>>,
    interval: Duration,
    window: usize,
    deliver: bool,
}

impl PushSimulator {
    pub fn new(
        device: Arc<SimulatedDevice>,
        watched: watch::Receiver<Option<DeviceAddress>>,
        interval: Duration,
        window: usize,
        deliver: bool,
    ) -> Self {
        Self {
            device,
            watched,
            interval,
            window,
            deliver,
        }
    }
}

impl AsyncEventSource for PushSimulator {
    fn name(&self) -> &'static str {
        "device_push"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let PushSimulator {
            device,
            watched,
            interval,
            window,
            deliver,
        } = *self;
        tokio::spawn(async move {
            if tx.send(Event::Status(BackendStatus::Running)).await.is_err() {
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {}
                }
                let Some(origin) = watched.borrow().clone() else {
                    continue;
                };
                let words = match device.step(&origin.key, origin.addr, window) {
                    Ok(words) => words,
                    Err(e) => {
                        debug!(target: "device", error = %e, "push_step_failed");
                        break;
                    }
                };
                if !deliver {
                    continue;
                }
                let event = Event::Push(PushEvent::new(origin.key, origin.addr, words));
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        })
    }
}
