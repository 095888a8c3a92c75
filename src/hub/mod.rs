//! Subscriber hub.
//!
//! The hub owns the set of live sinks. A single control thread is the only
//! reader and writer of that set; register, unregister and broadcast all
//! arrive as messages in one bounded mailbox and are applied in order.
//! Broadcasting never blocks on a subscriber: a sink whose buffer is full is
//! evicted instead.

/// Sink types and subscriber handles.
pub mod sink;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::HubError;

pub use sink::{
    DeliveryError, Frame, SinkChannel, SinkHandle, SinkId, SinkPhase, Subscription,
};
use sink::SinkState;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Max queued mailbox messages (broadcasts plus control) before senders
    /// wait.
    pub mailbox_capacity: usize,
    /// Per-subscriber buffer used by [`Hub::subscribe`].
    pub sink_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
            sink_capacity: 256,
        }
    }
}

pub(crate) enum HubMsg {
    Register {
        id: SinkId,
        sink: Box<dyn SinkChannel>,
        state: Arc<SinkState>,
        reply: Sender<()>,
    },
    Unregister {
        id: SinkId,
    },
    Broadcast(Frame),
    Shutdown,
}

struct SinkEntry {
    sink: Box<dyn SinkChannel>,
    state: Arc<SinkState>,
}

#[derive(Debug, Default)]
struct HubStats {
    sinks: AtomicUsize,
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time hub counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubSnapshot {
    pub sinks: usize,
    pub broadcasts: u64,
    pub deliveries: u64,
    pub evictions: u64,
}

/// Cloneable producer side of the hub's broadcast path.
#[derive(Clone)]
pub struct Broadcaster {
    mailbox: Sender<HubMsg>,
}

impl Broadcaster {
    /// Queues a frame for fan-out. Waits while the mailbox is full.
    pub fn send(&self, frame: Frame) -> Result<(), HubError> {
        self.mailbox
            .send(HubMsg::Broadcast(frame))
            .map_err(|_| HubError::Disconnected)
    }
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster").finish_non_exhaustive()
    }
}

/// Hub: owns the sink set and fans out broadcasts.
pub struct Hub {
    cfg: HubConfig,
    mailbox: Sender<HubMsg>,
    stats: Arc<HubStats>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    /// Spawns the control thread.
    pub fn start(cfg: HubConfig) -> Result<Self, HubError> {
        let (mailbox, rx) = bounded::<HubMsg>(cfg.mailbox_capacity.max(1));
        let stats = Arc::new(HubStats::default());

        let thread_stats = Arc::clone(&stats);
        let join = thread::Builder::new()
            .name("skyfilter-hub".to_string())
            .spawn(move || control_loop(&rx, &thread_stats))
            .map_err(|e| HubError::Spawn {
                message: e.to_string(),
            })?;

        Ok(Self {
            cfg,
            mailbox,
            stats,
            join: Mutex::new(Some(join)),
        })
    }

    /// Producer handle for the dispatcher.
    #[must_use]
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster {
            mailbox: self.mailbox.clone(),
        }
    }

    /// Queues a frame for fan-out to every sink registered before it.
    pub fn broadcast(&self, frame: impl Into<Frame>) -> Result<(), HubError> {
        self.mailbox
            .send(HubMsg::Broadcast(frame.into()))
            .map_err(|_| HubError::Disconnected)
    }

    /// Adds a sink to the active set.
    ///
    /// Returns once the control thread has applied the registration, so every
    /// broadcast submitted afterwards reaches the sink.
    pub fn register<S: SinkChannel>(&self, sink: S) -> Result<SinkHandle, HubError> {
        let id = SinkId::new();
        let state = Arc::new(SinkState::new());
        let (reply_tx, reply_rx) = bounded::<()>(1);

        self.mailbox
            .send(HubMsg::Register {
                id,
                sink: Box::new(sink),
                state: Arc::clone(&state),
                reply: reply_tx,
            })
            .map_err(|_| HubError::Disconnected)?;
        reply_rx.recv().map_err(|_| HubError::Disconnected)?;

        Ok(SinkHandle::new(id, state, self.mailbox.clone()))
    }

    /// Registers an in-process subscriber with the configured buffer size.
    pub fn subscribe(&self) -> Result<Subscription, HubError> {
        self.subscribe_with_capacity(self.cfg.sink_capacity)
    }

    /// Registers an in-process subscriber with a buffer of `capacity` frames.
    pub fn subscribe_with_capacity(&self, capacity: usize) -> Result<Subscription, HubError> {
        let (tx, rx) = bounded::<Frame>(capacity.max(1));
        let handle = self.register(tx)?;
        Ok(Subscription::new(handle, rx))
    }

    /// Removes a sink. Unknown or already removed ids are ignored.
    pub fn unregister(&self, id: SinkId) -> Result<(), HubError> {
        self.mailbox
            .send(HubMsg::Unregister { id })
            .map_err(|_| HubError::Disconnected)
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> HubSnapshot {
        HubSnapshot {
            sinks: self.stats.sinks.load(Ordering::Relaxed),
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }

    /// Stops the control thread after it has fanned out everything queued
    /// before this call, then drops all remaining sinks.
    pub fn shutdown(&self) {
        let handle = match self.join.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };
        if self.mailbox.send(HubMsg::Shutdown).is_ok() {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("cfg", &self.cfg)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn publish_len(stats: &HubStats, sinks: &HashMap<SinkId, SinkEntry>) {
    stats.sinks.store(sinks.len(), Ordering::Relaxed);
}

fn fan_out(frame: &Frame, sinks: &mut HashMap<SinkId, SinkEntry>, stats: &HubStats) {
    stats.broadcasts.fetch_add(1, Ordering::Relaxed);
    sinks.retain(|id, entry| match entry.sink.try_deliver(frame) {
        Ok(()) => {
            stats.deliveries.fetch_add(1, Ordering::Relaxed);
            true
        }
        Err(DeliveryError::Full) => {
            warn!(sink = %id, "sink exceeded outbound capacity; evicting");
            stats.evictions.fetch_add(1, Ordering::Relaxed);
            entry.state.mark_unregistering();
            false
        }
        Err(DeliveryError::Closed) => {
            debug!(sink = %id, "sink receiver gone; dropping");
            entry.state.mark_unregistering();
            false
        }
    });
}

fn control_loop(rx: &Receiver<HubMsg>, stats: &HubStats) {
    let mut sinks: HashMap<SinkId, SinkEntry> = HashMap::new();

    while let Ok(msg) = rx.recv() {
        match msg {
            HubMsg::Register {
                id,
                sink,
                state,
                reply,
            } => {
                state.mark_registered();
                sinks.insert(id, SinkEntry { sink, state });
                publish_len(stats, &sinks);
                debug!(sink = %id, sinks = sinks.len(), "registered sink");
                let _ = reply.send(());
            }
            HubMsg::Unregister { id } => {
                if let Some(entry) = sinks.remove(&id) {
                    entry.state.mark_unregistering();
                    publish_len(stats, &sinks);
                    debug!(sink = %id, sinks = sinks.len(), "unregistered sink");
                }
            }
            HubMsg::Broadcast(frame) => {
                fan_out(&frame, &mut sinks, stats);
                publish_len(stats, &sinks);
            }
            HubMsg::Shutdown => break,
        }
    }

    for (_, entry) in sinks.drain() {
        entry.state.mark_unregistering();
    }
    stats.sinks.store(0, Ordering::Relaxed);
    info!("hub stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct Blocked;

    impl SinkChannel for Blocked {
        fn try_deliver(&self, _frame: &Frame) -> Result<(), DeliveryError> {
            Err(DeliveryError::Full)
        }
    }

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn broadcast_reaches_registered_subscriber() {
        let hub = Hub::start(HubConfig::default()).unwrap();
        let sub = hub.subscribe().unwrap();
        assert!(sub.handle().is_registered());
        hub.broadcast("hello").unwrap();
        assert_eq!(sub.recv_timeout(WAIT).unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn blocked_sink_is_evicted_without_affecting_others() {
        let hub = Hub::start(HubConfig::default()).unwrap();
        let fast = hub.subscribe().unwrap();
        let slow = hub.register(Blocked).unwrap();

        hub.broadcast("m1").unwrap();
        hub.broadcast("m2").unwrap();
        assert_eq!(fast.recv_timeout(WAIT).unwrap().as_deref(), Some("m1"));
        assert_eq!(fast.recv_timeout(WAIT).unwrap().as_deref(), Some("m2"));

        assert_eq!(slow.phase(), SinkPhase::Unregistering);
        let stats = hub.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.sinks, 1);

        // Owner-side cleanup still happens exactly once.
        assert!(slow.close());
        assert!(!slow.close());
        assert_eq!(slow.phase(), SinkPhase::Closed);
    }

    #[test]
    fn unregister_is_idempotent() {
        let hub = Hub::start(HubConfig::default()).unwrap();
        let sub = hub.subscribe().unwrap();
        let id = sub.id();
        hub.unregister(id).unwrap();
        hub.unregister(id).unwrap();
        sub.unsubscribe();
        sub.unsubscribe();

        hub.broadcast("after").unwrap();
        // Flush the mailbox through a registration round-trip.
        let flush = hub.subscribe().unwrap();
        assert_eq!(hub.stats().sinks, 1);
        assert!(matches!(sub.recv_timeout(WAIT), Err(HubError::SinkClosed)));
        drop(flush);
    }

    #[test]
    fn shutdown_drains_queued_broadcasts() {
        let hub = Hub::start(HubConfig::default()).unwrap();
        let sub = hub.subscribe().unwrap();
        for i in 0..10 {
            hub.broadcast(format!("m{i}")).unwrap();
        }
        hub.shutdown();
        for i in 0..10 {
            assert_eq!(sub.recv().unwrap().as_ref(), format!("m{i}"));
        }
        assert!(matches!(sub.recv(), Err(HubError::SinkClosed)));
        assert!(matches!(hub.broadcast("late"), Err(HubError::Disconnected)));
    }
}
