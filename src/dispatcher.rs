//! Dispatcher worker pool.
//!
//! A fixed set of threads drains one bounded inbound queue. Each worker
//! classifies the event, evaluates every rule set, and hands a serialized
//! envelope to the hub when at least one rule matched. Workers only block
//! on the inbound queue and on the hub mailbox.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::classify::classify;
use crate::counters::MatchCounters;
use crate::error::DispatchError;
use crate::event::{Event, JetstreamRecord};
use crate::hub::{Broadcaster, Frame};
use crate::rules::{evaluate, RuleSet};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of worker threads.
    pub workers: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

/// Host parallelism, or 1 when it cannot be determined.
#[must_use]
pub fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Payload of an envelope: the raw upstream record when there is one.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EnvelopePayload<'a> {
    /// Upstream record, verbatim.
    Raw(&'a JetstreamRecord),
    /// Decoded event.
    Decoded(&'a Event),
}

/// Broadcast unit sent to every subscriber.
#[allow(missing_docs)]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<'a> {
    pub event: EnvelopePayload<'a>,
    pub matched_rules: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_handle: Option<&'a str>,
}

/// Classifies and evaluates one event.
///
/// Returns the serialized envelope when any rule matched, `Ok(None)`
/// otherwise. Matches are counted even if serialization then fails.
pub fn process(
    event: &Event,
    rules: &[RuleSet],
    counters: Option<&MatchCounters>,
) -> Result<Option<Frame>, DispatchError> {
    let classified = classify(event);

    let mut matched_rules = Vec::new();
    for (index, rule) in rules.iter().enumerate() {
        if evaluate(&classified, rule) {
            matched_rules.push(rule.name.as_str());
            if let Some(c) = counters {
                c.record_index(index);
            }
        }
    }
    if matched_rules.is_empty() {
        return Ok(None);
    }

    let envelope = Envelope {
        event: event
            .raw
            .as_ref()
            .map_or(EnvelopePayload::Decoded(event), EnvelopePayload::Raw),
        matched_rules,
        author_handle: classified.author_handle,
    };
    let json = serde_json::to_string(&envelope).map_err(|e| DispatchError::Serialization {
        message: e.to_string(),
    })?;
    Ok(Some(Frame::from(json)))
}

#[derive(Debug, Default)]
struct DispatchStats {
    processed: AtomicU64,
    matched: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time dispatcher counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSnapshot {
    pub processed: u64,
    pub matched: u64,
    pub dropped: u64,
}

impl DispatchStats {
    fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Running worker pool.
#[derive(Debug)]
pub struct Dispatcher {
    workers: Vec<JoinHandle<()>>,
    stats: Arc<DispatchStats>,
    // Dropping this disconnects every worker's stop receiver.
    stop: Sender<()>,
}

impl Dispatcher {
    /// Spawns `cfg.workers` threads draining `inbound`.
    ///
    /// The pool stops once every sender of `inbound` is dropped and the queue
    /// is empty.
    pub fn start(
        cfg: &DispatcherConfig,
        inbound: &Receiver<Event>,
        broadcaster: &Broadcaster,
        rules: &Arc<[RuleSet]>,
        counters: Option<Arc<MatchCounters>>,
    ) -> Result<Self, DispatchError> {
        let workers = cfg.workers.max(1);
        let stats = Arc::new(DispatchStats::default());
        let (stop, stop_rx) = bounded::<()>(0);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let inbound = inbound.clone();
            let broadcaster = broadcaster.clone();
            let rules = Arc::clone(rules);
            let counters = counters.clone();
            let stats = Arc::clone(&stats);
            let stop_rx = stop_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("skyfilter-worker-{idx}"))
                .spawn(move || {
                    worker_loop(
                        &inbound,
                        &stop_rx,
                        &broadcaster,
                        &rules,
                        counters.as_deref(),
                        &stats,
                    );
                })
                .map_err(|e| DispatchError::Spawn {
                    message: e.to_string(),
                })?;
            handles.push(handle);
        }
        debug!(workers, "dispatcher started");

        Ok(Self {
            workers: handles,
            stats,
            stop,
        })
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }

    /// Waits for every worker to drain the inbound queue and exit.
    pub fn join(self) -> DispatchSnapshot {
        let Self {
            workers,
            stats,
            stop,
        } = self;
        for handle in workers {
            let _ = handle.join();
        }
        drop(stop);
        stats.snapshot()
    }

    /// Stops workers after their current event, leaving anything still
    /// queued unprocessed.
    pub fn stop(self) -> DispatchSnapshot {
        let Self {
            workers,
            stats,
            stop,
        } = self;
        drop(stop);
        for handle in workers {
            let _ = handle.join();
        }
        stats.snapshot()
    }
}

fn worker_loop(
    inbound: &Receiver<Event>,
    stop: &Receiver<()>,
    broadcaster: &Broadcaster,
    rules: &[RuleSet],
    counters: Option<&MatchCounters>,
    stats: &DispatchStats,
) {
    let mut hub_gone = false;

    loop {
        let event = select! {
            recv(inbound) -> msg => match msg {
                Ok(event) => event,
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        };
        stats.processed.fetch_add(1, Ordering::Relaxed);
        match process(&event, rules, counters) {
            Ok(None) => {}
            Ok(Some(frame)) => {
                stats.matched.fetch_add(1, Ordering::Relaxed);
                if hub_gone || broadcaster.send(frame).is_err() {
                    if !hub_gone {
                        warn!("hub is not running; dropping matched events");
                        hub_gone = true;
                    }
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                error!(error = %e, repo = %event.repo, "dropping event");
                stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
