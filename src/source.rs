//! Ingestion source.
//!
//! Reads newline-delimited Jetstream records, drops events outside the
//! subscription plan, and feeds the rest into the inbound queue. Malformed
//! lines are logged and skipped.

use std::io::BufRead;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::error::SourceError;
use crate::event::Event;
use crate::rules::SubscriptionPlan;

/// How often a running source logs its progress.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Counts for one source run.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub lines: u64,
    pub forwarded: u64,
    pub filtered: u64,
    pub malformed: u64,
}

/// Counts events per heartbeat window.
#[derive(Debug)]
struct Heartbeat {
    interval: Duration,
    window_start: Instant,
    received: u64,
}

impl Heartbeat {
    fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            window_start: now,
            received: 0,
        }
    }

    fn record(&mut self) {
        self.received += 1;
    }

    /// Closes the window once `interval` has passed, returning the number of
    /// events it saw.
    fn tick(&mut self, now: Instant) -> Option<u64> {
        if now.duration_since(self.window_start) < self.interval {
            return None;
        }
        self.window_start = now;
        Some(std::mem::take(&mut self.received))
    }
}

/// JSON-lines reader over any buffered input.
#[derive(Debug)]
pub struct JsonlSource<R> {
    reader: R,
    plan: SubscriptionPlan,
    heartbeat: Duration,
}

impl<R: BufRead> JsonlSource<R> {
    /// Wraps `reader`, admitting only what `plan` subscribes to.
    pub const fn new(reader: R, plan: SubscriptionPlan) -> Self {
        Self {
            reader,
            plan,
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }

    /// Overrides the progress log interval.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }

    /// Reads to end of input.
    ///
    /// Waits when the inbound queue is full. Stops with
    /// [`SourceError::QueueClosed`] if the dispatcher side is gone.
    pub fn run(mut self, inbound: &Sender<Event>) -> Result<SourceStats, SourceError> {
        let mut stats = SourceStats::default();
        let mut beat = Heartbeat::new(self.heartbeat, Instant::now());
        let mut line = String::new();

        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| SourceError::Io {
                    message: e.to_string(),
                })?;
            if read == 0 {
                break;
            }
            stats.lines += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let event = match Event::from_json(trimmed) {
                Ok(event) => event,
                Err(e) => {
                    let err = SourceError::Decode {
                        line: stats.lines,
                        message: e.to_string(),
                    };
                    warn!(error = %err, "skipping record");
                    stats.malformed += 1;
                    continue;
                }
            };

            beat.record();
            let admitted = {
                let c = classify(&event);
                self.plan.admits(c.collection, c.author_id)
            };
            if admitted {
                inbound.send(event).map_err(|_| SourceError::QueueClosed)?;
                stats.forwarded += 1;
            } else {
                stats.filtered += 1;
            }

            if let Some(received) = beat.tick(Instant::now()) {
                info!(
                    received,
                    window_secs = self.heartbeat.as_secs(),
                    lines = stats.lines,
                    forwarded = stats.forwarded,
                    filtered = stats.filtered,
                    malformed = stats.malformed,
                    "ingestion heartbeat"
                );
            }
        }

        debug!(?stats, "source reached end of input");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crossbeam_channel::{bounded, unbounded};

    use super::*;
    use crate::event::EventKind;
    use crate::rules::{compile, RuleDecl};

    const POST: &str = r#"{"did":"did:plc:a","time_us":1,"kind":"commit","commit":{"rev":"r","operation":"create","collection":"app.bsky.feed.post","rkey":"k","record":{"$type":"app.bsky.feed.post","text":"hi","createdAt":"2024-01-01T00:00:00Z"}}}"#;
    const LIKE: &str = r#"{"did":"did:plc:a","time_us":2,"kind":"commit","commit":{"rev":"r","operation":"create","collection":"app.bsky.feed.like","rkey":"k","record":{"$type":"app.bsky.feed.like","subject":{"uri":"at://did:plc:b/app.bsky.feed.post/1","cid":"c"}}}}"#;

    fn input(lines: &[&str]) -> Cursor<Vec<u8>> {
        Cursor::new(lines.join("\n").into_bytes())
    }

    #[test]
    fn forwards_admitted_and_skips_malformed() {
        let (tx, rx) = unbounded();
        let src = JsonlSource::new(
            input(&[POST, "not json", "", LIKE]),
            SubscriptionPlan::everything(),
        );
        let stats = src.run(&tx).unwrap();
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.forwarded, 2);
        assert_eq!(stats.malformed, 1);

        drop(tx);
        let events: Vec<Event> = rx.iter().collect();
        assert!(matches!(events[0].kind, EventKind::Post(_)));
        assert!(matches!(events[1].kind, EventKind::Like { .. }));
    }

    #[test]
    fn plan_filters_unsubscribed_collections() {
        // No rule names a collection: only posts are requested.
        let compiled = compile(&[RuleDecl::named("any")]).unwrap();
        let (tx, rx) = unbounded();
        let stats = JsonlSource::new(input(&[POST, LIKE]), compiled.plan().clone())
            .run(&tx)
            .unwrap();
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.filtered, 1);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn heartbeat_counts_per_window() {
        let start = Instant::now();
        let mut beat = Heartbeat::new(Duration::from_secs(30), start);
        beat.record();
        beat.record();
        assert_eq!(beat.tick(start + Duration::from_secs(10)), None);
        beat.record();
        assert_eq!(beat.tick(start + Duration::from_secs(30)), Some(3));

        // The next window starts empty.
        beat.record();
        assert_eq!(beat.tick(start + Duration::from_secs(45)), None);
        assert_eq!(beat.tick(start + Duration::from_secs(60)), Some(1));
        assert_eq!(beat.tick(start + Duration::from_secs(90)), Some(0));
    }

    #[test]
    fn closed_queue_stops_the_source() {
        let (tx, rx) = bounded(1);
        drop(rx);
        let err = JsonlSource::new(input(&[POST]), SubscriptionPlan::everything())
            .run(&tx)
            .unwrap_err();
        assert!(matches!(err, SourceError::QueueClosed));
    }
}
