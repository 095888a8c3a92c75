//! Startup wiring.
//!
//! Compiles the rules, starts the hub and the dispatcher pool, and exposes
//! the inbound queue the ingestion layer feeds.

use std::sync::Arc;

use crossbeam_channel::{bounded, Sender};
use tracing::info;

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::counters::MatchCounters;
use crate::dispatcher::{DispatchSnapshot, Dispatcher, DispatcherConfig};
use crate::error::{DispatchError, FilterResult};
use crate::event::Event;
use crate::hub::{Hub, HubConfig};
use crate::rules::{compile, SubscriptionPlan};

/// A running filter: inbound queue, dispatcher pool and hub.
#[derive(Debug)]
pub struct Pipeline {
    inbound: Option<Sender<Event>>,
    dispatcher: Option<Dispatcher>,
    hub: Arc<Hub>,
    counters: Arc<MatchCounters>,
    catalog: Arc<Catalog>,
    plan: SubscriptionPlan,
}

impl Pipeline {
    /// Compiles the configured rules and starts every worker.
    ///
    /// Configuration errors surface here, before anything is spawned.
    pub fn start(config: &AppConfig) -> FilterResult<Self> {
        config.validate()?;
        let compiled = compile(&config.rule_decls())?;

        let hub = Arc::new(Hub::start(HubConfig {
            mailbox_capacity: config.broadcast_capacity,
            sink_capacity: config.sink_capacity,
        })?);
        let counters = Arc::new(MatchCounters::for_rules(compiled.rules()));

        let (inbound, rx) = bounded::<Event>(config.queue_capacity);
        let dispatcher = Dispatcher::start(
            &DispatcherConfig {
                workers: config.worker_count(),
            },
            &rx,
            &hub.broadcaster(),
            compiled.rules(),
            Some(Arc::clone(&counters)),
        )?;

        info!(
            rules = compiled.len(),
            workers = config.worker_count(),
            queue = config.queue_capacity,
            "pipeline started"
        );

        Ok(Self {
            inbound: Some(inbound),
            dispatcher: Some(dispatcher),
            hub,
            counters,
            catalog: Arc::new(Catalog::new(config, &compiled)),
            plan: compiled.plan().clone(),
        })
    }

    /// A producer handle for the inbound queue.
    pub fn inbound(&self) -> Result<Sender<Event>, DispatchError> {
        self.inbound
            .clone()
            .ok_or_else(|| DispatchError::Disconnected {
                path: "inbound".to_string(),
            })
    }

    /// The subscriber hub.
    #[must_use]
    pub const fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Per-rule match counters.
    #[must_use]
    pub const fn counters(&self) -> &Arc<MatchCounters> {
        &self.counters
    }

    /// Rule names and public configuration.
    #[must_use]
    pub const fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// What the ingestion layer should subscribe to.
    #[must_use]
    pub const fn plan(&self) -> &SubscriptionPlan {
        &self.plan
    }

    /// Dispatcher counters; zero after shutdown.
    #[must_use]
    pub fn dispatch_stats(&self) -> DispatchSnapshot {
        self.dispatcher
            .as_ref()
            .map(Dispatcher::stats)
            .unwrap_or_default()
    }

    /// Drains the inbound queue, then stops the hub.
    ///
    /// Blocks until every producer obtained from [`Pipeline::inbound`] has
    /// been dropped. Calling it again is a no-op.
    pub fn shutdown(&mut self) -> DispatchSnapshot {
        self.inbound = None;
        let snapshot = self
            .dispatcher
            .take()
            .map(Dispatcher::join)
            .unwrap_or_default();
        self.hub.shutdown();
        snapshot
    }

    /// Stops without draining. Events still queued are discarded.
    pub fn abort(&mut self) -> DispatchSnapshot {
        self.inbound = None;
        let snapshot = self
            .dispatcher
            .take()
            .map(Dispatcher::stop)
            .unwrap_or_default();
        self.hub.shutdown();
        snapshot
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::event::Post;

    #[test]
    fn invalid_rules_fail_before_start() {
        let cfg = AppConfig::from_json(r#"{"rules": [{"textRegexes": ["("]}]}"#).unwrap();
        let err = Pipeline::start(&cfg).unwrap_err();
        assert!(err.is_config());
        assert!(err.is_fatal());
    }

    #[test]
    fn events_flow_to_subscribers() {
        let cfg = AppConfig::from_json(
            r#"{"workers": 2, "rules": [{"name": "rust", "textRegexes": ["rust"]}]}"#,
        )
        .unwrap();
        let mut pipeline = Pipeline::start(&cfg).unwrap();
        let sub = pipeline.hub().subscribe().unwrap();
        let tx = pipeline.inbound().unwrap();

        tx.send(Event::post("did:plc:a", Post::new("go"))).unwrap();
        tx.send(Event::post("did:plc:a", Post::new("rust"))).unwrap();
        drop(tx);

        let frame = sub.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert!(frame.contains("\"matchedRules\":[\"rust\"]"));

        let snapshot = pipeline.shutdown();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.matched, 1);
        assert_eq!(pipeline.counters().get("rust"), Some(1));
        assert!(pipeline.inbound().is_err());
        assert_eq!(pipeline.shutdown(), DispatchSnapshot::default());
    }
}
