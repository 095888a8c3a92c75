//! # skyfilter - rule-based filtering for the Bluesky firehose
//!
//! skyfilter takes decoded firehose events, matches them against a set of
//! declarative rules, and fans every match out to live subscribers.
//!
//! ## Core Concepts
//!
//! - **Rule set**: a named conjunction of constraints (collection, author,
//!   target, language, embed kind, reply status, text and URL patterns)
//! - **Classifier**: reduces an [`Event`] to the fields rules look at
//! - **Dispatcher**: worker pool that evaluates rules and builds envelopes
//! - **Hub**: single-threaded owner of the subscriber set; never blocks on a
//!   slow subscriber
//!
//! ## Usage
//!
//! ```rust,ignore
//! use skyfilter::{AppConfig, Event, Pipeline, Post};
//!
//! let config = AppConfig::from_json(r#"{"rules": [{"name": "rust", "textRegexes": ["(?i)rust"]}]}"#)?;
//! let mut pipeline = Pipeline::start(&config)?;
//! let sub = pipeline.hub().subscribe()?;
//!
//! pipeline.inbound()?.send(Event::post("did:plc:abc", Post::new("Rust 2024 is out")))?;
//! let envelope = sub.recv()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod classify;
pub mod config;
pub mod counters;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod hub;
pub mod pipeline;
pub mod rules;
pub mod source;

pub use catalog::Catalog;
pub use classify::{classify, extract_target_id, Classified, PostFields};
pub use config::{AppConfig, PublicConfig};
pub use counters::MatchCounters;
pub use dispatcher::{process, DispatchSnapshot, Dispatcher, DispatcherConfig, Envelope};
pub use error::{
    ConfigError, DispatchError, FilterError, FilterResult, HubError, SourceError,
};
pub use event::{Embed, EmbedKind, Event, EventKind, JetstreamRecord, Post, ReplyRef, StrongRef};
pub use hub::{Broadcaster, Frame, Hub, HubConfig, HubSnapshot, SinkHandle, SinkId, Subscription};
pub use pipeline::Pipeline;
pub use rules::{compile, evaluate, matching, CompiledRules, RuleDecl, RuleSet, SubscriptionPlan};
pub use source::{JsonlSource, SourceStats, HEARTBEAT_INTERVAL};
