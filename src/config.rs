//! Process configuration.
//!
//! Loaded once from a JSON file at startup. Keys are camelCase.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatcher::default_workers;
use crate::error::ConfigError;
use crate::rules::RuleDecl;

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

const fn default_port() -> u16 {
    8080
}

const fn default_queue_capacity() -> usize {
    1000
}

const fn default_broadcast_capacity() -> usize {
    1000
}

const fn default_sink_capacity() -> usize {
    256
}

fn default_bsky_server() -> String {
    "https://bsky.social".to_string()
}

/// Full process configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// AppView/PDS address shown to clients.
    #[serde(default = "default_bsky_server")]
    pub bsky_server: String,
    /// Upstream Jetstream endpoint; `None` uses the ingestion default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jetstream_server: Option<String>,
    /// Listen port of the server binary.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Replay window in microseconds; 0 means live only.
    #[serde(default)]
    pub cursor_offset: i64,
    /// Rule declarations, in order.
    #[serde(default)]
    pub rules: Vec<RuleDecl>,
    /// Legacy top-level text regexes, folded into an implicit first rule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regexes: Vec<String>,
    /// Legacy top-level URL regexes, folded into an implicit first rule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub url_regexes: Vec<String>,
    /// Dispatcher worker count; defaults to host parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Inbound event queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Hub mailbox capacity.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Per-subscriber outbound buffer.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bsky_server: default_bsky_server(),
            jetstream_server: None,
            port: default_port(),
            cursor_offset: 0,
            rules: Vec::new(),
            regexes: Vec::new(),
            url_regexes: Vec::new(),
            workers: None,
            queue_capacity: default_queue_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
            sink_capacity: default_sink_capacity(),
        }
    }
}

/// Configuration that is safe to expose to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicConfig {
    /// AppView/PDS address.
    pub bsky_server: String,
}

impl AppConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&json)
    }

    /// Rejects zero capacities and zero workers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::ZeroCapacity { field: "workers" });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "queueCapacity",
            });
        }
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "broadcastCapacity",
            });
        }
        if self.sink_capacity == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "sinkCapacity",
            });
        }
        Ok(())
    }

    /// Effective worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }

    /// Rule declarations with legacy top-level regexes folded in as the
    /// first, post-only rule.
    #[must_use]
    pub fn rule_decls(&self) -> Vec<RuleDecl> {
        if self.regexes.is_empty() && self.url_regexes.is_empty() {
            return self.rules.clone();
        }
        let legacy = RuleDecl {
            collections: vec![crate::event::collection::POST.to_string()],
            text_regexes: self.regexes.clone(),
            url_regexes: self.url_regexes.clone(),
            ..RuleDecl::default()
        };
        std::iter::once(legacy).chain(self.rules.iter().cloned()).collect()
    }

    /// Upstream replay cursor (microseconds) relative to `now`, if a replay
    /// window is configured.
    #[must_use]
    pub fn cursor(&self, now: DateTime<Utc>) -> Option<i64> {
        (self.cursor_offset > 0).then(|| now.timestamp_micros() - self.cursor_offset)
    }

    /// Non-secret subset for clients.
    #[must_use]
    pub fn public(&self) -> PublicConfig {
        PublicConfig {
            bsky_server: self.bsky_server.clone(),
        }
    }
}
