//! Error types for skyfilter.
//!
//! Errors are split by where they can occur. Configuration errors are fatal
//! and surface before any network activity; everything else is scoped to a
//! single event, a single sink or a single ingestion line.

use thiserror::Error;

/// Errors raised while loading configuration or compiling rules.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    Read {
        path: String,
        message: String,
    },

    #[error("Malformed config: {message}")]
    Parse {
        message: String,
    },

    #[error("Invalid {kind} regex '{pattern}' in rule '{rule}': {message}")]
    InvalidPattern {
        kind: &'static str,
        pattern: String,
        rule: String,
        message: String,
    },

    #[error("Unknown embed type '{value}' in rule '{rule}'")]
    UnknownEmbedKind {
        value: String,
        rule: String,
    },

    #[error("Field '{field}' must be greater than zero")]
    ZeroCapacity {
        field: &'static str,
    },
}

/// Errors on the dispatch path. These never cross event boundaries.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to serialize broadcast envelope: {message}")]
    Serialization {
        message: String,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Failed to spawn worker thread: {message}")]
    Spawn {
        message: String,
    },
}

/// Errors talking to the hub control loop.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Hub control loop is not running")]
    Disconnected,

    #[error("Sink is closed")]
    SinkClosed,

    #[error("Failed to spawn hub thread: {message}")]
    Spawn {
        message: String,
    },
}

/// Errors produced by an ingestion source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error reading input: {message}")]
    Io {
        message: String,
    },

    #[error("Malformed record on line {line}: {message}")]
    Decode {
        line: u64,
        message: String,
    },

    #[error("Inbound queue closed")]
    QueueClosed,
}

/// Top-level error type for skyfilter.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

impl FilterError {
    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if the process must not keep running after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Dispatch(e) => matches!(e, DispatchError::Spawn { .. }),
            Self::Hub(e) => matches!(e, HubError::Spawn { .. }),
            Self::Source(_) => false,
        }
    }
}

/// Result type alias for skyfilter operations.
pub type FilterResult<T> = Result<T, FilterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_message() {
        let err = ConfigError::InvalidPattern {
            kind: "text",
            pattern: "(".to_string(),
            rule: "Rule #2".to_string(),
            message: "unclosed group".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("text regex '('"));
        assert!(msg.contains("Rule #2"));
        assert!(msg.contains("unclosed group"));
    }

    #[test]
    fn test_config_errors_are_fatal() {
        let err: FilterError = ConfigError::ZeroCapacity { field: "workers" }.into();
        assert!(err.is_config());
        assert!(err.is_fatal());
        assert!(format!("{err}").contains("workers"));
    }

    #[test]
    fn test_per_event_errors_are_not_fatal() {
        let err: FilterError = DispatchError::Serialization {
            message: "boom".to_string(),
        }
        .into();
        assert!(!err.is_config());
        assert!(!err.is_fatal());

        let err: FilterError = SourceError::Decode {
            line: 7,
            message: "expected value".to_string(),
        }
        .into();
        assert!(!err.is_fatal());
        assert!(format!("{err}").contains("line 7"));
    }

    #[test]
    fn test_spawn_failures_are_fatal() {
        let err: FilterError = HubError::Spawn {
            message: "no threads".to_string(),
        }
        .into();
        assert!(err.is_fatal());
        assert!(!FilterError::from(HubError::Disconnected).is_fatal());
    }
}
