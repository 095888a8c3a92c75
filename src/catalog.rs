//! Read-only process information for presentation layers.

use serde::Serialize;

use crate::config::{AppConfig, PublicConfig};
use crate::rules::CompiledRules;

/// Rule names and public configuration, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    rule_names: Vec<String>,
    public: PublicConfig,
}

impl Catalog {
    /// Builds the catalog from the loaded config and compiled rules.
    #[must_use]
    pub fn new(config: &AppConfig, rules: &CompiledRules) -> Self {
        Self {
            rule_names: rules.names(),
            public: config.public(),
        }
    }

    /// Configured rule names in declaration order.
    #[must_use]
    pub fn rule_names(&self) -> &[String] {
        &self.rule_names
    }

    /// Non-secret configuration.
    #[must_use]
    pub const fn public_config(&self) -> &PublicConfig {
        &self.public
    }
}
