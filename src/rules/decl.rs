//! Declarative rule definitions as they appear in configuration.

use serde::{Deserialize, Serialize};

/// One rule declaration. Every list defaults to empty, which means the
/// criterion is not applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDecl {
    /// Display name; defaults to `Rule #<n>` (1-based declaration order).
    #[serde(default)]
    pub name: String,
    /// Collections to match; `"*"` matches every collection.
    #[serde(default)]
    pub collections: Vec<String>,
    /// Regexes searched in post text.
    #[serde(default)]
    pub text_regexes: Vec<String>,
    /// Regexes searched in external-link URLs.
    #[serde(default)]
    pub url_regexes: Vec<String>,
    /// Author identifiers (exact).
    #[serde(default)]
    pub authors: Vec<String>,
    /// Interaction target identifiers (exact).
    #[serde(default)]
    pub target_users: Vec<String>,
    /// Allowed embed kinds (`none|images|video|external|record`).
    #[serde(default)]
    pub embed_types: Vec<String>,
    /// Allowed language tags.
    #[serde(default)]
    pub langs: Vec<String>,
    /// Reply constraint; absent means unconstrained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_reply: Option<bool>,
}

impl RuleDecl {
    /// Creates an empty declaration with the given name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
