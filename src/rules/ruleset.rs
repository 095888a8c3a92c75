//! Compiled rule sets.

use std::collections::HashSet;

use regex::Regex;

use crate::event::EmbedKind;

/// Collection criterion of a rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionFilter {
    /// No collections declared: the rule sees whatever the ingestion layer
    /// subscribed to.
    Inherit,
    /// `"*"` was declared: collection is never checked.
    Any,
    /// Event collection must be one of these.
    Only(HashSet<String>),
}

/// Reply constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplyConstraint {
    /// Replies and top-level posts both pass.
    #[default]
    Unconstrained,
    /// Post must be a reply.
    RequireReply,
    /// Post must not be a reply.
    RequireTopLevel,
}

impl ReplyConstraint {
    /// Maps the optional config boolean onto the constraint.
    #[must_use]
    pub const fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            None => Self::Unconstrained,
            Some(true) => Self::RequireReply,
            Some(false) => Self::RequireTopLevel,
        }
    }

    /// Whether a post with the given reply status passes.
    #[must_use]
    pub const fn admits(self, is_reply: bool) -> bool {
        match self {
            Self::Unconstrained => true,
            Self::RequireReply => is_reply,
            Self::RequireTopLevel => !is_reply,
        }
    }
}

/// An immutable, named conjunction of match criteria.
///
/// Empty collections mean "criterion not applied". Built by
/// [`super::compile`] and shared read-only across dispatcher workers.
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub name: String,
    pub collections: CollectionFilter,
    pub text_patterns: Vec<Regex>,
    pub url_patterns: Vec<Regex>,
    pub authors: HashSet<String>,
    pub target_users: HashSet<String>,
    pub embed_kinds: HashSet<EmbedKind>,
    pub languages: HashSet<String>,
    pub is_reply: ReplyConstraint,
}

impl RuleSet {
    /// A rule set with no criteria. It matches every event.
    #[must_use]
    pub fn unconstrained(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: CollectionFilter::Inherit,
            text_patterns: Vec::new(),
            url_patterns: Vec::new(),
            authors: HashSet::new(),
            target_users: HashSet::new(),
            embed_kinds: HashSet::new(),
            languages: HashSet::new(),
            is_reply: ReplyConstraint::Unconstrained,
        }
    }

    /// Whether the collection criterion is bypassed entirely.
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self.collections, CollectionFilter::Any)
    }
}
