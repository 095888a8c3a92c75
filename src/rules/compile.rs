//! Rule compilation.
//!
//! Runs once at startup. Any malformed declaration aborts compilation so the
//! process never runs with a partially valid rule list.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::event::EmbedKind;

use super::decl::RuleDecl;
use super::plan::{AuthorScope, CollectionScope, SubscriptionPlan, DEFAULT_COLLECTION};
use super::ruleset::{CollectionFilter, ReplyConstraint, RuleSet};

/// Collection entry that disables collection filtering.
pub const WILDCARD: &str = "*";

/// Name of the implicit rule used when no rules are declared.
pub const CATCH_ALL_NAME: &str = "All events";

/// Output of [`compile`].
#[derive(Debug, Clone)]
pub struct CompiledRules {
    rules: Arc<[RuleSet]>,
    plan: SubscriptionPlan,
}

impl CompiledRules {
    /// Compiled rule sets in declaration order.
    #[must_use]
    pub fn rules(&self) -> &Arc<[RuleSet]> {
        &self.rules
    }

    /// Subscription plan for the ingestion layer.
    #[must_use]
    pub const fn plan(&self) -> &SubscriptionPlan {
        &self.plan
    }

    /// Rule names in declaration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.name.clone()).collect()
    }

    /// Number of compiled rule sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Always false: an empty declaration list compiles to the catch-all rule.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_patterns(
    patterns: &[String],
    kind: &'static str,
    rule: &str,
) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| ConfigError::InvalidPattern {
                kind,
                pattern: p.clone(),
                rule: rule.to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

fn compile_one(index: usize, decl: &RuleDecl) -> Result<RuleSet, ConfigError> {
    let name = if decl.name.is_empty() {
        format!("Rule #{}", index + 1)
    } else {
        decl.name.clone()
    };

    let collections = if decl.collections.is_empty() {
        CollectionFilter::Inherit
    } else if decl.collections.iter().any(|c| c == WILDCARD) {
        CollectionFilter::Any
    } else {
        CollectionFilter::Only(decl.collections.iter().cloned().collect())
    };

    let text_patterns = compile_patterns(&decl.text_regexes, "text", &name)?;
    let url_patterns = compile_patterns(&decl.url_regexes, "url", &name)?;

    let mut embed_kinds = HashSet::with_capacity(decl.embed_types.len());
    for token in &decl.embed_types {
        let kind = EmbedKind::parse(token).ok_or_else(|| ConfigError::UnknownEmbedKind {
            value: token.clone(),
            rule: name.clone(),
        })?;
        embed_kinds.insert(kind);
    }

    Ok(RuleSet {
        name,
        collections,
        text_patterns,
        url_patterns,
        authors: decl.authors.iter().cloned().collect(),
        target_users: decl.target_users.iter().cloned().collect(),
        embed_kinds,
        languages: decl.langs.iter().cloned().collect(),
        is_reply: ReplyConstraint::from_flag(decl.is_reply),
    })
}

/// Compiles rule declarations into executable rule sets and the upstream
/// subscription plan.
///
/// With no declarations the result is a single catch-all rule and a plan
/// that requests every collection from every author.
pub fn compile(decls: &[RuleDecl]) -> Result<CompiledRules, ConfigError> {
    if decls.is_empty() {
        let mut catch_all = RuleSet::unconstrained(CATCH_ALL_NAME);
        catch_all.collections = CollectionFilter::Any;
        info!("no rules declared; matching all events from all authors");
        return Ok(CompiledRules {
            rules: Arc::from(vec![catch_all]),
            plan: SubscriptionPlan::everything(),
        });
    }

    let mut rules = Vec::with_capacity(decls.len());
    let mut collections: BTreeSet<String> = BTreeSet::new();
    let mut authors: BTreeSet<String> = BTreeSet::new();
    let mut all_collections = false;
    let mut all_authors = false;

    for (index, decl) in decls.iter().enumerate() {
        let rule = compile_one(index, decl)?;

        match &rule.collections {
            CollectionFilter::Any => all_collections = true,
            CollectionFilter::Only(set) => collections.extend(set.iter().cloned()),
            CollectionFilter::Inherit => {}
        }
        if rule.authors.is_empty() {
            all_authors = true;
        } else {
            authors.extend(rule.authors.iter().cloned());
        }

        debug!(
            rule = %rule.name,
            text_patterns = rule.text_patterns.len(),
            url_patterns = rule.url_patterns.len(),
            authors = rule.authors.len(),
            "compiled rule set"
        );
        rules.push(rule);
    }

    let collections = if all_collections {
        CollectionScope::All
    } else if collections.is_empty() {
        CollectionScope::Only(vec![DEFAULT_COLLECTION.to_string()])
    } else {
        CollectionScope::Only(collections.into_iter().collect())
    };
    let authors = if all_authors {
        AuthorScope::All
    } else {
        AuthorScope::Only(authors.into_iter().collect())
    };

    info!(rules = rules.len(), "loaded rule sets");
    Ok(CompiledRules {
        rules: Arc::from(rules),
        plan: SubscriptionPlan {
            collections,
            authors,
        },
    })
}
