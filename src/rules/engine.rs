//! Rule evaluation.
//!
//! A rule set matches when every criterion it declares holds (AND); an event
//! is broadcast when at least one rule set matches (OR). Criteria are checked
//! cheapest first and evaluation stops at the first failure.

use crate::classify::Classified;

use super::ruleset::{CollectionFilter, ReplyConstraint, RuleSet};

/// Evaluates one rule set against a classified event.
///
/// A criterion that needs a post field fails the rule outright when the
/// event is not a post.
#[must_use]
pub fn evaluate(event: &Classified<'_>, rule: &RuleSet) -> bool {
    // 1. Collection
    if let CollectionFilter::Only(set) = &rule.collections {
        if !set.contains(event.collection) {
            return false;
        }
    }

    // 2. Author
    if !rule.authors.is_empty() && !rule.authors.contains(event.author_id) {
        return false;
    }

    // 3. Target user
    if !rule.target_users.is_empty() {
        match event.target_id {
            Some(target) if rule.target_users.contains(target) => {}
            _ => return false,
        }
    }

    // 4. Text
    if !rule.text_patterns.is_empty() {
        let Some(post) = &event.post else {
            return false;
        };
        if !rule.text_patterns.iter().any(|p| p.is_match(post.text)) {
            return false;
        }
    }

    // 5. URL
    if !rule.url_patterns.is_empty() {
        let Some(url) = event.post.as_ref().and_then(|p| p.external_url) else {
            return false;
        };
        if !rule.url_patterns.iter().any(|p| p.is_match(url)) {
            return false;
        }
    }

    // 6. Embed kind
    if !rule.embed_kinds.is_empty() {
        let Some(post) = &event.post else {
            return false;
        };
        if !rule.embed_kinds.contains(&post.embed_kind) {
            return false;
        }
    }

    // 7. Language
    if !rule.languages.is_empty() {
        let Some(post) = &event.post else {
            return false;
        };
        if !post.languages.iter().any(|l| rule.languages.contains(l.as_str())) {
            return false;
        }
    }

    // 8. Reply
    if rule.is_reply != ReplyConstraint::Unconstrained {
        let Some(post) = &event.post else {
            return false;
        };
        if !rule.is_reply.admits(post.is_reply) {
            return false;
        }
    }

    true
}

/// Rule sets matching `event`, in declaration order.
pub fn matching<'r>(
    event: &'r Classified<'r>,
    rules: &'r [RuleSet],
) -> impl Iterator<Item = &'r RuleSet> + 'r {
    rules.iter().filter(move |rule| evaluate(event, rule))
}
