//! Match rules: declaration, compilation and evaluation.

/// Rule compiler.
pub mod compile;
/// Configuration-level rule declarations.
pub mod decl;
/// Rule evaluation.
pub mod engine;
/// Upstream subscription plan.
pub mod plan;
/// Compiled rule set types.
pub mod ruleset;

pub use compile::{compile, CompiledRules, CATCH_ALL_NAME, WILDCARD};
pub use decl::RuleDecl;
pub use engine::{evaluate, matching};
pub use plan::{AuthorScope, CollectionScope, SubscriptionPlan};
pub use ruleset::{CollectionFilter, ReplyConstraint, RuleSet};
