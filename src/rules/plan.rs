//! Upstream subscription plan derived from the compiled rules.
//!
//! The ingestion layer narrows what it requests from upstream using this
//! plan. Rule sets without collections only ever see events admitted here.

/// Default collection requested when no rule names any.
pub const DEFAULT_COLLECTION: &str = crate::event::collection::POST;

/// Which collections to request upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionScope {
    /// Every collection (some rule declared `"*"`).
    All,
    /// Sorted, de-duplicated explicit list.
    Only(Vec<String>),
}

/// Which authors to request upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorScope {
    /// Every author (some rule has no author list, or there are no rules).
    All,
    /// Sorted, de-duplicated allow-list.
    Only(Vec<String>),
}

/// Collections and authors the ingestion layer subscribes to.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionPlan {
    pub collections: CollectionScope,
    pub authors: AuthorScope,
}

impl SubscriptionPlan {
    /// A plan that requests everything.
    #[must_use]
    pub const fn everything() -> Self {
        Self {
            collections: CollectionScope::All,
            authors: AuthorScope::All,
        }
    }

    /// Whether the ingestion layer would deliver an event with this
    /// collection and author.
    ///
    /// Identity and account events are not commits, so upstream delivers
    /// them independently of the requested collections.
    #[must_use]
    pub fn admits(&self, collection: &str, author: &str) -> bool {
        let collection_ok = match &self.collections {
            CollectionScope::All => true,
            CollectionScope::Only(list) => {
                collection == crate::event::collection::IDENTITY
                    || collection == crate::event::collection::ACCOUNT
                    || list.binary_search_by(|c| c.as_str().cmp(collection)).is_ok()
            }
        };
        if !collection_ok {
            return false;
        }
        match &self.authors {
            AuthorScope::All => true,
            AuthorScope::Only(list) => list.binary_search_by(|a| a.as_str().cmp(author)).is_ok(),
        }
    }

    /// Query string for a Jetstream `subscribe` endpoint.
    #[must_use]
    pub fn jetstream_query(&self, cursor: Option<i64>) -> String {
        let mut params: Vec<String> = Vec::new();
        if let CollectionScope::Only(list) = &self.collections {
            params.extend(list.iter().map(|c| format!("wantedCollections={c}")));
        }
        if let AuthorScope::Only(list) = &self.authors {
            params.extend(list.iter().map(|a| format!("wantedDids={a}")));
        }
        if let Some(c) = cursor {
            params.push(format!("cursor={c}"));
        }
        params.join("&")
    }
}
