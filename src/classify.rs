//! Event classification.
//!
//! Flattens an [`Event`] into the fields rule evaluation looks at. The
//! result borrows from the event, so classifying is allocation-free.

use crate::event::{collection, EmbedKind, Event, EventKind, RecordKind};

const AT_URI_SCHEME: &str = "at://";

/// Post-only fields. Absent for every other kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostFields<'a> {
    /// Post text.
    pub text: &'a str,
    /// Declared language tags, in post order.
    pub languages: &'a [String],
    /// Embed kind; [`EmbedKind::None`] when the post has no embed.
    pub embed_kind: EmbedKind,
    /// True iff the post replies to another record.
    pub is_reply: bool,
    /// Link target, present only for external-link embeds.
    pub external_url: Option<&'a str>,
}

/// Canonical view of an event used by the rule engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified<'a> {
    /// Collection (event kind) string.
    pub collection: &'a str,
    /// Actor that produced the event.
    pub author_id: &'a str,
    /// Actor being interacted with (likes, reposts, replies).
    pub target_id: Option<&'a str>,
    /// Post fields, if this is a post.
    pub post: Option<PostFields<'a>>,
    /// Display handle of the author, if the event carried one.
    pub author_handle: Option<&'a str>,
}

/// Extracts the authority (actor identifier) from an `at://` URI.
///
/// `at://did:plc:abc123/app.bsky.feed.post/xyz` yields `did:plc:abc123`.
/// Anything without the `at://` scheme or with an empty authority yields
/// `None`.
#[must_use]
pub fn extract_target_id(uri: &str) -> Option<&str> {
    if !uri.starts_with(AT_URI_SCHEME) {
        return None;
    }
    // "at:", "", authority, ...
    let authority = uri.split('/').nth(2)?;
    if authority.is_empty() {
        None
    } else {
        Some(authority)
    }
}

fn kind_collection(kind: &EventKind) -> &str {
    match kind {
        EventKind::Post(_) => collection::POST,
        EventKind::Like { .. } => collection::LIKE,
        EventKind::Repost { .. } => collection::REPOST,
        EventKind::Follow { .. } => collection::FOLLOW,
        EventKind::Delete { collection, .. } | EventKind::Other { collection } => collection,
        EventKind::Identity { .. } => collection::IDENTITY,
        EventKind::Account { .. } => collection::ACCOUNT,
    }
}

/// Classifies an event.
#[must_use]
pub fn classify(event: &Event) -> Classified<'_> {
    let raw = event.raw.as_ref();

    let author_id = raw
        .map(|r| r.did.as_str())
        .filter(|did| !did.is_empty())
        .unwrap_or(event.repo.as_str());

    let raw_collection = raw.and_then(|r| match r.kind {
        RecordKind::Commit => r
            .commit
            .as_ref()
            .map(|c| c.collection.as_str())
            .filter(|c| !c.is_empty()),
        RecordKind::Identity => Some(collection::IDENTITY),
        RecordKind::Account => Some(collection::ACCOUNT),
    });
    let collection = raw_collection.unwrap_or_else(|| kind_collection(&event.kind));

    let (target_id, post, author_handle) = match &event.kind {
        EventKind::Like { subject } | EventKind::Repost { subject } => {
            (extract_target_id(&subject.uri), None, None)
        }
        EventKind::Post(post) => {
            let target = post
                .reply
                .as_ref()
                .and_then(|r| extract_target_id(&r.parent.uri));
            let embed_kind = post.embed.as_ref().map_or(EmbedKind::None, |e| e.kind());
            let external_url = match &post.embed {
                Some(crate::event::Embed::External { uri, .. }) => Some(uri.as_str()),
                _ => None,
            };
            let fields = PostFields {
                text: &post.text,
                languages: &post.langs,
                embed_kind,
                is_reply: post.reply.is_some(),
                external_url,
            };
            (target, Some(fields), post.author_handle.as_deref())
        }
        EventKind::Identity { handle } => (None, None, handle.as_deref()),
        _ => (None, None, None),
    };

    Classified {
        collection,
        author_id,
        target_id,
        post,
        author_handle,
    }
}
