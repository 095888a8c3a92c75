//! Firehose event model.
//!
//! Upstream records arrive in many shapes. They are decoded once into the
//! closed [`EventKind`] union so that nothing downstream has to flush raw
//! JSON for field presence.

/// Upstream record model and decoding into [`Event`].
pub mod raw;

use serde::{Deserialize, Serialize};

pub use raw::{AccountBody, CommitBody, CommitOperation, IdentityBody, JetstreamRecord, RecordKind};

/// Canonical collection strings.
pub mod collection {
    /// Content posts.
    pub const POST: &str = "app.bsky.feed.post";
    /// Likes.
    pub const LIKE: &str = "app.bsky.feed.like";
    /// Reposts.
    pub const REPOST: &str = "app.bsky.feed.repost";
    /// Follows.
    pub const FOLLOW: &str = "app.bsky.graph.follow";
    /// Sentinel for identity (handle) updates.
    pub const IDENTITY: &str = "identity";
    /// Sentinel for account status updates.
    pub const ACCOUNT: &str = "account";
}

/// Kind of media or record embedded in a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedKind {
    /// Post carries no embed.
    None,
    /// Image gallery.
    Images,
    /// Video.
    Video,
    /// External link card.
    External,
    /// Quoted record.
    Record,
}

impl EmbedKind {
    /// Parses a configuration token (`none|images|video|external|record`).
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "none" => Some(Self::None),
            "images" => Some(Self::Images),
            "video" => Some(Self::Video),
            "external" => Some(Self::External),
            "record" => Some(Self::Record),
            _ => None,
        }
    }
}

/// A reference to another record by URI.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    #[serde(default)]
    pub cid: String,
}

impl StrongRef {
    /// Creates a reference with an empty CID.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            cid: String::new(),
        }
    }
}

/// Reply threading information of a post.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub parent: StrongRef,
    pub root: StrongRef,
}

/// Decoded post embed.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Embed {
    Images { count: usize },
    Video,
    External { uri: String, title: String },
    Record { uri: String },
}

impl Embed {
    /// The kind of this embed.
    #[must_use]
    pub const fn kind(&self) -> EmbedKind {
        match self {
            Self::Images { .. } => EmbedKind::Images,
            Self::Video => EmbedKind::Video,
            Self::External { .. } => EmbedKind::External,
            Self::Record { .. } => EmbedKind::Record,
        }
    }
}

/// A content post.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub langs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
    /// Display handle of the author, when the producer knew it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_handle: Option<String>,
}

impl Post {
    /// Creates a post with the given text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Sets the language tags.
    #[must_use]
    pub fn langs<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.langs = langs.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the post as a reply to `parent_uri`.
    #[must_use]
    pub fn reply_to(mut self, parent_uri: impl Into<String>) -> Self {
        let parent = StrongRef::new(parent_uri);
        self.reply = Some(ReplyRef {
            root: parent.clone(),
            parent,
        });
        self
    }

    /// Attaches an embed.
    #[must_use]
    pub fn embed(mut self, embed: Embed) -> Self {
        self.embed = Some(embed);
        self
    }

    /// Sets the author's display handle.
    #[must_use]
    pub fn author_handle(mut self, handle: impl Into<String>) -> Self {
        self.author_handle = Some(handle.into());
        self
    }
}

/// The closed set of event kinds the filter understands.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Post(Post),
    Like { subject: StrongRef },
    Repost { subject: StrongRef },
    Follow { subject: String },
    Delete { collection: String, rkey: String },
    Identity {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handle: Option<String>,
    },
    Account { active: bool },
    /// Create/update in a collection with no dedicated variant.
    Other { collection: String },
}

/// One firehose event.
///
/// `raw` keeps the upstream record when the event was decoded from one; it
/// wins over the decoded form both for classification and as broadcast
/// payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Repository (actor) identifier.
    pub repo: String,
    /// Upstream timestamp in microseconds.
    pub time_us: i64,
    /// Decoded kind.
    pub kind: EventKind,
    /// Upstream record this event was decoded from.
    #[serde(skip)]
    pub raw: Option<JetstreamRecord>,
}

impl Event {
    /// Creates an event without a raw record.
    #[must_use]
    pub fn new(repo: impl Into<String>, kind: EventKind) -> Self {
        Self {
            repo: repo.into(),
            time_us: 0,
            kind,
            raw: None,
        }
    }

    /// Creates a post event.
    #[must_use]
    pub fn post(repo: impl Into<String>, post: Post) -> Self {
        Self::new(repo, EventKind::Post(post))
    }

    /// Creates a like event for the record at `subject_uri`.
    #[must_use]
    pub fn like(repo: impl Into<String>, subject_uri: impl Into<String>) -> Self {
        Self::new(
            repo,
            EventKind::Like {
                subject: StrongRef::new(subject_uri),
            },
        )
    }

    /// Creates a repost event for the record at `subject_uri`.
    #[must_use]
    pub fn repost(repo: impl Into<String>, subject_uri: impl Into<String>) -> Self {
        Self::new(
            repo,
            EventKind::Repost {
                subject: StrongRef::new(subject_uri),
            },
        )
    }

    /// Returns the post payload, if this is a post.
    #[must_use]
    pub const fn as_post(&self) -> Option<&Post> {
        match &self.kind {
            EventKind::Post(post) => Some(post),
            _ => None,
        }
    }
}
