//! Upstream (Jetstream) record model.
//!
//! One JSON object per event. Commit records carry the repository record as
//! opaque JSON; only the collections the filter inspects are decoded further.

use serde::{Deserialize, Serialize};

use super::collection;
use super::{Embed, Event, EventKind, Post, ReplyRef, StrongRef};

/// Top-level record kind.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Commit,
    Identity,
    Account,
}

/// Repository operation of a commit.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOperation {
    Create,
    Update,
    Delete,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitBody {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rev: String,
    pub operation: CommitOperation,
    pub collection: String,
    pub rkey: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityBody {
    pub did: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBody {
    pub did: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

/// One upstream record, kept verbatim for broadcasting.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JetstreamRecord {
    pub did: String,
    #[serde(default)]
    pub time_us: i64,
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountBody>,
}

#[derive(Deserialize)]
struct PostRecord {
    #[serde(default)]
    text: String,
    #[serde(default)]
    langs: Vec<String>,
    #[serde(default)]
    reply: Option<ReplyRef>,
    #[serde(default)]
    embed: Option<EmbedRecord>,
}

#[derive(Deserialize)]
struct ExternalRecord {
    uri: String,
    #[serde(default)]
    title: String,
}

#[derive(Deserialize)]
struct QuotedRecord {
    record: StrongRef,
}

#[derive(Deserialize)]
#[serde(tag = "$type")]
enum EmbedRecord {
    #[serde(rename = "app.bsky.embed.images")]
    Images {
        #[serde(default)]
        images: Vec<serde_json::Value>,
    },
    #[serde(rename = "app.bsky.embed.video")]
    Video {},
    #[serde(rename = "app.bsky.embed.external")]
    External { external: ExternalRecord },
    #[serde(rename = "app.bsky.embed.record")]
    Record { record: StrongRef },
    #[serde(rename = "app.bsky.embed.recordWithMedia")]
    RecordWithMedia { record: QuotedRecord },
    #[serde(other)]
    Unknown,
}

impl EmbedRecord {
    fn into_embed(self) -> Option<Embed> {
        match self {
            Self::Images { images } => Some(Embed::Images { count: images.len() }),
            Self::Video {} => Some(Embed::Video),
            Self::External { external } => Some(Embed::External {
                uri: external.uri,
                title: external.title,
            }),
            Self::Record { record } => Some(Embed::Record { uri: record.uri }),
            Self::RecordWithMedia { record } => Some(Embed::Record { uri: record.record.uri }),
            Self::Unknown => None,
        }
    }
}

#[derive(Deserialize)]
struct SubjectRecord {
    subject: StrongRef,
}

#[derive(Deserialize)]
struct FollowRecord {
    subject: String,
}

fn decode_record<T: for<'de> Deserialize<'de>>(
    record: Option<&serde_json::Value>,
) -> Result<T, serde_json::Error> {
    match record {
        Some(value) => T::deserialize(value),
        None => T::deserialize(serde_json::Value::Null),
    }
}

fn decode_commit(commit: &CommitBody) -> Result<EventKind, serde_json::Error> {
    if commit.operation == CommitOperation::Delete {
        return Ok(EventKind::Delete {
            collection: commit.collection.clone(),
            rkey: commit.rkey.clone(),
        });
    }

    let record = commit.record.as_ref();
    let kind = match commit.collection.as_str() {
        collection::POST => {
            let post: PostRecord = decode_record(record)?;
            EventKind::Post(Post {
                text: post.text,
                langs: post.langs,
                reply: post.reply,
                embed: post.embed.and_then(EmbedRecord::into_embed),
                author_handle: None,
            })
        }
        collection::LIKE => {
            let like: SubjectRecord = decode_record(record)?;
            EventKind::Like { subject: like.subject }
        }
        collection::REPOST => {
            let repost: SubjectRecord = decode_record(record)?;
            EventKind::Repost {
                subject: repost.subject,
            }
        }
        collection::FOLLOW => {
            let follow: FollowRecord = decode_record(record)?;
            EventKind::Follow {
                subject: follow.subject,
            }
        }
        other => EventKind::Other {
            collection: other.to_string(),
        },
    };
    Ok(kind)
}

impl Event {
    /// Decodes an upstream record, keeping it as the event's raw form.
    pub fn from_record(record: JetstreamRecord) -> Result<Self, serde_json::Error> {
        let kind = match record.kind {
            RecordKind::Commit => match &record.commit {
                Some(commit) => decode_commit(commit)?,
                None => {
                    return Err(serde::de::Error::missing_field("commit"));
                }
            },
            RecordKind::Identity => EventKind::Identity {
                handle: record.identity.as_ref().and_then(|i| i.handle.clone()),
            },
            RecordKind::Account => EventKind::Account {
                active: record.account.as_ref().is_some_and(|a| a.active),
            },
        };

        Ok(Self {
            repo: record.did.clone(),
            time_us: record.time_us,
            kind,
            raw: Some(record),
        })
    }

    /// Parses and decodes one JSON line.
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        let record: JetstreamRecord = serde_json::from_str(line)?;
        Self::from_record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EmbedKind;

    #[test]
    fn decodes_reply_post_with_external_link() {
        let line = r#"{
            "did": "did:plc:author",
            "time_us": 1725911162329308,
            "kind": "commit",
            "commit": {
                "rev": "3l3qo2vutsw2b",
                "operation": "create",
                "collection": "app.bsky.feed.post",
                "rkey": "3l3qo2vuowo2b",
                "record": {
                    "$type": "app.bsky.feed.post",
                    "createdAt": "2024-09-09T19:46:02.102Z",
                    "langs": ["en", "de"],
                    "text": "read this",
                    "reply": {
                        "parent": {"cid": "bafy1", "uri": "at://did:plc:parent/app.bsky.feed.post/p1"},
                        "root": {"cid": "bafy0", "uri": "at://did:plc:root/app.bsky.feed.post/r1"}
                    },
                    "embed": {
                        "$type": "app.bsky.embed.external",
                        "external": {"uri": "https://example.com/a", "title": "A", "description": ""}
                    }
                },
                "cid": "bafyrei"
            }
        }"#;

        let event = Event::from_json(line).unwrap();
        assert_eq!(event.repo, "did:plc:author");
        assert_eq!(event.time_us, 1_725_911_162_329_308);
        let post = event.as_post().expect("post");
        assert_eq!(post.text, "read this");
        assert_eq!(post.langs, vec!["en".to_string(), "de".to_string()]);
        assert_eq!(
            post.reply.as_ref().unwrap().parent.uri,
            "at://did:plc:parent/app.bsky.feed.post/p1"
        );
        assert_eq!(
            post.embed,
            Some(Embed::External {
                uri: "https://example.com/a".to_string(),
                title: "A".to_string(),
            })
        );
        assert!(event.raw.is_some());
    }

    #[test]
    fn decodes_quote_with_media_as_record_embed() {
        let line = r#"{"did":"did:plc:a","time_us":1,"kind":"commit","commit":{"operation":"create","collection":"app.bsky.feed.post","rkey":"k","record":{"text":"q","embed":{"$type":"app.bsky.embed.recordWithMedia","record":{"$type":"app.bsky.embed.record","record":{"uri":"at://did:plc:b/app.bsky.feed.post/x","cid":"c"}},"media":{"$type":"app.bsky.embed.images","images":[]}}}}}"#;
        let event = Event::from_json(line).unwrap();
        let embed = event.as_post().unwrap().embed.as_ref().unwrap();
        assert_eq!(embed.kind(), EmbedKind::Record);
    }

    #[test]
    fn unknown_embed_type_decodes_as_no_embed() {
        let line = r#"{"did":"did:plc:a","kind":"commit","commit":{"operation":"create","collection":"app.bsky.feed.post","rkey":"k","record":{"text":"t","embed":{"$type":"app.bsky.embed.future"}}}}"#;
        let event = Event::from_json(line).unwrap();
        assert_eq!(event.as_post().unwrap().embed, None);
    }

    #[test]
    fn decodes_like_delete_identity_and_account() {
        let like = Event::from_json(
            r#"{"did":"did:plc:a","kind":"commit","commit":{"operation":"create","collection":"app.bsky.feed.like","rkey":"k","record":{"subject":{"uri":"at://did:plc:b/app.bsky.feed.post/x","cid":"c"}}}}"#,
        )
        .unwrap();
        assert!(matches!(
            like.kind,
            EventKind::Like { ref subject } if subject.uri.starts_with("at://did:plc:b")
        ));

        let delete = Event::from_json(
            r#"{"did":"did:plc:a","kind":"commit","commit":{"operation":"delete","collection":"app.bsky.feed.repost","rkey":"k"}}"#,
        )
        .unwrap();
        assert_eq!(
            delete.kind,
            EventKind::Delete {
                collection: "app.bsky.feed.repost".to_string(),
                rkey: "k".to_string(),
            }
        );

        let identity = Event::from_json(
            r#"{"did":"did:plc:a","kind":"identity","identity":{"did":"did:plc:a","handle":"alice.bsky.social","seq":1}}"#,
        )
        .unwrap();
        assert_eq!(
            identity.kind,
            EventKind::Identity {
                handle: Some("alice.bsky.social".to_string())
            }
        );

        let account = Event::from_json(
            r#"{"did":"did:plc:a","kind":"account","account":{"did":"did:plc:a","active":false,"status":"deactivated"}}"#,
        )
        .unwrap();
        assert_eq!(account.kind, EventKind::Account { active: false });
    }

    #[test]
    fn commit_without_body_is_rejected() {
        assert!(Event::from_json(r#"{"did":"did:plc:a","kind":"commit"}"#).is_err());
    }

    #[test]
    fn unmodeled_collection_is_other() {
        let event = Event::from_json(
            r#"{"did":"did:plc:a","kind":"commit","commit":{"operation":"update","collection":"app.bsky.actor.profile","rkey":"self","record":{"displayName":"A"}}}"#,
        )
        .unwrap();
        assert_eq!(
            event.kind,
            EventKind::Other {
                collection: "app.bsky.actor.profile".to_string()
            }
        );
    }
}
