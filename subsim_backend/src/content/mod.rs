//! Read-only view of platform content (submissions, comments, messages) and
//! the lookup capability the engines walk threads with.

pub mod thread_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use thread_store::ThreadStore;

/// Discriminant of a [`ThingRef`], matching the platform's fullname prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThingKind {
    Comment,
    Submission,
    Message,
}

impl ThingKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ThingKind::Comment => "t1",
            ThingKind::Submission => "t3",
            ThingKind::Message => "t4",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "t1" => Some(ThingKind::Comment),
            "t3" => Some(ThingKind::Submission),
            "t4" => Some(ThingKind::Message),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThingKind::Comment => "comment",
            ThingKind::Submission => "submission",
            ThingKind::Message => "message",
        }
    }
}

/// Lookup-only reference to a piece of content. Resolving it may hit the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThingRef {
    pub kind: ThingKind,
    pub id: String,
}

impl ThingRef {
    pub fn new(kind: ThingKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn comment(id: impl Into<String>) -> Self {
        Self::new(ThingKind::Comment, id)
    }

    pub fn submission(id: impl Into<String>) -> Self {
        Self::new(ThingKind::Submission, id)
    }

    pub fn message(id: impl Into<String>) -> Self {
        Self::new(ThingKind::Message, id)
    }

    /// Parse a fullname such as `t1_abc123`.
    pub fn parse_fullname(fullname: &str) -> Option<Self> {
        let (prefix, id) = fullname.split_once('_')?;
        if id.is_empty() {
            return None;
        }
        ThingKind::from_prefix(prefix).map(|kind| Self::new(kind, id))
    }

    pub fn fullname(&self) -> String {
        format!("{}_{}", self.kind.prefix(), self.id)
    }

    pub fn is_submission(&self) -> bool {
        self.kind == ThingKind::Submission
    }
}

impl fmt::Display for ThingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fullname())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionData {
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default = "default_is_self")]
    pub is_self: bool,
    #[serde(default)]
    pub num_comments: u32,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub poll_options: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
}

fn default_is_self() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentData {
    pub body: String,
    /// Direct parent: another comment, or the submission for top-level comments.
    pub parent: ThingRef,
    /// Id of the submission this comment ultimately belongs to.
    pub submission_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    #[serde(default)]
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub is_username_mention: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentKind {
    Submission(SubmissionData),
    Comment(CommentData),
    Message(MessageData),
}

/// A snapshot of one submission, comment or message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    /// `None` once the author deleted their account or the content.
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_flair: Option<String>,
    pub created_utc: DateTime<Utc>,
    #[serde(default)]
    pub subreddit: String,
    pub kind: ContentKind,
}

impl ContentItem {
    pub fn thing_kind(&self) -> ThingKind {
        match self.kind {
            ContentKind::Submission(_) => ThingKind::Submission,
            ContentKind::Comment(_) => ThingKind::Comment,
            ContentKind::Message(_) => ThingKind::Message,
        }
    }

    pub fn thing_ref(&self) -> ThingRef {
        ThingRef::new(self.thing_kind(), self.id.clone())
    }

    pub fn is_submission(&self) -> bool {
        matches!(self.kind, ContentKind::Submission(_))
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.kind, ContentKind::Comment(_))
    }

    pub fn as_submission(&self) -> Option<&SubmissionData> {
        match &self.kind {
            ContentKind::Submission(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_comment(&self) -> Option<&CommentData> {
        match &self.kind {
            ContentKind::Comment(data) => Some(data),
            _ => None,
        }
    }

    /// All searchable text of the item merged into one string.
    pub fn text_content(&self) -> String {
        match &self.kind {
            ContentKind::Submission(s) => format!("{} {}", s.title, s.selftext),
            ContentKind::Comment(c) => c.body.clone(),
            ContentKind::Message(m) => m.body.clone(),
        }
    }

    /// Case-insensitive author comparison. A deleted author never matches.
    pub fn is_authored_by(&self, username: &str) -> bool {
        self.author
            .as_deref()
            .map(|author| author.eq_ignore_ascii_case(username))
            .unwrap_or(false)
    }

    pub fn same_author_as(&self, other: &ContentItem) -> bool {
        match (&self.author, &other.author) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Hours elapsed since the item was created.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_utc).num_seconds() as f64 / 3600.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{0} not found")]
    NotFound(ThingRef),
    #[error("{0} has no parent")]
    NoParent(String),
    #[error("platform request failed: {0}")]
    Platform(#[from] anyhow::Error),
}

/// Lookup capability over platform content.
///
/// Implemented by the live platform client and by [`ThreadStore`]. Every
/// call may fail; callers in this crate recover locally.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, thing: &ThingRef) -> Result<ContentItem, FetchError>;

    async fn parent_of(&self, item: &ContentItem) -> Result<ContentItem, FetchError> {
        match &item.kind {
            ContentKind::Comment(comment) => self.fetch(&comment.parent).await,
            _ => Err(FetchError::NoParent(item.thing_ref().fullname())),
        }
    }

    /// The submission a comment belongs to. A submission is its own root.
    async fn submission_of(&self, item: &ContentItem) -> Result<ContentItem, FetchError> {
        match &item.kind {
            ContentKind::Comment(comment) => {
                self.fetch(&ThingRef::submission(comment.submission_id.clone()))
                    .await
            }
            ContentKind::Submission(_) => Ok(item.clone()),
            ContentKind::Message(_) => Err(FetchError::NoParent(item.thing_ref().fullname())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_prints_fullnames() {
        let thing = ThingRef::parse_fullname("t1_abc123").expect("valid fullname");
        assert_eq!(thing.kind, ThingKind::Comment);
        assert_eq!(thing.id, "abc123");
        assert_eq!(thing.fullname(), "t1_abc123");

        assert_eq!(
            ThingRef::parse_fullname("t3_xyz"),
            Some(ThingRef::submission("xyz"))
        );
        assert!(ThingRef::parse_fullname("t5_sub").is_none());
        assert!(ThingRef::parse_fullname("t1_").is_none());
        assert!(ThingRef::parse_fullname("nonsense").is_none());
    }

    #[test]
    fn deleted_author_never_matches() {
        let item = ContentItem {
            id: "a".to_string(),
            author: None,
            author_flair: None,
            created_utc: Utc::now(),
            subreddit: "test".to_string(),
            kind: ContentKind::Message(MessageData {
                subject: String::new(),
                body: "hi".to_string(),
                is_username_mention: false,
            }),
        };
        assert!(!item.is_authored_by("anyone"));
        assert!(!item.same_author_as(&item));
    }

    #[test]
    fn submission_text_merges_title_and_selftext() {
        let item = ContentItem {
            id: "s".to_string(),
            author: Some("op".to_string()),
            author_flair: None,
            created_utc: Utc::now(),
            subreddit: "test".to_string(),
            kind: ContentKind::Submission(SubmissionData {
                title: "Title".to_string(),
                selftext: "Body".to_string(),
                is_self: true,
                num_comments: 0,
                locked: false,
                poll_options: Vec::new(),
                url: None,
            }),
        };
        assert_eq!(item.text_content(), "Title Body");
    }
}
