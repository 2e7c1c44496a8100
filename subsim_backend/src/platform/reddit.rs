use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::Platform;
use crate::config::RedditConfig;
use crate::content::{
    CommentData, ContentItem, ContentKind, ContentSource, FetchError, MessageData, SubmissionData,
    ThingKind, ThingRef,
};

const DELETED_AUTHOR: &str = "[deleted]";
const MENTION_SUBJECT: &str = "username mention";

// ========================================================================
// Reddit API Types
// ========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub children: Vec<Thing>,
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thing {
    pub kind: String,
    pub data: ThingData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollOption {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollData {
    #[serde(default)]
    pub options: Vec<PollOption>,
}

/// Union of the submission, comment and message fields this crate reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThingData {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_flair_text: Option<String>,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub subreddit: Option<String>,
    // Submissions
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub selftext: Option<String>,
    #[serde(default)]
    pub is_self: Option<bool>,
    #[serde(default)]
    pub num_comments: Option<u32>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub poll_data: Option<PollData>,
    #[serde(default)]
    pub url: Option<String>,
    // Comments and messages
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub link_id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub was_comment: bool,
}

#[derive(Debug, Deserialize)]
struct Me {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    json: ApiResponse,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    errors: Vec<serde_json::Value>,
    #[serde(default)]
    data: Option<ApiResponseData>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseData {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    things: Vec<Thing>,
}

fn timestamp(seconds: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds as i64, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn author(data: &ThingData) -> Option<String> {
    data.author
        .clone()
        .filter(|author| !author.is_empty() && author != DELETED_AUTHOR)
}

impl Thing {
    /// Convert an API thing into a content snapshot. Unknown kinds yield `None`.
    pub fn into_item(self) -> Option<ContentItem> {
        let kind = ThingKind::from_prefix(&self.kind)?;
        let data = self.data;

        let content = match kind {
            ThingKind::Submission => ContentKind::Submission(SubmissionData {
                title: data.title.clone().unwrap_or_default(),
                selftext: data.selftext.clone().unwrap_or_default(),
                is_self: data.is_self.unwrap_or(true),
                num_comments: data.num_comments.unwrap_or(0),
                locked: data.locked,
                poll_options: data
                    .poll_data
                    .as_ref()
                    .map(|poll| poll.options.iter().map(|o| o.text.clone()).collect())
                    .unwrap_or_default(),
                url: data.url.clone(),
            }),
            ThingKind::Comment => {
                let parent = data
                    .parent_id
                    .as_deref()
                    .and_then(ThingRef::parse_fullname)?;
                let submission_id = data
                    .link_id
                    .as_deref()
                    .and_then(ThingRef::parse_fullname)
                    .map(|link| link.id)?;
                ContentKind::Comment(CommentData {
                    body: data.body.clone().unwrap_or_default(),
                    parent,
                    submission_id,
                })
            }
            ThingKind::Message => ContentKind::Message(MessageData {
                subject: data.subject.clone().unwrap_or_default(),
                body: data.body.clone().unwrap_or_default(),
                is_username_mention: data.subject.as_deref() == Some(MENTION_SUBJECT),
            }),
        };

        Some(ContentItem {
            author: author(&data),
            author_flair: data.author_flair_text.clone(),
            created_utc: timestamp(data.created_utc),
            subreddit: data.subreddit.clone().unwrap_or_default(),
            id: data.id,
            kind: content,
        })
    }
}

impl Listing {
    pub fn into_items(self) -> Vec<ContentItem> {
        self.data
            .children
            .into_iter()
            .filter_map(Thing::into_item)
            .collect()
    }
}

/// Unread inbox entries split by what the bot does with them.
#[derive(Debug, Default)]
struct Inbox {
    /// Username mentions. Inbox copies of comments lack the thread links, so
    /// the real comment has to be loaded.
    mentions: Vec<ThingRef>,
    /// Private messages, usable as they are.
    items: Vec<ContentItem>,
    /// Comment and post replies. Never answered from the inbox, only marked read.
    ignored: Vec<ThingRef>,
}

impl Inbox {
    fn sort(listing: Listing) -> Self {
        let mut inbox = Inbox::default();
        for thing in listing.data.children {
            if thing.kind == ThingKind::Comment.prefix() {
                let comment = ThingRef::comment(thing.data.id.clone());
                if thing.data.subject.as_deref() == Some(MENTION_SUBJECT) {
                    inbox.mentions.push(comment);
                } else {
                    inbox.ignored.push(comment);
                }
            } else if let Some(item) = thing.into_item() {
                inbox.items.push(item);
            }
        }
        inbox
    }
}

fn created_name(envelope: ApiEnvelope) -> Result<ThingRef> {
    if !envelope.json.errors.is_empty() {
        anyhow::bail!("Reddit rejected the request: {:?}", envelope.json.errors);
    }
    let data = envelope
        .json
        .data
        .context("Reddit response has no data")?;

    let fullname = data
        .name
        .or_else(|| data.things.into_iter().next().map(|thing| thing.data.name))
        .context("Reddit response does not name the created thing")?;

    ThingRef::parse_fullname(&fullname)
        .with_context(|| format!("Malformed fullname in Reddit response: {}", fullname))
}

// ========================================================================
// Reddit Client
// ========================================================================

/// Reddit OAuth API client acting as one bot account.
pub struct RedditClient {
    base_url: String,
    bot_name: String,
    access_token: String,
    client: Client,
}

impl RedditClient {
    pub fn new(config: &RedditConfig, bot_name: &str) -> Result<Self> {
        let access_token = config
            .access_tokens
            .get(bot_name)
            .cloned()
            .with_context(|| format!("No access token configured for {}", bot_name))?;

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build Reddit HTTP client")?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            bot_name: bot_name.to_string(),
            access_token,
            client,
        })
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Failed to reach Reddit at {}", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Reddit GET {} failed: {} - {}", path, status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Reddit response from {}", path))
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<ApiEnvelope> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .form(form)
            .send()
            .await
            .with_context(|| format!("Failed to reach Reddit at {}", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Reddit POST {} failed: {} - {}", path, status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Reddit response from {}", path))
    }

    async fn listing(&self, path: &str, limit: u32) -> Result<Vec<ContentItem>> {
        let listing: Listing = self.get_json(path, &[("limit", limit.to_string())]).await?;
        Ok(listing.into_items())
    }
}

#[async_trait]
impl ContentSource for RedditClient {
    async fn fetch(&self, thing: &ThingRef) -> Result<ContentItem, FetchError> {
        let listing: Listing = match thing.kind {
            ThingKind::Message => {
                self.get_json(&format!("/message/messages/{}", thing.id), &[])
                    .await?
            }
            ThingKind::Comment | ThingKind::Submission => {
                self.get_json("/api/info", &[("id", thing.fullname())])
                    .await?
            }
        };

        listing
            .into_items()
            .into_iter()
            .find(|item| item.thing_ref() == *thing)
            .ok_or_else(|| FetchError::NotFound(thing.clone()))
    }
}

#[async_trait]
impl Platform for RedditClient {
    fn name(&self) -> &str {
        "reddit"
    }

    async fn me(&self) -> Result<String> {
        let me: Me = self.get_json("/api/v1/me", &[]).await?;
        if !me.name.eq_ignore_ascii_case(&self.bot_name) {
            tracing::warn!(
                "Access token for {} belongs to {}",
                self.bot_name,
                me.name
            );
        }
        Ok(me.name)
    }

    async fn new_submissions(&self, subreddit: &str, limit: u32) -> Result<Vec<ContentItem>> {
        self.listing(&format!("/r/{}/new", subreddit), limit).await
    }

    async fn new_comments(&self, subreddit: &str, limit: u32) -> Result<Vec<ContentItem>> {
        self.listing(&format!("/r/{}/comments", subreddit), limit)
            .await
    }

    async fn unread_mentions(&self, limit: u32) -> Result<Vec<ContentItem>> {
        let listing: Listing = self
            .get_json("/message/unread", &[("limit", limit.to_string())])
            .await?;
        let inbox = Inbox::sort(listing);

        let mut items = inbox.items;
        for mention in inbox.mentions {
            match self.fetch(&mention).await {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!("Skipping mention {}: {}", mention, e),
            }
        }

        if !inbox.ignored.is_empty() {
            tracing::debug!("Marking {} ignored inbox replies read", inbox.ignored.len());
            if let Err(e) = self.mark_read(&inbox.ignored).await {
                tracing::warn!("Failed to mark ignored inbox replies read: {}", e);
            }
        }
        Ok(items)
    }

    async fn mark_read(&self, things: &[ThingRef]) -> Result<()> {
        if things.is_empty() {
            return Ok(());
        }
        let ids = things
            .iter()
            .map(ThingRef::fullname)
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/api/read_message", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .form(&[("id", ids.as_str())])
            .send()
            .await
            .context("Failed to mark messages read")?;
        if !response.status().is_success() {
            anyhow::bail!("Reddit read_message failed: {}", response.status());
        }
        Ok(())
    }

    async fn reply(&self, thing: &ThingRef, body: &str) -> Result<ThingRef> {
        let fullname = thing.fullname();
        tracing::info!(":: Sending out reply to {} as {}", fullname, self.bot_name);
        let envelope = self
            .post_form(
                "/api/comment",
                &[("api_type", "json"), ("thing_id", fullname.as_str()), ("text", body)],
            )
            .await?;
        created_name(envelope)
    }

    async fn submit(&self, subreddit: &str, title: &str, selftext: &str) -> Result<ThingRef> {
        tracing::info!(":: Submitting new post to r/{} as {}", subreddit, self.bot_name);
        let envelope = self
            .post_form(
                "/api/submit",
                &[
                    ("api_type", "json"),
                    ("kind", "self"),
                    ("sr", subreddit),
                    ("title", title),
                    ("text", selftext),
                ],
            )
            .await?;
        created_name(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"{
        "kind": "Listing",
        "data": {
            "after": null,
            "children": [
                {"kind": "t3", "data": {
                    "id": "abc", "name": "t3_abc", "author": "op",
                    "author_flair_text": null, "created_utc": 1700000000.0,
                    "subreddit": "SubSimGPT2", "title": "Which is best?",
                    "selftext": "", "is_self": true, "num_comments": 12,
                    "locked": false,
                    "poll_data": {"options": [{"text": "cats"}, {"text": "dogs"}]}
                }},
                {"kind": "t1", "data": {
                    "id": "def", "name": "t1_def", "author": "[deleted]",
                    "created_utc": 1700000100.0, "subreddit": "SubSimGPT2",
                    "body": "[removed]", "parent_id": "t3_abc", "link_id": "t3_abc"
                }},
                {"kind": "t4", "data": {
                    "id": "ghi", "name": "t4_ghi", "author": "someone",
                    "created_utc": 1700000200.0, "subject": "hello",
                    "body": "are you a bot?", "was_comment": false
                }},
                {"kind": "more", "data": {"id": "zzz"}}
            ]
        }
    }"#;

    #[test]
    fn converts_listing_children_into_items() {
        let listing: Listing = serde_json::from_str(LISTING).expect("parse listing");
        let items = listing.into_items();
        assert_eq!(items.len(), 3);

        let submission = items[0].as_submission().expect("submission");
        assert_eq!(submission.poll_options, vec!["cats", "dogs"]);
        assert_eq!(submission.num_comments, 12);
        assert_eq!(items[0].created_utc.timestamp(), 1_700_000_000);

        assert_eq!(items[1].author, None);
        let comment = items[1].as_comment().expect("comment");
        assert_eq!(comment.parent, ThingRef::submission("abc"));
        assert_eq!(comment.submission_id, "abc");

        match &items[2].kind {
            ContentKind::Message(message) => {
                assert_eq!(message.body, "are you a bot?");
                assert!(!message.is_username_mention);
            }
            other => panic!("expected a message, got {:?}", other),
        }
    }

    #[test]
    fn inbox_replies_are_set_aside_for_marking_read() {
        let listing: Listing = serde_json::from_str(
            r#"{"kind": "Listing", "data": {"children": [
                {"kind": "t1", "data": {"id": "m1", "subject": "username mention",
                    "created_utc": 1700000000.0, "body": "hey u/TestBot"}},
                {"kind": "t1", "data": {"id": "r1", "subject": "comment reply",
                    "created_utc": 1700000000.0, "body": "nice"}},
                {"kind": "t1", "data": {"id": "r2", "subject": "post reply",
                    "created_utc": 1700000000.0, "body": "meh"}},
                {"kind": "t4", "data": {"id": "d1", "author": "someone", "subject": "hi",
                    "created_utc": 1700000000.0, "body": "hello"}}
            ]}}"#,
        )
        .expect("parse inbox");

        let inbox = Inbox::sort(listing);
        assert_eq!(inbox.mentions, vec![ThingRef::comment("m1")]);
        assert_eq!(inbox.ignored, vec![ThingRef::comment("r1"), ThingRef::comment("r2")]);
        assert_eq!(inbox.items.len(), 1);
        assert_eq!(inbox.items[0].thing_ref(), ThingRef::message("d1"));
    }

    #[test]
    fn comment_without_thread_links_is_dropped() {
        let thing = Thing {
            kind: "t1".to_string(),
            data: ThingData {
                id: "x".to_string(),
                body: Some("orphan".to_string()),
                ..ThingData::default()
            },
        };
        assert!(thing.into_item().is_none());
    }

    #[test]
    fn reads_created_thing_from_api_responses() {
        let reply: ApiEnvelope = serde_json::from_str(
            r#"{"json": {"errors": [], "data": {"things": [{"kind": "t1", "data": {"id": "new1", "name": "t1_new1"}}]}}}"#,
        )
        .expect("parse reply response");
        assert_eq!(created_name(reply).expect("created"), ThingRef::comment("new1"));

        let submit: ApiEnvelope = serde_json::from_str(
            r#"{"json": {"errors": [], "data": {"id": "p1", "name": "t3_p1", "url": "https://reddit.com/p1"}}}"#,
        )
        .expect("parse submit response");
        assert_eq!(created_name(submit).expect("created"), ThingRef::submission("p1"));

        let rejected: ApiEnvelope = serde_json::from_str(
            r#"{"json": {"errors": [["RATELIMIT", "slow down", "ratelimit"]]}}"#,
        )
        .expect("parse error response");
        assert!(created_name(rejected).is_err());
    }

    #[test]
    fn client_requires_a_token_for_the_bot() {
        let mut config = RedditConfig::default();
        assert!(RedditClient::new(&config, "TestBot").is_err());

        config
            .access_tokens
            .insert("TestBot".to_string(), "token".to_string());
        let client = RedditClient::new(&config, "TestBot").expect("client");
        assert_eq!(client.name(), "reddit");
    }
}
