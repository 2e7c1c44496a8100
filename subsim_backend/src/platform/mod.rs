pub mod reddit;

use anyhow::Result;
use async_trait::async_trait;

use crate::content::{ContentItem, ContentSource, ThingRef};

pub use reddit::RedditClient;

/// A social platform the bots read from and post to, acting as one account.
#[async_trait]
pub trait Platform: ContentSource {
    /// Human-readable name of the platform
    fn name(&self) -> &str;

    /// Username of the account this client acts as.
    async fn me(&self) -> Result<String>;

    /// Newest submissions in a community, newest first.
    async fn new_submissions(&self, subreddit: &str, limit: u32) -> Result<Vec<ContentItem>>;

    /// Newest comments across a community, newest first.
    async fn new_comments(&self, subreddit: &str, limit: u32) -> Result<Vec<ContentItem>>;

    /// Unread username mentions and private messages addressed to the account.
    async fn unread_mentions(&self, limit: u32) -> Result<Vec<ContentItem>>;

    async fn mark_read(&self, things: &[ThingRef]) -> Result<()>;

    /// Post `body` as a reply. Returns the new comment.
    async fn reply(&self, thing: &ThingRef, body: &str) -> Result<ThingRef>;

    /// Create a self post. Returns the new submission.
    async fn submit(&self, subreddit: &str, title: &str, selftext: &str) -> Result<ThingRef>;
}
