use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ContentItem, ContentSource, FetchError, ThingRef};

/// On-disk fixture format: a flat list of items linked by their refs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadFixture {
    #[serde(default)]
    pub items: Vec<ContentItem>,
    /// Fullnames whose lookups should fail, to replay removed content.
    #[serde(default)]
    pub unavailable: Vec<String>,
}

/// In-memory content source. Backs the offline inspector and the engine tests.
#[derive(Debug, Default)]
pub struct ThreadStore {
    items: HashMap<ThingRef, ContentItem>,
    unavailable: HashSet<ThingRef>,
    fetches: AtomicUsize,
}

impl ThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = ContentItem>,
    {
        let mut store = Self::new();
        for item in items {
            store.insert(item);
        }
        store
    }

    pub fn from_fixture(fixture: ThreadFixture) -> Self {
        let mut store = Self::from_items(fixture.items);
        for fullname in &fixture.unavailable {
            match ThingRef::parse_fullname(fullname) {
                Some(thing) => store.make_unavailable(thing),
                None => tracing::warn!("Ignoring malformed fullname in fixture: {}", fullname),
            }
        }
        store
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read thread fixture {:?}", path))?;
        let fixture: ThreadFixture = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse thread fixture {:?}", path))?;
        tracing::info!("Loaded {} items from {:?}", fixture.items.len(), path);
        Ok(Self::from_fixture(fixture))
    }

    pub fn insert(&mut self, item: ContentItem) -> ThingRef {
        let thing = item.thing_ref();
        self.items.insert(thing.clone(), item);
        thing
    }

    /// Keep the item listed but make every lookup of it fail.
    pub fn make_unavailable(&mut self, thing: ThingRef) {
        self.unavailable.insert(thing);
    }

    pub fn get(&self, thing: &ThingRef) -> Option<&ContentItem> {
        self.items.get(thing)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of `fetch` calls served so far, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn reset_fetch_count(&self) {
        self.fetches.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentSource for ThreadStore {
    async fn fetch(&self, thing: &ThingRef) -> Result<ContentItem, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.contains(thing) {
            return Err(FetchError::NotFound(thing.clone()));
        }
        self.items
            .get(thing)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(thing.clone()))
    }
}

/// Builders for thread shapes used across the engine tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Duration, Utc};

    use crate::content::{
        CommentData, ContentItem, ContentKind, MessageData, SubmissionData, ThingRef,
    };

    pub fn hours_ago(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
        now - Duration::hours(hours)
    }

    pub fn submission(id: &str, author: &str, created_utc: DateTime<Utc>) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            author: Some(author.to_string()),
            author_flair: None,
            created_utc,
            subreddit: "SubSimGPT2".to_string(),
            kind: ContentKind::Submission(SubmissionData {
                title: "A title".to_string(),
                selftext: "Some selftext".to_string(),
                is_self: true,
                num_comments: 3,
                locked: false,
                poll_options: Vec::new(),
                url: None,
            }),
        }
    }

    pub fn comment(
        id: &str,
        author: &str,
        body: &str,
        parent: ThingRef,
        submission_id: &str,
        created_utc: DateTime<Utc>,
    ) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            author: Some(author.to_string()),
            author_flair: None,
            created_utc,
            subreddit: "SubSimGPT2".to_string(),
            kind: ContentKind::Comment(CommentData {
                body: body.to_string(),
                parent,
                submission_id: submission_id.to_string(),
            }),
        }
    }

    pub fn message(id: &str, author: &str, body: &str, created_utc: DateTime<Utc>) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            author: Some(author.to_string()),
            author_flair: None,
            created_utc,
            subreddit: String::new(),
            kind: ContentKind::Message(MessageData {
                subject: "username mention".to_string(),
                body: body.to_string(),
                is_username_mention: false,
            }),
        }
    }

    /// A submission `s` followed by a straight chain of comments `c1..=cN`,
    /// each replying to the previous one. Authors cycle through `authors`.
    pub fn chain(
        submission_author: &str,
        authors: &[&str],
        created_utc: DateTime<Utc>,
    ) -> Vec<ContentItem> {
        let mut items = vec![submission("s", submission_author, created_utc)];
        let mut parent = ThingRef::submission("s");
        for (index, author) in authors.iter().enumerate() {
            let id = format!("c{}", index + 1);
            items.push(comment(
                &id,
                author,
                &format!("body {}", index + 1),
                parent.clone(),
                "s",
                created_utc,
            ));
            parent = ThingRef::comment(id);
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn counts_fetches_and_reports_missing_things() {
        let store = ThreadStore::from_items(chain("op", &["a", "b"], Utc::now()));
        assert_eq!(store.len(), 3);

        let leaf = store.fetch(&ThingRef::comment("c2")).await.expect("leaf exists");
        let parent = store.parent_of(&leaf).await.expect("parent exists");
        assert_eq!(parent.id, "c1");

        let missing = store.fetch(&ThingRef::comment("nope")).await;
        assert!(matches!(missing, Err(FetchError::NotFound(_))));
        assert_eq!(store.fetch_count(), 3);
    }

    #[tokio::test]
    async fn unavailable_things_fail_lookup() {
        let mut store = ThreadStore::from_items(chain("op", &["a"], Utc::now()));
        store.make_unavailable(ThingRef::submission("s"));

        let comment = store.fetch(&ThingRef::comment("c1")).await.expect("comment");
        assert!(store.submission_of(&comment).await.is_err());
        assert!(store.get(&ThingRef::submission("s")).is_some());
    }

    #[test]
    fn fixture_json_round_trips_through_serde() {
        let fixture = ThreadFixture {
            items: chain("op", &["a"], Utc::now()),
            unavailable: vec!["t1_c1".to_string()],
        };
        let json = serde_json::to_string(&fixture).expect("serialize");
        let parsed: ThreadFixture = serde_json::from_str(&json).expect("parse");
        let store = ThreadStore::from_fixture(parsed);
        assert_eq!(store.len(), 2);
        assert!(store.unavailable.contains(&ThingRef::comment("c1")));
    }

    #[test]
    fn load_json_reads_fixture_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("thread.json");
        let fixture = ThreadFixture {
            items: chain("op", &["a", "b", "c"], Utc::now()),
            unavailable: Vec::new(),
        };
        fs::write(&path, serde_json::to_string_pretty(&fixture).expect("serialize"))
            .expect("write fixture");

        let store = ThreadStore::load_json(&path).expect("load");
        assert_eq!(store.len(), 4);
        assert!(ThreadStore::load_json(dir.path().join("missing.json")).is_err());
    }
}
