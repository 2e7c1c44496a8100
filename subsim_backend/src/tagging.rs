//! Tagged-text format shared with the fine-tuned models.
//!
//! A thread is serialized root first: one submission fragment followed by one
//! fragment per comment, e.g.
//!
//! ```text
//! <|soss r/sub|><|sot|>title<|eot|><|sost|>selftext<|eost|><|sor u/alice|>hi<|eor|>
//! ```
//!
//! Generated text is parsed back out of the same format.

use regex_lite::Regex;
use serde::Serialize;

use crate::content::{ContentItem, ContentKind, ContentSource, SubmissionData};

pub const REPLY_TAG: &str = "<|sor|>";
pub const OWN_COMMENT_REPLY_TAG: &str = "<|soocr|>";
pub const OWN_SUBMISSION_REPLY_TAG: &str = "<|soopr|>";

const TAG_START: &str = "<|";
const TAG_END: &str = "|>";
const TITLE_START_TAG: &str = "<|sot|>";
const SELFTEXT_START_TAG: &str = "<|sost|>";

/// HTML entity the models learned from zero-width-space paragraphs.
const ZERO_WIDTH_ARTIFACT: &str = "&amp;#x200B;\n";
/// A literal backslash-n, as emitted by the models.
const ESCAPED_NEWLINE: &str = "\\n";
const FALLBACK_MARKER: &str = "!!!!";

const MAX_TITLE_CHARS: usize = 300;
const DELETED_AUTHOR: &str = "[deleted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommentTag {
    /// The comment's author also wrote the submission.
    OwnSubmission,
    /// The comment's author wrote the comment two levels up.
    OwnComment,
    Plain,
}

/// Fields of a new post parsed out of generated text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedSubmission {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selftext: Option<String>,
}

impl ExtractedSubmission {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
    }
}

pub struct Tagging {
    history_depth: usize,
}

impl Tagging {
    pub fn new(history_depth: usize) -> Self {
        Self {
            history_depth: history_depth.max(1),
        }
    }

    pub fn history_depth(&self) -> usize {
        self.history_depth
    }

    /// Serialize `item` and up to `history_depth - 1` of its ancestors, root first.
    ///
    /// The walk stops at the submission, at the depth limit, or at the first
    /// ancestor that cannot be fetched; whatever was collected so far is used.
    pub async fn collate_tagged_history<S>(&self, source: &S, item: &ContentItem) -> String
    where
        S: ContentSource + ?Sized,
    {
        let lineage = self.walk_ancestors(source, item).await;

        let mut fragments = Vec::with_capacity(lineage.len());
        for index in 0..lineage.len() {
            fragments.push(tag_in_lineage(source, &lineage, index).await);
        }

        fragments.reverse();
        fragments.concat()
    }

    /// Ancestors of `item`, leaf first, `item` included.
    async fn walk_ancestors<S>(&self, source: &S, item: &ContentItem) -> Vec<ContentItem>
    where
        S: ContentSource + ?Sized,
    {
        let mut lineage = vec![item.clone()];

        while lineage.len() < self.history_depth {
            let next = {
                let current = &lineage[lineage.len() - 1];
                if !current.is_comment() {
                    break;
                }
                match source.parent_of(current).await {
                    Ok(parent) => parent,
                    Err(e) => {
                        tracing::warn!(
                            "Stopping history walk at {}: {}",
                            current.thing_ref(),
                            e
                        );
                        break;
                    }
                }
            };
            lineage.push(next);
        }

        lineage
    }

    /// Tag that opens the bot's own reply to `item`.
    pub async fn reply_tag<S>(&self, source: &S, item: &ContentItem, bot_username: &str) -> &'static str
    where
        S: ContentSource + ?Sized,
    {
        if !item.is_comment() {
            return REPLY_TAG;
        }

        match source.submission_of(item).await {
            Ok(submission) if submission.is_authored_by(bot_username) => {
                return OWN_SUBMISSION_REPLY_TAG;
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("No submission for reply tag of {}: {}", item.thing_ref(), e),
        }

        match source.parent_of(item).await {
            Ok(parent) if parent.is_authored_by(bot_username) => OWN_COMMENT_REPLY_TAG,
            Ok(_) => REPLY_TAG,
            Err(e) => {
                tracing::debug!("No parent for reply tag of {}: {}", item.thing_ref(), e);
                REPLY_TAG
            }
        }
    }

    /// Full generation prompt for `bot_username` answering `item`.
    pub async fn prepare_prompt<S>(&self, source: &S, item: &ContentItem, bot_username: &str) -> String
    where
        S: ContentSource + ?Sized,
    {
        let history = self.collate_tagged_history(source, item).await;
        let cleaned = remove_username_mentions(&history, bot_username);
        let reply_tag = self.reply_tag(source, item, bot_username).await;
        format!("{}{}", cleaned, reply_tag)
    }

    /// Fragment for a single comment, resolving its relatives through `source`.
    pub async fn tag_comment<S>(&self, source: &S, comment: &ContentItem) -> String
    where
        S: ContentSource + ?Sized,
    {
        tag_in_lineage(source, std::slice::from_ref(comment), 0).await
    }
}

/// Fragment for `lineage[index]`. Relatives already present in the lineage are
/// reused; missing ones are fetched.
async fn tag_in_lineage<S>(source: &S, lineage: &[ContentItem], index: usize) -> String
where
    S: ContentSource + ?Sized,
{
    let item = &lineage[index];
    match &item.kind {
        ContentKind::Submission(submission) => tag_submission(item, submission),
        ContentKind::Comment(comment) => {
            let author = item.author.as_deref().unwrap_or(DELETED_AUTHOR);
            match comment_tag(source, lineage, index).await {
                CommentTag::OwnSubmission => {
                    format!("<|soopr u/{}|>{}<|eoopr|>", author, comment.body)
                }
                CommentTag::OwnComment => {
                    format!("<|soocr u/{}|>{}<|eoocr|>", author, comment.body)
                }
                CommentTag::Plain => format!("<|sor u/{}|>{}<|eor|>", author, comment.body),
            }
        }
        ContentKind::Message(message) => {
            let author = item.author.as_deref().unwrap_or(DELETED_AUTHOR);
            format!("<|sor u/{}|>{}<|eor|>", author, message.body)
        }
    }
}

async fn comment_tag<S>(source: &S, lineage: &[ContentItem], index: usize) -> CommentTag
where
    S: ContentSource + ?Sized,
{
    let comment = &lineage[index];

    let root = match lineage.last().filter(|last| last.is_submission()) {
        Some(root) => Ok(root.clone()),
        None => source.submission_of(comment).await,
    };
    match root {
        Ok(root) if root.same_author_as(comment) => return CommentTag::OwnSubmission,
        Ok(_) => {}
        Err(e) => {
            tracing::debug!("Plain tag for {}: {}", comment.thing_ref(), e);
            return CommentTag::Plain;
        }
    }

    let parent = match lineage.get(index + 1) {
        Some(parent) => parent.clone(),
        None => match source.parent_of(comment).await {
            Ok(parent) => parent,
            Err(e) => {
                tracing::debug!("Plain tag for {}: {}", comment.thing_ref(), e);
                return CommentTag::Plain;
            }
        },
    };

    let grandparent = match lineage.get(index + 2) {
        Some(grandparent) => Ok(grandparent.clone()),
        None => source.parent_of(&parent).await,
    };
    match grandparent {
        Ok(grandparent) if grandparent.same_author_as(comment) => CommentTag::OwnComment,
        _ => CommentTag::Plain,
    }
}

fn tag_submission(item: &ContentItem, submission: &SubmissionData) -> String {
    if submission.is_self {
        let mut selftext = submission.selftext.clone();
        for option in &submission.poll_options {
            selftext.push_str(" - ");
            selftext.push_str(option);
        }
        format!(
            "<|soss r/{}|><|sot|>{}<|eot|><|sost|>{}<|eost|>",
            item.subreddit, submission.title, selftext
        )
    } else {
        format!(
            "<|sols r/{}|><|sot|>{}<|eot|><|sol|><|eol|>",
            item.subreddit, submission.title
        )
    }
}

/// Scaffold that seeds generation of a brand new self post.
pub fn new_submission_tag(subreddit: &str) -> String {
    format!("<|soss r/{}|>{}", subreddit, TITLE_START_TAG)
}

/// Pull the reply body the model wrote after `prompt`.
///
/// `None` means there is nothing safe to post.
pub fn extract_reply(prompt: &str, generated_text: &str) -> Option<String> {
    let text = generated_text.replace(ZERO_WIDTH_ARTIFACT, "");
    // The artifact is stripped from the echoed prompt too.
    let start = prompt.replace(ZERO_WIDTH_ARTIFACT, "").len();

    let truncate_at = text
        .get(start..)
        .and_then(|continuation| continuation.find(TAG_START))
        .map(|offset| start + offset)
        .or_else(|| text.rfind(ESCAPED_NEWLINE))
        .or_else(|| text.find(FALLBACK_MARKER));

    let Some(end) = truncate_at else {
        tracing::info!("Truncate string not found");
        return None;
    };

    match text.get(start..end) {
        Some(body) if !body.is_empty() => Some(decode_generated_text(body)),
        _ => None,
    }
}

/// Title (required) and selftext (optional) of a generated post.
pub fn extract_submission(generated_text: &str) -> ExtractedSubmission {
    let text = generated_text.replace(ZERO_WIDTH_ARTIFACT, "");

    let title = match tagged_span(&text, TITLE_START_TAG) {
        Some(title) => title,
        None => return ExtractedSubmission::default(),
    };
    let title_chars = title.chars().count();
    if title_chars == 0 || title_chars > MAX_TITLE_CHARS {
        tracing::debug!("Rejecting generated title of {} chars", title_chars);
        return ExtractedSubmission::default();
    }

    let selftext = tagged_span(&text, SELFTEXT_START_TAG)
        .map(decode_generated_text)
        .filter(|selftext| !selftext.is_empty());

    ExtractedSubmission {
        title: Some(decode_generated_text(title)),
        selftext,
    }
}

/// Text between `start_tag` and the next tag opener.
fn tagged_span<'a>(text: &'a str, start_tag: &str) -> Option<&'a str> {
    let begin = text.find(start_tag)? + start_tag.len();
    let end = begin + text[begin..].find(TAG_START)?;
    Some(&text[begin..end])
}

/// Strip free-text `u/{username}` mentions, keeping ones embedded in tags
/// such as `<|sor u/name|>`.
pub fn remove_username_mentions(text: &str, username: &str) -> String {
    let pattern = format!("(?i)u/{}", regex_lite::escape(username));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!("Invalid mention pattern for {}: {}", username, e);
            return text.to_string();
        }
    };

    let mut cleaned = String::with_capacity(text.len());
    let mut last = 0;
    for mention in re.find_iter(text) {
        if text[mention.end()..].starts_with(TAG_END) {
            continue;
        }
        cleaned.push_str(&text[last..mention.start()]);
        last = mention.end();
    }
    cleaned.push_str(&text[last..]);
    cleaned
}

/// Replace every `<|...|>` tag with a space.
pub fn remove_tags(text: &str) -> String {
    match Regex::new(r"<\|[\w/ ]*\|>") {
        Ok(re) => re.replace_all(text, " ").trim().to_string(),
        Err(_) => text.trim().to_string(),
    }
}

/// Undo the escaping and encoding damage found in model output.
pub fn decode_generated_text(text: &str) -> String {
    repair_mojibake(&unescape(text))
}

fn unescape(text: &str) -> String {
    let mut decoded = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            decoded.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('n') => {
                chars.next();
                decoded.push('\n');
            }
            Some('t') => {
                chars.next();
                decoded.push('\t');
            }
            Some('r') => {
                chars.next();
                decoded.push('\r');
            }
            Some(quoted @ ('\\' | '\'' | '"')) => {
                chars.next();
                decoded.push(quoted);
            }
            Some('x') => {
                chars.next();
                match take_hex(&mut chars, 2).and_then(char::from_u32) {
                    Some(ch) => decoded.push(ch),
                    None => decoded.push_str("\\x"),
                }
            }
            Some('u') => {
                chars.next();
                match take_hex(&mut chars, 4) {
                    Some(high @ 0xD800..=0xDBFF) => match take_low_surrogate(&mut chars) {
                        Some(low) => {
                            let combined = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                            decoded.extend(char::from_u32(combined));
                        }
                        None => decoded.push(char::REPLACEMENT_CHARACTER),
                    },
                    Some(code) => {
                        decoded.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
                    }
                    None => decoded.push_str("\\u"),
                }
            }
            _ => decoded.push('\\'),
        }
    }

    decoded
}

fn take_hex(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, len: usize) -> Option<u32> {
    let digits: String = chars.clone().take(len).collect();
    if digits.len() != len || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    for _ in 0..len {
        chars.next();
    }
    u32::from_str_radix(&digits, 16).ok()
}

fn take_low_surrogate(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<u32> {
    let mut lookahead = chars.clone();
    if lookahead.next() != Some('\\') || lookahead.next() != Some('u') {
        return None;
    }
    match take_hex(&mut lookahead, 4) {
        Some(low @ 0xDC00..=0xDFFF) => {
            *chars = lookahead;
            Some(low)
        }
        _ => None,
    }
}

/// UTF-8 that was decoded as latin-1 somewhere upstream, e.g. `cafÃ©`.
fn repair_mojibake(text: &str) -> String {
    if text.is_ascii() || text.chars().any(|c| c as u32 > 0xFF) {
        return text.to_string();
    }
    let bytes: Vec<u8> = text.chars().map(|c| c as u32 as u8).collect();
    String::from_utf8(bytes).unwrap_or_else(|_| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::thread_store::fixtures::*;
    use crate::content::{ContentSource, ThingRef, ThreadStore};
    use chrono::Utc;

    const SUBMISSION_FRAGMENT: &str =
        "<|soss r/SubSimGPT2|><|sot|>A title<|eot|><|sost|>Some selftext<|eost|>";

    async fn fetch(store: &ThreadStore, thing: ThingRef) -> ContentItem {
        store.fetch(&thing).await.expect("fixture item")
    }

    #[tokio::test]
    async fn collates_short_chain_root_first() {
        let store = ThreadStore::from_items(chain("op", &["alice", "bob"], Utc::now()));
        let leaf = fetch(&store, ThingRef::comment("c2")).await;

        let history = Tagging::new(6).collate_tagged_history(&store, &leaf).await;
        assert_eq!(
            history,
            format!(
                "{}<|sor u/alice|>body 1<|eor|><|sor u/bob|>body 2<|eor|>",
                SUBMISSION_FRAGMENT
            )
        );
    }

    #[tokio::test]
    async fn long_chain_stops_after_history_depth_visits() {
        let authors = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
        let store = ThreadStore::from_items(chain("op", &authors, Utc::now()));
        let leaf = fetch(&store, ThingRef::comment("c10")).await;
        let tagging = Tagging::new(6);

        store.reset_fetch_count();
        let lineage = tagging.walk_ancestors(&store, &leaf).await;
        assert_eq!(lineage.len(), 6);
        assert_eq!(store.fetch_count(), 5);
        assert_eq!(lineage.last().map(|item| item.id.as_str()), Some("c5"));

        let history = tagging.collate_tagged_history(&store, &leaf).await;
        assert!(!history.contains("<|soss"));
        assert_eq!(history.matches("<|eor|>").count(), 6);
        assert!(history.starts_with("<|sor u/e|>body 5<|eor|>"));
        assert!(history.ends_with("<|sor u/j|>body 10<|eor|>"));
    }

    #[tokio::test]
    async fn submission_alone_is_a_single_fragment() {
        let store = ThreadStore::from_items(chain("op", &[], Utc::now()));
        let submission = fetch(&store, ThingRef::submission("s")).await;

        store.reset_fetch_count();
        let history = Tagging::new(6).collate_tagged_history(&store, &submission).await;
        assert_eq!(history, SUBMISSION_FRAGMENT);
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn original_poster_gets_own_submission_tag() {
        let store = ThreadStore::from_items(chain("op", &["alice", "op"], Utc::now()));
        let leaf = fetch(&store, ThingRef::comment("c2")).await;

        let fragment = Tagging::new(6).tag_comment(&store, &leaf).await;
        assert_eq!(fragment, "<|soopr u/op|>body 2<|eoopr|>");
    }

    #[tokio::test]
    async fn returning_commenter_gets_own_comment_tag() {
        let store = ThreadStore::from_items(chain("op", &["alice", "bob", "alice"], Utc::now()));
        let leaf = fetch(&store, ThingRef::comment("c3")).await;

        let history = Tagging::new(6).collate_tagged_history(&store, &leaf).await;
        assert!(history.ends_with("<|sor u/bob|>body 2<|eor|><|soocr u/alice|>body 3<|eoocr|>"));
        assert_eq!(
            Tagging::new(6).tag_comment(&store, &leaf).await,
            "<|soocr u/alice|>body 3<|eoocr|>"
        );
    }

    #[tokio::test]
    async fn lookup_failures_fall_back_to_plain_tags() {
        let mut store = ThreadStore::from_items(chain("op", &["alice", "bob", "alice"], Utc::now()));
        store.make_unavailable(ThingRef::submission("s"));
        let leaf = fetch(&store, ThingRef::comment("c3")).await;

        let history = Tagging::new(6).collate_tagged_history(&store, &leaf).await;
        assert_eq!(
            history,
            "<|sor u/alice|>body 1<|eor|><|sor u/bob|>body 2<|eor|><|sor u/alice|>body 3<|eor|>"
        );
    }

    #[tokio::test]
    async fn missing_grandparent_falls_back_to_plain_tag() {
        let mut store = ThreadStore::from_items(chain("op", &["alice", "bob", "alice"], Utc::now()));
        store.make_unavailable(ThingRef::comment("c1"));
        let leaf = fetch(&store, ThingRef::comment("c3")).await;

        assert_eq!(
            Tagging::new(6).tag_comment(&store, &leaf).await,
            "<|sor u/alice|>body 3<|eor|>"
        );
        let history = Tagging::new(6).collate_tagged_history(&store, &leaf).await;
        assert_eq!(history, "<|sor u/bob|>body 2<|eor|><|sor u/alice|>body 3<|eor|>");
    }

    #[tokio::test]
    async fn link_posts_and_polls_have_their_own_fragments() {
        let now = Utc::now();
        let mut link = submission("link", "op", now);
        if let ContentKind::Submission(data) = &mut link.kind {
            data.is_self = false;
            data.title = "Look at this".to_string();
        }
        let mut poll = submission("poll", "op", now);
        if let ContentKind::Submission(data) = &mut poll.kind {
            data.title = "Pick one".to_string();
            data.selftext = "Options:".to_string();
            data.poll_options = vec!["red".to_string(), "blue".to_string()];
        }
        let store = ThreadStore::from_items(vec![link.clone(), poll.clone()]);
        let tagging = Tagging::new(6);

        assert_eq!(
            tagging.collate_tagged_history(&store, &link).await,
            "<|sols r/SubSimGPT2|><|sot|>Look at this<|eot|><|sol|><|eol|>"
        );
        assert_eq!(
            tagging.collate_tagged_history(&store, &poll).await,
            "<|soss r/SubSimGPT2|><|sot|>Pick one<|eot|><|sost|>Options: - red - blue<|eost|>"
        );
    }

    #[tokio::test]
    async fn reply_tag_reflects_the_bots_place_in_the_thread() {
        let store = ThreadStore::from_items(chain("op", &["TestBot", "human"], Utc::now()));
        let tagging = Tagging::new(6);

        let reply_to_bot = fetch(&store, ThingRef::comment("c2")).await;
        assert_eq!(
            tagging.reply_tag(&store, &reply_to_bot, "testbot").await,
            OWN_COMMENT_REPLY_TAG
        );

        let top_level = fetch(&store, ThingRef::comment("c1")).await;
        assert_eq!(tagging.reply_tag(&store, &top_level, "testbot").await, REPLY_TAG);
        assert_eq!(tagging.reply_tag(&store, &top_level, "op").await, OWN_SUBMISSION_REPLY_TAG);

        let submission = fetch(&store, ThingRef::submission("s")).await;
        assert_eq!(tagging.reply_tag(&store, &submission, "op").await, REPLY_TAG);
    }

    #[tokio::test]
    async fn prompt_strips_free_mentions_and_appends_reply_tag() {
        let now = Utc::now();
        let mut items = chain("op", &["TestBot"], now);
        items.push(comment(
            "c2",
            "human",
            "what do you think u/TestBot?",
            ThingRef::comment("c1"),
            "s",
            now,
        ));
        let store = ThreadStore::from_items(items);
        let leaf = fetch(&store, ThingRef::comment("c2")).await;

        let prompt = Tagging::new(6).prepare_prompt(&store, &leaf, "TestBot").await;
        assert_eq!(
            prompt,
            format!(
                "{}<|sor u/TestBot|>body 1<|eor|><|sor u/human|>what do you think ?<|eor|><|soocr|>",
                SUBMISSION_FRAGMENT
            )
        );
    }

    #[test]
    fn new_submission_tag_seeds_a_self_post() {
        assert_eq!(new_submission_tag("SubSimGPT2"), "<|soss r/SubSimGPT2|><|sot|>");
    }

    #[test]
    fn extract_reply_returns_nothing_without_new_text() {
        let prompt = "<|soss r/test|><|sot|>Hi<|eot|><|sost|>there<|eost|><|sor|>";
        assert_eq!(extract_reply(prompt, prompt), None);
    }

    #[test]
    fn extract_reply_cuts_at_the_next_tag() {
        let prompt = "<|sor u/alice|>question?<|eor|><|sor|>";
        let generated = format!("{}hello<|eor|><|sor u/bob|>more", prompt);
        assert_eq!(extract_reply(prompt, &generated), Some("hello".to_string()));
    }

    #[test]
    fn extract_reply_falls_back_to_escaped_newline_then_marker() {
        let prompt = "P<|sor|>";
        let generated = format!("{}first line\\nsecond", prompt);
        assert_eq!(extract_reply(prompt, &generated), Some("first line".to_string()));

        let generated = format!("{}shouting!!!!", prompt);
        assert_eq!(extract_reply(prompt, &generated), Some("shouting".to_string()));

        let generated = format!("{}no terminator at all", prompt);
        assert_eq!(extract_reply(prompt, &generated), None);
    }

    #[test]
    fn extract_reply_ignores_markers_inside_the_prompt() {
        let prompt = "<|sor u/a|>line\\nbreak<|eor|><|sor|>";
        let generated = format!("{}unterminated", prompt);
        assert_eq!(extract_reply(prompt, &generated), None);
    }

    #[test]
    fn extract_reply_starts_after_a_prompt_with_artifacts() {
        let prompt = "<|soss r/test|><|sot|>Hi<|eot|><|sost|>&amp;#x200B;\nbody<|eost|><|sor|>";
        let generated = format!("{}Hello there friend<|eor|>", prompt);
        assert_eq!(
            extract_reply(prompt, &generated),
            Some("Hello there friend".to_string())
        );
    }

    #[test]
    fn extract_reply_decodes_the_body() {
        let prompt = "<|sor|>";
        let generated = format!("{}caf\\u00e9 &amp;#x200B;\nok<|eor|>", prompt);
        assert_eq!(extract_reply(prompt, &generated), Some("café ok".to_string()));
    }

    #[test]
    fn extract_submission_reads_title_and_selftext() {
        let extracted = extract_submission("<|sot|>Title<|eot|><|sost|>Body<|eost|>");
        assert_eq!(
            extracted,
            ExtractedSubmission {
                title: Some("Title".to_string()),
                selftext: Some("Body".to_string()),
            }
        );

        let link_only = extract_submission("<|soss r/x|><|sot|>Just a title<|eot|><|sol|><|eol|>");
        assert_eq!(link_only.title.as_deref(), Some("Just a title"));
        assert_eq!(link_only.selftext, None);
    }

    #[test]
    fn extract_submission_rejects_bad_title_lengths() {
        assert!(extract_submission("<|sot|><|eot|><|sost|>Body<|eost|>").is_empty());
        assert_eq!(
            extract_submission("<|sot|><|eot|><|sost|>Body<|eost|>"),
            ExtractedSubmission::default()
        );

        let too_long = format!("<|sot|>{}<|eot|><|sost|>Body<|eost|>", "x".repeat(301));
        assert!(extract_submission(&too_long).is_empty());

        let longest = format!("<|sot|>{}<|eot|>", "x".repeat(300));
        assert_eq!(extract_submission(&longest).title.map(|t| t.len()), Some(300));

        assert!(extract_submission("no tags here").is_empty());
    }

    #[test]
    fn removes_free_mentions_but_keeps_tagged_ones() {
        assert_eq!(
            remove_username_mentions("hi u/bot and <|sor u/bot|>", "bot"),
            "hi  and <|sor u/bot|>"
        );
        assert_eq!(remove_username_mentions("ping U/BOT please", "bot"), "ping  please");
        assert_eq!(remove_username_mentions("nothing here", "bot"), "nothing here");
    }

    #[test]
    fn remove_tags_leaves_plain_text() {
        assert_eq!(remove_tags("<|sor u/bot|>hello<|eor|>"), "hello");
        assert_eq!(remove_tags("<|sot|>Title<|eot|><|sost|>Body"), "Title  Body");
    }

    #[test]
    fn decodes_escapes_and_mojibake() {
        assert_eq!(decode_generated_text("line\\nbreak\\ttab"), "line\nbreak\ttab");
        assert_eq!(decode_generated_text("it\\'s \\\"quoted\\\""), "it's \"quoted\"");
        assert_eq!(decode_generated_text("\\ud83d\\ude00"), "\u{1F600}");
        assert_eq!(decode_generated_text("cafÃ©"), "café");
        assert_eq!(decode_generated_text("naïve café"), "naïve café");
        assert_eq!(decode_generated_text("trailing \\"), "trailing \\");
        assert_eq!(decode_generated_text("bad \\xZZ"), "bad \\xZZ");
    }
}
