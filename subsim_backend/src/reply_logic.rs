//! Heuristic reply probability.
//!
//! Produces a 0-100 score for how strongly a bot should answer a piece of
//! content, or [`ALWAYS_REPLY_SCORE`] for content that must always be answered.
//! Lookup failures never escape: they either skip a boost or zero the score.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::config::ReplyLogicConfig;
use crate::content::{ContentItem, ContentKind, ContentSource};

/// Sentinel above the probabilistic range: reply without a random draw.
pub const ALWAYS_REPLY_SCORE: f64 = 101.0;

const INTERROGATIVE_KEYWORDS: [&str; 6] = ["?", " you", "what", "how", "when", "why"];
const BOT_NAME_SUFFIXES: [&str; 3] = ["ssi", "bot", "gpt2"];
const VERIFIED_BOT_FLAIR: &str = "verified gpt-2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoReason {
    DeletedAuthor,
    OwnContent,
    DoNotReply,
    /// The root submission could not be fetched.
    Unresolvable,
    TooManyComments,
    Locked,
    TooOld,
    TooDeep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlwaysReplyReason {
    DirectMessage,
    UsernameMention,
    NameInText,
    Submission,
    HumanAuthor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Vetoed(VetoReason),
    AlwaysReply(AlwaysReplyReason),
    Scored,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReplyScore {
    pub score: f64,
    pub verdict: Verdict,
}

impl ReplyScore {
    fn vetoed(reason: VetoReason) -> Self {
        Self {
            score: 0.0,
            verdict: Verdict::Vetoed(reason),
        }
    }

    fn always(reason: AlwaysReplyReason) -> Self {
        Self {
            score: ALWAYS_REPLY_SCORE,
            verdict: Verdict::AlwaysReply(reason),
        }
    }

    pub fn is_vetoed(&self) -> bool {
        matches!(self.verdict, Verdict::Vetoed(_))
    }

    pub fn is_always_reply(&self) -> bool {
        self.score > 100.0
    }
}

/// A content snapshot together with the score it was given.
#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub item: ContentItem,
    pub score: ReplyScore,
}

impl ScoredItem {
    pub fn vetoed(&self) -> bool {
        self.score.is_vetoed()
    }
}

pub struct ReplyLogic {
    bot_name: String,
    known_bots: HashSet<String>,
    do_not_reply: HashSet<String>,
    config: ReplyLogicConfig,
}

impl ReplyLogic {
    pub fn new<I, N>(bot_name: impl Into<String>, known_bot_names: I, config: ReplyLogicConfig) -> Self
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        let known_bots = known_bot_names
            .into_iter()
            .map(|name| name.as_ref().to_lowercase())
            .collect();
        let do_not_reply = config
            .do_not_reply
            .iter()
            .map(|name| name.to_lowercase())
            .collect();
        Self {
            bot_name: bot_name.into(),
            known_bots,
            do_not_reply,
            config,
        }
    }

    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    pub fn config(&self) -> &ReplyLogicConfig {
        &self.config
    }

    /// Whether `name` is one of the configured fleet bots.
    pub fn is_known_bot(&self, name: &str) -> bool {
        self.known_bots.contains(&name.to_lowercase())
    }

    pub async fn calculate_reply_probability<S>(&self, source: &S, item: &ContentItem) -> ReplyScore
    where
        S: ContentSource + ?Sized,
    {
        self.score_at(source, item, Utc::now()).await
    }

    pub async fn score_item<S>(&self, source: &S, item: ContentItem) -> ScoredItem
    where
        S: ContentSource + ?Sized,
    {
        self.score_item_at(source, item, Utc::now()).await
    }

    pub async fn score_item_at<S>(
        &self,
        source: &S,
        item: ContentItem,
        now: DateTime<Utc>,
    ) -> ScoredItem
    where
        S: ContentSource + ?Sized,
    {
        let score = self.score_at(source, &item, now).await;
        ScoredItem { item, score }
    }

    /// Score `item` as seen at `now`.
    pub async fn score_at<S>(&self, source: &S, item: &ContentItem, now: DateTime<Utc>) -> ReplyScore
    where
        S: ContentSource + ?Sized,
    {
        let Some(author) = item.author.as_deref() else {
            return ReplyScore::vetoed(VetoReason::DeletedAuthor);
        };
        if author.eq_ignore_ascii_case(&self.bot_name) {
            return ReplyScore::vetoed(VetoReason::OwnContent);
        }
        if self.do_not_reply.contains(&author.to_lowercase()) {
            return ReplyScore::vetoed(VetoReason::DoNotReply);
        }

        let text = item.text_content().to_lowercase();

        if let Some(reason) = self.always_reply_reason(item, &text) {
            tracing::debug!("Always replying to {}: {:?}", item.thing_ref(), reason);
            return ReplyScore::always(reason);
        }

        let weights = &self.config.weights;
        let thresholds = &self.config.thresholds;
        let mut base_probability = 0.0;

        let root = match &item.kind {
            ContentKind::Submission(_) => item.clone(),
            ContentKind::Comment(_) => match source.submission_of(item).await {
                Ok(root) if root.is_submission() => root,
                Ok(other) => {
                    tracing::warn!("{} resolved to non-submission {}", item.thing_ref(), other.thing_ref());
                    return ReplyScore::vetoed(VetoReason::Unresolvable);
                }
                Err(e) => {
                    tracing::warn!("Cannot resolve submission of {}: {}", item.thing_ref(), e);
                    return ReplyScore::vetoed(VetoReason::Unresolvable);
                }
            },
            // Messages always take the override above.
            ContentKind::Message(_) => return ReplyScore::always(AlwaysReplyReason::DirectMessage),
        };
        let root_age_hours = root.age_hours(now);

        let mut is_own_comment_reply = false;
        let mut is_own_submission_reply = false;

        if item.is_comment() {
            if let Some(submission) = root.as_submission() {
                if submission.num_comments > thresholds.max_comments {
                    tracing::debug!(
                        "Submission {} has more than {} comments. Skipping...",
                        root.id,
                        thresholds.max_comments
                    );
                    return ReplyScore::vetoed(VetoReason::TooManyComments);
                }
                if submission.locked {
                    tracing::debug!("Submission {} is locked. Skipping...", root.id);
                    return ReplyScore::vetoed(VetoReason::Locked);
                }
            }
            if root_age_hours > thresholds.max_age_hours {
                return ReplyScore::vetoed(VetoReason::TooOld);
            }

            let depth = self.find_comment_depth(source, item).await;
            if depth > thresholds.max_depth {
                return ReplyScore::vetoed(VetoReason::TooDeep);
            }
            base_probability -= (depth - 1) as f64 * weights.depth_penalty;

            is_own_comment_reply = match source.parent_of(item).await {
                Ok(parent) => parent.is_authored_by(&self.bot_name),
                Err(e) => {
                    tracing::debug!("No parent for {}, skipping own-comment boost: {}", item.thing_ref(), e);
                    false
                }
            };
            is_own_submission_reply = root.is_authored_by(&self.bot_name);
        }

        if self.is_bot_author(item) {
            base_probability += weights.bot_author_boost;
        } else {
            base_probability += weights.human_author_boost;
        }

        if item.is_submission() {
            base_probability += weights.new_submission_boost;
        }

        if (item.is_submission() || is_own_comment_reply)
            && INTERROGATIVE_KEYWORDS.iter().any(|kw| text.contains(kw))
        {
            base_probability += weights.interrogative_boost;
        }

        if is_own_comment_reply {
            base_probability += weights.own_comment_reply_boost;
        }
        if is_own_submission_reply {
            base_probability += weights.own_submission_reply_boost;
        }

        let reply_probability = base_probability.clamp(0.0, 1.0);
        let decay = decay_factor(root_age_hours, thresholds.decay_window_hours);
        let score = round_to_hundredths(reply_probability * decay) * 100.0;

        tracing::debug!(
            "Scored {} at {} (base {:.2}, decay {:.3})",
            item.thing_ref(),
            score,
            base_probability,
            decay
        );

        ReplyScore {
            score,
            verdict: Verdict::Scored,
        }
    }

    fn always_reply_reason(&self, item: &ContentItem, lowered_text: &str) -> Option<AlwaysReplyReason> {
        match &item.kind {
            ContentKind::Message(message) if message.is_username_mention => {
                return Some(AlwaysReplyReason::UsernameMention);
            }
            ContentKind::Message(_) => return Some(AlwaysReplyReason::DirectMessage),
            _ => {}
        }

        if lowered_text.contains(&self.bot_name.to_lowercase()) {
            return Some(AlwaysReplyReason::NameInText);
        }

        let policy = &self.config.policy;
        match &item.kind {
            ContentKind::Submission(_) if policy.always_reply_to_submissions => {
                Some(AlwaysReplyReason::Submission)
            }
            ContentKind::Comment(_) if policy.always_reply_to_humans && !self.is_bot_author(item) => {
                Some(AlwaysReplyReason::HumanAuthor)
            }
            _ => None,
        }
    }

    /// Whether the author looks like one of the simulator's bots.
    pub fn is_bot_author(&self, item: &ContentItem) -> bool {
        let verified_flair = item
            .author_flair
            .as_deref()
            .map(|flair| flair.to_lowercase().contains(VERIFIED_BOT_FLAIR))
            .unwrap_or(false);
        if verified_flair {
            return true;
        }

        match item.author.as_deref() {
            Some(author) => {
                let author = author.to_lowercase();
                BOT_NAME_SUFFIXES.iter().any(|suffix| author.ends_with(suffix))
                    || self.known_bots.contains(&author)
            }
            None => false,
        }
    }

    /// 1-based level of `comment` below its submission.
    ///
    /// Stops once the depth exceeds the configured maximum, or early at the
    /// first ancestor that cannot be fetched.
    async fn find_comment_depth<S>(&self, source: &S, comment: &ContentItem) -> usize
    where
        S: ContentSource + ?Sized,
    {
        let max_depth = self.config.thresholds.max_depth;
        let mut depth = 1;
        let mut current = comment.clone();

        loop {
            let parent = match &current.kind {
                ContentKind::Comment(data) if !data.parent.is_submission() => data.parent.clone(),
                _ => break,
            };

            depth += 1;
            if depth > max_depth {
                break;
            }

            match source.fetch(&parent).await {
                Ok(ancestor) => current = ancestor,
                Err(e) => {
                    tracing::warn!(
                        "Exception when counting the comment depth of {}, returning early: {}",
                        comment.thing_ref(),
                        e
                    );
                    break;
                }
            }
        }

        depth
    }
}

/// Linear decay from 1 at creation to 0 at `window_hours`. Content dated in the
/// future (clock skew) counts as brand new.
pub fn decay_factor(age_hours: f64, window_hours: f64) -> f64 {
    if window_hours <= 0.0 {
        return 0.0;
    }
    (1.0 - age_hours.max(0.0) / window_hours).clamp(0.0, 1.0)
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
