//! Turns a score into a routing decision and assembles the prompt for items
//! that will be answered.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;

use crate::config::{RoutingConfig, SubmissionRouting, SubsimConfig};
use crate::content::{ContentItem, ContentSource, FetchError, ThingKind, ThingRef};
use crate::reply_logic::{ReplyLogic, ScoredItem};
use crate::tagging::Tagging;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Generate ahead of everything else.
    Priority,
    Standard,
    Skip,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Priority => "priority",
            Route::Standard => "standard",
            Route::Skip => "skip",
        }
    }
}

/// Source of the uniform draw compared against a score.
pub trait RandomSource: Send + Sync {
    /// A value in `[0, max]`.
    fn draw(&self, max: f64) -> f64;
}

/// Always returns the same draw, for replays and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub f64);

impl RandomSource for FixedDraw {
    fn draw(&self, _max: f64) -> f64 {
        self.0
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn draw(&self, max: f64) -> f64 {
        if max <= 0.0 {
            return 0.0;
        }
        rand::thread_rng().gen_range(0.0..=max)
    }
}

#[derive(Debug, Clone)]
pub struct ReplyRouter {
    config: RoutingConfig,
}

impl ReplyRouter {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    pub fn max_probability(&self) -> f64 {
        self.config.max_probability
    }

    /// Route a scored item given an already drawn `draw`.
    pub fn decide(
        &self,
        score: f64,
        kind: ThingKind,
        author_is_configured_bot: bool,
        draw: f64,
    ) -> Route {
        if score > 100.0 {
            return Route::Priority;
        }
        if score <= 0.0 {
            return Route::Skip;
        }
        if kind == ThingKind::Submission
            && self.config.submission_routing == SubmissionRouting::Always
        {
            return Route::Standard;
        }
        if self.config.prioritize_unconfigured_authors
            && kind == ThingKind::Comment
            && !author_is_configured_bot
        {
            return Route::Priority;
        }
        if score > draw {
            Route::Standard
        } else {
            Route::Skip
        }
    }

    pub fn route(
        &self,
        score: f64,
        kind: ThingKind,
        author_is_configured_bot: bool,
        rng: &dyn RandomSource,
    ) -> Route {
        let draw = rng.draw(self.config.max_probability);
        self.decide(score, kind, author_is_configured_bot, draw)
    }
}

/// Everything the worker needs to act on one item.
#[derive(Debug, Clone)]
pub struct PreparedReply {
    pub scored: ScoredItem,
    pub route: Route,
    /// Tagged history ending in the reply-start tag. `None` for skipped items.
    pub prompt: Option<String>,
}

impl PreparedReply {
    pub fn thing_ref(&self) -> ThingRef {
        self.scored.item.thing_ref()
    }
}

/// Scoring, routing and tagging for a single responding bot.
pub struct ReplyPreparation {
    logic: ReplyLogic,
    tagging: Tagging,
    router: ReplyRouter,
    rng: Arc<dyn RandomSource>,
}

impl ReplyPreparation {
    pub fn new(logic: ReplyLogic, tagging: Tagging, router: ReplyRouter) -> Self {
        Self {
            logic,
            tagging,
            router,
            rng: Arc::new(ThreadRngSource),
        }
    }

    /// Build the pipeline for `bot_name` from the shared configuration.
    pub fn from_config(bot_name: &str, config: &SubsimConfig) -> Self {
        let logic = ReplyLogic::new(bot_name, config.bot_names(), config.reply.clone());
        let tagging = Tagging::new(config.tagging.history_depth);
        let router = ReplyRouter::new(config.routing.clone());
        Self::new(logic, tagging, router)
    }

    pub fn with_random_source(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = rng;
        self
    }

    pub fn bot_name(&self) -> &str {
        self.logic.bot_name()
    }

    pub fn logic(&self) -> &ReplyLogic {
        &self.logic
    }

    pub fn tagging(&self) -> &Tagging {
        &self.tagging
    }

    pub fn router(&self) -> &ReplyRouter {
        &self.router
    }

    /// Fetch `thing` once and run scoring, routing and tagging on that snapshot.
    pub async fn prepare<S>(&self, source: &S, thing: &ThingRef) -> Result<PreparedReply, FetchError>
    where
        S: ContentSource + ?Sized,
    {
        let item = source.fetch(thing).await?;
        Ok(self.prepare_item(source, item).await)
    }

    pub async fn prepare_item<S>(&self, source: &S, item: ContentItem) -> PreparedReply
    where
        S: ContentSource + ?Sized,
    {
        self.prepare_item_at(source, item, Utc::now()).await
    }

    /// Like `prepare_item`, scoring against `now` instead of the wall clock.
    pub async fn prepare_item_at<S>(
        &self,
        source: &S,
        item: ContentItem,
        now: DateTime<Utc>,
    ) -> PreparedReply
    where
        S: ContentSource + ?Sized,
    {
        let scored = self.logic.score_item_at(source, item, now).await;
        let author_is_configured_bot = scored
            .item
            .author
            .as_deref()
            .map(|author| self.logic.is_known_bot(author))
            .unwrap_or(false);

        let route = self.router.route(
            scored.score.score,
            scored.item.thing_kind(),
            author_is_configured_bot,
            self.rng.as_ref(),
        );

        let prompt = match route {
            Route::Skip => None,
            Route::Priority | Route::Standard => Some(
                self.tagging
                    .prepare_prompt(source, &scored.item, self.logic.bot_name())
                    .await,
            ),
        };

        tracing::debug!(
            "{} for {}: score {} -> {}",
            self.logic.bot_name(),
            scored.item.thing_ref(),
            scored.score.score,
            route.as_str()
        );

        PreparedReply {
            scored,
            route,
            prompt,
        }
    }
}
