use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flume::{Receiver, Sender};
use rand::seq::SliceRandom;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::{BotIdentity, SubsimConfig};
use crate::content::{ContentItem, ThingRef};
use crate::generation::{CompletionClient, TextGenerator};
use crate::ledger::{RecordStatus, ReplyLedger, ReplyRecord};
use crate::orchestration::{RandomSource, ReplyPreparation, Route};
use crate::platform::{Platform, RedditClient};
use crate::screening::{continuation, screen_generated_text, Screening, ScreeningVerdict};
use crate::tagging::{extract_reply, extract_submission, new_submission_tag};

const LAST_SUBMISSION_KEY: &str = "last_submission_at";
const RESTORE_LIMIT: usize = 100;

/// Progress reported by the bot runtimes.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    Queued {
        bot: String,
        thing: ThingRef,
        route: Route,
    },
    Skipped {
        bot: String,
        thing: ThingRef,
        score: f64,
    },
    Responded {
        bot: String,
        thing: ThingRef,
        reply: ThingRef,
    },
    Rejected {
        bot: String,
        thing: ThingRef,
        reason: String,
    },
    Submitted {
        bot: String,
        submission: ThingRef,
    },
    Error(String),
}

/// A prompt waiting for generation.
#[derive(Debug, Clone)]
pub struct ReplyJob {
    pub job_id: Uuid,
    pub thing: ThingRef,
    pub prompt: String,
    pub route: Route,
    pub queued_at: DateTime<Utc>,
}

impl ReplyJob {
    pub fn new(thing: ThingRef, prompt: String, route: Route) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            thing,
            prompt,
            route,
            queued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    /// Items not already in the ledger.
    pub seen: usize,
    pub queued: usize,
    pub skipped: usize,
}

pub struct BotRuntime {
    bot: BotIdentity,
    config: SubsimConfig,
    platform: Arc<dyn Platform>,
    generator: Arc<dyn TextGenerator>,
    ledger: Arc<ReplyLedger>,
    preparation: ReplyPreparation,
    screening: Screening,
    priority_tx: Sender<ReplyJob>,
    priority_rx: Receiver<ReplyJob>,
    standard_tx: Sender<ReplyJob>,
    standard_rx: Receiver<ReplyJob>,
    event_tx: Option<Sender<RuntimeEvent>>,
}

pub struct BotRuntimeBuilder {
    bot: BotIdentity,
    config: SubsimConfig,
    platform: Option<Arc<dyn Platform>>,
    generator: Option<Arc<dyn TextGenerator>>,
    ledger: Option<Arc<ReplyLedger>>,
    rng: Option<Arc<dyn RandomSource>>,
    event_tx: Option<Sender<RuntimeEvent>>,
}

impl BotRuntimeBuilder {
    pub fn new(bot: BotIdentity, config: SubsimConfig) -> Self {
        Self {
            bot,
            config,
            platform: None,
            generator: None,
            ledger: None,
            rng: None,
            event_tx: None,
        }
    }

    pub fn with_platform(mut self, platform: Arc<dyn Platform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<ReplyLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_random_source(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn with_event_sender(mut self, event_tx: Sender<RuntimeEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn build(self) -> Result<BotRuntime> {
        let config = self.config;
        let bot = self.bot;

        let platform: Arc<dyn Platform> = match self.platform {
            Some(platform) => platform,
            None => Arc::new(
                RedditClient::new(&config.reddit, &bot.name)
                    .with_context(|| format!("Failed to create Reddit client for {}", bot.name))?,
            ),
        };

        let generator: Arc<dyn TextGenerator> = match self.generator {
            Some(generator) => generator,
            None => Arc::new(CompletionClient::new(config.generation.clone())),
        };

        let ledger = match self.ledger {
            Some(ledger) => ledger,
            None => Arc::new(
                ReplyLedger::new(&config.database_path)
                    .with_context(|| format!("Failed to open ledger {}", config.database_path))?,
            ),
        };

        let mut preparation = ReplyPreparation::from_config(&bot.name, &config);
        if let Some(rng) = self.rng {
            preparation = preparation.with_random_source(rng);
        }

        let mut negative_keywords = config.negative_keywords.clone();
        negative_keywords.extend(config.reply.do_not_reply.iter().cloned());
        let screening = Screening::new(negative_keywords);

        let (priority_tx, priority_rx) = flume::unbounded();
        let (standard_tx, standard_rx) = flume::unbounded();

        tracing::info!(
            "Runtime ready for {} on {} via {}",
            bot.name,
            bot.subreddits.join(", "),
            platform.name()
        );

        Ok(BotRuntime {
            bot,
            config,
            platform,
            generator,
            ledger,
            preparation,
            screening,
            priority_tx,
            priority_rx,
            standard_tx,
            standard_rx,
            event_tx: self.event_tx,
        })
    }
}

impl BotRuntime {
    pub fn bot_name(&self) -> &str {
        &self.bot.name
    }

    fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn enqueue(&self, job: ReplyJob) -> Result<()> {
        let tx = match job.route {
            Route::Priority => &self.priority_tx,
            Route::Standard | Route::Skip => &self.standard_tx,
        };
        tx.send(job)
            .map_err(|e| anyhow::anyhow!("Reply queue closed: {}", e))
    }

    /// Priority jobs first, then standard ones.
    pub fn next_job(&self) -> Option<ReplyJob> {
        self.priority_rx
            .try_recv()
            .ok()
            .or_else(|| self.standard_rx.try_recv().ok())
    }

    pub fn queued_jobs(&self) -> usize {
        self.priority_rx.len() + self.standard_rx.len()
    }

    /// Put prompts that were queued before a restart back on the queues.
    pub fn restore_pending(&self) -> Result<usize> {
        let records = self.ledger.pending_for_bot(self.bot_name(), RESTORE_LIMIT)?;
        let mut restored = 0;
        for record in records {
            let Some(prompt) = record.prompt else {
                continue;
            };
            let route = if record.reply_probability > 100.0 {
                Route::Priority
            } else {
                Route::Standard
            };
            self.enqueue(ReplyJob::new(record.thing, prompt, route))?;
            restored += 1;
        }
        if restored > 0 {
            tracing::info!("Restored {} queued prompts for {}", restored, self.bot_name());
        }
        Ok(restored)
    }

    /// List new content, score it and queue prompts for what should be answered.
    pub async fn poll_cycle(&self) -> Result<PollSummary> {
        let mut summary = PollSummary::default();
        let limit = self.config.reddit.listing_limit;

        for subreddit in &self.bot.subreddits {
            match self.platform.new_submissions(subreddit, limit).await {
                Ok(items) => self.consider_all(items, &mut summary).await?,
                Err(e) => tracing::warn!("Failed to list submissions in r/{}: {}", subreddit, e),
            }
            match self.platform.new_comments(subreddit, limit).await {
                Ok(items) => self.consider_all(items, &mut summary).await?,
                Err(e) => tracing::warn!("Failed to list comments in r/{}: {}", subreddit, e),
            }
        }

        let mentions = self
            .platform
            .unread_mentions(limit)
            .await
            .context("Failed to list unread mentions")?;
        let read: Vec<ThingRef> = mentions.iter().map(ContentItem::thing_ref).collect();
        self.consider_all(mentions, &mut summary).await?;
        if let Err(e) = self.platform.mark_read(&read).await {
            tracing::warn!("Failed to mark mentions read for {}: {}", self.bot_name(), e);
        }

        tracing::info!(
            "{} poll: {} new, {} queued, {} skipped",
            self.bot_name(),
            summary.seen,
            summary.queued,
            summary.skipped
        );
        Ok(summary)
    }

    async fn consider_all(&self, items: Vec<ContentItem>, summary: &mut PollSummary) -> Result<()> {
        for item in items {
            self.consider(item, summary).await?;
        }
        Ok(())
    }

    async fn consider(&self, item: ContentItem, summary: &mut PollSummary) -> Result<()> {
        let thing = item.thing_ref();
        if self.ledger.contains(self.bot_name(), &thing)? {
            return Ok(());
        }
        summary.seen += 1;

        let prepared = self
            .preparation
            .prepare_item(self.platform.as_ref(), item)
            .await;
        let record = ReplyRecord::from_scored(self.bot_name(), &prepared.scored);
        if !self.ledger.insert_if_absent(&record)? {
            return Ok(());
        }

        match (prepared.route, prepared.prompt) {
            (Route::Priority, Some(prompt)) | (Route::Standard, Some(prompt)) => {
                self.ledger.set_prompt(self.bot_name(), &thing, &prompt)?;
                self.ledger
                    .set_status(self.bot_name(), &thing, RecordStatus::Queued)?;
                let job = ReplyJob::new(thing.clone(), prompt, prepared.route);
                tracing::debug!("Queued job {} for {}", job.job_id, thing);
                self.enqueue(job)?;
                summary.queued += 1;
                self.emit(RuntimeEvent::Queued {
                    bot: self.bot.name.clone(),
                    thing,
                    route: prepared.route,
                });
            }
            _ => {
                self.ledger
                    .set_status(self.bot_name(), &thing, RecordStatus::Skipped)?;
                summary.skipped += 1;
                self.emit(RuntimeEvent::Skipped {
                    bot: self.bot.name.clone(),
                    thing,
                    score: prepared.scored.score.score,
                });
            }
        }
        Ok(())
    }

    fn reject(&self, thing: &ThingRef, reason: String) -> Result<()> {
        self.ledger
            .set_status(self.bot_name(), thing, RecordStatus::Rejected)?;
        self.emit(RuntimeEvent::Rejected {
            bot: self.bot.name.clone(),
            thing: thing.clone(),
            reason,
        });
        Ok(())
    }

    /// Generate, extract, screen and post the reply for one job.
    pub async fn process_job(&self, job: ReplyJob) -> Result<Option<ThingRef>> {
        tracing::info!(
            ":: Processing job {} ({}) for {} on {}",
            job.job_id,
            job.route.as_str(),
            self.bot_name(),
            job.thing
        );

        let generated = self
            .generator
            .generate(&self.bot, &job.prompt)
            .await
            .with_context(|| format!("Generation failed for {}", job.thing))?;

        let Some(body) = extract_reply(&job.prompt, &generated) else {
            tracing::info!(":: No body present for {}", job.thing);
            self.reject(&job.thing, "no reply could be extracted".to_string())?;
            return Ok(None);
        };

        let body = match self.screening.check(self.bot_name(), &job.prompt, &generated, &body) {
            Ok(body) => body,
            Err(reason) => {
                self.reject(&job.thing, reason)?;
                return Ok(None);
            }
        };

        let reply = self
            .platform
            .reply(&job.thing, &body)
            .await
            .with_context(|| format!("Failed to reply to {}", job.thing))?;
        self.ledger
            .mark_responded(self.bot_name(), &job.thing, &body)?;

        self.emit(RuntimeEvent::Responded {
            bot: self.bot.name.clone(),
            thing: job.thing,
            reply: reply.clone(),
        });
        Ok(Some(reply))
    }

    /// Work through every queued job. Returns how many were attempted.
    pub async fn drain_jobs(&self) -> usize {
        let mut attempted = 0;
        while let Some(job) = self.next_job() {
            attempted += 1;
            if let Err(e) = self.process_job(job).await {
                tracing::error!("Reply job error for {}: {:#}", self.bot_name(), e);
                self.emit(RuntimeEvent::Error(e.to_string()));
            }
        }
        attempted
    }

    fn submission_due(&self, now: DateTime<Utc>) -> Result<bool> {
        let last = self
            .ledger
            .get_state(self.bot_name(), LAST_SUBMISSION_KEY)?
            .and_then(|raw| raw.parse::<DateTime<Utc>>().ok());
        Ok(match last {
            Some(last) => {
                (now - last).num_seconds() >= self.config.submission_interval_secs as i64
            }
            None => true,
        })
    }

    /// Generate and post a new submission if enabled and the interval has passed.
    pub async fn post_new_submission(&self) -> Result<Option<ThingRef>> {
        if !self.config.enable_new_submissions {
            return Ok(None);
        }
        let now = Utc::now();
        if !self.submission_due(now)? {
            return Ok(None);
        }
        let Some(subreddit) = self.bot.subreddits.choose(&mut rand::thread_rng()).cloned() else {
            return Ok(None);
        };

        let prompt = new_submission_tag(&subreddit);
        let generated = self
            .generator
            .generate(&self.bot, &prompt)
            .await
            .with_context(|| format!("Submission generation failed for {}", self.bot_name()))?;

        let extracted = extract_submission(&generated);
        let Some(title) = extracted.title else {
            tracing::info!("{} generated no usable title for r/{}", self.bot_name(), subreddit);
            return Ok(None);
        };
        let selftext = extracted.selftext.unwrap_or_default();

        let written = continuation(&prompt, &generated);
        if let ScreeningVerdict::Reject(reason) = screen_generated_text(written) {
            tracing::info!("Rejected submission by {}: {}", self.bot_name(), reason);
            return Ok(None);
        }
        for part in std::iter::once(&title).chain((!selftext.is_empty()).then_some(&selftext)) {
            if let ScreeningVerdict::Reject(reason) = self.screening.screen_body(part) {
                tracing::info!("Rejected submission by {}: {}", self.bot_name(), reason);
                return Ok(None);
            }
        }

        let submission = self
            .platform
            .submit(&subreddit, &title, &selftext)
            .await
            .with_context(|| format!("Failed to submit to r/{}", subreddit))?;
        self.ledger
            .set_state(self.bot_name(), LAST_SUBMISSION_KEY, &now.to_rfc3339())?;

        self.emit(RuntimeEvent::Submitted {
            bot: self.bot.name.clone(),
            submission: submission.clone(),
        });
        Ok(Some(submission))
    }

    pub async fn run_loop(self: Arc<Self>) -> Result<()> {
        tracing::info!("Bot loop starting for {}...", self.bot_name());

        if let Err(e) = self.restore_pending() {
            tracing::warn!("Failed to restore queued prompts for {}: {}", self.bot_name(), e);
        }

        loop {
            if let Err(e) = self.poll_cycle().await {
                tracing::error!("Poll cycle error for {}: {:#}", self.bot_name(), e);
                self.emit(RuntimeEvent::Error(e.to_string()));
            }

            self.drain_jobs().await;

            if let Err(e) = self.post_new_submission().await {
                tracing::error!("Submission error for {}: {:#}", self.bot_name(), e);
                self.emit(RuntimeEvent::Error(e.to_string()));
            }

            sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
        }
    }
}

/// One runtime per runnable bot, sharing a ledger.
pub struct Fleet {
    pub runtimes: Vec<Arc<BotRuntime>>,
}

impl Fleet {
    pub fn bootstrap(config: SubsimConfig, event_tx: Sender<RuntimeEvent>) -> Result<Self> {
        let ledger = Arc::new(
            ReplyLedger::new(&config.database_path)
                .with_context(|| format!("Failed to open ledger {}", config.database_path))?,
        );

        let mut runtimes = Vec::new();
        for bot in config.runnable_bots() {
            let name = bot.name.clone();
            let runtime = BotRuntimeBuilder::new(bot, config.clone())
                .with_ledger(ledger.clone())
                .with_event_sender(event_tx.clone())
                .build()
                .with_context(|| format!("Failed to build runtime for {}", name))?;
            runtimes.push(Arc::new(runtime));
        }

        if runtimes.is_empty() {
            anyhow::bail!("No runnable bots configured");
        }
        tracing::info!("Fleet bootstrapped with {} bot(s)", runtimes.len());
        Ok(Self { runtimes })
    }

    pub async fn run(self) -> Result<()> {
        let handles: Vec<_> = self
            .runtimes
            .into_iter()
            .map(|runtime| tokio::spawn(runtime.run_loop()))
            .collect();

        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Bot loop error: {:#}", e),
                Err(e) => tracing::error!("Bot loop panicked: {}", e),
            }
        }
        Ok(())
    }
}
