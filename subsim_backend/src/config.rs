use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// One bot of the fleet: the account it posts as and the model behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub name: String,
    /// Model identifier passed to the generation endpoint.
    pub model: String,
    #[serde(default)]
    pub subreddits: Vec<String>,
}

impl BotIdentity {
    /// A bot is only scheduled when it has somewhere to post.
    pub fn is_runnable(&self) -> bool {
        if self.name.trim().is_empty() {
            return false;
        }
        if self.model.trim().is_empty() {
            tracing::info!("{} does not have a model configured. Skipping...", self.name);
            return false;
        }
        if self.subreddits.is_empty() {
            tracing::info!("{} is not configured to run. Skipping...", self.name);
            return false;
        }
        true
    }
}

/// Boosts and penalties added to the base reply probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyWeights {
    #[serde(default = "default_own_comment_reply_boost")]
    pub own_comment_reply_boost: f64,
    #[serde(default = "default_interrogative_boost")]
    pub interrogative_boost: f64,
    #[serde(default = "default_human_author_boost")]
    pub human_author_boost: f64,
    #[serde(default = "default_bot_author_boost")]
    pub bot_author_boost: f64,
    #[serde(default = "default_own_submission_reply_boost")]
    pub own_submission_reply_boost: f64,
    /// Subtracted once per comment level below the first.
    #[serde(default = "default_depth_penalty")]
    pub depth_penalty: f64,
    #[serde(default = "default_new_submission_boost")]
    pub new_submission_boost: f64,
}

fn default_own_comment_reply_boost() -> f64 {
    0.5
}

fn default_interrogative_boost() -> f64 {
    0.5
}

fn default_human_author_boost() -> f64 {
    1.0
}

fn default_bot_author_boost() -> f64 {
    0.5
}

fn default_own_submission_reply_boost() -> f64 {
    0.8
}

fn default_depth_penalty() -> f64 {
    0.05
}

fn default_new_submission_boost() -> f64 {
    1.0
}

impl Default for ReplyWeights {
    fn default() -> Self {
        Self {
            own_comment_reply_boost: default_own_comment_reply_boost(),
            interrogative_boost: default_interrogative_boost(),
            human_author_boost: default_human_author_boost(),
            bot_author_boost: default_bot_author_boost(),
            own_submission_reply_boost: default_own_submission_reply_boost(),
            depth_penalty: default_depth_penalty(),
            new_submission_boost: default_new_submission_boost(),
        }
    }
}

/// Hard gates applied to comments, plus the decay window for every item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyThresholds {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: f64,
    #[serde(default = "default_max_comments")]
    pub max_comments: u32,
    /// Deepest 1-based comment level that can still be answered.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Age at which the decay factor reaches zero.
    #[serde(default = "default_decay_window_hours")]
    pub decay_window_hours: f64,
}

fn default_max_age_hours() -> f64 {
    12.0
}

fn default_max_comments() -> u32 {
    200
}

fn default_max_depth() -> usize {
    6
}

fn default_decay_window_hours() -> f64 {
    24.0
}

impl Default for ReplyThresholds {
    fn default() -> Self {
        Self {
            max_age_hours: default_max_age_hours(),
            max_comments: default_max_comments(),
            max_depth: default_max_depth(),
            decay_window_hours: default_decay_window_hours(),
        }
    }
}

/// Deployment variants that short-circuit scoring with an always-reply score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionPolicy {
    #[serde(default)]
    pub always_reply_to_submissions: bool,
    /// Comments whose author does not look like a bot.
    #[serde(default)]
    pub always_reply_to_humans: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyLogicConfig {
    #[serde(default)]
    pub weights: ReplyWeights,
    #[serde(default)]
    pub thresholds: ReplyThresholds,
    #[serde(default)]
    pub policy: DecisionPolicy,
    /// Authors that are never answered (compared case-insensitively).
    #[serde(default)]
    pub do_not_reply: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionRouting {
    /// Any submission with a non-zero score is sent to generation.
    #[default]
    Always,
    /// Submissions go through the same random gate as comments.
    Probabilistic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Upper bound of the random draw a score has to beat.
    #[serde(default = "default_max_probability")]
    pub max_probability: f64,
    #[serde(default)]
    pub submission_routing: SubmissionRouting,
    /// Send comments from authors outside the fleet to the priority queue.
    #[serde(default)]
    pub prioritize_unconfigured_authors: bool,
}

fn default_max_probability() -> f64 {
    100.0
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_probability: default_max_probability(),
            submission_routing: SubmissionRouting::default(),
            prioritize_unconfigured_authors: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggingConfig {
    /// Ancestors visited when collating a thread, the item itself included.
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
}

fn default_history_depth() -> usize {
    6
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            history_depth: default_history_depth(),
        }
    }
}

/// Sampling parameters for the completion endpoint hosting the fine-tuned models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_length")]
    pub max_length: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,
    #[serde(default = "default_stop_token")]
    pub stop_token: String,
}

fn default_generation_url() -> String {
    "http://localhost:8000/v1".to_string()
}

fn default_max_length() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.8
}

fn default_top_k() -> u32 {
    50
}

fn default_top_p() -> f32 {
    0.95
}

fn default_repetition_penalty() -> f32 {
    1.5
}

fn default_stop_token() -> String {
    "<|endoftext|>".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_url: default_generation_url(),
            api_key: None,
            max_length: default_max_length(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            repetition_penalty: default_repetition_penalty(),
            stop_token: default_stop_token(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditConfig {
    #[serde(default = "default_reddit_url")]
    pub api_url: String,
    /// OAuth bearer tokens keyed by bot name.
    #[serde(default)]
    pub access_tokens: std::collections::HashMap<String, String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_listing_limit")]
    pub listing_limit: u32,
}

fn default_reddit_url() -> String {
    "https://oauth.reddit.com".to_string()
}

fn default_user_agent() -> String {
    format!("subsim/{}", env!("CARGO_PKG_VERSION"))
}

fn default_listing_limit() -> u32 {
    25
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            api_url: default_reddit_url(),
            access_tokens: Default::default(),
            user_agent: default_user_agent(),
            listing_limit: default_listing_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsimConfig {
    #[serde(default)]
    pub bots: Vec<BotIdentity>,

    #[serde(default)]
    pub reply: ReplyLogicConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub tagging: TaggingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub reddit: RedditConfig,

    // Polling and posting
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub enable_new_submissions: bool,
    #[serde(default = "default_submission_interval")]
    pub submission_interval_secs: u64,
    /// Replies containing any of these words are never posted.
    #[serde(default = "default_negative_keywords")]
    pub negative_keywords: Vec<String>,

    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_submission_interval() -> u64 {
    3600
}

fn default_negative_keywords() -> Vec<String> {
    vec!["removed".to_string()]
}

fn default_database_path() -> String {
    "subsim_ledger.db".to_string()
}

impl Default for SubsimConfig {
    fn default() -> Self {
        Self {
            bots: Vec::new(),
            reply: ReplyLogicConfig::default(),
            routing: RoutingConfig::default(),
            tagging: TaggingConfig::default(),
            generation: GenerationConfig::default(),
            reddit: RedditConfig::default(),
            poll_interval_secs: default_poll_interval(),
            enable_new_submissions: false,
            submission_interval_secs: default_submission_interval(),
            negative_keywords: default_negative_keywords(),
            database_path: default_database_path(),
        }
    }
}

fn env_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("1")
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
}

impl SubsimConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("subsim_config.toml")
    }

    /// Load config from subsim_config.toml next to the executable, then apply env overrides.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<SubsimConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config.with_env_overrides();
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse subsim config")
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = env::var("GENERATION_API_URL") {
            self.generation.api_url = url;
        }

        if let Ok(key) = env::var("GENERATION_API_KEY") {
            self.generation.api_key = Some(key);
        }

        if let Ok(url) = env::var("REDDIT_API_URL") {
            self.reddit.api_url = url;
        }

        if let Ok(agent) = env::var("REDDIT_USER_AGENT") {
            self.reddit.user_agent = agent;
        }

        if let Ok(interval) = env::var("SUBSIM_POLL_INTERVAL") {
            if let Ok(seconds) = interval.parse() {
                self.poll_interval_secs = seconds;
            }
        }

        if let Ok(max_comments) = env::var("SUBSIM_MAX_COMMENTS") {
            if let Ok(count) = max_comments.parse() {
                self.reply.thresholds.max_comments = count;
            }
        }

        if let Ok(max_age) = env::var("SUBSIM_MAX_AGE_HOURS") {
            if let Ok(hours) = max_age.parse() {
                self.reply.thresholds.max_age_hours = hours;
            }
        }

        if let Ok(enabled) = env::var("SUBSIM_ENABLE_NEW_SUBMISSIONS") {
            self.enable_new_submissions = env_flag(&enabled);
        }

        if let Ok(path) = env::var("SUBSIM_DATABASE_PATH") {
            if !path.trim().is_empty() {
                self.database_path = path;
            }
        }

        self
    }

    /// Names of every configured bot, used to tell fleet members from humans.
    pub fn bot_names(&self) -> Vec<String> {
        self.bots.iter().map(|bot| bot.name.clone()).collect()
    }

    pub fn bot_by_name(&self, name: &str) -> Option<&BotIdentity> {
        self.bots
            .iter()
            .find(|bot| bot.name.eq_ignore_ascii_case(name))
    }

    pub fn runnable_bots(&self) -> Vec<BotIdentity> {
        self.bots
            .iter()
            .filter(|bot| bot.is_runnable())
            .cloned()
            .collect()
    }
}
