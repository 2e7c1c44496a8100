use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use subsim_backend::config::SubsimConfig;
use subsim_backend::content::{ContentSource, ThingRef, ThreadStore};
use subsim_backend::orchestration::{
    FixedDraw, RandomSource, ReplyPreparation, Route, ThreadRngSource,
};
use subsim_backend::reply_logic::ReplyScore;
use subsim_backend::tagging::{extract_reply, extract_submission};

/// Offline inspector for the reply engines.
#[derive(Parser, Debug)]
#[command(name = "subsim", version, about)]
struct Cli {
    /// TOML config to take weights and thresholds from (defaults + env otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score, route and tag one item of a JSON thread fixture
    Inspect {
        #[arg(long)]
        fixture: PathBuf,
        /// Fullname of the item, e.g. t1_abc123
        #[arg(long)]
        thing: String,
        #[arg(long)]
        bot: String,
        /// Clock to score against (RFC 3339), defaults to now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
        /// Fixed random draw instead of a fresh one
        #[arg(long)]
        draw: Option<f64>,
    },
    /// Extract the reply body the model wrote after a prompt
    ExtractReply {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        generated: String,
    },
    /// Extract title and selftext from a generated post
    ExtractSubmission {
        #[arg(long)]
        generated: String,
    },
}

#[derive(Debug, Serialize)]
struct InspectReport {
    bot: String,
    thing: ThingRef,
    score: ReplyScore,
    draw: f64,
    route: Route,
    /// Only built for items that would be answered.
    prompt: Option<String>,
}

fn load_config(path: Option<&PathBuf>) -> Result<SubsimConfig> {
    match path {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {:?}", path))?;
            SubsimConfig::from_toml_str(&contents)
        }
        None => Ok(SubsimConfig::from_env()),
    }
}

async fn inspect(
    config: &SubsimConfig,
    fixture: PathBuf,
    thing: &str,
    bot: &str,
    now: Option<DateTime<Utc>>,
    draw: Option<f64>,
) -> Result<InspectReport> {
    let store = ThreadStore::load_json(&fixture)?;
    let thing = ThingRef::parse_fullname(thing)
        .with_context(|| format!("Not a fullname: {}", thing))?;
    let item = store
        .fetch(&thing)
        .await
        .with_context(|| format!("{} is not in {:?}", thing, fixture))?;

    // Draw once up front so the report shows the value the router compared against.
    let preparation = ReplyPreparation::from_config(bot, config);
    let draw = draw.unwrap_or_else(|| ThreadRngSource.draw(preparation.router().max_probability()));
    let preparation = preparation.with_random_source(Arc::new(FixedDraw(draw)));

    let prepared = preparation
        .prepare_item_at(&store, item, now.unwrap_or_else(Utc::now))
        .await;
    tracing::debug!(
        "{} scored {} at {} ({:?})",
        bot,
        thing,
        prepared.scored.score.score,
        prepared.scored.score.verdict
    );

    Ok(InspectReport {
        bot: bot.to_string(),
        thing,
        score: prepared.scored.score,
        draw,
        route: prepared.route,
        prompt: prepared.prompt,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,subsim=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect {
            fixture,
            thing,
            bot,
            now,
            draw,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let report = inspect(&config, fixture, &thing, &bot, now, draw).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::ExtractReply { prompt, generated } => match extract_reply(&prompt, &generated) {
            Some(body) => println!("{}", body),
            None => anyhow::bail!("No reply could be extracted"),
        },
        Commands::ExtractSubmission { generated } => {
            let extracted = extract_submission(&generated);
            println!("{}", serde_json::to_string_pretty(&extracted)?);
        }
    }

    Ok(())
}
