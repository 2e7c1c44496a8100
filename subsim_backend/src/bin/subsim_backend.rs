use anyhow::{Context, Result};
use flume::unbounded;
use subsim_backend::config::SubsimConfig;
use subsim_backend::runtime::{Fleet, RuntimeEvent};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,subsim_backend=debug")),
        )
        .init();

    let config = SubsimConfig::load();
    let (event_tx, event_rx) = unbounded();
    let fleet = Fleet::bootstrap(config, event_tx).context("failed to bootstrap bot fleet")?;

    std::thread::spawn(move || {
        for event in event_rx.iter() {
            match event {
                RuntimeEvent::Responded { bot, thing, reply } => {
                    tracing::info!("{} replied to {} with {}", bot, thing, reply)
                }
                RuntimeEvent::Submitted { bot, submission } => {
                    tracing::info!("{} posted {}", bot, submission)
                }
                RuntimeEvent::Error(message) => tracing::warn!("Runtime error: {}", message),
                other => tracing::debug!("{:?}", other),
            }
        }
    });

    tracing::info!("Starting subsim bot fleet (config: {:?})", SubsimConfig::config_path());

    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    rt.block_on(fleet.run())
}
