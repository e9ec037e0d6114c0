mod api;
mod commands;
mod consumer;
mod logging;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use mimic_channels::TelegramDispatcher;
use mimic_core::{
    config::{self, Config, QueueBackend},
    traits::EventQueue,
};
use mimic_memory::{store::QueuePolicy, Store};
use mimic_providers::OpenAiGenerator;
use mimic_queue::PubSubPublisher;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "mimic",
    version,
    about = "Mimic: a group chat participant that replies in the group's own style"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml", env = "MIMIC_CONFIG")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook server and the queue consumer.
    Serve,
    /// Show queue, store and outcome statistics.
    Status,
    /// Drop processed-event records and queue rows past the retention window.
    Prune {
        /// Also delete the stored conversation context.
        #[arg(long)]
        reset_context: bool,
    },
    /// Feed a raw Telegram update JSON file through ingestion.
    Replay {
        /// Path to the update JSON.
        file: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load(&cli.config)?;
    cfg.apply_env();
    let _log_guard = logging::init(&cfg.mimic);

    match cli.command {
        Commands::Serve => {
            cfg.validate()?;
            serve(cfg).await?;
        }
        Commands::Status => {
            let store = Store::new(&cfg.memory).await?;
            println!("{}", commands::status(&store, &cfg, &cli.config).await?);
        }
        Commands::Prune { reset_context } => {
            let store = Store::new(&cfg.memory).await?;
            println!("{}", commands::prune(&store, &cfg, reset_context).await?);
        }
        Commands::Replay { file } => {
            cfg.validate()?;
            let raw = std::fs::read(&file)?;
            let store = Store::new(&cfg.memory).await?;
            let queue = build_queue(&cfg, &store);
            println!("{}", commands::replay(&raw, &cfg, queue.as_ref()).await?);
        }
    }

    Ok(())
}

/// The ingestion hand-off for the configured backend.
fn build_queue(cfg: &Config, store: &Store) -> Arc<dyn EventQueue> {
    match cfg.queue.backend {
        QueueBackend::Local => Arc::new(store.clone()),
        QueueBackend::Pubsub => Arc::new(PubSubPublisher::new(
            &cfg.queue,
            Duration::from_secs(cfg.worker.io_timeout_secs),
        )),
    }
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    if cfg.telegram.bot_token.is_empty() {
        anyhow::bail!(
            "telegram.bot_token is empty. Set it in config.toml or the MIMIC_TELEGRAM_TOKEN env var."
        );
    }
    if cfg.provider.api_key.is_empty() {
        anyhow::bail!(
            "provider.api_key is empty. Set it in config.toml or the MIMIC_OPENAI_API_KEY env var."
        );
    }

    let store = Store::new(&cfg.memory).await?;
    let io_timeout = Duration::from_secs(cfg.worker.io_timeout_secs);
    let generator = Arc::new(OpenAiGenerator::from_config(
        &cfg.provider,
        cfg.worker.max_reply_sentences,
        io_timeout,
    ));
    let transport = Arc::new(TelegramDispatcher::new(&cfg.telegram, io_timeout));
    let consumer = Arc::new(consumer::Consumer::new(
        store.clone(),
        generator,
        transport,
        &cfg,
    ));
    let queue = build_queue(&cfg, &store);

    info!(
        "{} running | chat {} | queue: {} | model: {}",
        cfg.mimic.name,
        cfg.chat.chat_id,
        queue.name(),
        cfg.provider.model
    );

    // Local backend: this process drains its own queue.
    let worker_handle = (cfg.queue.backend == QueueBackend::Local).then(|| {
        tokio::spawn(consumer::worker::pull_loop(
            consumer.clone(),
            QueuePolicy::from(&cfg.queue),
            Duration::from_millis(cfg.queue.poll_interval_ms),
        ))
    });
    let maintenance_handle = tokio::spawn(consumer::worker::maintenance_loop(
        store.clone(),
        cfg.memory.clone(),
    ));

    let state = api::ApiState::new(queue, consumer, &cfg);
    let server = cfg.server.clone();
    let mut api_handle = tokio::spawn(async move {
        api::serve(state, &server.host, server.port, server.body_limit).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
        _ = &mut api_handle => error!("API server stopped"),
    }

    info!("Shutting down...");
    api_handle.abort();
    maintenance_handle.abort();
    if let Some(h) = worker_handle {
        h.abort();
    }
    info!("Shutdown complete.");
    Ok(())
}
