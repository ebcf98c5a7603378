use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use tg_relaybot::config;
use tg_relaybot::db::{self, DedupStore, SqliteDedupStore};
use tg_relaybot::queue::{DeliveryQueue, QueueSettings};
use tg_relaybot::render::Renderer;
use tg_relaybot::server::{self, AppState};
use tg_relaybot::shutdown;
use tg_relaybot::sweeper;
use tg_relaybot::telegram::{Destination, TelegramSender};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let store: Arc<dyn DedupStore> = Arc::new(SqliteDedupStore::new(pool));

    let queue = DeliveryQueue::new(
        store.clone(),
        Arc::new(TelegramSender::from_config(&cfg)),
        Renderer::new(cfg.intercom.inbox_url.clone()),
        Destination::from_config(&cfg),
        QueueSettings::from_config(&cfg.delivery),
    );

    let shutdown = shutdown::install_signal_handler();

    let worker = tokio::spawn({
        let queue = queue.clone();
        let shutdown = shutdown.clone();
        async move { queue.run(shutdown).await }
    });
    let sweeper = tokio::spawn(sweeper::run_sweeper(
        store.clone(),
        cfg.delivery.retention(),
        cfg.delivery.sweep_interval(),
        shutdown.clone(),
    ));

    let listener = TcpListener::bind(&cfg.app.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.app.listen_addr))?;
    if cfg.intercom.webhook_secret.is_none() {
        info!("no webhook secret configured; signatures are not verified");
    }

    let state = AppState::new(queue, store, cfg.intercom.webhook_secret.clone());
    let result = shutdown::supervise(
        server::serve(listener, state, shutdown.clone()),
        worker,
        shutdown.clone(),
    )
    .await;

    shutdown.cancel();
    if let Err(err) = sweeper.await {
        error!(?err, "retention sweeper task failed");
    }
    info!("relay stopped");
    result
}
