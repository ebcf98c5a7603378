use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use tg_relaybot::config;
use tg_relaybot::db::{self, SqliteDedupStore};
use tg_relaybot::sweeper;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Print the most recent delivery records, optionally sweeping expired ones first"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Number of records to print
    #[arg(long, default_value = "20")]
    limit: u32,

    /// Run one retention sweep before printing
    #[arg(long)]
    sweep: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    if args.sweep {
        let store = SqliteDedupStore::new(pool.clone());
        sweeper::sweep_once(&store, cfg.delivery.retention()).await?;
    }

    let total = db::count_delivered(&pool).await?;
    let records = db::recent_records(&pool, args.limit).await?;
    info!(total, shown = records.len(), "delivery records");

    println!(
        "{:<28} {:<25} {:<14} {}",
        "SENT AT", "MESSAGE ID", "KIND", "CONVERSATION"
    );
    for r in records {
        println!(
            "{:<28} {:<25} {:<14} {}",
            r.sent_at.to_rfc3339(),
            r.message_id,
            r.notification_kind.as_str(),
            r.conversation_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
