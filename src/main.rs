use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use prismcat::config::{Config, SharedConfig};
use prismcat::server::Server;
use prismcat::storage::{
    AsyncRepository, BlobStore, DetachingRepository, FileBlobStore, Repository, RetentionTask,
    SqliteRepository,
};

#[derive(Parser)]
#[command(name = "prismcat")]
#[command(about = "A transparent logging reverse proxy for LLM HTTP APIs")]
struct Args {
    #[arg(short, long, default_value = "data/config.toml")]
    config: String,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("prismcat={}", level))
        .init();

    info!("Starting prismcat proxy");

    Config::bootstrap(&args.config).await?;
    let config = Config::from_file(&args.config).await?;
    let storage_cfg = config.storage.clone();
    let config = SharedConfig::new(config);

    // Storage stack, bottom-up: durable table <- detaching <- async queue.
    let sqlite = Arc::new(SqliteRepository::new(&storage_cfg.database).await?);
    let blobs = Arc::new(FileBlobStore::new(&storage_cfg.blob_dir)?);
    let detaching = Arc::new(DetachingRepository::new(
        Arc::clone(&sqlite) as Arc<dyn Repository>,
        Arc::clone(&blobs) as Arc<dyn BlobStore>,
        config.clone(),
    ));
    let repo: Arc<AsyncRepository> = Arc::new(AsyncRepository::new(
        detaching,
        storage_cfg.async_buffer,
    ));

    let retention = RetentionTask::start(config.clone(), Arc::clone(&sqlite), Arc::clone(&blobs));

    let server = Server::new(config, Arc::clone(&repo) as Arc<dyn Repository>);
    let shutdown = async {
        if signal::ctrl_c().await.is_err() {
            warn!("failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
        warn!("shutdown signal received");
    };
    server.run(shutdown).await?;

    // Teardown is top-down: stop background work, then drain the async stage
    // into the inner repositories before they close.
    retention.stop().await;
    if let Err(err) = repo.close().await {
        warn!("closing record store failed: {}", err);
    }

    info!("prismcat shutdown complete");
    Ok(())
}
