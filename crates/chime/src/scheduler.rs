//! `chime scheduler`: run one scheduler instance until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use miette::Result;
use tokio::sync::watch;
use tracing::info;

use chime_alarms::FileAlarmStore;
use chime_lease::{HolderToken, RedisLeaseStore};
use chime_queue::RedisWorkQueue;
use chime_scheduler::{Scheduler, SchedulerConfig};

pub async fn run(
    redis_url: &str,
    queue_name: &str,
    alarms_file: PathBuf,
    config: SchedulerConfig,
) -> Result<()> {
    let lease_store = RedisLeaseStore::connect(redis_url)
        .await
        .map_err(|e| miette::miette!("failed to connect to lease store: {}", e))?;

    // Producers never reserve, so the consumer name is irrelevant here.
    let queue = RedisWorkQueue::connect(redis_url, queue_name, "scheduler")
        .await
        .map_err(|e| miette::miette!("failed to connect to queue: {}", e))?;

    let alarms = FileAlarmStore::new(alarms_file);
    info!(path = %alarms.path().display(), "reading alarms from file");

    let scheduler = Scheduler::new(
        config,
        Arc::new(lease_store),
        HolderToken::process().clone(),
        Arc::new(alarms),
        Arc::new(queue),
    )
    .map_err(|e| miette::miette!("{}", e))?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
    Ok(())
}
