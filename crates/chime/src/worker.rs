//! `chime worker`: consume triggers and deliver notifications until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use miette::Result;
use tokio::sync::watch;
use tracing::info;

use chime_alarms::FileAlarmStore;
use chime_queue::{Consumer, ConsumerConfig, RedisWorkQueue};
use chime_worker::{SmtpConfig, SmtpMailer, Worker};

pub async fn run(
    redis_url: &str,
    queue_name: &str,
    name: &str,
    alarms_file: PathBuf,
    smtp: SmtpConfig,
) -> Result<()> {
    let queue = RedisWorkQueue::connect(redis_url, queue_name, name)
        .await
        .map_err(|e| miette::miette!("failed to connect to queue: {}", e))?;

    let mailer = SmtpMailer::new(&smtp)
        .map_err(|e| miette::miette!("failed to configure SMTP transport: {}", e))?;
    info!(host = %smtp.host, port = smtp.port, starttls = smtp.starttls, "SMTP transport configured");

    let alarms = FileAlarmStore::new(alarms_file);
    let worker = Worker::new(Arc::new(alarms), Arc::new(mailer));

    // One trigger at a time
    let consumer = Consumer::new(Arc::new(queue), Arc::new(worker), ConsumerConfig::default());

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    info!(worker = name, queue = queue_name, "worker starting");
    consumer.run(shutdown_rx).await;
    Ok(())
}
