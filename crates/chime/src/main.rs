//! chime: distributed alarm scheduler
//!
//! Main binary with subcommands:
//! - `scheduler`: Compete for leadership and fire alarm triggers
//! - `worker`: Consume triggers and send notifications
//! - `trigger`: Enqueue one trigger by hand
//! - `lease-status`: Show who currently holds the scheduler lease

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chime_lease::{HolderToken, LeaseLock, RedisLeaseStore};
use chime_queue::{RedisWorkQueue, TriggerEvent, WorkQueue};
use chime_worker::SmtpConfig;

mod scheduler;
mod worker;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "chime")]
#[command(about = "Distributed alarm scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Shared Redis settings.
#[derive(Args, Clone)]
struct RedisArgs {
    /// Redis URL for the lease and the trigger queue
    #[arg(long, env = "CHIME_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Trigger queue name
    #[arg(long, env = "CHIME_QUEUE_NAME", default_value = "sendingEmails")]
    queue: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scheduler instance
    Scheduler {
        #[command(flatten)]
        redis: RedisArgs,

        /// JSON file with alarm definitions and subscriptions
        #[arg(long, env = "CHIME_ALARMS_FILE")]
        alarms_file: PathBuf,

        /// Lease key shared by all scheduler instances
        #[arg(long, env = "CHIME_LEASE_KEY", default_value = "alarmLeader:lock")]
        lease_key: String,

        /// Tick interval in seconds
        #[arg(long, env = "CHIME_TICK_INTERVAL", default_value = "5")]
        tick_interval: u64,

        /// Lease time-to-live in seconds (must exceed the tick interval)
        #[arg(long, env = "CHIME_LEASE_TTL", default_value = "10")]
        lease_ttl: u64,

        /// Lease store call timeout in milliseconds
        #[arg(long, env = "CHIME_LOCK_TIMEOUT_MS", default_value = "2000")]
        lock_timeout_ms: u64,
    },

    /// Run a delivery worker
    Worker {
        #[command(flatten)]
        redis: RedisArgs,

        /// JSON file with alarm definitions and subscriptions
        #[arg(long, env = "CHIME_ALARMS_FILE")]
        alarms_file: PathBuf,

        /// Stable worker name; jobs it held when it died are recovered on restart
        #[arg(long, env = "CHIME_WORKER_NAME", default_value = "worker")]
        name: String,

        /// SMTP host
        #[arg(long, env = "CHIME_SMTP_HOST")]
        smtp_host: String,

        /// SMTP port
        #[arg(long, env = "CHIME_SMTP_PORT", default_value = "587")]
        smtp_port: u16,

        /// SMTP user, also the sender address unless --smtp-from is set
        #[arg(long, env = "CHIME_SMTP_USER")]
        smtp_user: Option<String>,

        /// SMTP password
        #[arg(long, env = "CHIME_SMTP_PASSWORD")]
        smtp_password: Option<String>,

        /// Sender address
        #[arg(long, env = "CHIME_SMTP_FROM")]
        smtp_from: Option<String>,

        /// Use STARTTLS. Accepts "1", "true", "yes", "on" or their negations.
        #[arg(long, env = "CHIME_SMTP_STARTTLS", value_parser = parse_bool_env, default_value = "true")]
        smtp_starttls: bool,
    },

    /// Enqueue one trigger for an alarm
    Trigger {
        #[command(flatten)]
        redis: RedisArgs,

        /// Alarm to trigger
        #[arg(long)]
        alarm_id: String,
    },

    /// Show the current scheduler lease holder
    LeaseStatus {
        #[command(flatten)]
        redis: RedisArgs,

        /// Lease key shared by all scheduler instances
        #[arg(long, env = "CHIME_LEASE_KEY", default_value = "alarmLeader:lock")]
        lease_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "chime=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scheduler {
            redis,
            alarms_file,
            lease_key,
            tick_interval,
            lease_ttl,
            lock_timeout_ms,
        } => {
            scheduler::run(
                &redis.redis_url,
                &redis.queue,
                alarms_file,
                chime_scheduler::SchedulerConfig {
                    lease_key,
                    tick_interval: Duration::from_secs(tick_interval),
                    lease_ttl: Duration::from_secs(lease_ttl),
                    lock_timeout: Duration::from_millis(lock_timeout_ms),
                },
            )
            .await?;
        }
        Commands::Worker {
            redis,
            alarms_file,
            name,
            smtp_host,
            smtp_port,
            smtp_user,
            smtp_password,
            smtp_from,
            smtp_starttls,
        } => {
            worker::run(
                &redis.redis_url,
                &redis.queue,
                &name,
                alarms_file,
                SmtpConfig {
                    host: smtp_host,
                    port: smtp_port,
                    username: smtp_user,
                    password: smtp_password,
                    from: smtp_from,
                    starttls: smtp_starttls,
                },
            )
            .await?;
        }
        Commands::Trigger { redis, alarm_id } => {
            trigger(&redis, &alarm_id).await?;
        }
        Commands::LeaseStatus { redis, lease_key } => {
            lease_status(&redis, &lease_key).await?;
        }
    }

    Ok(())
}

async fn trigger(redis: &RedisArgs, alarm_id: &str) -> Result<()> {
    let queue = RedisWorkQueue::connect(&redis.redis_url, &redis.queue, "cli")
        .await
        .map_err(|e| miette::miette!("failed to connect to queue: {}", e))?;

    let job_id = queue
        .enqueue(TriggerEvent::now(alarm_id))
        .await
        .map_err(|e| miette::miette!("failed to enqueue trigger: {}", e))?;

    println!("Enqueued trigger for alarm {alarm_id} as job {job_id}");
    Ok(())
}

async fn lease_status(redis: &RedisArgs, lease_key: &str) -> Result<()> {
    let store = RedisLeaseStore::connect(&redis.redis_url)
        .await
        .map_err(|e| miette::miette!("failed to connect to lease store: {}", e))?;
    let lock = LeaseLock::new(Arc::new(store));

    let holder = lock
        .holder(lease_key)
        .await
        .map_err(|e| miette::miette!("failed to read lease: {}", e))?;

    match holder {
        Some(holder) => println!("Lease {lease_key} held by {holder}"),
        None => println!("Lease {lease_key} is free"),
    }
    println!("This process's token: {}", HolderToken::process());
    Ok(())
}
