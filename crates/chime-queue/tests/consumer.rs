//! Consumer loop behaviour against the in-memory queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chime_queue::{
    Consumer, ConsumerConfig, HandlerError, JobHandler, MemoryWorkQueue, QueueStats, TriggerEvent,
    WorkQueue,
};
use pretty_assertions::assert_eq;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    Fail,
    Panic,
    /// Fail the first call, succeed afterwards.
    FailOnce,
}

struct CountingHandler {
    behaviour: Behaviour,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    work: Duration,
}

impl CountingHandler {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            work: Duration::ZERO,
        })
    }

    fn slow(behaviour: Behaviour, work: Duration) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            work,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn handle(&self, event: &TriggerEvent) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.work.is_zero() {
            sleep(self.work).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.behaviour {
            Behaviour::Succeed => Ok(()),
            Behaviour::Fail => Err(HandlerError::new(format!("cannot handle {}", event.alarm_id))),
            Behaviour::Panic => panic!("handler blew up"),
            Behaviour::FailOnce if call == 0 => Err(HandlerError::new("transient")),
            Behaviour::FailOnce => Ok(()),
        }
    }
}

fn start(
    queue: &MemoryWorkQueue,
    handler: Arc<CountingHandler>,
    concurrency: usize,
) -> (watch::Sender<bool>, JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = Consumer::new(
        Arc::new(queue.clone()),
        handler,
        ConsumerConfig {
            concurrency,
            poll_interval: Duration::from_millis(100),
            ..ConsumerConfig::default()
        },
    );
    (shutdown_tx, tokio::spawn(consumer.run(shutdown_rx)))
}

async fn wait_until_settled(queue: &MemoryWorkQueue) -> QueueStats {
    for _ in 0..1000 {
        let stats = queue.stats().await.unwrap();
        if stats.waiting == 0 && stats.delayed == 0 && stats.reserved == 0 {
            return stats;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("queue never settled");
}

async fn stop(shutdown_tx: watch::Sender<bool>, handle: JoinHandle<()>) {
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn successful_job_is_acknowledged() {
    let queue = MemoryWorkQueue::new();
    queue.enqueue(TriggerEvent::now("1")).await.unwrap();
    let handler = CountingHandler::new(Behaviour::Succeed);

    let (shutdown_tx, handle) = start(&queue, Arc::clone(&handler), 1);
    let stats = wait_until_settled(&queue).await;
    stop(shutdown_tx, handle).await;

    assert_eq!(stats, QueueStats::default());
    assert_eq!(handler.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_job_is_dead_lettered_after_three_attempts() {
    let queue = MemoryWorkQueue::new();
    queue.enqueue(TriggerEvent::now("42")).await.unwrap();
    let handler = CountingHandler::new(Behaviour::Fail);

    let (shutdown_tx, handle) = start(&queue, Arc::clone(&handler), 1);
    let stats = wait_until_settled(&queue).await;
    stop(shutdown_tx, handle).await;

    assert_eq!(handler.calls(), 3);
    assert_eq!(stats.dead, 1);
    let dead = queue.dead_letters().await;
    assert_eq!(dead[0].job.event.alarm_id, "42");
    assert_eq!(dead[0].job.attempts, 3);
    assert_eq!(dead[0].reason, "cannot handle 42");
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_to_success() {
    let queue = MemoryWorkQueue::new();
    queue.enqueue(TriggerEvent::now("1")).await.unwrap();
    let handler = CountingHandler::new(Behaviour::FailOnce);

    let (shutdown_tx, handle) = start(&queue, Arc::clone(&handler), 1);
    let stats = wait_until_settled(&queue).await;
    stop(shutdown_tx, handle).await;

    assert_eq!(handler.calls(), 2);
    assert_eq!(stats.dead, 0);
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_counts_as_failure() {
    let queue = MemoryWorkQueue::new();
    queue.enqueue(TriggerEvent::now("1")).await.unwrap();
    let handler = CountingHandler::new(Behaviour::Panic);

    let (shutdown_tx, handle) = start(&queue, Arc::clone(&handler), 1);
    let stats = wait_until_settled(&queue).await;
    stop(shutdown_tx, handle).await;

    assert_eq!(handler.calls(), 3);
    assert_eq!(stats.dead, 1);
    assert!(queue.dead_letters().await[0].reason.contains("panicked"));
}

#[tokio::test(start_paused = true)]
async fn concurrency_one_runs_jobs_one_at_a_time() {
    let queue = MemoryWorkQueue::new();
    for id in 0..5 {
        queue.enqueue(TriggerEvent::now(id.to_string())).await.unwrap();
    }
    let handler = CountingHandler::slow(Behaviour::Succeed, Duration::from_millis(200));

    let (shutdown_tx, handle) = start(&queue, Arc::clone(&handler), 1);
    wait_until_settled(&queue).await;
    stop(shutdown_tx, handle).await;

    assert_eq!(handler.calls(), 5);
    assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn higher_concurrency_overlaps_jobs() {
    let queue = MemoryWorkQueue::new();
    for id in 0..4 {
        queue.enqueue(TriggerEvent::now(id.to_string())).await.unwrap();
    }
    let handler = CountingHandler::slow(Behaviour::Succeed, Duration::from_millis(200));

    let (shutdown_tx, handle) = start(&queue, Arc::clone(&handler), 4);
    wait_until_settled(&queue).await;
    stop(shutdown_tx, handle).await;

    assert_eq!(handler.calls(), 4);
    assert!(handler.max_in_flight.load(Ordering::SeqCst) > 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_in_flight_job() {
    let queue = MemoryWorkQueue::new();
    queue.enqueue(TriggerEvent::now("1")).await.unwrap();
    let handler = CountingHandler::slow(Behaviour::Succeed, Duration::from_secs(3));

    let (shutdown_tx, handle) = start(&queue, Arc::clone(&handler), 1);
    while handler.calls() == 0 {
        sleep(Duration::from_millis(10)).await;
    }
    stop(shutdown_tx, handle).await;

    assert_eq!(handler.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
}

#[tokio::test(start_paused = true)]
async fn idle_consumer_stops_on_shutdown() {
    let queue = MemoryWorkQueue::new();
    let handler = CountingHandler::new(Behaviour::Succeed);

    let (shutdown_tx, handle) = start(&queue, Arc::clone(&handler), 2);
    sleep(Duration::from_millis(500)).await;
    stop(shutdown_tx, handle).await;

    assert_eq!(handler.calls(), 0);
}
