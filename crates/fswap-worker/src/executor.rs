//! Queue-driven job executor.
//!
//! Consumes swap requests from the Redis stream, admits them through the
//! concurrency governor, and drives each job to a terminal state with
//! retry and dead-letter handling. A health loop feeds the recent error
//! rate back into the governor's ceiling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fswap_queue::{JobQueue, QueuedRequest};

use crate::error::WorkerResult;
use crate::governor::Slot;
use crate::pipeline::ProcessingContext;
use crate::retry::FailureTracker;

const CONSUME_BLOCK_MS: u64 = 1000;
const CONSUME_BATCH: usize = 5;

/// Job executor that processes requests from the queue.
pub struct JobExecutor {
    ctx: Arc<ProcessingContext>,
    queue: Arc<JobQueue>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(ctx: ProcessingContext, queue: JobQueue) -> Self {
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());
        Self {
            ctx: Arc::new(ctx),
            queue: Arc::new(queue),
            shutdown,
            consumer_name,
        }
    }

    /// Run until shutdown is signalled.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting executor '{}' with concurrency ceiling {}",
            self.consumer_name,
            self.ctx.governor.ceiling()
        );

        self.queue.init().await?;

        let claim_task = self.spawn_claim_loop();
        let health_task = self.spawn_health_loop();

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_batch() => {
                    if let Err(e) = result {
                        error!("Error consuming requests: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();
        health_task.abort();

        info!("Waiting for in-flight jobs to finish...");
        let _ = tokio::time::timeout(self.ctx.config.shutdown_timeout, self.drain()).await;

        info!("Executor stopped");
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn consume_batch(&self) -> WorkerResult<()> {
        let headroom = self
            .ctx
            .governor
            .ceiling()
            .saturating_sub(self.ctx.governor.active());
        if headroom == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let requests = self
            .queue
            .consume(&self.consumer_name, CONSUME_BLOCK_MS, headroom.min(CONSUME_BATCH))
            .await?;
        if requests.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} request(s) from queue", requests.len());
        self.dispatch(requests).await;
        Ok(())
    }

    /// Admit each request through the governor and spawn its job. A request
    /// that cannot get a slot in time stays pending in the stream for
    /// redelivery.
    async fn dispatch(&self, requests: Vec<(String, QueuedRequest)>) {
        for (message_id, request) in requests {
            let slot = match self.ctx.governor.acquire(self.ctx.config.request_timeout).await {
                Ok(slot) => slot,
                Err(e) => {
                    warn!(
                        "No slot for message {} within {:?}: {}; leaving it pending",
                        message_id, self.ctx.config.request_timeout, e
                    );
                    continue;
                }
            };

            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move {
                Self::execute_message(ctx, queue, slot, message_id, request).await;
            });
        }
    }

    /// Process one queued request end to end, including the ack, retry or
    /// dead-letter decision.
    async fn execute_message(
        ctx: Arc<ProcessingContext>,
        queue: Arc<JobQueue>,
        slot: Slot,
        message_id: String,
        request: QueuedRequest,
    ) {
        let description = request.describe();

        let mut job = match request.clone().into_job() {
            Ok(job) => job,
            Err(e) => {
                // The payload can never become valid; park it right away.
                warn!("Rejected request {}: {}", description, e);
                if let Err(dlq_err) = queue.dlq(&message_id, &request, &e.to_string()).await {
                    error!("Failed to dead-letter request {}: {}", description, dlq_err);
                }
                queue.clear_dedup(&request).await.ok();
                slot.release();
                return;
            }
        };

        let result = ctx.execute(&mut job).await;
        slot.release();

        match result {
            Ok(_) => {
                if let Err(e) = queue.ack(&message_id).await {
                    error!("Failed to ack message {}: {}", message_id, e);
                }
                queue.clear_dedup(&request).await.ok();
            }
            Err(e) if e.is_permanent() => {
                warn!("Job {} failed permanently: {}", job.id, e);
                if let Err(dlq_err) = queue.dlq(&message_id, &request, &e.to_string()).await {
                    error!("Failed to dead-letter message {}: {}", message_id, dlq_err);
                }
                queue.clear_dedup(&request).await.ok();
            }
            Err(e) => {
                let retry_count = queue.increment_retry(&message_id).await.unwrap_or(u32::MAX);
                let max_retries = queue.max_retries();
                if retry_count >= max_retries {
                    warn!(
                        "Job {} exhausted {} attempts, moving to DLQ: {}",
                        job.id, max_retries, e
                    );
                    if let Err(dlq_err) = queue.dlq(&message_id, &request, &e.to_string()).await {
                        error!("Failed to dead-letter message {}: {}", message_id, dlq_err);
                    }
                    queue.clear_dedup(&request).await.ok();
                } else {
                    info!(
                        "Job {} will be retried (attempt {}/{}): {}",
                        job.id, retry_count, max_retries, e
                    );
                    // Left unacked; the claim loop redelivers it.
                }
            }
        }
    }

    /// Periodically claim requests stuck pending on a dead consumer.
    fn spawn_claim_loop(&self) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let queue = Arc::clone(&self.queue);
        let consumer_name = self.consumer_name.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let claim_interval = self.ctx.config.claim_interval;

        tokio::spawn(async move {
            let mut failures = FailureTracker::new(3);
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match queue.claim_pending(&consumer_name, CONSUME_BATCH).await {
                            Ok(requests) if !requests.is_empty() => {
                                failures.record_success();
                                info!("Claimed {} pending request(s)", requests.len());
                                for (message_id, request) in requests {
                                    let slot = match ctx
                                        .governor
                                        .acquire(ctx.config.request_timeout)
                                        .await
                                    {
                                        Ok(slot) => slot,
                                        Err(_) => break,
                                    };
                                    let ctx = Arc::clone(&ctx);
                                    let queue = Arc::clone(&queue);
                                    tokio::spawn(async move {
                                        Self::execute_message(ctx, queue, slot, message_id, request)
                                            .await;
                                    });
                                }
                            }
                            Ok(_) => failures.record_success(),
                            Err(e) => {
                                if failures.record_failure() {
                                    warn!("Failed to claim pending requests: {}", e);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Feed the recent error rate back into the concurrency ceiling.
    fn spawn_health_loop(&self) -> tokio::task::JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let queue = Arc::clone(&self.queue);
        let mut shutdown_rx = self.shutdown.subscribe();
        let check_interval = self.ctx.config.health_check_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let snapshot = ctx.stats.snapshot();
                        let ceiling = ctx.governor.adjust_for_error_rate(snapshot.error_rate);
                        let backlog = queue.len().await.unwrap_or(0);
                        let dead_lettered = queue.dlq_len().await.unwrap_or(0);
                        debug!(
                            active = ctx.governor.active(),
                            ceiling,
                            backlog,
                            dead_lettered,
                            error_rate = format!("{:.2}", snapshot.error_rate),
                            "Health check"
                        );
                    }
                }
            }
        })
    }

    async fn drain(&self) {
        while self.ctx.governor.active() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
