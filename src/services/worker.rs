use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::errors::AppResult;
use crate::models::domain::{Part1Task, Part2Task, Test};
use crate::repositories::{Delivery, TaskQueue, TestRepository};
use crate::services::blob_store::BlobStore;
use crate::services::dialogue_gateway::DialogueGateway;
use crate::services::reading_gateway::ReadingGateway;
use crate::services::result_parser;
use crate::services::retry::{retry_with_backoff, RetryPolicy};
use crate::services::scoring;

/// A message is dropped (with the failure recorded on the test) after this
/// many delivery attempts.
const MAX_DELIVERIES: i32 = 3;
/// In-flight messages older than this are returned to the lane at startup.
const STALE_VISIBILITY: Duration = Duration::from_secs(600);

/// Consumes the Part-1 lane: fetches the recording, streams it to the
/// reading engine and applies the normalized result to the test.
pub struct Part1Worker {
    tests: Arc<dyn TestRepository>,
    queue: Arc<dyn TaskQueue<Part1Task>>,
    gateway: Arc<dyn ReadingGateway>,
    blobs: Arc<dyn BlobStore>,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl Part1Worker {
    pub fn new(
        tests: Arc<dyn TestRepository>,
        queue: Arc<dyn TaskQueue<Part1Task>>,
        gateway: Arc<dyn ReadingGateway>,
        blobs: Arc<dyn BlobStore>,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            tests,
            queue,
            gateway,
            blobs,
            retry,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        match self.queue.requeue_stale(STALE_VISIBILITY).await {
            Ok(0) => {}
            Ok(n) => log::warn!("Requeued {} stale part 1 tasks", n),
            Err(e) => log::error!("Stale requeue failed: {}", e),
        }
        log::info!("Part 1 worker consuming (poll every {:?})", self.poll_interval);
        loop {
            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    log::error!("Part 1 lane error: {}", e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Claim and process at most one message. Returns whether one was
    /// claimed.
    pub async fn poll_once(&self) -> AppResult<bool> {
        let Some(delivery) = self.queue.claim().await? else {
            return Ok(false);
        };
        match self.process(&delivery.task).await {
            Ok(()) => self.queue.ack(&delivery.message_id).await?,
            Err(e) => self.settle_failure(&delivery, &e.to_string()).await?,
        }
        Ok(true)
    }

    async fn settle_failure(&self, delivery: &Delivery<Part1Task>, error: &str) -> AppResult<()> {
        settle_failure(
            self.queue.as_ref(),
            &delivery.message_id,
            delivery.delivery_count,
            "part 1",
            error,
        )
        .await
    }

    /// Ok means the message is settled: either the test was graded or the
    /// failure is terminal and recorded. Err means transient; the message
    /// goes back to the lane.
    async fn process(&self, task: &Part1Task) -> AppResult<()> {
        let Some(mut test) = self.tests.find_by_id(&task.test_id).await? else {
            log::error!(
                "Part 1 task {} references unknown test {}, dropping",
                task.task_id,
                task.test_id
            );
            return Ok(());
        };

        let audio = match self.blobs.fetch_audio(&task.audio_url).await {
            Ok(audio) => audio,
            Err(e) => {
                self.record_failure(&mut test, &e.to_string()).await;
                return Err(e);
            }
        };

        let raw = match retry_with_backoff("part 1 reading evaluation", self.retry, || {
            self.gateway.evaluate(&task.reference_text, &audio)
        })
        .await
        {
            Ok(raw) => raw,
            Err(e) => {
                self.record_failure(&mut test, &e.to_string()).await;
                return Err(e);
            }
        };

        let eval = match result_parser::parse_reading_payload(&raw) {
            Ok(eval) => eval,
            Err(e) => {
                // Terminal: keep the raw payload for inspection, don't
                // redeliver a payload that will never parse.
                test.part1_raw_result = Some(json!({ "payload": raw }));
                self.record_failure(&mut test, &e.to_string()).await;
                return Ok(());
            }
        };

        if let Some(diagnosis) = eval.diagnosis() {
            log::warn!("Test {} part 1 recording rejected: {}", test.id, diagnosis);
            test.part1_raw_result = Some(json!({ "evaluation": eval, "payload": raw }));
            self.record_failure(&mut test, &diagnosis).await;
            return Ok(());
        }

        scoring::apply_part1(&mut test, &task.audio_url, &eval, &raw);
        self.tests.save(&test).await?;
        log::info!(
            "Test {} part 1 scored {:.1}",
            test.id,
            eval.total_score
        );
        Ok(())
    }

    async fn record_failure(&self, test: &mut Test, reason: &str) {
        record_failure(self.tests.as_ref(), test, reason).await;
    }
}

/// Consumes the Part-2 lane: fetches the recording, has the grading model
/// evaluate it against the question list, then finalizes the test.
pub struct Part2Worker {
    tests: Arc<dyn TestRepository>,
    queue: Arc<dyn TaskQueue<Part2Task>>,
    gateway: Arc<dyn DialogueGateway>,
    blobs: Arc<dyn BlobStore>,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl Part2Worker {
    pub fn new(
        tests: Arc<dyn TestRepository>,
        queue: Arc<dyn TaskQueue<Part2Task>>,
        gateway: Arc<dyn DialogueGateway>,
        blobs: Arc<dyn BlobStore>,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            tests,
            queue,
            gateway,
            blobs,
            retry,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        match self.queue.requeue_stale(STALE_VISIBILITY).await {
            Ok(0) => {}
            Ok(n) => log::warn!("Requeued {} stale part 2 tasks", n),
            Err(e) => log::error!("Stale requeue failed: {}", e),
        }
        log::info!("Part 2 worker consuming (poll every {:?})", self.poll_interval);
        loop {
            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.poll_interval).await,
                Err(e) => {
                    log::error!("Part 2 lane error: {}", e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    pub async fn poll_once(&self) -> AppResult<bool> {
        let Some(delivery) = self.queue.claim().await? else {
            return Ok(false);
        };
        match self.process(&delivery.task).await {
            Ok(()) => self.queue.ack(&delivery.message_id).await?,
            Err(e) => {
                settle_failure(
                    self.queue.as_ref(),
                    &delivery.message_id,
                    delivery.delivery_count,
                    "part 2",
                    &e.to_string(),
                )
                .await?
            }
        }
        Ok(true)
    }

    async fn process(&self, task: &Part2Task) -> AppResult<()> {
        let Some(mut test) = self.tests.find_by_id(&task.test_id).await? else {
            log::error!(
                "Part 2 task {} references unknown test {}, dropping",
                task.task_id,
                task.test_id
            );
            return Ok(());
        };

        let audio = match self.blobs.fetch_audio(&task.audio_url).await {
            Ok(audio) => audio,
            Err(e) => {
                record_failure(self.tests.as_ref(), &mut test, &e.to_string()).await;
                return Err(e);
            }
        };

        let format = audio_format_from_url(&task.audio_url);
        let outcome = match retry_with_backoff("part 2 dialogue evaluation", self.retry, || {
            self.gateway.evaluate(&audio, &format, &task.questions)
        })
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                record_failure(self.tests.as_ref(), &mut test, &e.to_string()).await;
                return Err(e);
            }
        };

        let eval = match result_parser::parse_dialogue_payload(
            &outcome.raw_content,
            task.questions.len(),
        ) {
            Ok(eval) => eval,
            Err(e) => {
                test.part2_raw_result = Some(json!({ "payload": outcome.raw_content }));
                record_failure(self.tests.as_ref(), &mut test, &e.to_string()).await;
                return Ok(());
            }
        };

        let items = scoring::apply_part2(&mut test, &task.audio_url, &eval, &outcome.raw_content);
        scoring::apply_part2_usage(&mut test, &task.task_id, &outcome.usage);

        // Scores first, items second: a failure between the two leaves a
        // graded test, and redelivery re-applies both idempotently.
        self.tests.save(&test).await?;
        self.tests.save_items(&test.id, &items).await?;
        log::info!(
            "Test {} completed: total {:.1}, {} stars ({} items)",
            test.id,
            test.total_score.unwrap_or(0.0),
            test.star_level.unwrap_or(0),
            items.len()
        );
        Ok(())
    }
}

/// Nack for redelivery, or ack-and-drop once the delivery budget is spent.
/// The terminal failure was already recorded on the test by `process`.
async fn settle_failure<T>(
    queue: &dyn TaskQueue<T>,
    message_id: &str,
    delivery_count: i32,
    lane: &str,
    error: &str,
) -> AppResult<()>
where
    T: Send + Sync + 'static,
{
    if delivery_count >= MAX_DELIVERIES {
        log::error!(
            "{} message {} failed {} deliveries, dropping: {}",
            lane,
            message_id,
            delivery_count,
            error
        );
        queue.ack(message_id).await
    } else {
        log::warn!(
            "{} message {} failed (delivery {}), returning to lane: {}",
            lane,
            message_id,
            delivery_count,
            error
        );
        queue.nack(message_id).await
    }
}

async fn record_failure(tests: &dyn TestRepository, test: &mut Test, reason: &str) {
    test.mark_failed(reason);
    if let Err(e) = tests.save(test).await {
        log::error!("Failed to persist failure for test {}: {}", test.id, e);
    }
}

/// Infer the container format from the recording URL's file extension.
fn audio_format_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => "mp3".to_string(),
    }
}
