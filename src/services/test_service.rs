use std::sync::Arc;
use validator::Validate;

use crate::errors::{AppError, AppResult};
use crate::models::domain::{Part1Task, Part2Task, Test, TestStatus};
use crate::models::dto::{
    SubmitPart1Request, SubmitPart2Request, SubmitResponse, TestStatusResponse,
};
use crate::repositories::{TaskQueue, TestRepository};

/// Submission surface of the pipeline: accepts recordings, enqueues
/// evaluation tasks and reports status. All grading happens in the workers.
pub struct TestService {
    tests: Arc<dyn TestRepository>,
    part1_queue: Arc<dyn TaskQueue<Part1Task>>,
    part2_queue: Arc<dyn TaskQueue<Part2Task>>,
}

impl TestService {
    pub fn new(
        tests: Arc<dyn TestRepository>,
        part1_queue: Arc<dyn TaskQueue<Part1Task>>,
        part2_queue: Arc<dyn TaskQueue<Part2Task>>,
    ) -> Self {
        Self {
            tests,
            part1_queue,
            part2_queue,
        }
    }

    pub async fn create_test(&self, student_id: &str, level: &str, unit: &str) -> AppResult<Test> {
        let test = Test::new(student_id, level, unit);
        log::info!(
            "Creating test {} for student {} ({}/{})",
            test.id,
            student_id,
            level,
            unit
        );
        self.tests.create(test).await
    }

    /// Accept a Part-1 recording and enqueue its evaluation. Allowed from
    /// `pending` (first attempt) and `failed` (resubmission after a
    /// diagnosed rejection). If the enqueue fails the test is left
    /// untouched, so the submission can simply be retried.
    pub async fn submit_part1(
        &self,
        test_id: &str,
        req: &SubmitPart1Request,
    ) -> AppResult<SubmitResponse> {
        req.validate()?;
        let mut test = self.require_test(test_id).await?;

        match test.status {
            TestStatus::Pending | TestStatus::Failed => {}
            status => {
                return Err(AppError::ValidationError(format!(
                    "cannot submit part 1 while test is {}",
                    status
                )));
            }
        }

        let task = Part1Task::new(test_id, &req.audio_url, &req.reference_text);
        self.part1_queue.publish(&task).await?;

        test.part1_audio_url = Some(req.audio_url.clone());
        test.updated_at = chrono::Utc::now();
        self.tests.save(&test).await?;

        log::info!("Enqueued part 1 task {} for test {}", task.task_id, test_id);
        Ok(SubmitResponse {
            task_id: task.task_id,
            message: "part 1 queued for evaluation".to_string(),
        })
    }

    /// Accept the Part-2 recording and question list. Requires Part 1 to be
    /// done; on success the test moves to `processing`.
    pub async fn submit_part2(
        &self,
        test_id: &str,
        req: &SubmitPart2Request,
    ) -> AppResult<SubmitResponse> {
        req.validate()?;
        let mut test = self.require_test(test_id).await?;

        if test.status != TestStatus::Part1Done {
            return Err(AppError::ValidationError(format!(
                "cannot submit part 2 while test is {}",
                test.status
            )));
        }

        let task = Part2Task::new(test_id, &req.audio_url, req.questions.clone());
        self.part2_queue.publish(&task).await?;

        // Only after a successful enqueue; an EnqueueError above leaves the
        // test at part1_done and the submission retryable.
        test.status = TestStatus::Processing;
        test.part2_audio_url = Some(req.audio_url.clone());
        test.updated_at = chrono::Utc::now();
        self.tests.save(&test).await?;

        log::info!("Enqueued part 2 task {} for test {}", task.task_id, test_id);
        Ok(SubmitResponse {
            task_id: task.task_id,
            message: "part 2 queued for evaluation".to_string(),
        })
    }

    pub async fn get_status(&self, test_id: &str) -> AppResult<TestStatusResponse> {
        let test = self.require_test(test_id).await?;
        Ok(TestStatusResponse::from(&test))
    }

    async fn require_test(&self, test_id: &str) -> AppResult<Test> {
        self.tests
            .find_by_id(test_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("test {} not found", test_id)))
    }
}
