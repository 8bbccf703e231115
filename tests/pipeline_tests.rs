use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use viva_server::{
    errors::{AppError, AppResult},
    models::domain::{Part1Task, Part2Task, Question, Test, TestItem, TestStatus, TokenUsage},
    models::dto::{SubmitPart1Request, SubmitPart2Request},
    repositories::{Delivery, TaskQueue, TestRepository},
    services::{
        BlobStore, DialogueGateway, DialogueOutcome, Part1Worker, Part2Worker, ReadingGateway,
        RetryPolicy, TestService,
    },
};

// ---------------------------------------------------------------------------
// In-memory doubles
// ---------------------------------------------------------------------------

struct InMemoryTestRepository {
    tests: Arc<RwLock<HashMap<String, Test>>>,
    items: Arc<RwLock<HashMap<String, Vec<TestItem>>>>,
}

impl InMemoryTestRepository {
    fn new() -> Self {
        Self {
            tests: Arc::new(RwLock::new(HashMap::new())),
            items: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get(&self, id: &str) -> Test {
        self.tests.read().await.get(id).cloned().expect("test exists")
    }

    async fn items_for(&self, test_id: &str) -> Vec<TestItem> {
        self.items
            .read()
            .await
            .get(test_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TestRepository for InMemoryTestRepository {
    async fn find_by_id(&self, id: &str) -> AppResult<Option<Test>> {
        Ok(self.tests.read().await.get(id).cloned())
    }

    async fn create(&self, test: Test) -> AppResult<Test> {
        self.tests
            .write()
            .await
            .insert(test.id.clone(), test.clone());
        Ok(test)
    }

    async fn save(&self, test: &Test) -> AppResult<()> {
        self.tests
            .write()
            .await
            .insert(test.id.clone(), test.clone());
        Ok(())
    }

    async fn save_items(&self, test_id: &str, items: &[TestItem]) -> AppResult<()> {
        self.items
            .write()
            .await
            .insert(test_id.to_string(), items.to_vec());
        Ok(())
    }
}

struct InMemoryTaskQueue<T> {
    queued: RwLock<VecDeque<(String, i32, T)>>,
    inflight: RwLock<HashMap<String, (i32, T)>>,
}

impl<T: Clone> InMemoryTaskQueue<T> {
    fn new() -> Self {
        Self {
            queued: RwLock::new(VecDeque::new()),
            inflight: RwLock::new(HashMap::new()),
        }
    }

    async fn depth(&self) -> usize {
        self.queued.read().await.len()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> TaskQueue<T> for InMemoryTaskQueue<T> {
    async fn publish(&self, task: &T) -> AppResult<()> {
        self.queued.write().await.push_back((
            uuid::Uuid::new_v4().to_string(),
            0,
            task.clone(),
        ));
        Ok(())
    }

    async fn claim(&self) -> AppResult<Option<Delivery<T>>> {
        let Some((id, count, task)) = self.queued.write().await.pop_front() else {
            return Ok(None);
        };
        let count = count + 1;
        self.inflight
            .write()
            .await
            .insert(id.clone(), (count, task.clone()));
        Ok(Some(Delivery {
            message_id: id,
            delivery_count: count,
            task,
        }))
    }

    async fn ack(&self, message_id: &str) -> AppResult<()> {
        self.inflight.write().await.remove(message_id);
        Ok(())
    }

    async fn nack(&self, message_id: &str) -> AppResult<()> {
        if let Some((count, task)) = self.inflight.write().await.remove(message_id) {
            self.queued
                .write()
                .await
                .push_back((message_id.to_string(), count, task));
        }
        Ok(())
    }

    async fn requeue_stale(&self, _visibility_timeout: Duration) -> AppResult<u64> {
        Ok(0)
    }
}

/// A lane whose broker is down: every publish fails.
struct UnreachableQueue;

#[async_trait]
impl<T: Send + Sync + 'static> TaskQueue<T> for UnreachableQueue {
    async fn publish(&self, _task: &T) -> AppResult<()> {
        Err(AppError::EnqueueError("lane unreachable".to_string()))
    }

    async fn claim(&self) -> AppResult<Option<Delivery<T>>> {
        Ok(None)
    }

    async fn ack(&self, _message_id: &str) -> AppResult<()> {
        Ok(())
    }

    async fn nack(&self, _message_id: &str) -> AppResult<()> {
        Ok(())
    }

    async fn requeue_stale(&self, _visibility_timeout: Duration) -> AppResult<u64> {
        Ok(0)
    }
}

struct StaticReadingGateway {
    payload: String,
}

#[async_trait]
impl ReadingGateway for StaticReadingGateway {
    async fn evaluate(&self, _reference_text: &str, _audio: &[u8]) -> AppResult<String> {
        Ok(self.payload.clone())
    }
}

struct StaticDialogueGateway {
    content: String,
    usage: TokenUsage,
}

#[async_trait]
impl DialogueGateway for StaticDialogueGateway {
    async fn evaluate(
        &self,
        _audio: &[u8],
        _audio_format: &str,
        _questions: &[Question],
    ) -> AppResult<DialogueOutcome> {
        Ok(DialogueOutcome {
            raw_content: self.content.clone(),
            usage: self.usage.clone(),
        })
    }
}

struct StaticBlobStore;

#[async_trait]
impl BlobStore for StaticBlobStore {
    async fn fetch_audio(&self, _url: &str) -> AppResult<Vec<u8>> {
        Ok(vec![0u8; 4096])
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const READING_XML: &str = r#"<?xml version="1.0"?><result><rec_paper><read_chapter accuracy_score="82.0" fluency_score="76.0" integrity_score="100.0" phone_score="81.0" total_score="80.0" is_rejected="false"/></rec_paper></result>"#;

fn dialogue_json() -> String {
    serde_json::json!({
        "transcript": "Um, I like cats.",
        "total_score": 18.0,
        "fluency_score": 15.0,
        "pronunciation_score": 22.0,
        "confidence_score": 16.0,
        "vocabulary_score": 18.0,
        "sentence_score": 19.0,
        "items": [
            {"no": 1, "score": 1, "feedback": "Hesitant but relevant.", "evidence": "I like cats."}
        ],
        "suggestions": ["Answer in full sentences."]
    })
    .to_string()
}

fn usage() -> TokenUsage {
    TokenUsage {
        prompt_tokens: 1000,
        completion_tokens: 300,
        total_tokens: 1300,
        prompt_audio_tokens: 850,
        prompt_text_tokens: 150,
    }
}

fn questions(count: i32) -> Vec<Question> {
    (1..=count)
        .map(|no| Question {
            no,
            question: format!("Question {}?", no),
            reference_answer: None,
        })
        .collect()
}

fn no_wait_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 0,
        initial_delay: Duration::ZERO,
        backoff_factor: 1.0,
    }
}

fn part1_worker(
    repo: Arc<InMemoryTestRepository>,
    queue: Arc<InMemoryTaskQueue<Part1Task>>,
    payload: &str,
) -> Part1Worker {
    Part1Worker::new(
        repo,
        queue,
        Arc::new(StaticReadingGateway {
            payload: payload.to_string(),
        }),
        Arc::new(StaticBlobStore),
        no_wait_policy(),
        Duration::from_millis(10),
    )
}

fn part2_worker(
    repo: Arc<InMemoryTestRepository>,
    queue: Arc<InMemoryTaskQueue<Part2Task>>,
    content: String,
) -> Part2Worker {
    Part2Worker::new(
        repo,
        queue,
        Arc::new(StaticDialogueGateway {
            content,
            usage: usage(),
        }),
        Arc::new(StaticBlobStore),
        no_wait_policy(),
        Duration::from_millis(10),
    )
}

// ---------------------------------------------------------------------------
// End-to-end pipeline scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_pipeline_grades_both_parts() {
    let repo = Arc::new(InMemoryTestRepository::new());
    let p1_queue = Arc::new(InMemoryTaskQueue::<Part1Task>::new());
    let p2_queue = Arc::new(InMemoryTaskQueue::<Part2Task>::new());
    let service = TestService::new(repo.clone(), p1_queue.clone(), p2_queue.clone());

    let test = service.create_test("student-42", "L3", "U7").await.unwrap();

    // Part 1: submit, then let the worker drain the lane.
    service
        .submit_part1(
            &test.id,
            &SubmitPart1Request {
                reference_text: "The quick brown fox".to_string(),
                audio_url: "https://blob/reading.pcm".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(p1_queue.depth().await, 1);

    part1_worker(repo.clone(), p1_queue.clone(), READING_XML)
        .poll_once()
        .await
        .unwrap();

    let after_part1 = repo.get(&test.id).await;
    assert_eq!(after_part1.status, TestStatus::Part1Done);
    assert_eq!(after_part1.part1_score, Some(80.0));

    // Part 2: twelve questions, model only recognized one answer.
    service
        .submit_part2(
            &test.id,
            &SubmitPart2Request {
                questions: questions(12),
                audio_url: "https://blob/answers.mp3".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(repo.get(&test.id).await.status, TestStatus::Processing);

    part2_worker(repo.clone(), p2_queue.clone(), dialogue_json())
        .poll_once()
        .await
        .unwrap();

    let done = repo.get(&test.id).await;
    assert_eq!(done.status, TestStatus::Completed);
    assert_eq!(done.part2_score, Some(18.0));
    assert_eq!(done.total_score, Some(49.0));
    assert_eq!(done.star_level, Some(2));
    assert!(done.completed_at.is_some());
    assert!(done.tokens_used.total_cost > 0.0);

    // One recognized answer, eleven zero-score placeholders.
    let items = repo.items_for(&test.id).await;
    assert_eq!(items.len(), 12);
    assert_eq!(items[0].score, 1);
    assert!(items[1..].iter().all(|i| i.score == 0));
}

#[tokio::test]
async fn test_rejected_recording_fails_test_and_allows_resubmission() {
    let repo = Arc::new(InMemoryTestRepository::new());
    let p1_queue = Arc::new(InMemoryTaskQueue::<Part1Task>::new());
    let p2_queue = Arc::new(InMemoryTaskQueue::<Part2Task>::new());
    let service = TestService::new(repo.clone(), p1_queue.clone(), p2_queue);

    let test = service.create_test("student-42", "L3", "U7").await.unwrap();
    let request = SubmitPart1Request {
        reference_text: "cat dog bird".to_string(),
        audio_url: "https://blob/silent.pcm".to_string(),
    };
    service.submit_part1(&test.id, &request).await.unwrap();

    let rejected = r#"<result><read_chapter total_score="0.0" is_rejected="true" reject_type="1" except_info="28673"/></result>"#;
    part1_worker(repo.clone(), p1_queue.clone(), rejected)
        .poll_once()
        .await
        .unwrap();

    let failed = repo.get(&test.id).await;
    assert_eq!(failed.status, TestStatus::Failed);
    assert!(failed.failure_reason.as_deref().unwrap().contains("no speech"));
    assert!(failed.part1_score.is_none());
    // Diagnosed rejections are terminal, not redelivered.
    assert_eq!(p1_queue.depth().await, 0);

    // A failed test accepts a fresh Part-1 recording.
    service.submit_part1(&test.id, &request).await.unwrap();
    part1_worker(repo.clone(), p1_queue.clone(), READING_XML)
        .poll_once()
        .await
        .unwrap();

    let recovered = repo.get(&test.id).await;
    assert_eq!(recovered.status, TestStatus::Part1Done);
    assert_eq!(recovered.part1_score, Some(80.0));
    assert!(recovered.failure_reason.is_none());
}

#[tokio::test]
async fn test_part2_requires_part1_done() {
    let repo = Arc::new(InMemoryTestRepository::new());
    let service = TestService::new(
        repo.clone(),
        Arc::new(InMemoryTaskQueue::<Part1Task>::new()),
        Arc::new(InMemoryTaskQueue::<Part2Task>::new()),
    );

    let test = service.create_test("student-42", "L3", "U7").await.unwrap();
    let result = service
        .submit_part2(
            &test.id,
            &SubmitPart2Request {
                questions: questions(3),
                audio_url: "https://blob/answers.mp3".to_string(),
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::ValidationError(_))));
    assert_eq!(repo.get(&test.id).await.status, TestStatus::Pending);
}

#[tokio::test]
async fn test_enqueue_failure_leaves_submission_retryable() {
    let repo = Arc::new(InMemoryTestRepository::new());
    let service = TestService::new(
        repo.clone(),
        Arc::new(UnreachableQueue),
        Arc::new(UnreachableQueue),
    );

    let mut test = service.create_test("student-42", "L3", "U7").await.unwrap();
    test.part1_score = Some(80.0);
    test.status = TestStatus::Part1Done;
    repo.save(&test).await.unwrap();

    let result = service
        .submit_part2(
            &test.id,
            &SubmitPart2Request {
                questions: questions(3),
                audio_url: "https://blob/answers.mp3".to_string(),
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::EnqueueError(_))));
    // Status unchanged: the client can retry the same submission.
    let unchanged = repo.get(&test.id).await;
    assert_eq!(unchanged.status, TestStatus::Part1Done);
    assert!(unchanged.part2_audio_url.is_none());
}

#[tokio::test]
async fn test_unknown_test_is_not_found() {
    let service = TestService::new(
        Arc::new(InMemoryTestRepository::new()),
        Arc::new(InMemoryTaskQueue::<Part1Task>::new()),
        Arc::new(InMemoryTaskQueue::<Part2Task>::new()),
    );

    let result = service.get_status("does-not-exist").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_status_response_reflects_progress() {
    let repo = Arc::new(InMemoryTestRepository::new());
    let p1_queue = Arc::new(InMemoryTaskQueue::<Part1Task>::new());
    let service = TestService::new(
        repo.clone(),
        p1_queue.clone(),
        Arc::new(InMemoryTaskQueue::<Part2Task>::new()),
    );

    let test = service.create_test("student-42", "L3", "U7").await.unwrap();
    let status = service.get_status(&test.id).await.unwrap();
    assert_eq!(status.status, TestStatus::Pending);
    assert!(status.total_score.is_none());

    service
        .submit_part1(
            &test.id,
            &SubmitPart1Request {
                reference_text: "cat dog".to_string(),
                audio_url: "https://blob/r.pcm".to_string(),
            },
        )
        .await
        .unwrap();
    part1_worker(repo.clone(), p1_queue, READING_XML)
        .poll_once()
        .await
        .unwrap();

    let status = service.get_status(&test.id).await.unwrap();
    assert_eq!(status.status, TestStatus::Part1Done);
    assert_eq!(status.part1_score, Some(80.0));
}

#[tokio::test]
async fn test_prose_wrapped_model_reply_still_grades() {
    let repo = Arc::new(InMemoryTestRepository::new());
    let p2_queue = Arc::new(InMemoryTaskQueue::<Part2Task>::new());

    let mut test = Test::new("student-42", "L3", "U7");
    test.part1_score = Some(80.0);
    test.status = TestStatus::Processing;
    let test_id = test.id.clone();
    repo.create(test).await.unwrap();

    p2_queue
        .publish(&Part2Task::new(
            &test_id,
            "https://blob/answers.mp3",
            questions(1),
        ))
        .await
        .unwrap();

    let wrapped = format!("Sure! Here is the grading:\n```json\n{}\n```", dialogue_json());
    part2_worker(repo.clone(), p2_queue, wrapped)
        .poll_once()
        .await
        .unwrap();

    let done = repo.get(&test_id).await;
    assert_eq!(done.status, TestStatus::Completed);
    assert_eq!(done.part2_score, Some(18.0));
}
