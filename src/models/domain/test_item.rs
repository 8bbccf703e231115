use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One graded question for Part 2. Created in a batch when Part 2 completes;
/// immutable afterward.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TestItem {
    pub id: String,
    pub test_id: String,
    pub question_no: i32,
    pub score: i32,
    pub feedback: String,
    pub evidence: String,
    pub created_at: DateTime<Utc>,
}

impl TestItem {
    pub fn new(test_id: &str, question_no: i32, score: i32, feedback: &str, evidence: &str) -> Self {
        TestItem {
            id: Uuid::new_v4().to_string(),
            test_id: test_id.to_string(),
            question_no,
            score,
            feedback: feedback.to_string(),
            evidence: evidence.to_string(),
            created_at: Utc::now(),
        }
    }
}
