use serde::Serialize;

use crate::models::domain::{Test, TestStatus};

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub task_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestStatusResponse {
    pub test_id: String,
    pub status: TestStatus,
    pub part1_score: Option<f64>,
    pub part2_score: Option<f64>,
    pub total_score: Option<f64>,
    pub star_level: Option<i32>,
    pub failure_reason: Option<String>,
}

impl From<&Test> for TestStatusResponse {
    fn from(test: &Test) -> Self {
        TestStatusResponse {
            test_id: test.id.clone(),
            status: test.status,
            part1_score: test.part1_score,
            part2_score: test.part2_score,
            total_score: test.total_score,
            star_level: test.star_level,
            failure_reason: test.failure_reason.clone(),
        }
    }
}
