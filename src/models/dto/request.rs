use serde::Deserialize;
use validator::Validate;

use crate::models::domain::Question;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTestRequest {
    #[validate(length(min = 1, max = 64))]
    pub student_id: String,

    #[validate(length(min = 1, max = 32))]
    pub level: String,

    #[validate(length(min = 1, max = 32))]
    pub unit: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitPart1Request {
    #[validate(length(min = 1, max = 2000))]
    pub reference_text: String,

    #[validate(url)]
    pub audio_url: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitPart2Request {
    #[validate(length(min = 1, max = 50))]
    pub questions: Vec<Question>,

    #[validate(url)]
    pub audio_url: String,
}
