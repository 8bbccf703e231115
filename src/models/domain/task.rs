use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One question in the Part-2 ordered question list.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Question {
    pub no: i32,
    pub question: String,
    #[serde(default)]
    pub reference_answer: Option<String>,
}

/// Queue message for the reading-evaluation lane.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Part1Task {
    pub task_id: String,
    pub test_id: String,
    pub audio_url: String,
    pub reference_text: String,
}

impl Part1Task {
    pub fn new(test_id: &str, audio_url: &str, reference_text: &str) -> Self {
        Part1Task {
            task_id: Uuid::new_v4().to_string(),
            test_id: test_id.to_string(),
            audio_url: audio_url.to_string(),
            reference_text: reference_text.to_string(),
        }
    }
}

/// Queue message for the dialogue-evaluation lane.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Part2Task {
    pub task_id: String,
    pub test_id: String,
    pub audio_url: String,
    pub questions: Vec<Question>,
}

impl Part2Task {
    pub fn new(test_id: &str, audio_url: &str, questions: Vec<Question>) -> Self {
        Part2Task {
            task_id: Uuid::new_v4().to_string(),
            test_id: test_id.to_string(),
            audio_url: audio_url.to_string(),
            questions,
        }
    }
}
