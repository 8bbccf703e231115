use serde::{Deserialize, Serialize};

/// Per-word alignment detail from the reading engine. `dp_message` encodes
/// the alignment flag (0 = correct, 16 = omitted, 32 = inserted, 64 = repeated).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct WordDetail {
    pub content: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dp_message: Option<String>,
}

/// Normalized Gateway-A output: chapter-level scores plus word details.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ReadingEvaluation {
    pub total_score: f64,
    pub accuracy_score: f64,
    pub fluency_score: f64,
    pub integrity_score: f64,
    pub pronunciation_score: f64,
    pub rec_text: String,
    pub is_rejected: bool,
    pub reject_type: String,
    pub except_info: String,
    pub words: Vec<WordDetail>,
}

impl ReadingEvaluation {
    /// Map the engine's rejection classification to a human-readable
    /// diagnosis. Codes from the ISE learning-engine documentation.
    pub fn diagnosis(&self) -> Option<String> {
        if !self.is_rejected {
            return None;
        }
        let detail = match self.except_info.as_str() {
            "28673" => "no speech detected in the recording",
            "28676" => "recording volume too low",
            "28680" => "recording clipped or too loud",
            "28690" => "recording does not match the reference text",
            _ => "recording rejected by the evaluation engine",
        };
        Some(format!("{} (reject_type={})", detail, self.reject_type))
    }
}

/// One graded question extracted from the Part-2 scoring document.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ItemResult {
    pub no: i32,
    #[serde(default)]
    pub score: i32,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub evidence: String,
}

/// Normalized Gateway-B output: five dimension scores, the full transcript
/// and per-question items.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct DialogueEvaluation {
    pub total_score: f64,
    pub fluency_score: f64,
    pub pronunciation_score: f64,
    pub confidence_score: f64,
    pub vocabulary_score: f64,
    pub sentence_score: f64,
    pub transcript: String,
    pub items: Vec<ItemResult>,
    pub suggestions: Vec<String>,
}

/// Provider usage metering captured from the stream. The audio/text split is
/// optional; cost estimation falls back to "assume audio" when absent.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    #[serde(default)]
    pub prompt_audio_tokens: u32,
    #[serde(default)]
    pub prompt_text_tokens: u32,
}
