use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::Config;
use crate::constants::prompts;
use crate::errors::{AppError, AppResult};
use crate::models::domain::{Question, TokenUsage};
use crate::services::rate_limit::RateGate;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const STREAM_DONE: &str = "[DONE]";

/// Result of one streamed evaluation call: the accumulated model output and
/// the provider's usage metering.
#[derive(Debug, Clone, Default)]
pub struct DialogueOutcome {
    pub raw_content: String,
    pub usage: TokenUsage,
}

/// Sends the student's recording and the question list to the multimodal
/// grading model and accumulates its streamed response.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DialogueGateway: Send + Sync {
    async fn evaluate(
        &self,
        audio: &[u8],
        audio_format: &str,
        questions: &[Question],
    ) -> AppResult<DialogueOutcome>;
}

pub struct OmniDialogueGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    gate: RateGate,
}

impl OmniDialogueGateway {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: config.omni_base_url.trim_end_matches('/').to_string(),
            api_key: config.omni_api_key.clone(),
            model: config.omni_model.clone(),
            // The provider enforces a per-account RPM ceiling; one request in
            // flight plus a release cooldown keeps us under it.
            gate: RateGate::paced(1, config.omni_requests_per_minute),
        }
    }

    async fn stream_completion(
        &self,
        audio: &[u8],
        audio_format: &str,
        questions: &[Question],
    ) -> AppResult<DialogueOutcome> {
        let data_uri = format!(
            "data:{};base64,{}",
            mime_for_format(audio_format),
            BASE64.encode(audio)
        );

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompts::PART2_SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "input_audio",
                            "input_audio": { "data": data_uri, "format": audio_format },
                        },
                        { "type": "text", "text": prompts::build_part2_user_prompt(questions) },
                    ],
                },
            ],
            "modalities": ["text"],
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::GatewayError(format!("grading model request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let excerpt: String = detail.chars().take(500).collect();
            return Err(AppError::GatewayError(format!(
                "grading model returned {}: {}",
                status, excerpt
            )));
        }

        let mut outcome = DialogueOutcome::default();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| AppError::GatewayError(format!("grading model stream: {}", e)))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].to_string();
                buffer.drain(..=newline);
                if consume_stream_line(&line, &mut outcome) {
                    return Ok(outcome);
                }
            }
        }
        // Stream ended without the done sentinel; keep whatever accumulated.
        Ok(outcome)
    }
}

/// Apply one server-sent-events line to the accumulating outcome. Returns
/// true when the stream's done sentinel was seen.
fn consume_stream_line(line: &str, outcome: &mut DialogueOutcome) -> bool {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        return false;
    };
    let payload = payload.trim();
    if payload == STREAM_DONE {
        return true;
    }

    // Fragments that fail to parse are skipped rather than failing the call.
    let Ok(fragment) = serde_json::from_str::<StreamFragment>(payload) else {
        log::debug!("skipping malformed stream fragment: {}", payload);
        return false;
    };

    if let Some(choice) = fragment.choices.first() {
        if let Some(content) = &choice.delta.content {
            outcome.raw_content.push_str(content);
        }
    }
    // Usage may arrive on any fragment, typically the last non-empty one.
    if let Some(usage) = fragment.usage {
        outcome.usage = usage.into();
    }
    false
}

fn mime_for_format(format: &str) -> &'static str {
    match format {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" | "mp4" => "audio/mp4",
        "ogg" => "audio/ogg",
        _ => "audio/mpeg",
    }
}

#[derive(Debug, Deserialize)]
struct StreamFragment {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<UsageFragment>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageFragment {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    audio_tokens: u32,
    #[serde(default)]
    text_tokens: u32,
}

impl From<UsageFragment> for TokenUsage {
    fn from(raw: UsageFragment) -> Self {
        let details = raw.prompt_tokens_details.unwrap_or(PromptTokensDetails {
            audio_tokens: 0,
            text_tokens: 0,
        });
        TokenUsage {
            prompt_tokens: raw.prompt_tokens,
            completion_tokens: raw.completion_tokens,
            total_tokens: raw.total_tokens,
            prompt_audio_tokens: details.audio_tokens,
            prompt_text_tokens: details.text_tokens,
        }
    }
}

#[async_trait]
impl DialogueGateway for OmniDialogueGateway {
    async fn evaluate(
        &self,
        audio: &[u8],
        audio_format: &str,
        questions: &[Question],
    ) -> AppResult<DialogueOutcome> {
        self.gate
            .run(|| self.stream_completion(audio, audio_format, questions))
            .await
    }
}
