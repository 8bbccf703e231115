use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::services::rate_limit::RateGate;

/// Raw PCM chunk size per audio frame, 40 ms of 16 kHz 16-bit mono.
const AUDIO_CHUNK_BYTES: usize = 1280;
/// Pacing delay between audio frames.
const FRAME_INTERVAL: Duration = Duration::from_millis(40);
/// Settle delay after the parameter frame before audio starts.
const PARAM_SETTLE: Duration = Duration::from_millis(500);

// Frame markers used by the evaluation engine.
const AUS_FIRST: i32 = 1;
const AUS_CONTINUE: i32 = 2;
const AUS_LAST: i32 = 4;
const STATUS_PARAM: i32 = 0;
const STATUS_AUDIO: i32 = 1;
const STATUS_TERMINAL: i32 = 2;

/// Streams recorded audio to the pronunciation-evaluation engine and
/// returns the engine's raw result payload.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadingGateway: Send + Sync {
    /// Evaluate a read-aloud recording against its reference text.
    /// Returns the decoded result payload (XML or JSON, engine-dependent).
    async fn evaluate(&self, reference_text: &str, audio: &[u8]) -> AppResult<String>;
}

pub struct IseReadingGateway {
    host: String,
    path: String,
    app_id: String,
    api_key: String,
    api_secret: SecretString,
    result_timeout: Duration,
    gate: RateGate,
}

impl IseReadingGateway {
    pub fn new(config: &Config) -> Self {
        Self {
            host: config.ise_host.clone(),
            path: config.ise_path.clone(),
            app_id: config.ise_app_id.clone(),
            api_key: config.ise_api_key.clone(),
            api_secret: config.ise_api_secret.clone(),
            result_timeout: Duration::from_secs(config.ise_result_timeout_secs),
            gate: RateGate::concurrency(config.ise_max_concurrent),
        }
    }

    /// Build the signed connection URL. The engine authenticates via an
    /// HMAC-SHA256 signature over the host, the RFC 1123 date, and the
    /// request line, carried in the query string.
    fn signed_url(&self, date: &str) -> AppResult<String> {
        let signature_origin = format!(
            "host: {}\ndate: {}\nGET {} HTTP/1.1",
            self.host, date, self.path
        );

        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.expose_secret().as_bytes())
            .map_err(|e| AppError::ConfigError(format!("invalid signing secret: {}", e)))?;
        mac.update(signature_origin.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let authorization_origin = format!(
            "api_key=\"{}\", algorithm=\"hmac-sha256\", headers=\"host date request-line\", signature=\"{}\"",
            self.api_key, signature
        );
        let authorization = BASE64.encode(authorization_origin.as_bytes());

        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("authorization", &authorization)
            .append_pair("date", date)
            .append_pair("host", &self.host)
            .finish();

        Ok(format!("wss://{}{}?{}", self.host, self.path, query))
    }

    async fn stream_evaluation(&self, reference_text: &str, audio: &[u8]) -> AppResult<String> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let url = self.signed_url(&date)?;

        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| AppError::GatewayError(format!("evaluation engine connect: {}", e)))?;
        let (mut write, mut read) = socket.split();

        let frames = build_frame_sequence(&self.app_id, reference_text, audio);
        let last = frames.len() - 1;
        for (i, frame) in frames.into_iter().enumerate() {
            write
                .send(Message::Text(frame.to_string()))
                .await
                .map_err(|e| AppError::GatewayError(format!("evaluation engine send: {}", e)))?;
            if i == 0 {
                tokio::time::sleep(PARAM_SETTLE).await;
            } else if i < last {
                tokio::time::sleep(FRAME_INTERVAL).await;
            }
        }

        let mut payload = String::new();
        loop {
            let msg = tokio::time::timeout(self.result_timeout, read.next())
                .await
                .map_err(|_| {
                    AppError::GatewayError(format!(
                        "timed out after {}s waiting for evaluation result",
                        self.result_timeout.as_secs()
                    ))
                })?;

            let msg = match msg {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(AppError::GatewayError(
                        "evaluation engine closed connection before sending a result".to_string(),
                    ));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(AppError::GatewayError(format!(
                        "evaluation engine read: {}",
                        e
                    )));
                }
            };

            let frame: ResultFrame = serde_json::from_str(&msg).map_err(|e| {
                AppError::GatewayError(format!("malformed result frame: {}", e))
            })?;
            if frame.code != 0 {
                return Err(AppError::GatewayError(format!(
                    "evaluation engine error {}: {}",
                    frame.code, frame.message
                )));
            }

            if let Some(data) = &frame.data {
                if let Some(encoded) = &data.data {
                    if !encoded.is_empty() {
                        let bytes = BASE64.decode(encoded).map_err(|e| {
                            AppError::GatewayError(format!("undecodable result payload: {}", e))
                        })?;
                        payload = String::from_utf8_lossy(&bytes).into_owned();
                    }
                }
                if data.status == STATUS_TERMINAL {
                    return Ok(payload);
                }
            }
        }
    }
}

/// Build the full frame sequence for one evaluation session: one parameter
/// frame, the audio frames, and one terminal frame.
fn build_frame_sequence(app_id: &str, reference_text: &str, audio: &[u8]) -> Vec<serde_json::Value> {
    let mut frames = Vec::with_capacity(audio.len() / AUDIO_CHUNK_BYTES + 3);

    frames.push(json!({
        "common": { "app_id": app_id },
        "business": {
            "category": "read_chapter",
            "rstcd": "utf8",
            "sub": "ise",
            "ent": "en_vip",
            "tte": "utf-8",
            "cmd": "ssb",
            "auf": "audio/L16;rate=16000",
            "aue": "raw",
            "text": BASE64.encode(reference_text.as_bytes()),
        },
        "data": { "status": STATUS_PARAM },
    }));

    let chunks: Vec<&[u8]> = audio.chunks(AUDIO_CHUNK_BYTES).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        let aus = if i == 0 { AUS_FIRST } else { AUS_CONTINUE };
        frames.push(json!({
            "business": { "cmd": "auw", "aus": aus, "aue": "raw" },
            "data": { "status": STATUS_AUDIO, "data": BASE64.encode(chunk) },
        }));
    }

    frames.push(json!({
        "business": { "cmd": "auw", "aus": AUS_LAST, "aue": "raw" },
        "data": { "status": STATUS_TERMINAL, "data": "" },
    }));

    frames
}

#[derive(Debug, Deserialize)]
struct ResultFrame {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<ResultData>,
}

#[derive(Debug, Deserialize)]
struct ResultData {
    #[serde(default)]
    status: i32,
    data: Option<String>,
}

#[async_trait]
impl ReadingGateway for IseReadingGateway {
    async fn evaluate(&self, reference_text: &str, audio: &[u8]) -> AppResult<String> {
        self.gate
            .run(|| self.stream_evaluation(reference_text, audio))
            .await
    }
}
