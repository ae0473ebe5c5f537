//! Speech-to-text service client

use crate::ServiceError;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Serialize)]
pub struct SttRequest {
    pub session_id: String,
    pub device_id: String,
    pub segment_id: String,
    pub encoding: String,
    pub audio_b64: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub confidence: f64,
}

pub struct SttClient {
    client: Client,
    base_url: String,
}

impl SttClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ServiceError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url: base_url.into(),
        })
    }

    /// POST the segment to `/transcribe`, retrying transient failures.
    /// Exhausting all attempts is fatal for the triggering event.
    pub async fn transcribe(&self, request: &SttRequest) -> Result<Transcription, ServiceError> {
        let url = format!("{}/transcribe", self.base_url);
        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(&url, request).await {
                Ok(transcription) => return Ok(transcription),
                Err(err) => {
                    warn!(
                        segment_id = %request.segment_id,
                        attempt,
                        "STT request failed: {}",
                        err
                    );
                    last_error = err.to_string();
                }
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
        Err(ServiceError::SttExhausted {
            segment_id: request.segment_id.clone(),
            attempts: MAX_ATTEMPTS,
            last_error,
        })
    }

    async fn attempt(&self, url: &str, request: &SttRequest) -> Result<Transcription, ServiceError> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        Ok(Transcription {
            text: body
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            confidence: coerce_confidence(body.get("confidence")),
        })
    }
}

/// The service contract says `confidence` is a number in [0, 1]; real
/// deployments have been seen returning strings or omitting it entirely.
pub fn coerce_confidence(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_coercion() {
        assert_eq!(coerce_confidence(Some(&serde_json::json!(0.85))), 0.85);
        assert_eq!(coerce_confidence(Some(&serde_json::json!("0.5"))), 0.5);
        assert_eq!(coerce_confidence(Some(&serde_json::json!("high"))), 0.0);
        assert_eq!(coerce_confidence(Some(&serde_json::json!(null))), 0.0);
        assert_eq!(coerce_confidence(Some(&serde_json::json!([1.0]))), 0.0);
        assert_eq!(coerce_confidence(None), 0.0);
    }
}
