//! MindGraph Services - HTTP clients for the external STT and LLM services

pub mod llm;
pub mod stt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("STT failed for segment {segment_id} after {attempts} attempts: {last_error}")]
    SttExhausted {
        segment_id: String,
        attempts: u32,
        last_error: String,
    },
}

pub use llm::{LlmClient, LlmContext, LlmSuggestion};
pub use stt::{SttClient, SttRequest, Transcription};
