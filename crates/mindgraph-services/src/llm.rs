//! LLM tree-suggestion service client

use crate::ServiceError;
use mindgraph_core::graph::BranchPreference;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The context shipped to `/generate`. `recent_nodes` is pre-serialized by
/// the caller so this crate stays independent of the store's row types;
/// timestamps inside must already be ISO-8601 strings, which serde's chrono
/// integration produces.
#[derive(Clone, Debug, Serialize)]
pub struct LlmContext {
    pub session_id: String,
    pub device_id: String,
    pub transcript: serde_json::Value,
    pub recent_nodes: Vec<serde_json::Value>,
    pub main_branch_summary: String,
    pub current_main_tail_node_id: Option<String>,
}

/// The service's attachment suggestion. Everything is optional on the wire;
/// missing or unrecognized preferences degrade to `main` rather than failing
/// the event, since the consistency agent repairs suggestions anyway.
#[derive(Clone, Debug, Deserialize)]
pub struct LlmSuggestion {
    #[serde(default)]
    pub candidate_parent_id: Option<String>,
    #[serde(default = "default_preference", deserialize_with = "lenient_preference")]
    pub branch_preference: BranchPreference,
    #[serde(default)]
    pub node_text: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

fn default_preference() -> BranchPreference {
    BranchPreference::Main
}

fn lenient_preference<'de, D>(deserializer: D) -> Result<BranchPreference, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(match raw.as_deref() {
        Some("side") => BranchPreference::Side,
        _ => BranchPreference::Main,
    })
}

pub struct LlmClient {
    client: Client,
    base_url: String,
}

impl LlmClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ServiceError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url: base_url.into(),
        })
    }

    /// POST the context to `/generate`. No retries: a failed call surfaces
    /// to the bus layer and QoS-1 redelivery takes it from there.
    pub async fn suggest(&self, context: &LlmContext) -> Result<LlmSuggestion, ServiceError> {
        let url = format!("{}/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(context)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggestion_defaults_when_fields_missing() {
        let suggestion: LlmSuggestion = serde_json::from_str("{}").unwrap();
        assert!(suggestion.candidate_parent_id.is_none());
        assert_eq!(suggestion.branch_preference, BranchPreference::Main);
        assert!(suggestion.node_text.is_none());
        assert!(suggestion.rationale.is_empty());
    }

    #[test]
    fn unknown_preference_degrades_to_main() {
        let suggestion: LlmSuggestion =
            serde_json::from_str(r#"{"branch_preference": "diagonal"}"#).unwrap();
        assert_eq!(suggestion.branch_preference, BranchPreference::Main);
        let suggestion: LlmSuggestion =
            serde_json::from_str(r#"{"branch_preference": "side"}"#).unwrap();
        assert_eq!(suggestion.branch_preference, BranchPreference::Side);
    }
}
