//! Event envelope and per-topic payloads
//!
//! Wire format (canonical JSON, one envelope per MQTT message):
//!
//!   { "event_id": "...", "event_type": "stt.transcript.created",
//!     "event_version": 1, "trace_id": "...", "causation_id": "..." | null,
//!     "session_id": "...", "device_id": "...",
//!     "created_at": "2026-03-01T00:00:00Z", "payload": { ... } }
//!
//! `trace_id` is carried end-to-end from one external stimulus;
//! `causation_id` is the event_id of the direct cause.

use crate::codec;
use crate::error::Result;
use crate::graph::{BranchPreference, BranchType};
use crate::ids::new_uuid;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Topic names for every event the pipeline produces or consumes.
pub mod topics {
    pub const SESSION_CONTROL_START: &str = "session.control.start";
    pub const SESSION_CONTROL_STOP: &str = "session.control.stop";
    pub const SESSION_STARTED: &str = "session.started";
    pub const SESSION_STOPPED: &str = "session.stopped";
    pub const AUDIO_FRAME: &str = "audio/frame";
    pub const AUDIO_SEGMENT_CREATED: &str = "audio.segment.created";
    pub const STT_TRANSCRIPT_CREATED: &str = "stt.transcript.created";
    pub const TREE_PROPOSAL_CREATED: &str = "tree.proposal.created";
    pub const TREE_APPROVED: &str = "tree.approved";
    pub const SNAPSHOT_HASH: &str = "snapshot.hash";
    pub const AGENT_HEARTBEAT: &str = "agent.heartbeat";
}

/// The wire unit exchanged over the bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub event_version: u32,
    pub trace_id: String,
    pub causation_id: Option<String>,
    pub session_id: String,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build an envelope with a fresh event id and trace id.
    pub fn new(
        event_type: &str,
        session_id: impl Into<String>,
        device_id: impl Into<String>,
        payload: &impl Serialize,
    ) -> Result<Self> {
        Ok(Self {
            event_id: new_uuid(),
            event_type: event_type.to_string(),
            event_version: 1,
            trace_id: new_uuid(),
            causation_id: None,
            session_id: session_id.into(),
            device_id: device_id.into(),
            created_at: Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Link this envelope into the causation chain of `cause`: the trace id
    /// is copied through, the causation id points at the cause itself.
    pub fn with_cause(mut self, cause: &EventEnvelope) -> Self {
        self.trace_id = cause.trace_id.clone();
        self.causation_id = Some(cause.event_id.clone());
        self
    }

    /// Decode the topic-specific payload into its typed form.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn to_canonical_json(&self) -> Result<String> {
        codec::to_canonical_json(self)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Session lifecycle status.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Stopped => "stopped",
        }
    }
}

/// `session.control.start` — optional explicit start instant.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionStartControl {
    #[serde(default)]
    pub started_at: Option<String>,
}

/// `session.control.stop` — optional explicit stop instant.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionStopControl {
    #[serde(default)]
    pub stopped_at: Option<String>,
}

/// `session.started` / `session.stopped` fan-out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionLifecyclePayload {
    pub session_id: String,
    pub device_id: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

/// `audio/frame` from an edge device.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AudioFramePayload {
    pub frame_seq: u64,
    #[serde(default)]
    pub frame_ms: u32,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default)]
    pub vad_active: bool,
    #[serde(default)]
    pub speech_final: bool,
    #[serde(default)]
    pub audio_b64: String,
}

fn default_encoding() -> String {
    "wav_pcm16".to_string()
}

/// `audio.segment.created` — one buffered utterance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AudioSegmentPayload {
    pub segment_id: String,
    pub encoding: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub audio_b64: String,
}

/// `stt.transcript.created`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscriptPayload {
    pub transcript_id: String,
    pub segment_id: String,
    pub text: String,
    pub confidence: f64,
}

/// `tree.proposal.created` — the LLM's attachment suggestion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalPayload {
    pub proposal_id: String,
    pub transcript_id: String,
    #[serde(default)]
    pub candidate_parent_id: Option<String>,
    pub branch_preference: BranchPreference,
    pub node_text: String,
    #[serde(default)]
    pub rationale: String,
}

/// `tree.approved` — the repaired, final attachment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovedPayload {
    pub proposal_id: String,
    pub transcript_id: String,
    pub node_id: String,
    #[serde(default)]
    pub parent_node_id: Option<String>,
    pub branch_type: BranchType,
    #[serde(default)]
    pub branch_slot: Option<i16>,
    pub node_text: String,
    #[serde(default)]
    pub override_reason: String,
}

/// `snapshot.hash`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub snapshot_id: String,
    pub node_count: i64,
    pub hash_sha256: String,
    pub snapshot_bucket_ts: DateTime<Utc>,
}

/// `agent.heartbeat`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub agent_name: String,
    pub status: String,
    #[serde(default)]
    pub last_processed_at: Option<DateTime<Utc>>,
    pub version: String,
}
