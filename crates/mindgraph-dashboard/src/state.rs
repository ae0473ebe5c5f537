//! Live agent heartbeat roster

use dashmap::DashMap;
use mindgraph_core::{topics, EventEnvelope, HeartbeatPayload};
use tracing::warn;

/// Latest heartbeat per agent, fed by the bus listener.
#[derive(Default)]
pub struct DashboardState {
    heartbeats: DashMap<String, HeartbeatPayload>,
}

impl DashboardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_event(&self, topic: &str, envelope: &EventEnvelope) {
        if topic != topics::AGENT_HEARTBEAT {
            return;
        }
        match envelope.payload::<HeartbeatPayload>() {
            Ok(payload) => {
                self.heartbeats.insert(payload.agent_name.clone(), payload);
            }
            Err(err) => warn!("malformed heartbeat: {}", err),
        }
    }

    /// Roster sorted by agent name for stable rendering.
    pub fn heartbeats(&self) -> Vec<HeartbeatPayload> {
        let mut all: Vec<HeartbeatPayload> = self
            .heartbeats
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.agent_name.cmp(&b.agent_name));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat_event(agent_name: &str) -> EventEnvelope {
        EventEnvelope::new(
            topics::AGENT_HEARTBEAT,
            "system",
            agent_name,
            &HeartbeatPayload {
                agent_name: agent_name.to_string(),
                status: "ok".to_string(),
                last_processed_at: None,
                version: "0.1.0".to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn keeps_latest_heartbeat_per_agent_sorted() {
        let state = DashboardState::new();
        state.handle_event(topics::AGENT_HEARTBEAT, &heartbeat_event("stt"));
        state.handle_event(topics::AGENT_HEARTBEAT, &heartbeat_event("consistency"));
        state.handle_event(topics::AGENT_HEARTBEAT, &heartbeat_event("stt"));
        let roster = state.heartbeats();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].agent_name, "consistency");
        assert_eq!(roster[1].agent_name, "stt");
    }

    #[test]
    fn ignores_other_topics() {
        let state = DashboardState::new();
        state.handle_event(topics::SESSION_STARTED, &heartbeat_event("stt"));
        assert!(state.heartbeats().is_empty());
    }
}
