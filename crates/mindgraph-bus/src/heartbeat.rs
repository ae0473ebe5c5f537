//! Periodic agent heartbeats
//!
//! Heartbeats are the only health signal agents expose: no error events ever
//! cross the bus, consumers watch `agent.heartbeat` instead. `touch()` is
//! called by handlers after each successfully processed event.

use crate::mqtt::MqttBus;
use chrono::{DateTime, Utc};
use mindgraph_core::{topics, EventEnvelope, HeartbeatPayload};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Clone)]
pub struct HeartbeatPublisher {
    agent_name: String,
    bus: MqttBus,
    interval: Duration,
    last_processed_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl HeartbeatPublisher {
    pub fn new(agent_name: impl Into<String>, bus: MqttBus, interval_seconds: f64) -> Self {
        Self {
            agent_name: agent_name.into(),
            bus,
            interval: Duration::from_secs_f64(interval_seconds.max(0.1)),
            last_processed_at: Arc::new(Mutex::new(None)),
        }
    }

    /// Record that the agent just finished a unit of work.
    pub fn touch(&self) {
        let mut last = self.last_processed_at.lock().expect("heartbeat lock");
        *last = Some(Utc::now());
    }

    /// Start the ticker; it runs until the shutdown token fires.
    pub fn spawn(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(publisher.interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => publisher.beat().await,
                }
            }
        })
    }

    async fn beat(&self) {
        let last_processed_at = *self.last_processed_at.lock().expect("heartbeat lock");
        let payload = HeartbeatPayload {
            agent_name: self.agent_name.clone(),
            status: "ok".to_string(),
            last_processed_at,
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let envelope =
            match EventEnvelope::new(topics::AGENT_HEARTBEAT, "system", &self.agent_name, &payload)
            {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!("failed to build heartbeat: {}", err);
                    return;
                }
            };
        if let Err(err) = self.bus.publish(topics::AGENT_HEARTBEAT, &envelope).await {
            warn!("failed to publish heartbeat: {}", err);
        }
    }
}
