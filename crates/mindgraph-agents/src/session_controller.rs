//! Session controller: owns the session lifecycle row
//!
//! Start of an already-active session and stop of an already-stopped one are
//! no-ops; the store's gated upserts decide, so replayed control events
//! never double-publish lifecycle fan-out.

use chrono::{DateTime, Utc};
use mindgraph_bus::{BusConnection, HeartbeatPublisher, MqttBus};
use mindgraph_core::{
    topics, EventEnvelope, SessionLifecyclePayload, SessionStartControl, SessionStatus,
    SessionStopControl, Settings,
};
use mindgraph_store::MindGraphStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Parse an ISO-8601 instant from a control payload, falling back to the
/// envelope timestamp when absent or unreadable.
pub fn parse_timestamp(value: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    value
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or(fallback)
}

pub async fn run(settings: Settings, shutdown: CancellationToken) -> anyhow::Result<()> {
    let store = MindGraphStore::connect(&settings.postgres_dsn)?;
    store.ensure_schema().await?;
    let BusConnection { bus, mut events } = MqttBus::connect(
        &settings,
        &settings.app_name,
        &[topics::SESSION_CONTROL_START, topics::SESSION_CONTROL_STOP],
        shutdown.clone(),
    )
    .await?;
    let heartbeat = HeartbeatPublisher::new(
        &settings.app_name,
        bus.clone(),
        settings.heartbeat_interval_seconds,
    );
    heartbeat.spawn(shutdown.clone());

    info!("session controller agent started");
    while let Some((topic, envelope)) = events.recv().await {
        let outcome = match topic.as_str() {
            topics::SESSION_CONTROL_START => {
                handle_start(&store, &bus, &heartbeat, &envelope).await
            }
            topics::SESSION_CONTROL_STOP => handle_stop(&store, &bus, &heartbeat, &envelope).await,
            _ => Ok(()),
        };
        if let Err(err) = outcome {
            error!(topic = %topic, session_id = %envelope.session_id, "handler failed: {}", err);
        }
    }
    Ok(())
}

async fn handle_start(
    store: &MindGraphStore,
    bus: &MqttBus,
    heartbeat: &HeartbeatPublisher,
    envelope: &EventEnvelope,
) -> anyhow::Result<()> {
    let control: SessionStartControl = envelope.payload()?;
    let started_at = parse_timestamp(control.started_at.as_deref(), envelope.created_at);
    let transitioned = store
        .start_session(&envelope.session_id, &envelope.device_id, started_at)
        .await?;
    if !transitioned {
        info!(session_id = %envelope.session_id, "ignored duplicate session start");
        return Ok(());
    }
    let payload = SessionLifecyclePayload {
        session_id: envelope.session_id.clone(),
        device_id: envelope.device_id.clone(),
        status: SessionStatus::Active,
        started_at: Some(started_at),
        stopped_at: None,
    };
    let event = EventEnvelope::new(
        topics::SESSION_STARTED,
        &envelope.session_id,
        &envelope.device_id,
        &payload,
    )?
    .with_cause(envelope);
    bus.publish(topics::SESSION_STARTED, &event).await?;
    heartbeat.touch();
    Ok(())
}

async fn handle_stop(
    store: &MindGraphStore,
    bus: &MqttBus,
    heartbeat: &HeartbeatPublisher,
    envelope: &EventEnvelope,
) -> anyhow::Result<()> {
    let control: SessionStopControl = envelope.payload()?;
    let stopped_at = parse_timestamp(control.stopped_at.as_deref(), envelope.created_at);
    let transitioned = store.stop_session(&envelope.session_id, stopped_at).await?;
    if !transitioned {
        info!(session_id = %envelope.session_id, "ignored duplicate session stop");
        return Ok(());
    }
    let payload = SessionLifecyclePayload {
        session_id: envelope.session_id.clone(),
        device_id: envelope.device_id.clone(),
        status: SessionStatus::Stopped,
        started_at: None,
        stopped_at: Some(stopped_at),
    };
    let event = EventEnvelope::new(
        topics::SESSION_STOPPED,
        &envelope.session_id,
        &envelope.device_id,
        &payload,
    )?
    .with_cause(envelope);
    bus.publish(topics::SESSION_STOPPED, &event).await?;
    heartbeat.touch();
    Ok(())
}
