//! Snapshot agent: periodic graph fingerprints per active session
//!
//! Keeps an in-memory `session -> device` registry seeded from the store at
//! startup and maintained by lifecycle events. Snapshots are bucketed onto
//! the interval grid; the store upsert decides whether a bucket actually
//! changed, and only a stored snapshot produces a `snapshot.hash` event.

use chrono::{DateTime, TimeZone, Utc};
use mindgraph_bus::{BusConnection, HeartbeatPublisher, MqttBus};
use mindgraph_core::graph::snapshot_hash;
use mindgraph_core::ids::new_entity_id;
use mindgraph_core::{topics, EventEnvelope, Settings, SnapshotPayload};
use mindgraph_store::{MindGraphStore, NewSnapshot};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Quantize an instant onto the snapshot interval grid, in UTC.
pub fn floor_bucket(now: DateTime<Utc>, interval_seconds: f64) -> DateTime<Utc> {
    let interval = (interval_seconds as i64).max(1);
    let epoch = now.timestamp();
    let bucket = epoch - epoch.rem_euclid(interval);
    Utc.timestamp_opt(bucket, 0).single().unwrap_or(now)
}

#[derive(Clone, Default)]
struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, String>>>,
}

impl SessionRegistry {
    fn insert(&self, session_id: String, device_id: String) {
        let mut sessions = self.sessions.lock().expect("registry lock");
        sessions.insert(session_id, device_id);
    }

    fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("registry lock");
        sessions.remove(session_id);
    }

    /// Copy out the membership so snapshot I/O happens off the lock.
    fn entries(&self) -> Vec<(String, String)> {
        let sessions = self.sessions.lock().expect("registry lock");
        sessions
            .iter()
            .map(|(session, device)| (session.clone(), device.clone()))
            .collect()
    }
}

pub async fn run(settings: Settings, shutdown: CancellationToken) -> anyhow::Result<()> {
    let store = MindGraphStore::connect(&settings.postgres_dsn)?;
    store.ensure_schema().await?;
    let BusConnection { bus, mut events } = MqttBus::connect(
        &settings,
        &settings.app_name,
        &[topics::SESSION_STARTED, topics::SESSION_STOPPED],
        shutdown.clone(),
    )
    .await?;
    let heartbeat = HeartbeatPublisher::new(
        &settings.app_name,
        bus.clone(),
        settings.heartbeat_interval_seconds,
    );
    heartbeat.spawn(shutdown.clone());

    let registry = SessionRegistry::default();
    for row in store.list_active_sessions().await? {
        registry.insert(row.session_id, row.device_id);
    }

    {
        let registry = registry.clone();
        let store = store.clone();
        let bus = bus.clone();
        let heartbeat = heartbeat.clone();
        let shutdown = shutdown.clone();
        let settings = settings.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs_f64(
                settings.snapshot_interval_seconds.max(1.0),
            ));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        for (session_id, device_id) in registry.entries() {
                            if let Err(err) = emit_snapshot(
                                &store, &bus, &heartbeat, &settings, &session_id, &device_id, None,
                            )
                            .await
                            {
                                warn!(session_id = %session_id, "snapshot failed: {}", err);
                            }
                        }
                    }
                }
            }
        });
    }

    info!("snapshot agent started");
    while let Some((topic, envelope)) = events.recv().await {
        match topic.as_str() {
            topics::SESSION_STARTED => {
                registry.insert(envelope.session_id.clone(), envelope.device_id.clone());
            }
            topics::SESSION_STOPPED => {
                // One last fingerprint, attributed to the stop that caused it.
                if let Err(err) = emit_snapshot(
                    &store,
                    &bus,
                    &heartbeat,
                    &settings,
                    &envelope.session_id,
                    &envelope.device_id,
                    Some(&envelope),
                )
                .await
                {
                    error!(session_id = %envelope.session_id, "final snapshot failed: {}", err);
                }
                registry.remove(&envelope.session_id);
            }
            _ => {}
        }
    }
    Ok(())
}

async fn emit_snapshot(
    store: &MindGraphStore,
    bus: &MqttBus,
    heartbeat: &HeartbeatPublisher,
    settings: &Settings,
    session_id: &str,
    device_id: &str,
    cause: Option<&EventEnvelope>,
) -> anyhow::Result<()> {
    let nodes = store.fetch_rules_nodes(session_id).await?;
    let now = Utc::now();
    let bucket = floor_bucket(now, settings.snapshot_interval_seconds);
    let payload = SnapshotPayload {
        snapshot_id: new_entity_id("snapshot"),
        node_count: nodes.len() as i64,
        hash_sha256: snapshot_hash(&nodes),
        snapshot_bucket_ts: bucket,
    };
    let event = EventEnvelope::new(topics::SNAPSHOT_HASH, session_id, device_id, &payload)?;
    let event = match cause {
        Some(cause) => event.with_cause(cause),
        None => event,
    };

    let stored = store
        .store_snapshot(&NewSnapshot {
            snapshot_id: payload.snapshot_id.clone(),
            event_id: event.event_id.clone(),
            session_id: session_id.to_string(),
            snapshot_bucket_ts: bucket,
            node_count: payload.node_count,
            hash_sha256: payload.hash_sha256.clone(),
            created_at: event.created_at,
        })
        .await?;
    if !stored {
        return Ok(());
    }
    store.mark_snapshot_time(session_id, now).await?;
    bus.publish(topics::SNAPSHOT_HASH, &event).await?;
    heartbeat.touch();
    Ok(())
}
