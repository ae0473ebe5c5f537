//! Graph writer: the only agent that mutates the tree
//!
//! Inserts are keyed on `transcript_id`, so a double-approved proposal can
//! only land once. After every real insert the session's main tail and
//! summary are recomputed from the full node list rather than patched
//! incrementally.

use mindgraph_bus::{BusConnection, HeartbeatPublisher, MqttBus};
use mindgraph_core::graph::{build_main_branch_summary, find_main_tail};
use mindgraph_core::{topics, ApprovedPayload, EventEnvelope, Settings};
use mindgraph_store::{MindGraphStore, NewGraphNode};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub async fn run(settings: Settings, shutdown: CancellationToken) -> anyhow::Result<()> {
    let store = MindGraphStore::connect(&settings.postgres_dsn)?;
    store.ensure_schema().await?;
    let BusConnection { bus, mut events } = MqttBus::connect(
        &settings,
        &settings.app_name,
        &[topics::TREE_APPROVED],
        shutdown.clone(),
    )
    .await?;
    let heartbeat = HeartbeatPublisher::new(
        &settings.app_name,
        bus.clone(),
        settings.heartbeat_interval_seconds,
    );
    heartbeat.spawn(shutdown.clone());

    info!("graph writer agent started");
    while let Some((topic, envelope)) = events.recv().await {
        if topic != topics::TREE_APPROVED {
            continue;
        }
        if let Err(err) = handle_approved(&store, &heartbeat, &envelope).await {
            error!(session_id = %envelope.session_id, "handler failed: {}", err);
        }
    }
    Ok(())
}

async fn handle_approved(
    store: &MindGraphStore,
    heartbeat: &HeartbeatPublisher,
    envelope: &EventEnvelope,
) -> anyhow::Result<()> {
    let approved: ApprovedPayload = envelope.payload()?;
    let inserted = store
        .insert_graph_node(&NewGraphNode {
            node_id: approved.node_id.clone(),
            event_id: envelope.event_id.clone(),
            session_id: envelope.session_id.clone(),
            transcript_id: approved.transcript_id.clone(),
            parent_node_id: approved.parent_node_id.clone(),
            branch_type: approved.branch_type.as_str().to_string(),
            branch_slot: approved.branch_slot,
            node_text: approved.node_text.clone(),
            override_reason: approved.override_reason.clone(),
            created_at: envelope.created_at,
        })
        .await?;
    if !inserted {
        info!(
            transcript_id = %approved.transcript_id,
            "duplicate approved node ignored"
        );
        return Ok(());
    }

    let nodes = store.fetch_rules_nodes(&envelope.session_id).await?;
    store
        .update_session_state(
            &envelope.session_id,
            find_main_tail(&nodes).as_deref(),
            &build_main_branch_summary(&nodes),
            None,
        )
        .await?;
    heartbeat.touch();
    Ok(())
}
