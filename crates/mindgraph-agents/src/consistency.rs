//! Consistency agent: repairs proposals into approved attachments
//!
//! Stateless apart from reads. The attachment decision itself lives in
//! `mindgraph_core::graph::choose_attachment`; this agent only fetches the
//! session's node list, runs the rules, and publishes the outcome.

use mindgraph_bus::{BusConnection, HeartbeatPublisher, MqttBus};
use mindgraph_core::graph::choose_attachment;
use mindgraph_core::ids::new_entity_id;
use mindgraph_core::{topics, ApprovedPayload, EventEnvelope, ProposalPayload, Settings};
use mindgraph_store::MindGraphStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub async fn run(settings: Settings, shutdown: CancellationToken) -> anyhow::Result<()> {
    let store = MindGraphStore::connect(&settings.postgres_dsn)?;
    store.ensure_schema().await?;
    let BusConnection { bus, mut events } = MqttBus::connect(
        &settings,
        &settings.app_name,
        &[topics::TREE_PROPOSAL_CREATED],
        shutdown.clone(),
    )
    .await?;
    let heartbeat = HeartbeatPublisher::new(
        &settings.app_name,
        bus.clone(),
        settings.heartbeat_interval_seconds,
    );
    heartbeat.spawn(shutdown.clone());

    info!("consistency agent started");
    while let Some((topic, envelope)) = events.recv().await {
        if topic != topics::TREE_PROPOSAL_CREATED {
            continue;
        }
        if let Err(err) = handle_proposal(&store, &bus, &heartbeat, &envelope).await {
            error!(session_id = %envelope.session_id, "handler failed: {}", err);
        }
    }
    Ok(())
}

async fn handle_proposal(
    store: &MindGraphStore,
    bus: &MqttBus,
    heartbeat: &HeartbeatPublisher,
    envelope: &EventEnvelope,
) -> anyhow::Result<()> {
    let proposal: ProposalPayload = envelope.payload()?;
    let nodes = store.fetch_rules_nodes(&envelope.session_id).await?;
    let session = store.get_session(&envelope.session_id).await?;
    let node_id = new_entity_id("node");

    let attachment = choose_attachment(
        &nodes,
        proposal.candidate_parent_id.as_deref(),
        proposal.branch_preference,
        &node_id,
        session
            .as_ref()
            .and_then(|row| row.current_main_tail_node_id.as_deref()),
    );

    let payload = ApprovedPayload {
        proposal_id: proposal.proposal_id,
        transcript_id: proposal.transcript_id,
        node_id,
        parent_node_id: attachment.parent_node_id,
        branch_type: attachment.branch_type,
        branch_slot: attachment.branch_slot,
        node_text: proposal.node_text,
        override_reason: attachment.override_reason,
    };
    let event = EventEnvelope::new(
        topics::TREE_APPROVED,
        &envelope.session_id,
        &envelope.device_id,
        &payload,
    )?
    .with_cause(envelope);
    bus.publish(topics::TREE_APPROVED, &event).await?;
    heartbeat.touch();
    Ok(())
}
