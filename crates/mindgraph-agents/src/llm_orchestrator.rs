//! LLM orchestrator: turns transcripts into attachment proposals
//!
//! Inserts the transcript idempotently before calling out, which also makes
//! fixture transcripts published straight onto the bus (bypassing STT) land
//! in the store. The LLM call is single-shot; failures fall to QoS-1
//! redelivery.

use mindgraph_bus::{BusConnection, HeartbeatPublisher, MqttBus};
use mindgraph_core::ids::new_entity_id;
use mindgraph_core::{topics, EventEnvelope, ProposalPayload, Settings, TranscriptPayload};
use mindgraph_services::{LlmClient, LlmContext};
use mindgraph_store::{MindGraphStore, NewTranscript};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const RECENT_NODE_LIMIT: i64 = 20;

pub async fn run(settings: Settings, shutdown: CancellationToken) -> anyhow::Result<()> {
    let store = MindGraphStore::connect(&settings.postgres_dsn)?;
    store.ensure_schema().await?;
    let llm = LlmClient::new(&settings.llm_service_url)?;
    let BusConnection { bus, mut events } = MqttBus::connect(
        &settings,
        &settings.app_name,
        &[topics::STT_TRANSCRIPT_CREATED],
        shutdown.clone(),
    )
    .await?;
    let heartbeat = HeartbeatPublisher::new(
        &settings.app_name,
        bus.clone(),
        settings.heartbeat_interval_seconds,
    );
    heartbeat.spawn(shutdown.clone());

    info!("LLM tree orchestrator started");
    while let Some((topic, envelope)) = events.recv().await {
        if topic != topics::STT_TRANSCRIPT_CREATED {
            continue;
        }
        if let Err(err) = handle_transcript(&store, &llm, &bus, &heartbeat, &envelope).await {
            error!(session_id = %envelope.session_id, "handler failed: {}", err);
        }
    }
    Ok(())
}

async fn handle_transcript(
    store: &MindGraphStore,
    llm: &LlmClient,
    bus: &MqttBus,
    heartbeat: &HeartbeatPublisher,
    envelope: &EventEnvelope,
) -> anyhow::Result<()> {
    let transcript: TranscriptPayload = envelope.payload()?;
    store
        .insert_transcript(&NewTranscript {
            transcript_id: transcript.transcript_id.clone(),
            event_id: envelope.event_id.clone(),
            session_id: envelope.session_id.clone(),
            device_id: envelope.device_id.clone(),
            segment_id: transcript.segment_id.clone(),
            text: transcript.text.clone(),
            confidence: transcript.confidence,
            created_at: envelope.created_at,
        })
        .await?;

    let session = store.get_session(&envelope.session_id).await?;
    let recent_nodes = store
        .fetch_recent_nodes(&envelope.session_id, RECENT_NODE_LIMIT)
        .await?
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    let context = LlmContext {
        session_id: envelope.session_id.clone(),
        device_id: envelope.device_id.clone(),
        transcript: envelope.payload.clone(),
        recent_nodes,
        main_branch_summary: session
            .as_ref()
            .and_then(|row| row.main_branch_summary.clone())
            .unwrap_or_default(),
        current_main_tail_node_id: session
            .as_ref()
            .and_then(|row| row.current_main_tail_node_id.clone()),
    };

    let suggestion = llm.suggest(&context).await?;
    let payload = ProposalPayload {
        proposal_id: new_entity_id("proposal"),
        transcript_id: transcript.transcript_id,
        candidate_parent_id: suggestion.candidate_parent_id,
        branch_preference: suggestion.branch_preference,
        node_text: suggestion.node_text.unwrap_or(transcript.text),
        rationale: suggestion.rationale,
    };
    let event = EventEnvelope::new(
        topics::TREE_PROPOSAL_CREATED,
        &envelope.session_id,
        &envelope.device_id,
        &payload,
    )?
    .with_cause(envelope);
    bus.publish(topics::TREE_PROPOSAL_CREATED, &event).await?;
    heartbeat.touch();
    Ok(())
}
