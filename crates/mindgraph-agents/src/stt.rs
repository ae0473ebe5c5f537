//! STT agent: segments in, transcripts out
//!
//! The transcript insert is keyed on `(session_id, segment_id)`; a replayed
//! segment reaches the store, loses the race, and is dropped without
//! publishing. A segment the STT service cannot transcribe after all retries
//! takes the process down for the supervisor to restart.

use mindgraph_bus::{BusConnection, HeartbeatPublisher, MqttBus};
use mindgraph_core::ids::new_entity_id;
use mindgraph_core::{topics, AudioSegmentPayload, EventEnvelope, Settings, TranscriptPayload};
use mindgraph_services::{ServiceError, SttClient, SttRequest};
use mindgraph_store::{MindGraphStore, NewTranscript};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub async fn run(settings: Settings, shutdown: CancellationToken) -> anyhow::Result<()> {
    let store = MindGraphStore::connect(&settings.postgres_dsn)?;
    store.ensure_schema().await?;
    let stt = SttClient::new(&settings.stt_service_url)?;
    let BusConnection { bus, mut events } = MqttBus::connect(
        &settings,
        &settings.app_name,
        &[topics::AUDIO_SEGMENT_CREATED],
        shutdown.clone(),
    )
    .await?;
    let heartbeat = HeartbeatPublisher::new(
        &settings.app_name,
        bus.clone(),
        settings.heartbeat_interval_seconds,
    );
    heartbeat.spawn(shutdown.clone());

    info!("STT agent started");
    while let Some((topic, envelope)) = events.recv().await {
        if topic != topics::AUDIO_SEGMENT_CREATED {
            continue;
        }
        match handle_segment(&store, &stt, &bus, &heartbeat, &envelope).await {
            Ok(()) => {}
            Err(err) if err.downcast_ref::<ServiceError>().is_some() => return Err(err),
            Err(err) => {
                error!(session_id = %envelope.session_id, "handler failed: {}", err);
            }
        }
    }
    Ok(())
}

async fn handle_segment(
    store: &MindGraphStore,
    stt: &SttClient,
    bus: &MqttBus,
    heartbeat: &HeartbeatPublisher,
    envelope: &EventEnvelope,
) -> anyhow::Result<()> {
    let segment: AudioSegmentPayload = envelope.payload()?;
    let transcription = stt
        .transcribe(&SttRequest {
            session_id: envelope.session_id.clone(),
            device_id: envelope.device_id.clone(),
            segment_id: segment.segment_id.clone(),
            encoding: segment.encoding.clone(),
            audio_b64: segment.audio_b64.clone(),
        })
        .await?;

    let transcript_id = new_entity_id("transcript");
    let inserted = store
        .insert_transcript(&NewTranscript {
            transcript_id: transcript_id.clone(),
            event_id: envelope.event_id.clone(),
            session_id: envelope.session_id.clone(),
            device_id: envelope.device_id.clone(),
            segment_id: segment.segment_id.clone(),
            text: transcription.text.clone(),
            confidence: transcription.confidence,
            created_at: envelope.created_at,
        })
        .await?;
    if !inserted {
        info!(segment_id = %segment.segment_id, "duplicate segment ignored");
        return Ok(());
    }

    let payload = TranscriptPayload {
        transcript_id,
        segment_id: segment.segment_id,
        text: transcription.text,
        confidence: transcription.confidence,
    };
    let event = EventEnvelope::new(
        topics::STT_TRANSCRIPT_CREATED,
        &envelope.session_id,
        &envelope.device_id,
        &payload,
    )?
    .with_cause(envelope);
    bus.publish(topics::STT_TRANSCRIPT_CREATED, &event).await?;
    heartbeat.touch();
    Ok(())
}
