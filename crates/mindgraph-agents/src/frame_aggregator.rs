//! Frame aggregator: coalesces audio frames into utterance segments
//!
//! One buffer per `(session_id, device_id)`. Frames append under a single
//! mutex with duplicate `frame_seq` suppression; segments flush on
//! `speech_final`, on silence timeout, and on session stop. Publishing
//! always happens after the lock is released, and a flush removes the
//! buffer atomically with the read, so late frames start a fresh buffer.

use anyhow::Context;
use chrono::{DateTime, Utc};
use mindgraph_bus::{BusConnection, HeartbeatPublisher, MqttBus};
use mindgraph_core::codec::{b64_decode, b64_encode};
use mindgraph_core::ids::new_entity_id;
use mindgraph_core::{topics, AudioFramePayload, AudioSegmentPayload, EventEnvelope, Settings};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const SWEEP_PERIOD: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct FrameBuffer {
    encoding: String,
    started_at: DateTime<Utc>,
    last_at: DateTime<Utc>,
    chunks: Vec<Vec<u8>>,
    seen_frame_seq: HashSet<u64>,
}

/// A segment taken out of the book, ready to publish.
#[derive(Debug)]
pub struct PendingSegment {
    pub session_id: String,
    pub device_id: String,
    pub encoding: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

impl PendingSegment {
    pub fn into_payload(self) -> AudioSegmentPayload {
        AudioSegmentPayload {
            segment_id: new_entity_id("segment"),
            encoding: self.encoding,
            started_at: self.started_at,
            ended_at: self.ended_at,
            audio_b64: b64_encode(&self.bytes),
        }
    }
}

/// All live buffers, one mutex over the lot.
#[derive(Default)]
pub struct FrameBook {
    buffers: Mutex<HashMap<(String, String), FrameBuffer>>,
}

impl FrameBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one frame into its buffer. Returns a segment when the frame was
    /// marked `speech_final` and the buffer held audio.
    pub fn accept(
        &self,
        session_id: &str,
        device_id: &str,
        received_at: DateTime<Utc>,
        payload: &AudioFramePayload,
    ) -> anyhow::Result<Option<PendingSegment>> {
        let audio = if payload.audio_b64.is_empty() {
            Vec::new()
        } else {
            b64_decode(&payload.audio_b64).context("frame audio_b64")?
        };

        let key = (session_id.to_string(), device_id.to_string());
        let mut buffers = self.buffers.lock().expect("frame book lock");
        let buffer = buffers.entry(key.clone()).or_insert_with(|| FrameBuffer {
            encoding: payload.encoding.clone(),
            started_at: received_at,
            last_at: received_at,
            chunks: Vec::new(),
            seen_frame_seq: HashSet::new(),
        });

        if !buffer.seen_frame_seq.insert(payload.frame_seq) {
            info!(frame_seq = payload.frame_seq, "duplicate frame ignored");
            return Ok(None);
        }
        if !audio.is_empty() {
            buffer.chunks.push(audio);
        }
        buffer.last_at = received_at;
        buffer.encoding = payload.encoding.clone();

        if payload.speech_final && !buffer.chunks.is_empty() {
            let buffer = buffers.remove(&key).expect("buffer just updated");
            return Ok(Some(drain(key, buffer)));
        }
        Ok(None)
    }

    /// Remove and return the buffer for one `(session, device)`, if it holds
    /// any audio. Used on `session.stopped`.
    pub fn flush(&self, session_id: &str, device_id: &str) -> Option<PendingSegment> {
        let key = (session_id.to_string(), device_id.to_string());
        let mut buffers = self.buffers.lock().expect("frame book lock");
        let has_audio = buffers
            .get(&key)
            .map(|buffer| !buffer.chunks.is_empty())
            .unwrap_or(false);
        if !has_audio {
            return None;
        }
        let buffer = buffers.remove(&key).expect("buffer present");
        Some(drain(key, buffer))
    }

    /// Remove and return every buffer silent for at least `timeout`.
    pub fn take_expired(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<PendingSegment> {
        let mut buffers = self.buffers.lock().expect("frame book lock");
        let expired: Vec<(String, String)> = buffers
            .iter()
            .filter(|(_, buffer)| {
                (now - buffer.last_at).to_std().unwrap_or_default() >= timeout
            })
            .map(|(key, _)| key.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|key| {
                let buffer = buffers.remove(&key)?;
                if buffer.chunks.is_empty() {
                    None
                } else {
                    Some(drain(key, buffer))
                }
            })
            .collect()
    }
}

fn drain(key: (String, String), buffer: FrameBuffer) -> PendingSegment {
    PendingSegment {
        session_id: key.0,
        device_id: key.1,
        encoding: buffer.encoding,
        started_at: buffer.started_at,
        ended_at: buffer.last_at,
        bytes: buffer.chunks.concat(),
    }
}

pub async fn run(settings: Settings, shutdown: CancellationToken) -> anyhow::Result<()> {
    let BusConnection { bus, mut events } = MqttBus::connect(
        &settings,
        &settings.app_name,
        &[topics::AUDIO_FRAME, topics::SESSION_STOPPED],
        shutdown.clone(),
    )
    .await?;
    let heartbeat = HeartbeatPublisher::new(
        &settings.app_name,
        bus.clone(),
        settings.heartbeat_interval_seconds,
    );
    heartbeat.spawn(shutdown.clone());

    let book = std::sync::Arc::new(FrameBook::new());
    let silence_timeout = Duration::from_secs_f64(settings.frame_silence_timeout_seconds.max(0.0));

    {
        // Silence sweeper: flushes buffers nothing has touched lately. These
        // flushes carry no causation, there is no single triggering event.
        let book = book.clone();
        let bus = bus.clone();
        let heartbeat = heartbeat.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_PERIOD);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        for segment in book.take_expired(Utc::now(), silence_timeout) {
                            publish_segment(&bus, &heartbeat, segment, None).await;
                        }
                    }
                }
            }
        });
    }

    info!("frame aggregator agent started");
    while let Some((topic, envelope)) = events.recv().await {
        match topic.as_str() {
            topics::SESSION_STOPPED => {
                if let Some(segment) = book.flush(&envelope.session_id, &envelope.device_id) {
                    publish_segment(&bus, &heartbeat, segment, Some(&envelope)).await;
                }
            }
            topics::AUDIO_FRAME => {
                let payload: AudioFramePayload = match envelope.payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        error!("malformed audio frame: {}", err);
                        continue;
                    }
                };
                match book.accept(
                    &envelope.session_id,
                    &envelope.device_id,
                    envelope.created_at,
                    &payload,
                ) {
                    Ok(Some(segment)) => {
                        publish_segment(&bus, &heartbeat, segment, Some(&envelope)).await;
                    }
                    Ok(None) => {}
                    Err(err) => error!("failed to buffer frame: {}", err),
                }
            }
            _ => {}
        }
    }
    Ok(())
}

async fn publish_segment(
    bus: &MqttBus,
    heartbeat: &HeartbeatPublisher,
    segment: PendingSegment,
    cause: Option<&EventEnvelope>,
) {
    let session_id = segment.session_id.clone();
    let device_id = segment.device_id.clone();
    let payload = segment.into_payload();
    let envelope =
        match EventEnvelope::new(topics::AUDIO_SEGMENT_CREATED, session_id, device_id, &payload) {
            Ok(envelope) => match cause {
                Some(cause) => envelope.with_cause(cause),
                None => envelope,
            },
            Err(err) => {
                error!("failed to build segment event: {}", err);
                return;
            }
        };
    match bus.publish(topics::AUDIO_SEGMENT_CREATED, &envelope).await {
        Ok(()) => heartbeat.touch(),
        Err(err) => error!(segment_id = %payload.segment_id, "failed to publish segment: {}", err),
    }
}
