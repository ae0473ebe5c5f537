//! Tests for envelopes, canonical JSON, and payload decoding

use chrono::{TimeZone, Utc};
use mindgraph_core::codec::{b64_decode, b64_encode, canonical_json, to_canonical_json};
use mindgraph_core::events::{topics, AudioFramePayload, EventEnvelope, TranscriptPayload};

// ===========================================================================
// EventEnvelope
// ===========================================================================

#[test]
fn new_envelope_has_fresh_ids_and_version_one() {
    let envelope = EventEnvelope::new(
        topics::STT_TRANSCRIPT_CREATED,
        "session-1",
        "device-1",
        &serde_json::json!({"text": "hello"}),
    )
    .unwrap();
    assert_eq!(envelope.event_type, topics::STT_TRANSCRIPT_CREATED);
    assert_eq!(envelope.event_version, 1);
    assert_eq!(envelope.session_id, "session-1");
    assert_eq!(envelope.device_id, "device-1");
    assert!(!envelope.event_id.is_empty());
    assert!(!envelope.trace_id.is_empty());
    assert!(envelope.causation_id.is_none());
    assert_eq!(envelope.payload["text"], "hello");
}

#[test]
fn with_cause_copies_trace_and_sets_causation() {
    let cause = EventEnvelope::new(
        topics::AUDIO_SEGMENT_CREATED,
        "session-1",
        "device-1",
        &serde_json::json!({}),
    )
    .unwrap();
    let downstream = EventEnvelope::new(
        topics::STT_TRANSCRIPT_CREATED,
        "session-1",
        "device-1",
        &serde_json::json!({}),
    )
    .unwrap()
    .with_cause(&cause);
    assert_eq!(downstream.trace_id, cause.trace_id);
    assert_eq!(downstream.causation_id.as_deref(), Some(cause.event_id.as_str()));
}

#[test]
fn envelope_roundtrips_through_canonical_json() {
    let mut envelope = EventEnvelope::new(
        topics::TREE_APPROVED,
        "session-1",
        "device-1",
        &serde_json::json!({"node_id": "node_abc", "branch_slot": 2}),
    )
    .unwrap();
    envelope.created_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 45).unwrap();

    let encoded = envelope.to_canonical_json().unwrap();
    let decoded = EventEnvelope::from_slice(encoded.as_bytes()).unwrap();

    assert_eq!(decoded.event_id, envelope.event_id);
    assert_eq!(decoded.event_type, envelope.event_type);
    assert_eq!(decoded.trace_id, envelope.trace_id);
    assert_eq!(decoded.session_id, envelope.session_id);
    assert_eq!(decoded.created_at, envelope.created_at);
    assert_eq!(decoded.created_at.timezone(), Utc);
    assert_eq!(decoded.payload, envelope.payload);
}

#[test]
fn typed_payload_decoding() {
    let envelope = EventEnvelope::new(
        topics::STT_TRANSCRIPT_CREATED,
        "session-1",
        "device-1",
        &TranscriptPayload {
            transcript_id: "transcript_1".into(),
            segment_id: "segment_1".into(),
            text: "hello".into(),
            confidence: 0.9,
        },
    )
    .unwrap();
    let payload: TranscriptPayload = envelope.payload().unwrap();
    assert_eq!(payload.segment_id, "segment_1");
    assert_eq!(payload.confidence, 0.9);
}

#[test]
fn frame_payload_defaults_apply() {
    let payload: AudioFramePayload = serde_json::from_value(serde_json::json!({
        "frame_seq": 7
    }))
    .unwrap();
    assert_eq!(payload.frame_seq, 7);
    assert_eq!(payload.encoding, "wav_pcm16");
    assert!(!payload.speech_final);
    assert!(payload.audio_b64.is_empty());
}

// ===========================================================================
// Canonical JSON
// ===========================================================================

#[test]
fn canonical_json_sorts_keys_and_compacts() {
    let value = serde_json::json!({"b": 1, "a": {"z": true, "y": [1, 2]}});
    assert_eq!(canonical_json(&value), r#"{"a":{"y":[1,2],"z":true},"b":1}"#);
}

#[test]
fn canonical_json_escapes_non_ascii() {
    let value = serde_json::json!({"text": "caf\u{e9} \u{1f600}"});
    let encoded = canonical_json(&value);
    assert!(encoded.is_ascii());
    assert_eq!(encoded, r#"{"text":"caf\u00e9 \ud83d\ude00"}"#);
}

#[test]
fn canonical_json_escapes_control_characters() {
    let value = serde_json::json!("line1\nline2\ttab\u{01}");
    assert_eq!(canonical_json(&value), r#""line1\nline2\ttab\u0001""#);
}

#[test]
fn to_canonical_json_handles_structs() {
    let payload = TranscriptPayload {
        transcript_id: "t".into(),
        segment_id: "s".into(),
        text: "x".into(),
        confidence: 1.0,
    };
    let encoded = to_canonical_json(&payload).unwrap();
    assert_eq!(
        encoded,
        r#"{"confidence":1.0,"segment_id":"s","text":"x","transcript_id":"t"}"#
    );
}

// ===========================================================================
// base64
// ===========================================================================

#[test]
fn b64_roundtrip() {
    let data = b"\x00\x01audio bytes\xff";
    let encoded = b64_encode(data);
    assert_eq!(b64_decode(&encoded).unwrap(), data);
}

#[test]
fn b64_decode_rejects_garbage() {
    assert!(b64_decode("not base64!!!").is_err());
}
