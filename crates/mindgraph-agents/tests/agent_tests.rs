//! Tests for the agents' pure decision logic: frame buffering, timestamp
//! parsing, snapshot bucketing

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use mindgraph_agents::frame_aggregator::FrameBook;
use mindgraph_agents::session_controller::parse_timestamp;
use mindgraph_agents::snapshot::floor_bucket;
use mindgraph_core::codec::{b64_decode, b64_encode};
use mindgraph_core::AudioFramePayload;
use std::time::Duration;

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(seconds)
}

fn frame(seq: u64, audio: &[u8], speech_final: bool) -> AudioFramePayload {
    AudioFramePayload {
        frame_seq: seq,
        frame_ms: 20,
        encoding: "wav_pcm16".to_string(),
        vad_active: true,
        speech_final,
        audio_b64: b64_encode(audio),
    }
}

// ===========================================================================
// FrameBook
// ===========================================================================

#[test]
fn speech_final_flushes_buffered_audio() {
    let book = FrameBook::new();
    assert!(book
        .accept("s1", "d1", at(0), &frame(1, b"aa", false))
        .unwrap()
        .is_none());
    let segment = book
        .accept("s1", "d1", at(1), &frame(2, b"bb", true))
        .unwrap()
        .expect("speech_final should flush");
    assert_eq!(segment.session_id, "s1");
    assert_eq!(segment.bytes, b"aabb");
    assert_eq!(segment.started_at, at(0));
    assert_eq!(segment.ended_at, at(1));
}

#[test]
fn duplicate_frame_seq_appends_once() {
    let book = FrameBook::new();
    book.accept("s1", "d1", at(0), &frame(1, b"aa", false))
        .unwrap();
    // Redelivered frame: same seq, same bytes. Must not append again.
    assert!(book
        .accept("s1", "d1", at(1), &frame(1, b"aa", false))
        .unwrap()
        .is_none());
    let segment = book
        .accept("s1", "d1", at(2), &frame(2, b"", true))
        .unwrap()
        .expect("flush");
    let payload = segment.into_payload();
    assert_eq!(b64_decode(&payload.audio_b64).unwrap(), b"aa");
}

#[test]
fn duplicate_speech_final_does_not_flush() {
    let book = FrameBook::new();
    book.accept("s1", "d1", at(0), &frame(1, b"aa", false))
        .unwrap();
    // A duplicate is discarded before the flush check even runs.
    assert!(book
        .accept("s1", "d1", at(1), &frame(1, b"aa", true))
        .unwrap()
        .is_none());
}

#[test]
fn speech_final_on_empty_buffer_does_not_flush() {
    let book = FrameBook::new();
    assert!(book
        .accept("s1", "d1", at(0), &frame(1, b"", true))
        .unwrap()
        .is_none());
}

#[test]
fn buffers_are_keyed_per_session_and_device() {
    let book = FrameBook::new();
    book.accept("s1", "d1", at(0), &frame(1, b"aa", false))
        .unwrap();
    book.accept("s1", "d2", at(0), &frame(1, b"bb", false))
        .unwrap();
    let segment = book
        .accept("s1", "d1", at(1), &frame(2, b"", true))
        .unwrap()
        .unwrap();
    assert_eq!(segment.bytes, b"aa");
    assert!(book.flush("s1", "d2").is_some());
}

#[test]
fn flush_removes_the_buffer() {
    let book = FrameBook::new();
    book.accept("s1", "d1", at(0), &frame(1, b"aa", false))
        .unwrap();
    assert!(book.flush("s1", "d1").is_some());
    assert!(book.flush("s1", "d1").is_none());
}

#[test]
fn frames_after_flush_start_a_fresh_buffer() {
    let book = FrameBook::new();
    book.accept("s1", "d1", at(0), &frame(1, b"aa", false))
        .unwrap();
    book.flush("s1", "d1").unwrap();
    // Same seq as before the flush: accepted, seqs are per-utterance.
    let segment = book
        .accept("s1", "d1", at(5), &frame(1, b"cc", true))
        .unwrap()
        .unwrap();
    assert_eq!(segment.bytes, b"cc");
}

#[test]
fn silence_timeout_expires_idle_buffers() {
    let book = FrameBook::new();
    book.accept("s1", "d1", at(0), &frame(1, b"aa", false))
        .unwrap();
    book.accept("s2", "d1", at(9), &frame(1, b"bb", false))
        .unwrap();
    let expired = book.take_expired(at(10), Duration::from_secs_f64(1.2));
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].session_id, "s1");
    // The expired buffer is gone; the fresh one remains.
    assert!(book.flush("s1", "d1").is_none());
    assert!(book.flush("s2", "d1").is_some());
}

#[test]
fn segment_payload_roundtrips_audio() {
    let book = FrameBook::new();
    book.accept("s1", "d1", at(0), &frame(1, b"hello ", false))
        .unwrap();
    let segment = book
        .accept("s1", "d1", at(1), &frame(2, b"world", true))
        .unwrap()
        .unwrap();
    let payload = segment.into_payload();
    assert!(payload.segment_id.starts_with("segment_"));
    assert_eq!(b64_decode(&payload.audio_b64).unwrap(), b"hello world");
}

// ===========================================================================
// Session controller timestamp parsing
// ===========================================================================

#[test]
fn parse_timestamp_accepts_rfc3339_with_offset() {
    let fallback = at(0);
    let parsed = parse_timestamp(Some("2026-03-01T00:01:00+00:00"), fallback);
    assert_eq!(parsed, at(60));
}

#[test]
fn parse_timestamp_accepts_zulu_suffix() {
    let parsed = parse_timestamp(Some("2026-03-01T00:01:00Z"), at(0));
    assert_eq!(parsed, at(60));
}

#[test]
fn parse_timestamp_falls_back_when_missing_or_invalid() {
    assert_eq!(parse_timestamp(None, at(7)), at(7));
    assert_eq!(parse_timestamp(Some("not a time"), at(7)), at(7));
}

// ===========================================================================
// Snapshot bucketing
// ===========================================================================

#[test]
fn floor_bucket_quantizes_onto_the_grid() {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 17).unwrap();
    let bucket = floor_bucket(now, 10.0);
    assert_eq!(bucket, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 10).unwrap());
}

#[test]
fn floor_bucket_is_identity_on_grid_points() {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 20).unwrap();
    assert_eq!(floor_bucket(now, 10.0), now);
}

#[test]
fn floor_bucket_is_stable_within_a_bucket() {
    let a = floor_bucket(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 11).unwrap(), 10.0);
    let b = floor_bucket(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 19).unwrap(), 10.0);
    assert_eq!(a, b);
}
