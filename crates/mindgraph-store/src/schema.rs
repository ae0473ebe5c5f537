//! Schema bootstrap
//!
//! Every uniqueness key the pipeline relies on for idempotency is declared
//! here: `sessions.session_id`, `session_state.session_id`,
//! `transcripts(session_id, segment_id)`, `graph_nodes.transcript_id`,
//! `snapshots(session_id, snapshot_bucket_ts)`.

pub const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        session_id TEXT PRIMARY KEY,
        device_id TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        stopped_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS session_state (
        session_id TEXT PRIMARY KEY REFERENCES sessions(session_id),
        current_main_tail_node_id TEXT,
        main_branch_summary TEXT NOT NULL DEFAULT '',
        last_snapshot_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transcripts (
        transcript_id TEXT PRIMARY KEY,
        event_id TEXT NOT NULL,
        session_id TEXT NOT NULL,
        device_id TEXT NOT NULL,
        segment_id TEXT NOT NULL,
        text TEXT NOT NULL,
        confidence DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (session_id, segment_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS graph_nodes (
        node_id TEXT PRIMARY KEY,
        event_id TEXT NOT NULL,
        session_id TEXT NOT NULL,
        transcript_id TEXT NOT NULL UNIQUE,
        parent_node_id TEXT,
        branch_type TEXT NOT NULL,
        branch_slot SMALLINT,
        node_text TEXT NOT NULL,
        override_reason TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS snapshots (
        snapshot_id TEXT PRIMARY KEY,
        event_id TEXT NOT NULL,
        session_id TEXT NOT NULL,
        snapshot_bucket_ts TIMESTAMPTZ NOT NULL,
        node_count BIGINT NOT NULL,
        hash_sha256 TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (session_id, snapshot_bucket_ts)
    )
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_keys_are_declared() {
        let schema = CREATE_TABLES.join("\n");
        assert!(schema.contains("UNIQUE (session_id, segment_id)"));
        assert!(schema.contains("transcript_id TEXT NOT NULL UNIQUE"));
        assert!(schema.contains("UNIQUE (session_id, snapshot_bucket_ts)"));
    }
}
