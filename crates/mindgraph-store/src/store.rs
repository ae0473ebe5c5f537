//! The Postgres adapter
//!
//! Every public method is one auto-commit unit of work: acquire from the
//! pool, run one logical operation, return. No transaction spans events;
//! idempotency lives in the uniqueness keys plus `ON CONFLICT` clauses, and
//! each insert reports through its `bool` return whether it actually landed.

use crate::rows::{GraphNodeRow, SessionRow, SnapshotRow, TranscriptRow};
use crate::schema::CREATE_TABLES;
use chrono::{DateTime, Utc};
use mindgraph_core::graph::GraphNode;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("row decode error: {0}")]
    Decode(String),
}

type Result<T> = std::result::Result<T, StoreError>;

/// A transcript to insert, keyed for idempotency on `(session_id, segment_id)`.
#[derive(Clone, Debug)]
pub struct NewTranscript {
    pub transcript_id: String,
    pub event_id: String,
    pub session_id: String,
    pub device_id: String,
    pub segment_id: String,
    pub text: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// A graph node to insert, keyed for idempotency on `transcript_id`.
#[derive(Clone, Debug)]
pub struct NewGraphNode {
    pub node_id: String,
    pub event_id: String,
    pub session_id: String,
    pub transcript_id: String,
    pub parent_node_id: Option<String>,
    pub branch_type: String,
    pub branch_slot: Option<i16>,
    pub node_text: String,
    pub override_reason: String,
    pub created_at: DateTime<Utc>,
}

/// A snapshot to upsert, keyed on `(session_id, snapshot_bucket_ts)`.
#[derive(Clone, Debug)]
pub struct NewSnapshot {
    pub snapshot_id: String,
    pub event_id: String,
    pub session_id: String,
    pub snapshot_bucket_ts: DateTime<Utc>,
    pub node_count: i64,
    pub hash_sha256: String,
    pub created_at: DateTime<Utc>,
}

const SESSION_COLUMNS: &str = "s.session_id, s.device_id, s.status, s.started_at, s.stopped_at, \
     s.updated_at, ss.current_main_tail_node_id, ss.main_branch_summary, ss.last_snapshot_at";

#[derive(Clone)]
pub struct MindGraphStore {
    pool: PgPool,
}

impl MindGraphStore {
    /// Connect a lazy pool against the DSN. Connections are established on
    /// first use, so constructing the store never blocks on the database.
    pub fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(5).connect_lazy(dsn)?;
        Ok(Self { pool })
    }

    pub async fn ping(&self) -> Result<bool> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }

    /// Create the tables and uniqueness constraints if absent.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in CREATE_TABLES {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Mark a session active. The upsert fires only when the previous status
    /// was not already active: it keeps the earliest `started_at`, clears
    /// `stopped_at`, and rebinds `device_id` to the starting device. The
    /// per-session state row is created lazily alongside. Returns whether a
    /// transition actually happened.
    pub async fn start_session(
        &self,
        session_id: &str,
        device_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let transitioned = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO sessions (session_id, device_id, status, started_at, updated_at)
            VALUES ($1, $2, 'active', $3, NOW())
            ON CONFLICT (session_id) DO UPDATE
            SET status = 'active',
                device_id = EXCLUDED.device_id,
                started_at = LEAST(sessions.started_at, EXCLUDED.started_at),
                stopped_at = NULL,
                updated_at = NOW()
            WHERE sessions.status <> 'active'
            RETURNING session_id
            "#,
        )
        .bind(session_id)
        .bind(device_id)
        .bind(started_at)
        .fetch_optional(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO session_state (session_id)
            VALUES ($1)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(transitioned.is_some())
    }

    /// Mark a session stopped; a no-op when it already is.
    pub async fn stop_session(
        &self,
        session_id: &str,
        stopped_at: DateTime<Utc>,
    ) -> Result<bool> {
        let transitioned = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE sessions
            SET status = 'stopped', stopped_at = $1, updated_at = NOW()
            WHERE session_id = $2 AND status <> 'stopped'
            RETURNING session_id
            "#,
        )
        .bind(stopped_at)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(transitioned.is_some())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRow>> {
        let query = format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions s
            LEFT JOIN session_state ss ON ss.session_id = s.session_id
            WHERE s.session_id = $1
            "#,
        );
        Ok(sqlx::query_as(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_sessions(&self, limit: i64) -> Result<Vec<SessionRow>> {
        let query = format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions s
            LEFT JOIN session_state ss ON ss.session_id = s.session_id
            ORDER BY s.updated_at DESC
            LIMIT $1
            "#,
        );
        Ok(sqlx::query_as(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn list_active_sessions(&self) -> Result<Vec<SessionRow>> {
        let query = format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM sessions s
            LEFT JOIN session_state ss ON ss.session_id = s.session_id
            WHERE s.status = 'active'
            ORDER BY s.updated_at DESC
            "#,
        );
        Ok(sqlx::query_as(&query).fetch_all(&self.pool).await?)
    }

    // -----------------------------------------------------------------------
    // Transcripts
    // -----------------------------------------------------------------------

    /// Idempotent insert; returns false when the segment was already seen.
    pub async fn insert_transcript(&self, transcript: &NewTranscript) -> Result<bool> {
        let inserted = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO transcripts (
                transcript_id, event_id, session_id, device_id, segment_id, text, confidence, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT DO NOTHING
            RETURNING transcript_id
            "#,
        )
        .bind(&transcript.transcript_id)
        .bind(&transcript.event_id)
        .bind(&transcript.session_id)
        .bind(&transcript.device_id)
        .bind(&transcript.segment_id)
        .bind(&transcript.text)
        .bind(transcript.confidence)
        .bind(transcript.created_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted.is_some())
    }

    pub async fn latest_transcripts(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<TranscriptRow>> {
        Ok(sqlx::query_as(
            r#"
            SELECT transcript_id, segment_id, text, confidence, created_at
            FROM transcripts
            WHERE session_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    // -----------------------------------------------------------------------
    // Graph nodes
    // -----------------------------------------------------------------------

    pub async fn fetch_recent_nodes(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<GraphNodeRow>> {
        Ok(sqlx::query_as(
            r#"
            SELECT node_id, transcript_id, parent_node_id, branch_type, branch_slot,
                   node_text, override_reason, created_at
            FROM graph_nodes
            WHERE session_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn fetch_all_nodes(&self, session_id: &str) -> Result<Vec<GraphNodeRow>> {
        Ok(sqlx::query_as(
            r#"
            SELECT node_id, transcript_id, parent_node_id, branch_type, branch_slot,
                   node_text, override_reason, created_at
            FROM graph_nodes
            WHERE session_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Fetch the full node list already projected for the attachment rules.
    pub async fn fetch_rules_nodes(&self, session_id: &str) -> Result<Vec<GraphNode>> {
        self.fetch_all_nodes(session_id)
            .await?
            .iter()
            .map(GraphNodeRow::to_rules_node)
            .collect()
    }

    /// Idempotent insert; false means this transcript already has a node.
    pub async fn insert_graph_node(&self, node: &NewGraphNode) -> Result<bool> {
        let inserted = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO graph_nodes (
                node_id, event_id, session_id, transcript_id, parent_node_id,
                branch_type, branch_slot, node_text, override_reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT DO NOTHING
            RETURNING node_id
            "#,
        )
        .bind(&node.node_id)
        .bind(&node.event_id)
        .bind(&node.session_id)
        .bind(&node.transcript_id)
        .bind(&node.parent_node_id)
        .bind(&node.branch_type)
        .bind(node.branch_slot)
        .bind(&node.node_text)
        .bind(&node.override_reason)
        .bind(node.created_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted.is_some())
    }

    // -----------------------------------------------------------------------
    // Session state
    // -----------------------------------------------------------------------

    pub async fn update_session_state(
        &self,
        session_id: &str,
        current_main_tail_node_id: Option<&str>,
        main_branch_summary: &str,
        last_snapshot_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_state (session_id, current_main_tail_node_id, main_branch_summary, last_snapshot_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (session_id) DO UPDATE
            SET current_main_tail_node_id = EXCLUDED.current_main_tail_node_id,
                main_branch_summary = EXCLUDED.main_branch_summary,
                last_snapshot_at = COALESCE(EXCLUDED.last_snapshot_at, session_state.last_snapshot_at),
                updated_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(current_main_tail_node_id)
        .bind(main_branch_summary)
        .bind(last_snapshot_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_snapshot_time(&self, session_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE session_state
            SET last_snapshot_at = $1, updated_at = NOW()
            WHERE session_id = $2
            "#,
        )
        .bind(at)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Upsert keyed on `(session_id, snapshot_bucket_ts)`; the update fires
    /// only when the fingerprint or node count changed within the bucket.
    /// Returns whether anything was stored.
    pub async fn store_snapshot(&self, snapshot: &NewSnapshot) -> Result<bool> {
        let stored = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO snapshots (
                snapshot_id, event_id, session_id, snapshot_bucket_ts, node_count, hash_sha256, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_id, snapshot_bucket_ts) DO UPDATE
            SET snapshot_id = EXCLUDED.snapshot_id,
                event_id = EXCLUDED.event_id,
                node_count = EXCLUDED.node_count,
                hash_sha256 = EXCLUDED.hash_sha256,
                created_at = EXCLUDED.created_at,
                inserted_at = NOW()
            WHERE snapshots.node_count <> EXCLUDED.node_count
                OR snapshots.hash_sha256 <> EXCLUDED.hash_sha256
            RETURNING snapshot_id
            "#,
        )
        .bind(&snapshot.snapshot_id)
        .bind(&snapshot.event_id)
        .bind(&snapshot.session_id)
        .bind(snapshot.snapshot_bucket_ts)
        .bind(snapshot.node_count)
        .bind(&snapshot.hash_sha256)
        .bind(snapshot.created_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stored.is_some())
    }

    pub async fn latest_snapshot(&self, session_id: Option<&str>) -> Result<Option<SnapshotRow>> {
        let row = match session_id {
            Some(session_id) => {
                sqlx::query_as(
                    r#"
                    SELECT snapshot_id, session_id, snapshot_bucket_ts, node_count, hash_sha256, created_at
                    FROM snapshots
                    WHERE session_id = $1
                    ORDER BY created_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT snapshot_id, session_id, snapshot_bucket_ts, node_count, hash_sha256, created_at
                    FROM snapshots
                    ORDER BY created_at DESC
                    LIMIT 1
                    "#,
                )
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(row)
    }
}
