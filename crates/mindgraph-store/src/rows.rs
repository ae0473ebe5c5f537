//! Row types returned by store queries

use chrono::{DateTime, Utc};
use mindgraph_core::graph::{BranchType, GraphNode};
use serde::Serialize;
use sqlx::FromRow;

use crate::store::StoreError;

/// A session joined with its per-session state row.
#[derive(Clone, Debug, Serialize, FromRow)]
pub struct SessionRow {
    pub session_id: String,
    pub device_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub current_main_tail_node_id: Option<String>,
    pub main_branch_summary: Option<String>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct TranscriptRow {
    pub transcript_id: String,
    pub segment_id: String,
    pub text: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct GraphNodeRow {
    pub node_id: String,
    pub transcript_id: String,
    pub parent_node_id: Option<String>,
    pub branch_type: String,
    pub branch_slot: Option<i16>,
    pub node_text: String,
    pub override_reason: String,
    pub created_at: DateTime<Utc>,
}

impl GraphNodeRow {
    /// Project onto the node shape the attachment rules operate on.
    pub fn to_rules_node(&self) -> Result<GraphNode, StoreError> {
        let branch_type: BranchType = self
            .branch_type
            .parse()
            .map_err(StoreError::Decode)?;
        Ok(GraphNode {
            node_id: self.node_id.clone(),
            parent_node_id: self.parent_node_id.clone(),
            branch_type,
            branch_slot: self.branch_slot,
            node_text: self.node_text.clone(),
            created_at: self.created_at,
        })
    }
}

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct SnapshotRow {
    pub snapshot_id: String,
    pub session_id: String,
    pub snapshot_bucket_ts: DateTime<Utc>,
    pub node_count: i64,
    pub hash_sha256: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn graph_node_row_projects_onto_rules_node() {
        let row = GraphNodeRow {
            node_id: "node_1".into(),
            transcript_id: "transcript_1".into(),
            parent_node_id: Some("root_1".into()),
            branch_type: "side".into(),
            branch_slot: Some(2),
            node_text: "hello".into(),
            override_reason: String::new(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        };
        let node = row.to_rules_node().unwrap();
        assert_eq!(node.branch_type, BranchType::Side);
        assert_eq!(node.branch_slot, Some(2));
    }

    #[test]
    fn unknown_branch_type_is_a_decode_error() {
        let row = GraphNodeRow {
            node_id: "node_1".into(),
            transcript_id: "transcript_1".into(),
            parent_node_id: None,
            branch_type: "trunk".into(),
            branch_slot: None,
            node_text: String::new(),
            override_reason: String::new(),
            created_at: Utc::now(),
        };
        assert!(row.to_rules_node().is_err());
    }
}
