//! Graph attachment rules and snapshot fingerprinting
//!
//! Everything here is pure over a slice of [`GraphNode`]s. The writer agent
//! owns all mutation; these functions only decide where a node attaches and
//! what the resulting tree looks like.
//!
//! Structural invariants per session:
//! - exactly one `root` node with no parent
//! - at most one `main` child per parent
//! - side children occupy distinct slots from {1, 2}
//! - parent walks terminate at the root (no cycles)

use crate::codec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Maximum length of the stored main-branch summary.
pub const SUMMARY_MAX_CHARS: usize = 600;

/// How many tail texts the main-branch summary keeps.
const SUMMARY_TAIL_NODES: usize = 5;

/// Where a node sits relative to its parent.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
    Root,
    Main,
    Side,
}

impl BranchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchType::Root => "root",
            BranchType::Main => "main",
            BranchType::Side => "side",
        }
    }
}

impl std::str::FromStr for BranchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(BranchType::Root),
            "main" => Ok(BranchType::Main),
            "side" => Ok(BranchType::Side),
            other => Err(format!("unknown branch type: {}", other)),
        }
    }
}

/// The LLM's stated preference for where a continuation belongs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BranchPreference {
    Main,
    Side,
}

/// The projection of a graph node the attachment rules operate on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphNode {
    pub node_id: String,
    pub parent_node_id: Option<String>,
    pub branch_type: BranchType,
    pub branch_slot: Option<i16>,
    pub node_text: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`choose_attachment`]: the tree operation the writer applies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub parent_node_id: Option<String>,
    pub branch_type: BranchType,
    pub branch_slot: Option<i16>,
    pub override_reason: String,
}

impl Attachment {
    fn root(reason: &str) -> Self {
        Self {
            parent_node_id: None,
            branch_type: BranchType::Root,
            branch_slot: None,
            override_reason: reason.to_string(),
        }
    }
}

fn index_nodes(nodes: &[GraphNode]) -> HashMap<&str, &GraphNode> {
    nodes
        .iter()
        .map(|node| (node.node_id.as_str(), node))
        .collect()
}

/// (has a main child, occupied side slots) for one parent.
fn child_slots(nodes: &[GraphNode], parent_node_id: &str) -> (bool, Vec<i16>) {
    let mut has_main = false;
    let mut side_slots = Vec::new();
    for node in nodes {
        if node.parent_node_id.as_deref() != Some(parent_node_id) {
            continue;
        }
        match node.branch_type {
            BranchType::Main => has_main = true,
            BranchType::Side => {
                if let Some(slot @ (1 | 2)) = node.branch_slot {
                    side_slots.push(slot);
                }
            }
            BranchType::Root => {}
        }
    }
    side_slots.sort_unstable();
    (has_main, side_slots)
}

fn find_root(nodes: &[GraphNode]) -> Option<&GraphNode> {
    nodes
        .iter()
        .find(|node| node.branch_type == BranchType::Root)
}

/// Walk the unique chain of main children from the root; the last node
/// reached is the tail of the canonical narrative.
pub fn find_main_tail(nodes: &[GraphNode]) -> Option<String> {
    let root = find_root(nodes)?;
    let main_by_parent: HashMap<&str, &GraphNode> = nodes
        .iter()
        .filter(|node| node.branch_type == BranchType::Main)
        .filter_map(|node| Some((node.parent_node_id.as_deref()?, node)))
        .collect();
    let mut current = root.node_id.as_str();
    while let Some(child) = main_by_parent.get(current) {
        current = child.node_id.as_str();
    }
    Some(current.to_string())
}

fn main_branch_texts(nodes: &[GraphNode]) -> Vec<&str> {
    let Some(root) = find_root(nodes) else {
        return Vec::new();
    };
    let main_by_parent: HashMap<&str, &GraphNode> = nodes
        .iter()
        .filter(|node| node.branch_type == BranchType::Main)
        .filter_map(|node| Some((node.parent_node_id.as_deref()?, node)))
        .collect();
    let mut texts = vec![root.node_text.as_str()];
    let mut current = root.node_id.as_str();
    while let Some(child) = main_by_parent.get(current) {
        texts.push(child.node_text.as_str());
        current = child.node_id.as_str();
    }
    texts
}

/// Join the last five main-path texts with `" | "`, capped at 600 chars.
pub fn build_main_branch_summary(nodes: &[GraphNode]) -> String {
    let texts = main_branch_texts(nodes);
    let tail_start = texts.len().saturating_sub(SUMMARY_TAIL_NODES);
    let summary = texts[tail_start..].join(" | ");
    summary.chars().take(SUMMARY_MAX_CHARS).collect()
}

/// Would attaching under `parent_node_id` close a loop through `node_id`?
/// The new node is not in the index yet, so the walk checks its id directly.
fn would_create_cycle(
    nodes_by_id: &HashMap<&str, &GraphNode>,
    parent_node_id: &str,
    node_id: &str,
) -> bool {
    let mut current = Some(parent_node_id);
    while let Some(id) = current {
        if id == node_id {
            return true;
        }
        current = nodes_by_id
            .get(id)
            .and_then(|node| node.parent_node_id.as_deref());
    }
    false
}

/// Deterministic repair of an LLM attachment suggestion.
///
/// Precedence: empty graph wins, then unknown/cyclic parents are repaired to
/// the main tail, then to the root; a surviving parent takes a main child if
/// the preference asks for one and the slot is free, else the lowest free
/// side slot; a fully occupied parent falls back to the main tail as a main
/// child. `override_reason` records the first repair applied.
pub fn choose_attachment(
    nodes: &[GraphNode],
    candidate_parent_id: Option<&str>,
    branch_preference: BranchPreference,
    node_id: &str,
    current_main_tail_node_id: Option<&str>,
) -> Attachment {
    if nodes.is_empty() {
        return Attachment::root("root_node");
    }

    let nodes_by_id = index_nodes(nodes);
    let computed_tail;
    let main_tail: Option<&str> = match current_main_tail_node_id {
        Some(tail) => Some(tail),
        None => {
            computed_tail = find_main_tail(nodes);
            computed_tail.as_deref()
        }
    };
    let mut override_reason = "";

    let mut parent_id = candidate_parent_id;
    let candidate_usable = matches!(
        parent_id,
        Some(id) if nodes_by_id.contains_key(id) && !would_create_cycle(&nodes_by_id, id, node_id)
    );
    if !candidate_usable {
        parent_id = main_tail;
        override_reason = "parent_repaired";
    }

    if !matches!(parent_id, Some(id) if nodes_by_id.contains_key(id)) {
        parent_id = find_root(nodes).map(|root| root.node_id.as_str());
        override_reason = "fallback_root";
    }

    let Some(parent_id) = parent_id else {
        return Attachment::root("recovered_root");
    };

    let (has_main, side_slots) = child_slots(nodes, parent_id);
    if branch_preference == BranchPreference::Main && !has_main {
        return Attachment {
            parent_node_id: Some(parent_id.to_string()),
            branch_type: BranchType::Main,
            branch_slot: None,
            override_reason: override_reason.to_string(),
        };
    }

    for slot in [1, 2] {
        if !side_slots.contains(&slot) {
            let reason = if !override_reason.is_empty() {
                override_reason
            } else if branch_preference != BranchPreference::Side {
                "branch_repaired_to_side"
            } else {
                ""
            };
            return Attachment {
                parent_node_id: Some(parent_id.to_string()),
                branch_type: BranchType::Side,
                branch_slot: Some(slot),
                override_reason: reason.to_string(),
            };
        }
    }

    // Both side slots and the main slot are taken: climb to the main tail.
    let fallback_parent = match main_tail {
        Some(tail) if nodes_by_id.contains_key(tail) => tail,
        _ => parent_id,
    };
    Attachment {
        parent_node_id: Some(fallback_parent.to_string()),
        branch_type: BranchType::Main,
        branch_slot: None,
        override_reason: if override_reason.is_empty() {
            "parent_full_fallback_main_tail".to_string()
        } else {
            override_reason.to_string()
        },
    }
}

/// SHA-256 fingerprint of a node list, invariant under input permutation.
///
/// Nodes are sorted on `(created_at, node_id)`, projected to their structural
/// fields, and encoded in canonical JSON before hashing.
pub fn snapshot_hash(nodes: &[GraphNode]) -> String {
    let mut sorted: Vec<&GraphNode> = nodes.iter().collect();
    sorted.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    let normalized: Vec<serde_json::Value> = sorted
        .into_iter()
        .map(|node| {
            serde_json::json!({
                "node_id": node.node_id,
                "parent_node_id": node.parent_node_id,
                "branch_type": node.branch_type,
                "branch_slot": node.branch_slot,
                "node_text": node.node_text,
            })
        })
        .collect();
    let encoded = codec::canonical_json(&serde_json::Value::Array(normalized));
    let digest = Sha256::digest(encoded.as_bytes());
    format!("{:x}", digest)
}
