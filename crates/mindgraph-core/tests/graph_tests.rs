//! Contract tests for the attachment rules, summaries, and snapshot hashing

use chrono::{Duration, TimeZone, Utc};
use mindgraph_core::graph::*;

fn make_node(
    node_id: &str,
    parent_node_id: Option<&str>,
    branch_type: BranchType,
    branch_slot: Option<i16>,
    node_text: &str,
    created_offset: i64,
) -> GraphNode {
    GraphNode {
        node_id: node_id.to_string(),
        parent_node_id: parent_node_id.map(String::from),
        branch_type,
        branch_slot,
        node_text: if node_text.is_empty() {
            node_id.to_string()
        } else {
            node_text.to_string()
        },
        created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
            + Duration::seconds(created_offset),
    }
}

fn root() -> GraphNode {
    make_node("root", None, BranchType::Root, None, "", 0)
}

// ===========================================================================
// choose_attachment — repair rules
// ===========================================================================

#[test]
fn empty_graph_attaches_as_root() {
    let result = choose_attachment(&[], None, BranchPreference::Main, "node-1", None);
    assert_eq!(result.branch_type, BranchType::Root);
    assert!(result.parent_node_id.is_none());
    assert!(result.branch_slot.is_none());
    assert_eq!(result.override_reason, "root_node");
}

#[test]
fn prefers_main_when_slot_is_free() {
    let nodes = vec![root()];
    let result = choose_attachment(
        &nodes,
        Some("root"),
        BranchPreference::Main,
        "node-1",
        Some("root"),
    );
    assert_eq!(result.branch_type, BranchType::Main);
    assert_eq!(result.parent_node_id.as_deref(), Some("root"));
    assert!(result.branch_slot.is_none());
    assert_eq!(result.override_reason, "");
}

#[test]
fn repairs_to_side_when_main_already_taken() {
    let nodes = vec![
        root(),
        make_node("main-1", Some("root"), BranchType::Main, None, "", 1),
    ];
    let result = choose_attachment(
        &nodes,
        Some("root"),
        BranchPreference::Main,
        "node-2",
        Some("main-1"),
    );
    assert_eq!(result.branch_type, BranchType::Side);
    assert_eq!(result.branch_slot, Some(1));
    assert_eq!(result.override_reason, "branch_repaired_to_side");
}

#[test]
fn side_preference_takes_free_slot_without_override() {
    let nodes = vec![root()];
    let result = choose_attachment(
        &nodes,
        Some("root"),
        BranchPreference::Side,
        "node-1",
        Some("root"),
    );
    assert_eq!(result.branch_type, BranchType::Side);
    assert_eq!(result.branch_slot, Some(1));
    assert_eq!(result.override_reason, "");
}

#[test]
fn side_slots_fill_one_before_two() {
    let nodes = vec![
        root(),
        make_node("side-1", Some("root"), BranchType::Side, Some(1), "", 1),
    ];
    let result = choose_attachment(
        &nodes,
        Some("root"),
        BranchPreference::Side,
        "node-2",
        Some("root"),
    );
    assert_eq!(result.branch_slot, Some(2));
}

#[test]
fn repairs_unknown_parent_to_main_tail() {
    let nodes = vec![
        root(),
        make_node("main-1", Some("root"), BranchType::Main, None, "", 1),
    ];
    let result = choose_attachment(
        &nodes,
        Some("missing"),
        BranchPreference::Main,
        "node-3",
        Some("main-1"),
    );
    assert_eq!(result.parent_node_id.as_deref(), Some("main-1"));
    assert_eq!(result.override_reason, "parent_repaired");
}

#[test]
fn repairs_missing_candidate_to_main_tail() {
    let nodes = vec![
        root(),
        make_node("main-1", Some("root"), BranchType::Main, None, "", 1),
    ];
    let result = choose_attachment(&nodes, None, BranchPreference::Main, "node-3", None);
    assert_eq!(result.parent_node_id.as_deref(), Some("main-1"));
    assert_eq!(result.override_reason, "parent_repaired");
}

#[test]
fn repairs_cycle_creating_parent() {
    // The candidate parent is the node being attached: walking ancestors from
    // it reaches node_id immediately.
    let nodes = vec![
        root(),
        make_node("main-1", Some("root"), BranchType::Main, None, "", 1),
    ];
    let result = choose_attachment(
        &nodes,
        Some("node-4"),
        BranchPreference::Main,
        "node-4",
        Some("main-1"),
    );
    assert_eq!(result.parent_node_id.as_deref(), Some("main-1"));
    assert_eq!(result.override_reason, "parent_repaired");
}

#[test]
fn falls_back_to_root_when_tail_is_unknown() {
    let nodes = vec![root()];
    let result = choose_attachment(
        &nodes,
        Some("missing"),
        BranchPreference::Main,
        "node-1",
        Some("also-missing"),
    );
    assert_eq!(result.parent_node_id.as_deref(), Some("root"));
    assert_eq!(result.override_reason, "fallback_root");
}

#[test]
fn recovers_root_when_graph_has_none() {
    // A node list with no root node at all: nothing to repair toward.
    let nodes = vec![make_node(
        "orphan",
        None,
        BranchType::Main,
        None,
        "",
        0,
    )];
    let result = choose_attachment(&nodes, None, BranchPreference::Main, "node-1", None);
    assert_eq!(result.branch_type, BranchType::Root);
    assert!(result.parent_node_id.is_none());
    assert_eq!(result.override_reason, "recovered_root");
}

#[test]
fn full_parent_falls_back_to_main_tail_as_main() {
    let nodes = vec![
        root(),
        make_node("main-1", Some("root"), BranchType::Main, None, "", 1),
        make_node("side-1", Some("root"), BranchType::Side, Some(1), "", 2),
        make_node("side-2", Some("root"), BranchType::Side, Some(2), "", 3),
    ];
    let result = choose_attachment(
        &nodes,
        Some("root"),
        BranchPreference::Main,
        "node-5",
        Some("main-1"),
    );
    assert_eq!(result.parent_node_id.as_deref(), Some("main-1"));
    assert_eq!(result.branch_type, BranchType::Main);
    assert_eq!(result.override_reason, "parent_full_fallback_main_tail");
}

#[test]
fn attachment_outcomes_preserve_slot_rules() {
    // Whatever the input, root/main carry no slot and side carries 1 or 2.
    let nodes = vec![
        root(),
        make_node("main-1", Some("root"), BranchType::Main, None, "", 1),
        make_node("side-1", Some("root"), BranchType::Side, Some(1), "", 2),
    ];
    let candidates = [None, Some("root"), Some("main-1"), Some("missing")];
    let preferences = [BranchPreference::Main, BranchPreference::Side];
    for candidate in candidates {
        for preference in preferences {
            let result = choose_attachment(&nodes, candidate, preference, "new", Some("main-1"));
            match result.branch_type {
                BranchType::Side => assert!(matches!(result.branch_slot, Some(1 | 2))),
                _ => assert!(result.branch_slot.is_none()),
            }
        }
    }
}

// ===========================================================================
// main tail and summary
// ===========================================================================

#[test]
fn summary_uses_latest_five_main_nodes() {
    let nodes = vec![
        make_node("root", None, BranchType::Root, None, "root", 0),
        make_node("n1", Some("root"), BranchType::Main, None, "one", 1),
        make_node("n2", Some("n1"), BranchType::Main, None, "two", 2),
        make_node("n3", Some("n2"), BranchType::Main, None, "three", 3),
        make_node("n4", Some("n3"), BranchType::Main, None, "four", 4),
        make_node("n5", Some("n4"), BranchType::Main, None, "five", 5),
    ];
    assert_eq!(find_main_tail(&nodes).as_deref(), Some("n5"));
    assert_eq!(
        build_main_branch_summary(&nodes),
        "one | two | three | four | five"
    );
}

#[test]
fn summary_ignores_side_branches() {
    let nodes = vec![
        make_node("root", None, BranchType::Root, None, "root", 0),
        make_node("n1", Some("root"), BranchType::Main, None, "one", 1),
        make_node("s1", Some("root"), BranchType::Side, Some(1), "noise", 2),
    ];
    assert_eq!(find_main_tail(&nodes).as_deref(), Some("n1"));
    assert_eq!(build_main_branch_summary(&nodes), "root | one");
}

#[test]
fn summary_is_capped_at_600_chars() {
    let long = "x".repeat(400);
    let nodes = vec![
        make_node("root", None, BranchType::Root, None, &long, 0),
        make_node("n1", Some("root"), BranchType::Main, None, &long, 1),
    ];
    let summary = build_main_branch_summary(&nodes);
    assert_eq!(summary.chars().count(), 600);
}

#[test]
fn main_tail_is_none_without_root() {
    assert!(find_main_tail(&[]).is_none());
    let nodes = vec![make_node("n1", None, BranchType::Main, None, "", 0)];
    assert!(find_main_tail(&nodes).is_none());
}

// ===========================================================================
// snapshot hashing
// ===========================================================================

#[test]
fn snapshot_hash_is_permutation_invariant() {
    let nodes = vec![
        make_node("root", None, BranchType::Root, None, "root", 0),
        make_node("n1", Some("root"), BranchType::Main, None, "one", 1),
    ];
    let reversed: Vec<GraphNode> = nodes.iter().rev().cloned().collect();
    assert_eq!(snapshot_hash(&nodes), snapshot_hash(&reversed));
}

#[test]
fn snapshot_hash_changes_with_structure() {
    let a = vec![
        make_node("root", None, BranchType::Root, None, "root", 0),
        make_node("n1", Some("root"), BranchType::Main, None, "one", 1),
    ];
    let b = vec![
        make_node("root", None, BranchType::Root, None, "root", 0),
        make_node("n1", Some("root"), BranchType::Side, Some(1), "one", 1),
    ];
    assert_ne!(snapshot_hash(&a), snapshot_hash(&b));
}

#[test]
fn snapshot_hash_ties_break_on_node_id() {
    // Two nodes sharing created_at still hash deterministically.
    let a = vec![
        make_node("root", None, BranchType::Root, None, "root", 0),
        make_node("a", Some("root"), BranchType::Main, None, "x", 5),
        make_node("b", Some("a"), BranchType::Main, None, "y", 5),
    ];
    let mut shuffled = a.clone();
    shuffled.swap(1, 2);
    assert_eq!(snapshot_hash(&a), snapshot_hash(&shuffled));
}

#[test]
fn snapshot_hash_of_empty_graph_is_stable() {
    assert_eq!(snapshot_hash(&[]), snapshot_hash(&[]));
    assert_eq!(snapshot_hash(&[]).len(), 64);
}
