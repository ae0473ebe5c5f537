//! Identifier helpers

use uuid::Uuid;

/// Fresh UUIDv4 string, used for event and trace ids.
pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Prefixed short id for domain entities, e.g. `segment_3fa9c1d2e07b`.
pub fn new_entity_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ids_carry_prefix_and_are_unique() {
        let a = new_entity_id("node");
        let b = new_entity_id("node");
        assert!(a.starts_with("node_"));
        assert_eq!(a.len(), "node_".len() + 12);
        assert_ne!(a, b);
    }
}
