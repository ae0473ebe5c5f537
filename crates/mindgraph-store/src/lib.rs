//! MindGraph Store - Postgres persistence for sessions, transcripts, nodes, snapshots

pub mod rows;
pub mod schema;
pub mod store;

pub use rows::*;
pub use store::{MindGraphStore, NewGraphNode, NewSnapshot, NewTranscript, StoreError};
