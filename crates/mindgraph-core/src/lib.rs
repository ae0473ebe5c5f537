//! MindGraph Core - envelopes, graph rules, canonical serialization

pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod ids;

pub use config::Settings;
pub use error::{Error, Result};
pub use events::*;
pub use graph::*;
