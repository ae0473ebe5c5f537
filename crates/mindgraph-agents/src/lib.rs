//! MindGraph Agents - the seven pipeline agents
//!
//! Each agent follows the same shape: connect the bus with its subscription
//! list, start the heartbeat ticker, then drain the delivery channel until
//! shutdown. Per-event failures are logged and surrendered to QoS-1
//! redelivery; only unrecoverable conditions (broker connect timeout, STT
//! exhaustion) propagate out of `run` so the supervisor restarts the
//! process.

pub mod consistency;
pub mod frame_aggregator;
pub mod graph_writer;
pub mod llm_orchestrator;
pub mod session_controller;
pub mod snapshot;
pub mod stt;
