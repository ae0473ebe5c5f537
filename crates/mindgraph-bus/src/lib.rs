//! MindGraph Bus - MQTT transport and heartbeat emission

pub mod heartbeat;
pub mod mqtt;

pub use heartbeat::HeartbeatPublisher;
pub use mqtt::{BusConnection, BusError, MqttBus};
