//! MindGraph Dashboard - read-only view over the store and agent heartbeats

pub mod server;
pub mod state;

pub use server::serve;
pub use state::DashboardState;
