//! # Network connectivity
//!
//! Keeps the node's network link up. The default policy retries immediately
//! and never gives up; see [`supervisor::ConnectivitySupervisor`].

pub mod supervisor;

pub use supervisor::{ConnectivitySupervisor, LinkState, SupervisorMode};
