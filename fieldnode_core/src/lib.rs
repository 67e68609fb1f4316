//! # Fieldnode Core
//!
//! The shared runtime for small network-connected control nodes (buttons,
//! sensors, relays, ventilation actuators). Each device variant adds its own
//! feature logic on top of this crate, which provides:
//!
//! - **Connectivity**: network link supervision with a cooperative retry policy
//! - **Communication**: message-bus client ownership, reconnect timer, built-in
//!   command handling and the availability handshake
//! - **Configuration**: one persisted JSON record with partial-merge loading
//! - **Callbacks**: bounded extension slots for save, availability and message events
//! - **Portal**: a minimal web configuration portal with registered feature pages
//!
//! Everything runs from a single cooperative control flow: the host calls
//! [`NodeRuntime::tick`] once per iteration and each component advances one step.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fieldnode_core::{FirmwareInfo, NodeConfig, NodeRuntime, NodeStatus};
//!
//! let mut node = NodeRuntime::new(
//!     FirmwareInfo::new("esp-relay", "1.0"),
//!     NodeConfig::new("relay"),
//!     platform,
//! );
//! node.setup();
//! node.register_message_callback(|bus, msg| {
//!     bus.send(&bus.node_topic("state"), &msg.payload);
//!     Ok(())
//! })?;
//!
//! while let NodeStatus::Running = node.tick() {}
//! ```

pub mod callbacks;
pub mod communication;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod platform;
pub mod portal;

// Re-export commonly used types for easy access
pub use crate::core::{Feature, FirmwareInfo, NodeIdentity, NodeRuntime, NodeStatus, RestartReason};
pub use callbacks::{CallbackKind, CallbackRegistry};
pub use communication::{BusContext, Message, MessageBusRouter, TopicNamespace};
pub use config::{ConfigStore, NodeConfig, OpenMode};
pub use error::{NodeError, NodeResult};
pub use network::ConnectivitySupervisor;
pub use platform::Platform;
pub use portal::{ConfigPortal, PortalContext, PortalRequest};
