//! # Node runtime
//!
//! The composition root of a field node:
//!
//! - **NodeRuntime**: owns configuration, link, bus and portal, and steps them
//! - **Feature**: device-specific module driven by the runtime
//! - **NodeIdentity**: configured name plus hardware suffix
//!
//! ## Lifecycle
//!
//! 1. **Construction** - [`NodeRuntime::new`] with defaults and platform services
//! 2. **Setup** - stored configuration is merged, link and bus are brought up
//! 3. **Ticking** - [`NodeRuntime::tick`] is called repeatedly by the host
//! 4. **Restart** - once requested, the runtime stops and the host restarts it

pub mod feature;
pub mod identity;
pub mod runtime;

pub use feature::Feature;
pub use identity::{hardware_suffix, FirmwareInfo, NodeIdentity};
pub use runtime::{NodeRuntime, NodeStatus, RestartReason, MAX_INBOUND_PER_TICK, RESTART_DELAY};
