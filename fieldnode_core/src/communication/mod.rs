//! # Message-bus layer
//!
//! - **Topics**: the node's namespace and the fixed command sentinels
//! - **Reconnect**: retry timing shared by the bus and the network link
//! - **Router**: client ownership, availability handshake and command dispatch
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fieldnode_core::communication::{MessageBusRouter, TopicNamespace};
//!
//! let mut router = MessageBusRouter::new(client);
//! router.configure("relay_a0b1c2d3e4f5", bus_config, TopicNamespace::new("relay_a0b1c2d3e4f5", ""));
//! if router.maintain_connection(clock.now()) {
//!     router.publish_availability(false, &debug, &mut registry);
//! }
//! ```

pub mod message;
pub mod reconnect;
pub mod router;
pub mod topics;

pub use message::Message;
pub use reconnect::{ConnectionHealth, RetryStrategy, RetryTimer, BUS_RETRY_DELAY};
pub use router::{Availability, BusContext, BusState, MessageBusRouter, RebootRequest};
pub use topics::{on_off_payload, TopicNamespace, SHARED_TOPIC_BASE};
