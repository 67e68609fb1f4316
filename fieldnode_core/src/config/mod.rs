//! # Node configuration
//!
//! One [`NodeConfig`] context lives in memory; [`ConfigStore`] persists it as a
//! flat JSON document and merges partial documents over defaults on load.

pub mod record;
pub mod store;

pub use record::{
    sanitize_node_name, AccessCredential, BusConfig, ConfigDocument, DebugConfig, NodeConfig,
    DEFAULT_BUS_PORT, MAX_NODE_NAME_LEN,
};
pub use store::{
    ConfigFile, ConfigStore, LoadOutcome, OpenMode, SaveContext, CONFIG_PATH, SAVE_SETTLE_DELAY,
};
