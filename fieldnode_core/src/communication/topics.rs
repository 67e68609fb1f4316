//! Topic namespace of a node
//!
//! - node topic: `{base}/{sub}`
//! - node command topic: `{base}/cmd/{sub}`
//! - broadcast command topic: `{shared}cmd/{sub}`
//!
//! `base` is the configured override or `{shared}{unique_name}`.

/// Shared prefix of every node's default topic and of the broadcast commands
pub const SHARED_TOPIC_BASE: &str = "fieldnode/";

pub const AVAILABLE_SUBTOPIC: &str = "available";
pub const REBOOT_SUBTOPIC: &str = "reboot";
pub const ENABLE_SEND_SUBTOPIC: &str = "mqtt/send";
pub const DEBUG_LOG_SUBTOPIC: &str = "debug/log";
pub const DEBUG_LOCAL_SUBTOPIC: &str = "debug/serial";
pub const DEBUG_REMOTE_SUBTOPIC: &str = "debug/remote";

pub const ON_PAYLOAD: &str = "on";
pub const OFF_PAYLOAD: &str = "off";
pub const SAVE_PAYLOAD: &str = "save";
pub const ANNOUNCE_PAYLOAD: &str = "announce";
pub const ONLINE_PAYLOAD: &str = "true";
pub const OFFLINE_PAYLOAD: &str = "false";

/// `on`/`off` sentinel for a flag
pub fn on_off_payload(on: bool) -> &'static str {
    if on {
        ON_PAYLOAD
    } else {
        OFF_PAYLOAD
    }
}

/// Exact-match parse of the `on`/`off` sentinels
pub fn parse_on_off(payload: &str) -> Option<bool> {
    match payload {
        ON_PAYLOAD => Some(true),
        OFF_PAYLOAD => Some(false),
        _ => None,
    }
}

/// Derived topic names for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNamespace {
    base: String,
    shared: String,
}

impl TopicNamespace {
    /// Build the namespace; an empty `topic_override` selects the default base
    pub fn new(unique_name: &str, topic_override: &str) -> Self {
        let base = if topic_override.is_empty() {
            Self::default_base(unique_name)
        } else {
            topic_override.to_string()
        };

        Self {
            base,
            shared: SHARED_TOPIC_BASE.to_string(),
        }
    }

    pub fn default_base(unique_name: &str) -> String {
        format!("{}{}", SHARED_TOPIC_BASE, unique_name)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn node_topic(&self, sub: &str) -> String {
        join(&self.base, sub)
    }

    pub fn node_command_topic(&self, sub: &str) -> String {
        join(&format!("{}/cmd", self.base), sub)
    }

    pub fn common_command_topic(&self, sub: &str) -> String {
        join(&format!("{}cmd", self.shared), sub)
    }
}

fn join(prefix: &str, sub: &str) -> String {
    if sub.is_empty() {
        prefix.to_string()
    } else if sub.starts_with('/') {
        format!("{}{}", prefix, sub)
    } else {
        format!("{}/{}", prefix, sub)
    }
}

/// MQTT-style filter match supporting `+` and a trailing `#`
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
