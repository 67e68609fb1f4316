//! In-memory configuration and its flat persisted document

use serde::{Deserialize, Serialize};

pub const DEFAULT_ADMIN_USER: &str = "admin";
pub const DEFAULT_BUS_PORT: u16 = 1883;
pub const MAX_NODE_NAME_LEN: usize = 31;

/// Admin credential gating the portal and firmware upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCredential {
    pub user: String,
    pub password: String,
}

impl Default for AccessCredential {
    fn default() -> Self {
        Self {
            user: DEFAULT_ADMIN_USER.to_string(),
            password: String::new(),
        }
    }
}

impl AccessCredential {
    /// An empty password disables authentication
    pub fn requires_auth(&self) -> bool {
        !self.password.is_empty()
    }
}

/// Message-bus broker settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Topic base override; empty selects the derived default
    pub topic: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: DEFAULT_BUS_PORT,
            user: String::new(),
            password: String::new(),
            topic: String::new(),
        }
    }
}

/// Debug output switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugConfig {
    pub local: bool,
    pub remote: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            local: true,
            remote: false,
        }
    }
}

/// Complete node configuration context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub node_name: String,
    pub credential: AccessCredential,
    pub bus: BusConfig,
    pub debug: DebugConfig,
}

impl NodeConfig {
    /// Defaults with the given node name
    pub fn new(node_name: &str) -> Self {
        Self {
            node_name: sanitize_node_name(node_name).unwrap_or_else(|| "node".to_string()),
            credential: AccessCredential::default(),
            bus: BusConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new("node")
    }
}

/// Lowercase, keep `[a-z0-9_]`, truncate to [`MAX_NODE_NAME_LEN`]. `None` if nothing remains.
pub fn sanitize_node_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .take(MAX_NODE_NAME_LEN)
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Flat persisted form of [`NodeConfig`]. Absent keys deserialize to `None`
/// and leave the in-memory value untouched when applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_serial_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_remote_enabled: Option<bool>,
}

impl From<&NodeConfig> for ConfigDocument {
    fn from(config: &NodeConfig) -> Self {
        Self {
            node_name: Some(config.node_name.clone()),
            config_user: Some(config.credential.user.clone()),
            config_password: Some(config.credential.password.clone()),
            mqtt_server: Some(config.bus.server.clone()),
            mqtt_port: Some(config.bus.port),
            mqtt_user: Some(config.bus.user.clone()),
            mqtt_password: Some(config.bus.password.clone()),
            mqtt_topic: Some(config.bus.topic.clone()),
            debug_serial_enabled: Some(config.debug.local),
            debug_remote_enabled: Some(config.debug.remote),
        }
    }
}

impl ConfigDocument {
    /// Merge present fields into `config`; returns how many were applied
    pub fn apply_to(self, config: &mut NodeConfig) -> usize {
        let mut applied = 0;

        fn merge<T>(slot: &mut T, value: Option<T>, applied: &mut usize) {
            if let Some(value) = value {
                *slot = value;
                *applied += 1;
            }
        }

        merge(&mut config.node_name, self.node_name, &mut applied);
        merge(&mut config.credential.user, self.config_user, &mut applied);
        merge(&mut config.credential.password, self.config_password, &mut applied);
        merge(&mut config.bus.server, self.mqtt_server, &mut applied);
        merge(&mut config.bus.port, self.mqtt_port, &mut applied);
        merge(&mut config.bus.user, self.mqtt_user, &mut applied);
        merge(&mut config.bus.password, self.mqtt_password, &mut applied);
        merge(&mut config.bus.topic, self.mqtt_topic, &mut applied);
        merge(&mut config.debug.local, self.debug_serial_enabled, &mut applied);
        merge(&mut config.debug.remote, self.debug_remote_enabled, &mut applied);

        applied
    }

    /// Copy with secrets replaced, for log output
    pub fn redacted(&self) -> Self {
        let mask = |secret: &Option<String>| {
            secret
                .as_ref()
                .map(|s| if s.is_empty() { String::new() } else { "***".to_string() })
        };

        Self {
            config_password: mask(&self.config_password),
            mqtt_password: mask(&self.mqtt_password),
            ..self.clone()
        }
    }
}
