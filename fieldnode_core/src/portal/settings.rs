//! Diffing a submitted settings form against the running configuration

use super::http::PortalRequest;
use super::pages::MASKED_PASSWORD;
use super::routes::NetworkChange;
use crate::config::{sanitize_node_name, NodeConfig};
use log::{debug, warn};

/// What a settings submission changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsChange {
    /// Node identity, admin credential, bus or debug fields changed
    pub config_changed: bool,
    /// Network credentials changed
    pub network: Option<NetworkChange>,
}

impl SettingsChange {
    pub fn any(&self) -> bool {
        self.config_changed || self.network.is_some()
    }
}

/// Secret fields: the masked placeholder means "keep"
fn submitted_secret<'r>(request: &'r PortalRequest, name: &str) -> Option<&'r str> {
    request.get_arg(name).filter(|value| *value != MASKED_PASSWORD)
}

/// Form flags accept `0`/`1` style integers as well as `true`/`on`
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    match value.parse::<i64>() {
        Ok(number) => number > 0,
        Err(_) => value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("on"),
    }
}

fn update<T: PartialEq>(slot: &mut T, value: T, field: &str, changed: &mut bool) {
    if *slot != value {
        debug!("HTTP: setting '{}' changed", field);
        *slot = value;
        *changed = true;
    }
}

/// Apply the submitted fields to `config`
///
/// Absent fields count as unchanged. Values are compared in their native
/// type. `default_topic` is what the settings page shows while no topic
/// override is set; submitting it back is not a change.
pub fn apply_form(
    request: &PortalRequest,
    config: &mut NodeConfig,
    current_ssid: &str,
    default_topic: &str,
) -> SettingsChange {
    let mut changed = false;

    if let Some(name) = request.get_arg("nodeName") {
        match sanitize_node_name(name) {
            Some(name) => update(&mut config.node_name, name, "nodeName", &mut changed),
            None => warn!("HTTP: ignoring invalid node name '{}'", name),
        }
    }

    if let Some(user) = request.get_arg("configUser") {
        update(&mut config.credential.user, user.to_string(), "configUser", &mut changed);
    }
    if let Some(password) = submitted_secret(request, "configPassword") {
        update(
            &mut config.credential.password,
            password.to_string(),
            "configPassword",
            &mut changed,
        );
    }

    if let Some(server) = request.get_arg("mqttServer") {
        update(&mut config.bus.server, server.trim().to_string(), "mqttServer", &mut changed);
    }
    if let Some(port) = request.get_arg("mqttPort") {
        match port.trim().parse::<u16>() {
            Ok(port) if port > 0 => update(&mut config.bus.port, port, "mqttPort", &mut changed),
            _ => warn!("HTTP: ignoring invalid port '{}'", port),
        }
    }
    if let Some(user) = request.get_arg("mqttUser") {
        update(&mut config.bus.user, user.to_string(), "mqttUser", &mut changed);
    }
    if let Some(password) = submitted_secret(request, "mqttPassword") {
        update(&mut config.bus.password, password.to_string(), "mqttPassword", &mut changed);
    }
    if let Some(topic) = request.get_arg("mqttTopic") {
        let topic = topic.trim();
        let unchanged_default = config.bus.topic.is_empty() && topic == default_topic;
        if !unchanged_default {
            update(&mut config.bus.topic, topic.to_string(), "mqttTopic", &mut changed);
        }
    }

    if let Some(flag) = request.get_arg("debugSerialEnabled") {
        update(&mut config.debug.local, parse_flag(flag), "debugSerialEnabled", &mut changed);
    }
    if let Some(flag) = request.get_arg("debugRemoteEnabled") {
        update(&mut config.debug.remote, parse_flag(flag), "debugRemoteEnabled", &mut changed);
    }

    let ssid = request
        .get_arg("wifiSsid")
        .map(str::trim)
        .filter(|ssid| !ssid.is_empty());
    let password = submitted_secret(request, "wifiPass").filter(|pass| !pass.is_empty());

    let network = match (ssid, password) {
        (Some(ssid), password) if ssid != current_ssid || password.is_some() => {
            Some(NetworkChange {
                ssid: ssid.to_string(),
                password: password.map(str::to_string),
            })
        }
        (None, Some(password)) => Some(NetworkChange {
            ssid: current_ssid.to_string(),
            password: Some(password.to_string()),
        }),
        _ => None,
    };

    SettingsChange {
        config_changed: changed,
        network,
    }
}
