//! # Configuration portal
//!
//! A small web front-end served one request per tick:
//!
//! - `/`: navigation with the registered feature buttons
//! - `/settings`, `/saveSettings`: node, admin, bus, network and debug settings
//! - `/status`: firmware and system figures plus the firmware upload form
//! - `/updateFw`: firmware upload
//! - anything else: registered feature routes, then a diagnostic 404
//!
//! When an admin password is set every request must carry matching Basic
//! credentials; failures are answered with a bare 401 challenge.

pub mod auth;
pub mod http;
pub mod pages;
pub mod routes;
pub mod settings;

pub use auth::BasicAuth;
pub use http::{Method, PendingRequest, PortalRequest, ResponseSink, Upload};
pub use pages::{render, PageWriter, MASKED_PASSWORD};
pub use routes::{ButtonList, NetworkChange, PortalActions, PortalContext, RouteTable, BUTTON_CAPACITY};
pub use settings::SettingsChange;

use crate::config::NodeConfig;
use crate::core::{FirmwareInfo, RestartReason};
use crate::error::NodeResult;
use crate::platform::{PortalServer, SystemControl};
use log::{debug, info, warn};
use std::net::IpAddr;
use std::time::Duration;

/// Field name of the firmware image in the upload form
pub const FIRMWARE_FIELD: &str = "firmware";

/// Node state the built-in pages read, and the configuration they edit
pub struct PortalEnv<'a> {
    pub unique_name: &'a str,
    /// Topic base shown while no override is configured
    pub default_topic: String,
    pub config: &'a mut NodeConfig,
    pub firmware: &'a FirmwareInfo,
    pub bus_connected: bool,
    pub ssid: String,
    pub local_addr: Option<IpAddr>,
    pub signal_strength: Option<i32>,
    pub uptime: Duration,
    pub system: &'a mut dyn SystemControl,
}

pub struct ConfigPortal {
    server: Box<dyn PortalServer>,
    routes: RouteTable,
    buttons: ButtonList,
}

impl ConfigPortal {
    pub fn new(server: Box<dyn PortalServer>) -> Self {
        Self {
            server,
            routes: RouteTable::new(),
            buttons: ButtonList::new(),
        }
    }

    /// Builder: change the navigation button cap; `None` removes it
    pub fn with_button_capacity(mut self, capacity: Option<usize>) -> Self {
        self.buttons = ButtonList::with_capacity(capacity);
        self
    }

    pub fn register_route<F>(&mut self, path: &str, handler: F)
    where
        F: FnMut(&mut PortalContext<'_>) -> NodeResult<()> + 'static,
    {
        self.routes.register(path, handler);
    }

    /// Add a navigation button; fails once the button list is full
    pub fn register_button(&mut self, path: &str, label: &str) -> NodeResult<usize> {
        self.buttons.register(path, label)
    }

    pub fn buttons(&self) -> &ButtonList {
        &self.buttons
    }

    /// Serve at most one pending request
    ///
    /// Returns `None` when nothing was waiting, otherwise the follow-up work
    /// the request asked for.
    pub fn serve_next(&mut self, env: &mut PortalEnv<'_>) -> Option<PortalActions> {
        let pending = self.server.accept()?;
        Some(self.handle(pending, env))
    }

    /// Answer one request
    pub fn handle(&mut self, pending: PendingRequest, env: &mut PortalEnv<'_>) -> PortalActions {
        let PendingRequest { request, mut sink } = pending;
        let title = env.unique_name;
        let mut page = PageWriter::new(&mut *sink, title);
        let mut actions = PortalActions::default();

        debug!(
            "HTTP: {} {} from {:?}",
            request.method.as_str(),
            request.uri,
            request.remote_addr
        );

        let auth = BasicAuth::new(env.config.credential.clone());
        if !auth.authorize(request.authorization.as_deref()) {
            warn!("HTTP: unauthorized request for {}", request.path());
            page.empty(
                401,
                &[("WWW-Authenticate".to_string(), BasicAuth::challenge(title))],
            );
            return actions;
        }

        match request.path() {
            "/" => self.root_page(&mut page),
            "/settings" => settings_page(&mut page, env),
            "/saveSettings" => save_settings(&request, &mut page, env, &mut actions),
            "/status" => status_page(&mut page, env),
            "/updateFw" => update_firmware(&request, &mut page, env, &mut actions),
            path => match self.routes.find_mut(path) {
                Some(handler) => {
                    let mut ctx = PortalContext::new(&request, page, &mut actions);
                    match handler(&mut ctx) {
                        Ok(()) => ctx.complete(),
                        Err(e) => {
                            warn!("HTTP: handler for {} failed: {}", path, e);
                            ctx.fail(&e);
                        }
                    }
                    return actions;
                }
                None => not_found(&request, &mut page),
            },
        }

        page.finish();
        actions
    }

    fn root_page(&self, page: &mut PageWriter<'_>) {
        page.start(200, "Navigation");
        for button in self.buttons.iter() {
            page.content(button);
        }
        page.content(pages::ROOT_SETTINGS);
        page.content(pages::ROOT_STATUS);
    }
}

fn masked(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        MASKED_PASSWORD
    }
}

fn flag(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

fn settings_page(page: &mut PageWriter<'_>, env: &PortalEnv<'_>) {
    let config = &*env.config;
    let escape = pages::escape_html;

    page.start(200, "Settings");
    page.content(pages::SETTINGS_FORM_START);

    let node_name = escape(&config.node_name);
    page.content_with(pages::SETTINGS_NODE_NAME, &[("nodeName", node_name.as_str())]);

    let ssid = escape(&env.ssid);
    page.content_with(pages::SETTINGS_WIFI_SSID, &[("wifiSsid", ssid.as_str())]);
    page.content_with(pages::SETTINGS_WIFI_PASSWD, &[("wifiPass", MASKED_PASSWORD)]);

    let user = escape(&config.credential.user);
    page.content_with(pages::SETTINGS_ADMIN_USER, &[("configUser", user.as_str())]);
    page.content_with(
        pages::SETTINGS_ADMIN_PASSWD,
        &[("configPassword", masked(&config.credential.password))],
    );

    let server = escape(&config.bus.server);
    page.content_with(pages::SETTINGS_BUS_SERVER, &[("mqttServer", server.as_str())]);
    let port = config.bus.port.to_string();
    page.content_with(pages::SETTINGS_BUS_PORT, &[("mqttPort", port.as_str())]);
    let bus_user = escape(&config.bus.user);
    page.content_with(pages::SETTINGS_BUS_USER, &[("mqttUser", bus_user.as_str())]);
    page.content_with(
        pages::SETTINGS_BUS_PASSWD,
        &[("mqttPassword", masked(&config.bus.password))],
    );

    let topic = if config.bus.topic.is_empty() {
        escape(&env.default_topic)
    } else {
        escape(&config.bus.topic)
    };
    page.content_with(pages::SETTINGS_BUS_TOPIC, &[("mqttTopic", topic.as_str())]);
    let status = if env.bus_connected {
        "connected"
    } else {
        "disconnected"
    };
    page.content_with(pages::SETTINGS_BUS_STATUS, &[("mqttStatus", status)]);

    page.content_with(
        pages::SETTINGS_DEBUG_LOCAL,
        &[("debugSerialEnabled", flag(config.debug.local))],
    );
    page.content_with(
        pages::SETTINGS_DEBUG_REMOTE,
        &[("debugRemoteEnabled", flag(config.debug.remote))],
    );

    page.content(pages::SETTINGS_SAVE_FORM_END);
    page.content(pages::BACK_BUTTON);
}

fn save_settings(
    request: &PortalRequest,
    page: &mut PageWriter<'_>,
    env: &mut PortalEnv<'_>,
    actions: &mut PortalActions,
) {
    debug!("HTTP: checking for changed settings");
    let change = settings::apply_form(request, env.config, &env.ssid, &env.default_topic);

    if !change.any() {
        info!("HTTP: no settings changed");
        page.start_with_meta(200, "", Some(pages::REDIRECT_3_SEC), "/settings");
        page.content_with(pages::SAVE_NO_CHANGE, &[("redirectUrl", "/settings")]);
        return;
    }

    info!(
        "HTTP: settings changed (config: {}, network: {})",
        change.config_changed,
        change.network.is_some()
    );
    page.start_with_meta(200, "", Some(pages::REDIRECT_15_SEC), "/");
    page.content_with(pages::SAVE_RESTART, &[("redirectUrl", "/")]);

    actions.save_config = change.config_changed;
    actions.network = change.network;
    actions.restart = Some(RestartReason::SettingsChanged);
}

fn status_page(page: &mut PageWriter<'_>, env: &PortalEnv<'_>) {
    let diagnostics = env.system.diagnostics();
    let or_na = |value: Option<String>| value.unwrap_or_else(|| "n/a".to_string());

    let fw_name = pages::escape_html(&env.firmware.name);
    let fw_version = pages::escape_html(&env.firmware.version);
    let cpu = or_na(diagnostics.cpu_mhz.map(|v| v.to_string()));
    let sketch = or_na(diagnostics.sketch_size.map(|v| v.to_string()));
    let sketch_free = or_na(diagnostics.free_sketch_space.map(|v| v.to_string()));
    let heap = or_na(diagnostics.free_heap.map(|v| v.to_string()));
    let addr = or_na(env.local_addr.map(|a| a.to_string()));
    let signal = or_na(env.signal_strength.map(|s| format!("{} dBm", s)));
    let uptime = env.uptime.as_secs().to_string();

    page.start(200, "Status");
    page.content_with(pages::STATUS_FW_NAME, &[("firmwareName", fw_name.as_str())]);
    page.content_with(pages::STATUS_FW_VERSION, &[("firmwareVersion", fw_version.as_str())]);
    page.content(pages::STATUS_FW_FORM);
    page.content_with(pages::STATUS_CPU, &[("cpuFreq", cpu.as_str())]);
    page.content_with(pages::STATUS_SKETCH_SIZE, &[("sketchSize", sketch.as_str())]);
    page.content_with(pages::STATUS_SKETCH_FREE, &[("freeSketchSize", sketch_free.as_str())]);
    page.content_with(pages::STATUS_HEAP, &[("freeHeap", heap.as_str())]);
    page.content_with(pages::STATUS_IP_ADDR, &[("ipAddr", addr.as_str())]);
    page.content_with(pages::STATUS_SIGNAL, &[("sigStrength", signal.as_str())]);
    page.content_with(pages::STATUS_UPTIME, &[("uptime", uptime.as_str())]);
    page.content(pages::BACK_BUTTON);
}

fn update_firmware(
    request: &PortalRequest,
    page: &mut PageWriter<'_>,
    env: &mut PortalEnv<'_>,
    actions: &mut PortalActions,
) {
    if request.method != Method::Post {
        page.start(200, "Firmware");
        page.content(pages::STATUS_FW_FORM);
        page.content(pages::BACK_BUTTON);
        return;
    }

    let upload = match request
        .upload
        .as_ref()
        .filter(|upload| upload.field == FIRMWARE_FIELD)
    {
        Some(upload) => upload,
        None => {
            warn!("HTTP: firmware upload without '{}' file", FIRMWARE_FIELD);
            page.start(400, "Firmware");
            page.content_with(pages::FIRMWARE_FAILED, &[("error", "no firmware file received")]);
            page.content(pages::BACK_BUTTON);
            return;
        }
    };

    info!(
        "HTTP: firmware upload '{}' ({} bytes)",
        upload.filename,
        upload.data.len()
    );
    match env.system.apply_firmware(&upload.data) {
        Ok(()) => {
            page.start_with_meta(200, "Firmware", Some(pages::REDIRECT_15_SEC), "/");
            page.content_with(pages::FIRMWARE_OK, &[("redirectUrl", "/")]);
            actions.restart = Some(RestartReason::FirmwareUpdated);
        }
        Err(e) => {
            warn!("HTTP: firmware update failed: {}", e);
            let error = pages::escape_html(&e.to_string());
            page.start(500, "Firmware");
            page.content_with(pages::FIRMWARE_FAILED, &[("error", error.as_str())]);
            page.content(pages::BACK_BUTTON);
        }
    }
}

fn not_found(request: &PortalRequest, page: &mut PageWriter<'_>) {
    page.start(404, "File Not Found");

    let mut body = format!(
        "<pre>URI: {}\nMethod: {}\nArguments: {}\n",
        pages::escape_html(&request.uri),
        request.method.as_str(),
        request.args.len()
    );
    for (name, value) in &request.args {
        body.push_str(&format!(
            " {}: {}\n",
            pages::escape_html(name),
            pages::escape_html(value)
        ));
    }
    body.push_str("</pre>");
    page.content(&body);
}
