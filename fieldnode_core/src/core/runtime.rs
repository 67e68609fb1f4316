//! The node runtime: composition root and extension API

use super::feature::Feature;
use super::identity::{FirmwareInfo, NodeIdentity};
use crate::callbacks::{CallbackKind, CallbackRegistry};
use crate::communication::{BusContext, Message, MessageBusRouter, RetryStrategy, TopicNamespace};
use crate::config::{ConfigFile, ConfigStore, LoadOutcome, NodeConfig, OpenMode, SaveContext};
use crate::error::{NodeError, NodeResult};
use crate::network::{ConnectivitySupervisor, SupervisorMode};
use crate::platform::{Clock, Platform, SystemControl};
use crate::portal::{ConfigPortal, PortalActions, PortalContext, PortalEnv};
use log::{error, info, warn};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Inbound bus messages handled per tick
pub const MAX_INBOUND_PER_TICK: usize = 16;

/// Pause between the offline announcement and the restart
pub const RESTART_DELAY: Duration = Duration::from_millis(500);

/// Why the node asked to be restarted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    CallbackExhausted(CallbackKind),
    ButtonsExhausted,
    RebootCommand,
    SettingsChanged,
    FirmwareUpdated,
    StorageCleared,
    Requested(String),
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::CallbackExhausted(kind) => {
                write!(f, "all {} callbacks already used", kind.as_str())
            }
            RestartReason::ButtonsExhausted => write!(f, "all button handlers already used"),
            RestartReason::RebootCommand => write!(f, "reboot command"),
            RestartReason::SettingsChanged => write!(f, "settings changed"),
            RestartReason::FirmwareUpdated => write!(f, "firmware updated"),
            RestartReason::StorageCleared => write!(f, "storage cleared"),
            RestartReason::Requested(by) => write!(f, "requested by {}", by),
        }
    }
}

/// Result of one [`NodeRuntime::tick`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Running,
    /// The host must restart the node; further ticks do nothing
    RestartRequested(RestartReason),
}

impl NodeStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, NodeStatus::Running)
    }
}

pub struct NodeRuntime {
    firmware: FirmwareInfo,
    config: NodeConfig,
    identity: NodeIdentity,
    clock: Rc<dyn Clock>,
    store: ConfigStore,
    registry: CallbackRegistry,
    supervisor: ConnectivitySupervisor,
    router: MessageBusRouter,
    portal: ConfigPortal,
    system: Box<dyn SystemControl>,
    features: Vec<Box<dyn Feature>>,
    status: NodeStatus,
    started: bool,
}

impl NodeRuntime {
    /// Assemble a node from its platform services; `defaults` apply until
    /// [`NodeRuntime::setup`] loads the stored configuration
    pub fn new(firmware: FirmwareInfo, defaults: NodeConfig, platform: Platform) -> Self {
        let Platform {
            clock,
            link,
            bus,
            storage,
            portal,
            system,
        } = platform;

        let identity = NodeIdentity::new(&defaults.node_name, system.hardware_id());
        let mut router = MessageBusRouter::new(bus);
        router.configure(
            identity.unique_name(),
            defaults.bus.clone(),
            TopicNamespace::new(identity.unique_name(), &defaults.bus.topic),
        );

        Self {
            firmware,
            store: ConfigStore::new(storage, clock.clone()),
            config: defaults,
            identity,
            clock,
            registry: CallbackRegistry::new(),
            supervisor: ConnectivitySupervisor::new(link),
            router,
            portal: ConfigPortal::new(portal),
            system,
            features: Vec::new(),
            status: NodeStatus::Running,
            started: false,
        }
    }

    /// Builder: blocking or cooperative link supervision
    pub fn with_supervisor_mode(mut self, mode: SupervisorMode) -> Self {
        self.supervisor = self.supervisor.with_mode(mode);
        self
    }

    /// Builder: retry policy of the network link
    pub fn with_link_retry(mut self, strategy: RetryStrategy) -> Self {
        self.supervisor = self.supervisor.with_retry_strategy(strategy);
        self
    }

    /// Builder: retry policy of the bus connection
    pub fn with_bus_retry(mut self, strategy: RetryStrategy) -> Self {
        self.router = self.router.with_retry_strategy(strategy);
        self
    }

    /// Builder: slots per callback table; `None` removes the cap.
    /// Replaces any callbacks registered so far.
    pub fn with_callback_capacity(mut self, capacity: Option<usize>) -> Self {
        self.registry = CallbackRegistry::with_capacity(capacity);
        self
    }

    /// Builder: navigation button cap; `None` removes it
    pub fn with_button_capacity(mut self, capacity: Option<usize>) -> Self {
        self.portal = self.portal.with_button_capacity(capacity);
        self
    }

    /// Builder: where the configuration document lives
    pub fn with_config_path(mut self, path: &str) -> Self {
        self.store = self.store.with_path(path);
        self
    }

    /// Load the configuration, derive the identity and bring up the link,
    /// the bus and the portal. Features added so far are set up last.
    pub fn setup(&mut self) -> NodeStatus {
        if self.started || !self.status.is_running() {
            return self.status.clone();
        }
        self.started = true;

        info!("SYSTEM: starting {}", self.firmware);

        match self.store.load(&mut self.config) {
            LoadOutcome::Loaded(fields) => info!("CONFIG: loaded {} fields", fields),
            LoadOutcome::Missing => info!("CONFIG: using defaults"),
            LoadOutcome::Corrupt => warn!("CONFIG: stored configuration discarded, using defaults"),
        }

        self.identity = NodeIdentity::new(&self.config.node_name, self.system.hardware_id());
        let unique_name = self.identity.unique_name().to_string();
        info!("SYSTEM: node {}", unique_name);

        self.supervisor.set_hostname(&unique_name);
        self.router.configure(
            &unique_name,
            self.config.bus.clone(),
            TopicNamespace::new(&unique_name, &self.config.bus.topic),
        );

        if self.supervisor.step(&*self.clock) {
            self.router.maintain_connection(self.clock.now());
        }
        info!("HTTP: portal ready for {}", unique_name);

        if !self.config.debug.local {
            info!("SYSTEM: local debug output disabled by configuration");
        }

        let mut pending = std::mem::take(&mut self.features);
        for feature in pending.iter_mut() {
            self.setup_feature(feature.as_mut());
        }
        pending.append(&mut self.features);
        self.features = pending;

        self.status.clone()
    }

    fn setup_feature(&mut self, feature: &mut dyn Feature) {
        if !self.status.is_running() {
            return;
        }
        info!("SYSTEM: setting up feature '{}'", feature.name());
        if let Err(e) = feature.setup(self) {
            error!("SYSTEM: feature '{}' setup failed: {}", feature.name(), e);
        }
    }

    /// Add a feature module; after setup it is set up immediately
    pub fn add_feature(&mut self, mut feature: Box<dyn Feature>) {
        if self.started {
            self.setup_feature(feature.as_mut());
        }
        self.features.push(feature);
    }

    /// One iteration: link, bus, portal, features
    pub fn tick(&mut self) -> NodeStatus {
        if !self.status.is_running() {
            return self.status.clone();
        }
        if !self.started {
            self.setup();
        }

        if self.supervisor.step(&*self.clock) {
            self.step_bus();
        }

        if self.status.is_running() {
            self.step_portal();
        }

        if self.status.is_running() {
            self.step_features();
        }

        self.status.clone()
    }

    fn step_bus(&mut self) {
        if !self.router.maintain_connection(self.clock.now()) {
            return;
        }
        self.router
            .publish_availability(false, &self.config.debug, &mut self.registry);

        for _ in 0..MAX_INBOUND_PER_TICK {
            let Some(message) = self.router.poll() else {
                break;
            };

            let reboot =
                self.router
                    .dispatch(&message, &mut self.config.debug, &mut self.registry);
            if let Some(reboot) = reboot {
                if reboot.save {
                    if let Err(e) = self.save_config() {
                        error!("CONFIG: save before reboot failed: {}", e);
                    }
                }
                self.restart(RestartReason::RebootCommand);
                return;
            }
        }
    }

    fn step_portal(&mut self) {
        let unique_name = self.identity.unique_name();
        let mut env = PortalEnv {
            unique_name,
            default_topic: TopicNamespace::default_base(unique_name),
            config: &mut self.config,
            firmware: &self.firmware,
            bus_connected: self.router.is_connected(),
            ssid: self.supervisor.ssid(),
            local_addr: self.supervisor.local_addr(),
            signal_strength: self.supervisor.signal_strength(),
            uptime: self.clock.now(),
            system: &mut *self.system,
        };

        if let Some(actions) = self.portal.serve_next(&mut env) {
            self.apply_portal_actions(actions);
        }
    }

    fn apply_portal_actions(&mut self, actions: PortalActions) {
        if actions.save_config {
            if let Err(e) = self.save_config() {
                error!("CONFIG: save from portal failed: {}", e);
            }
        }

        if let Some(network) = actions.network {
            if let Err(e) = self
                .supervisor
                .reconfigure(&network.ssid, network.password.as_deref())
            {
                error!("WIFI: reconfiguration failed: {}", e);
            }
        }

        if let Some(reason) = actions.restart {
            self.restart(reason);
        }
    }

    fn step_features(&mut self) {
        let mut features = std::mem::take(&mut self.features);
        for feature in features.iter_mut() {
            if !self.status.is_running() {
                break;
            }
            feature.tick(self);
        }
        features.append(&mut self.features);
        self.features = features;
    }

    /// Persist the current configuration and run the save callbacks
    pub fn save_config(&mut self) -> NodeResult<()> {
        self.store.save(&self.config, &mut self.registry)
    }

    /// Announce going offline, notify the platform and stop ticking
    pub fn restart(&mut self, reason: RestartReason) {
        if !self.status.is_running() {
            return;
        }

        info!("RESET: restarting ({})", reason);
        if self.router.is_connected() {
            self.router
                .publish_availability(true, &self.config.debug, &mut self.registry);
        }
        self.clock.sleep(RESTART_DELAY);

        self.system.restart(&reason);
        self.status = NodeStatus::RestartRequested(reason);
    }

    /// Erase stored documents and network settings, then restart
    pub fn factory_reset(&mut self) {
        if let Err(e) = self.store.clear() {
            error!("RESET: clearing storage failed: {}", e);
        }
        if let Err(e) = self.supervisor.reset_settings() {
            error!("RESET: clearing network settings failed: {}", e);
        }
        self.restart(RestartReason::StorageCleared);
    }

    fn capacity_exhausted(&mut self, error: NodeError, reason: RestartReason) -> NodeError {
        error!("SYSTEM: {} - restarting", error);
        self.restart(reason);
        error
    }

    pub fn register_save_callback<F>(&mut self, handler: F) -> NodeResult<usize>
    where
        F: FnMut(&mut SaveContext<'_>) -> NodeResult<()> + 'static,
    {
        self.registry.register_save(handler).map_err(|e| {
            self.capacity_exhausted(e, RestartReason::CallbackExhausted(CallbackKind::ConfigSaved))
        })
    }

    pub fn register_availability_callback<F>(&mut self, handler: F) -> NodeResult<usize>
    where
        F: FnMut(&mut BusContext<'_>) -> NodeResult<()> + 'static,
    {
        self.registry.register_available(handler).map_err(|e| {
            self.capacity_exhausted(e, RestartReason::CallbackExhausted(CallbackKind::BusAvailable))
        })
    }

    pub fn register_message_callback<F>(&mut self, handler: F) -> NodeResult<usize>
    where
        F: FnMut(&mut BusContext<'_>, &Message) -> NodeResult<()> + 'static,
    {
        self.registry.register_message(handler).map_err(|e| {
            self.capacity_exhausted(
                e,
                RestartReason::CallbackExhausted(CallbackKind::MessageReceived),
            )
        })
    }

    pub fn register_route<F>(&mut self, path: &str, handler: F)
    where
        F: FnMut(&mut PortalContext<'_>) -> NodeResult<()> + 'static,
    {
        self.portal.register_route(path, handler);
    }

    pub fn register_button(&mut self, path: &str, label: &str) -> NodeResult<usize> {
        self.portal
            .register_button(path, label)
            .map_err(|e| self.capacity_exhausted(e, RestartReason::ButtonsExhausted))
    }

    /// Feature publish; `false` while sending is disabled or on failure
    pub fn send(&mut self, topic: &str, payload: &str) -> bool {
        self.router.send(topic, payload)
    }

    pub fn node_topic(&self, sub: &str) -> String {
        self.router.topics().node_topic(sub)
    }

    pub fn node_command_topic(&self, sub: &str) -> String {
        self.router.topics().node_command_topic(sub)
    }

    pub fn on_off_payload(&self, on: bool) -> &'static str {
        crate::communication::on_off_payload(on)
    }

    /// Debug line to the local log and, when enabled, the remote log topic
    pub fn log(&mut self, text: &str) {
        let line = format!("[+{:.3}s] {}", self.clock.now().as_secs_f64(), text);
        if self.config.debug.local {
            info!(target: "fieldnode::node", "{}", line);
        }
        if self.config.debug.remote {
            self.router.publish_log(&line);
        }
    }

    /// Open a feature document on the node's storage
    pub fn open_config_file(&mut self, path: &str, mode: OpenMode) -> NodeResult<ConfigFile<'_>> {
        self.store.open_config_file(path, mode)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn unique_name(&self) -> &str {
        self.identity.unique_name()
    }

    pub fn firmware(&self) -> &FirmwareInfo {
        &self.firmware
    }

    pub fn status(&self) -> &NodeStatus {
        &self.status
    }

    pub fn router(&self) -> &MessageBusRouter {
        &self.router
    }

    pub fn supervisor(&self) -> &ConnectivitySupervisor {
        &self.supervisor
    }

    pub fn is_bus_connected(&self) -> bool {
        self.router.is_connected()
    }

    pub fn uptime(&self) -> Duration {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::{
        LoopbackBus, ManualClock, MemoryStorage, QueuedPortal, SimLink, SimSystem,
    };
    use crate::portal::PortalRequest;
    use std::cell::RefCell;

    struct Rig {
        clock: Rc<ManualClock>,
        link: SimLink,
        bus: LoopbackBus,
        storage: MemoryStorage,
        portal: QueuedPortal,
        system: SimSystem,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                clock: Rc::new(ManualClock::new()),
                link: SimLink::connected(),
                bus: LoopbackBus::new(),
                storage: MemoryStorage::new(),
                portal: QueuedPortal::new(),
                system: SimSystem::new([0, 0, 0, 0, 0, 1]),
            }
        }

        fn node(&self) -> NodeRuntime {
            let mut defaults = NodeConfig::new("relay");
            defaults.bus.server = "broker.local".to_string();
            NodeRuntime::new(
                FirmwareInfo::new("esp-relay", "1.0"),
                defaults,
                Platform {
                    clock: self.clock.clone(),
                    link: Box::new(self.link.clone()),
                    bus: Box::new(self.bus.clone()),
                    storage: Box::new(self.storage.clone()),
                    portal: Box::new(self.portal.clone()),
                    system: Box::new(self.system.clone()),
                },
            )
        }
    }

    #[test]
    fn test_setup_derives_identity_from_stored_name() {
        let rig = Rig::new();
        rig.storage.insert("/config.json", br#"{"nodeName": "vent"}"#);
        let mut node = rig.node();

        assert_eq!(node.setup(), NodeStatus::Running);
        assert_eq!(node.unique_name(), "vent_000000000001");
        assert_eq!(node.node_topic("state"), "fieldnode/vent_000000000001/state");
        assert!(node.is_bus_connected());
    }

    #[test]
    fn test_tick_announces_availability() {
        let rig = Rig::new();
        let mut node = rig.node();
        node.setup();

        assert!(node.tick().is_running());
        assert_eq!(
            rig.bus.payloads_on("fieldnode/relay_000000000001/available"),
            vec!["true"]
        );
    }

    #[test]
    fn test_reboot_command_with_save() {
        let rig = Rig::new();
        let mut node = rig.node();
        node.setup();
        node.tick();

        rig.bus.inject("fieldnode/relay_000000000001/cmd/reboot", "save");
        assert_eq!(
            node.tick(),
            NodeStatus::RestartRequested(RestartReason::RebootCommand)
        );
        assert!(rig.storage.contains("/config.json"));
        assert_eq!(rig.system.restarts(), vec![RestartReason::RebootCommand]);
        assert_eq!(
            rig.bus.payloads_on("fieldnode/relay_000000000001/available"),
            vec!["true", "false"]
        );

        // latched
        assert!(!node.tick().is_running());
        assert_eq!(rig.system.restarts().len(), 1);
    }

    #[test]
    fn test_callback_overflow_restarts() {
        let rig = Rig::new();
        let mut node = rig.node();

        for _ in 0..crate::callbacks::CALLBACK_CAPACITY {
            node.register_message_callback(|_, _| Ok(())).unwrap();
        }
        assert!(node.register_message_callback(|_, _| Ok(())).is_err());
        assert_eq!(
            node.status(),
            &NodeStatus::RestartRequested(RestartReason::CallbackExhausted(
                CallbackKind::MessageReceived
            ))
        );
    }

    #[test]
    fn test_setup_skipped_after_overflow_restart() {
        let rig = Rig::new();
        rig.storage.insert("/config.json", br#"{"nodeName": "vent"}"#);
        let mut node = rig.node();
        for _ in 0..crate::callbacks::CALLBACK_CAPACITY {
            node.register_save_callback(|_| Ok(())).unwrap();
        }
        assert!(node.register_save_callback(|_| Ok(())).is_err());

        let expected = NodeStatus::RestartRequested(RestartReason::CallbackExhausted(
            CallbackKind::ConfigSaved,
        ));
        assert_eq!(node.setup(), expected);
        assert_eq!(node.tick(), expected);
        assert_eq!(node.unique_name(), "relay_000000000001");
        assert_eq!(rig.link.connect_calls(), 0);
        assert_eq!(rig.bus.connect_calls(), 0);
        assert_eq!(rig.system.restarts().len(), 1);
    }

    #[test]
    fn test_button_overflow_restarts() {
        let rig = Rig::new();
        let mut node = rig.node();
        for i in 0..crate::portal::BUTTON_CAPACITY {
            node.register_button(&format!("/b{}", i), "B").unwrap();
        }
        assert!(node.register_button("/b9", "B").is_err());
        assert_eq!(rig.system.restarts(), vec![RestartReason::ButtonsExhausted]);
    }

    #[test]
    fn test_portal_save_restarts() {
        let rig = Rig::new();
        let mut node = rig.node();
        node.setup();

        rig.portal
            .push(PortalRequest::post("/saveSettings").arg("mqttServer", "10.0.0.9"));
        assert_eq!(
            node.tick(),
            NodeStatus::RestartRequested(RestartReason::SettingsChanged)
        );
        let stored = rig.storage.get_string("/config.json").unwrap();
        assert!(stored.contains("\"mqttServer\":\"10.0.0.9\""));
    }

    #[test]
    fn test_log_goes_remote_when_enabled() {
        let rig = Rig::new();
        let mut node = rig.node();
        node.setup();
        node.tick();
        rig.clock.advance(Duration::from_millis(1500));

        node.log("local only");
        rig.bus
            .inject("fieldnode/relay_000000000001/cmd/debug/remote", "on");
        node.tick();
        node.log("hello");

        assert_eq!(
            rig.bus.payloads_on("fieldnode/relay_000000000001/debug/log"),
            vec!["[+1.500s] hello"]
        );
    }

    #[test]
    fn test_factory_reset() {
        let rig = Rig::new();
        rig.storage.insert("/config.json", "{}");
        let mut node = rig.node();
        node.setup();

        node.factory_reset();
        assert!(!rig.storage.contains("/config.json"));
        assert_eq!(rig.link.reset_calls(), 1);
        assert_eq!(
            node.status(),
            &NodeStatus::RestartRequested(RestartReason::StorageCleared)
        );
    }

    struct Counter {
        ticks: Rc<RefCell<usize>>,
    }

    impl Feature for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn setup(&mut self, node: &mut NodeRuntime) -> NodeResult<()> {
            node.register_button("/counter", "Counter")?;
            Ok(())
        }

        fn tick(&mut self, _node: &mut NodeRuntime) {
            *self.ticks.borrow_mut() += 1;
        }
    }

    #[test]
    fn test_features_set_up_and_ticked() {
        let rig = Rig::new();
        let ticks = Rc::new(RefCell::new(0));
        let mut node = rig.node();
        node.add_feature(Box::new(Counter {
            ticks: ticks.clone(),
        }));

        node.setup();
        node.tick();
        node.tick();

        assert_eq!(*ticks.borrow(), 2);
        let response = rig.portal.push(PortalRequest::get("/"));
        node.tick();
        assert!(response.body().contains("/counter"));
    }
}
