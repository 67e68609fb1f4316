// End-to-end behaviour of a node on simulated platform services
use fieldnode_core::platform::sim::{
    LoopbackBus, ManualClock, MemoryStorage, QueuedPortal, RecordedResponse, SimLink, SimSystem,
};
use fieldnode_core::portal::auth::encode_basic;
use fieldnode_core::{
    CallbackKind, FirmwareInfo, NodeConfig, NodeError, NodeRuntime, NodeStatus, OpenMode,
    Platform, PortalRequest, RestartReason,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

const UNIQUE: &str = "relay_a0b1c2d3e4f5";

fn topic(sub: &str) -> String {
    format!("fieldnode/{}/{}", UNIQUE, sub)
}

/// Shared handles on every simulated service of one node
#[derive(Clone)]
struct Bench {
    clock: Rc<ManualClock>,
    link: SimLink,
    bus: LoopbackBus,
    storage: MemoryStorage,
    portal: QueuedPortal,
    system: SimSystem,
}

impl Bench {
    fn new() -> Self {
        Self {
            clock: Rc::new(ManualClock::new()),
            link: SimLink::connected(),
            bus: LoopbackBus::new(),
            storage: MemoryStorage::new(),
            portal: QueuedPortal::new(),
            system: SimSystem::new([0xa0, 0xb1, 0xc2, 0xd3, 0xe4, 0xf5]),
        }
    }

    fn defaults() -> NodeConfig {
        let mut defaults = NodeConfig::new("relay");
        defaults.bus.server = "broker.local".to_string();
        defaults
    }

    fn node(&self) -> NodeRuntime {
        self.node_with(Self::defaults())
    }

    fn node_with(&self, defaults: NodeConfig) -> NodeRuntime {
        NodeRuntime::new(
            FirmwareInfo::new("esp-relay", "2.1"),
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

    fn request(&self, node: &mut NodeRuntime, request: PortalRequest) -> RecordedResponse {
        let response = self.portal.push(request);
        node.tick();
        response
    }
}

#[test]
fn test_partial_document_merges_over_defaults() {
    let bench = Bench::new();
    bench
        .storage
        .insert("/config.json", r#"{"mqttServer":"10.1.1.1","mqttPort":1884}"#);

    let mut node = bench.node();
    assert_eq!(node.setup(), NodeStatus::Running);

    let config = node.config().clone();
    assert_eq!(config.bus.server, "10.1.1.1");
    assert_eq!(config.bus.port, 1884);
    assert_eq!(config.node_name, "relay");
    assert!(config.debug.local);
    assert!(!config.debug.remote);

    // a saved document loads back to the same configuration
    node.save_config().unwrap();
    let mut reloaded = bench.node_with(NodeConfig::new("other"));
    reloaded.setup();
    assert_eq!(reloaded.config(), &config);
}

#[test]
fn test_corrupt_document_is_discarded() {
    let bench = Bench::new();
    bench.storage.insert("/config.json", "{\"mqttServer\": ");

    let mut node = bench.node();
    assert_eq!(node.setup(), NodeStatus::Running);

    assert_eq!(node.config(), &Bench::defaults());
    assert!(!bench.storage.contains("/config.json"));
    assert!(bench.system.restarts().is_empty());

    // storage is usable again: a changed record saves and loads back
    node.tick();
    bench.bus.inject(&topic("cmd/debug/remote"), "on");
    node.tick();
    assert!(node.config().debug.remote);
    node.save_config().unwrap();

    let mut reloaded = bench.node_with(NodeConfig::new("other"));
    assert_eq!(reloaded.setup(), NodeStatus::Running);
    assert_eq!(reloaded.config(), node.config());
    assert!(reloaded.config().debug.remote);
}

#[test]
fn test_unique_name_and_topics() {
    let bench = Bench::new();
    let mut node = bench.node();
    node.setup();

    assert_eq!(node.unique_name(), UNIQUE);
    assert_eq!(node.node_topic("state"), topic("state"));
    assert_eq!(node.node_command_topic("light"), topic("cmd/light"));

    let options = bench.bus.last_options().unwrap();
    assert_eq!(options.client_id, UNIQUE);
    assert_eq!(options.keep_alive, Duration::from_secs(30));
    assert!(options.clean_session);
    assert_eq!(
        bench.bus.subscriptions(),
        vec![topic("cmd/#"), "fieldnode/cmd/#".to_string()]
    );
}

#[test]
fn test_topic_override_moves_node_topics() {
    let bench = Bench::new();
    let mut defaults = Bench::defaults();
    defaults.bus.topic = "home/relay".to_string();
    let mut node = bench.node_with(defaults);
    node.setup();
    node.tick();

    assert_eq!(node.node_topic("state"), "home/relay/state");
    assert_eq!(bench.bus.payloads_on("home/relay/available"), vec!["true"]);
}

#[test]
fn test_callback_overflow_requests_restart() {
    let bench = Bench::new();
    let mut node = bench.node();
    node.setup();

    for _ in 0..5 {
        node.register_save_callback(|_| Ok(())).unwrap();
    }
    let overflow = node.register_save_callback(|_| Ok(()));

    assert!(matches!(overflow, Err(NodeError::CapacityExhausted { .. })));
    assert_eq!(
        bench.system.restarts(),
        vec![RestartReason::CallbackExhausted(CallbackKind::ConfigSaved)]
    );
    assert!(!node.tick().is_running());
}

#[test]
fn test_availability_waits_for_acknowledged_publish() {
    let bench = Bench::new();
    let announced = Rc::new(RefCell::new(0));
    let mut node = bench.node();
    {
        let announced = announced.clone();
        node.register_availability_callback(move |bus| {
            *announced.borrow_mut() += 1;
            let topic = bus.node_topic("state");
            bus.send(&topic, "off");
            Ok(())
        })
        .unwrap();
    }
    node.setup();

    bench.bus.set_publish_failing(true);
    node.tick();
    node.tick();
    assert_eq!(*announced.borrow(), 0);
    assert!(bench.bus.published().is_empty());

    bench.bus.set_publish_failing(false);
    node.tick();
    node.tick();

    assert_eq!(*announced.borrow(), 1);
    assert_eq!(bench.bus.payloads_on(&topic("available")), vec!["true"]);
    assert_eq!(bench.bus.payloads_on(&topic("mqtt/send")), vec!["on"]);
    assert_eq!(bench.bus.payloads_on(&topic("debug/serial")), vec!["on"]);
    assert_eq!(bench.bus.payloads_on(&topic("debug/remote")), vec!["off"]);
    assert_eq!(bench.bus.payloads_on(&topic("state")), vec!["off"]);
}

#[test]
fn test_broadcast_announce_repeats_handshake() {
    let bench = Bench::new();
    let mut node = bench.node();
    node.setup();
    node.tick();

    bench.bus.inject("fieldnode/cmd", "announce");
    node.tick();
    bench.bus.inject("fieldnode/cmd", "hello");
    node.tick();

    assert_eq!(
        bench.bus.payloads_on(&topic("available")),
        vec!["true", "true"]
    );
}

#[test]
fn test_reconnect_after_broker_loss() {
    let bench = Bench::new();
    let mut node = bench.node();
    node.setup();
    node.tick();
    assert_eq!(bench.bus.connect_calls(), 1);

    bench.bus.drop_connection();
    bench.bus.set_online(false);
    node.tick();
    assert!(!node.is_bus_connected());

    // retries are spaced out
    bench.clock.advance(Duration::from_secs(1));
    node.tick();
    assert_eq!(bench.bus.connect_calls(), 2);

    bench.bus.set_online(true);
    bench.clock.advance(Duration::from_secs(10));
    node.tick();
    assert!(node.is_bus_connected());
    assert_eq!(
        bench.bus.payloads_on(&topic("available")),
        vec!["true", "true"]
    );
}

#[test]
fn test_builtin_commands_are_not_forwarded() {
    let bench = Bench::new();
    let received = Rc::new(RefCell::new(Vec::new()));
    let mut node = bench.node();
    {
        let received = received.clone();
        node.register_message_callback(move |_, message| {
            received.borrow_mut().push(message.topic.clone());
            Ok(())
        })
        .unwrap();
    }
    node.setup();
    node.tick();

    bench.bus.inject(&topic("cmd/mqtt/send"), "off");
    bench.bus.inject(&topic("cmd/debug/serial"), "maybe");
    bench.bus.inject(&topic("cmd/light"), "on");
    node.tick();

    assert_eq!(*received.borrow(), vec![topic("cmd/light")]);
    assert!(!node.send(&topic("state"), "on"));
    assert_eq!(bench.bus.payloads_on(&topic("mqtt/send")), vec!["on", "off"]);
    // unknown payload leaves the flag alone
    assert!(node.config().debug.local);

    bench.bus.inject(&topic("cmd/mqtt/send"), "on");
    node.tick();
    assert!(node.send(&topic("state"), "on"));
}

#[test]
fn test_reboot_without_save_keeps_storage_untouched() {
    let bench = Bench::new();
    let mut node = bench.node();
    node.setup();
    node.tick();

    bench.bus.inject(&topic("cmd/reboot"), "now");
    assert_eq!(
        node.tick(),
        NodeStatus::RestartRequested(RestartReason::RebootCommand)
    );
    assert_eq!(bench.storage.write_count(), 0);
    assert_eq!(
        bench.bus.payloads_on(&topic("available")),
        vec!["true", "false"]
    );
}

/// The settings form as the page renders it for the bench defaults
fn settings_form(port: &str) -> PortalRequest {
    PortalRequest::post("/saveSettings")
        .arg("nodeName", "relay")
        .arg("wifiSsid", "")
        .arg("wifiPass", "")
        .arg("configUser", "admin")
        .arg("configPassword", "")
        .arg("mqttServer", "broker.local")
        .arg("mqttPort", port)
        .arg("mqttUser", "")
        .arg("mqttPassword", "")
        .arg("mqttTopic", format!("fieldnode/{}", UNIQUE))
        .arg("debugSerialEnabled", "1")
        .arg("debugRemoteEnabled", "0")
}

#[test]
fn test_unchanged_settings_neither_write_nor_restart() {
    let bench = Bench::new();
    let mut node = bench.node();
    node.setup();

    let response = bench.request(&mut node, settings_form("1883"));

    assert_eq!(response.status(), Some(200));
    assert!(response.body().contains("/settings"));
    assert_eq!(bench.storage.write_count(), 0);
    assert!(bench.system.restarts().is_empty());
    assert!(node.tick().is_running());
}

#[test]
fn test_changed_settings_write_and_restart() {
    let bench = Bench::new();
    let saved = Rc::new(RefCell::new(0));
    let mut node = bench.node();
    {
        let saved = saved.clone();
        node.register_save_callback(move |_| {
            *saved.borrow_mut() += 1;
            Ok(())
        })
        .unwrap();
    }
    node.setup();

    bench.request(&mut node, settings_form("8883"));

    assert_eq!(bench.storage.write_count(), 1);
    assert_eq!(*saved.borrow(), 1);
    assert_eq!(
        node.status(),
        &NodeStatus::RestartRequested(RestartReason::SettingsChanged)
    );
    let stored = bench.storage.get_string("/config.json").unwrap();
    assert!(stored.contains("\"mqttPort\":8883"));
}

#[test]
fn test_network_change_reconfigures_link_without_write() {
    let bench = Bench::new();
    let mut node = bench.node();
    node.setup();

    bench.request(
        &mut node,
        PortalRequest::post("/saveSettings")
            .arg("wifiSsid", "barn")
            .arg("wifiPass", "hunter2"),
    );

    assert_eq!(bench.storage.write_count(), 0);
    assert_eq!(bench.link.password(), "hunter2");
    assert_eq!(
        bench.system.restarts(),
        vec![RestartReason::SettingsChanged]
    );
}

#[test]
fn test_portal_requires_credentials_when_set() {
    let bench = Bench::new();
    let mut defaults = Bench::defaults();
    defaults.credential.password = "s3cret".to_string();
    let mut node = bench.node_with(defaults);
    node.setup();

    let denied = bench.request(&mut node, PortalRequest::get("/status"));
    assert_eq!(denied.status(), Some(401));
    assert_eq!(
        denied.header("www-authenticate"),
        Some(format!("Basic realm=\"{}\"", UNIQUE))
    );
    assert!(denied.body().is_empty());

    let allowed = bench.request(
        &mut node,
        PortalRequest::get("/status").authorization(encode_basic("admin", "s3cret")),
    );
    assert_eq!(allowed.status(), Some(200));
    assert!(allowed.body().contains("esp-relay"));
}

#[test]
fn test_feature_routes_and_files() {
    let bench = Bench::new();
    let mut node = bench.node();
    node.setup();

    node.register_route("/relay", |ctx| {
        let state = ctx.arg("state").unwrap_or("off").to_string();
        ctx.begin_page("Relay");
        ctx.content_with("<p>relay is {state}</p>", &[("state", state.as_str())]);
        Ok(())
    });
    node.register_button("/relay", "Relay").unwrap();

    let page = bench.request(&mut node, PortalRequest::get("/relay").arg("state", "on"));
    assert!(page.body().contains("relay is on"));
    assert!(page.is_ended());

    let root = bench.request(&mut node, PortalRequest::get("/"));
    assert!(root.body().contains("href='/relay'"));

    let missing = bench.request(&mut node, PortalRequest::get("/nope"));
    assert_eq!(missing.status(), Some(404));

    {
        let mut file = node.open_config_file("/relay.json", OpenMode::Write).unwrap();
        file.write_all(b"{\"on\":true}").unwrap();
    }
    let file = node.open_config_file("/relay.json", OpenMode::Read).unwrap();
    assert_eq!(file.read_to_string().unwrap(), "{\"on\":true}");
}
