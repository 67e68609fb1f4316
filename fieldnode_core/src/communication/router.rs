//! Message-bus client ownership, reconnect timing and built-in commands

use super::message::Message;
use super::reconnect::{ConnectionHealth, RetryStrategy, RetryTimer};
use super::topics::{
    on_off_payload, parse_on_off, TopicNamespace, ANNOUNCE_PAYLOAD, AVAILABLE_SUBTOPIC,
    DEBUG_LOCAL_SUBTOPIC, DEBUG_LOG_SUBTOPIC, DEBUG_REMOTE_SUBTOPIC, ENABLE_SEND_SUBTOPIC,
    OFFLINE_PAYLOAD, ONLINE_PAYLOAD, REBOOT_SUBTOPIC, SAVE_PAYLOAD,
};
use crate::callbacks::CallbackRegistry;
use crate::config::{BusConfig, DebugConfig};
use crate::platform::{BusClient, ConnectOptions};
use log::{debug, info, warn};
use std::time::Duration;

pub const KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Connection state of the bus client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Disconnected,
    Connecting,
    Connected,
}

/// Outcome of [`MessageBusRouter::publish_availability`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Offline payload sent ahead of a restart
    Offline { delivered: bool },
    /// Online payload acknowledged; companions sent and callbacks run
    Announced,
    /// Online payload not acknowledged, retried on the next call
    Pending,
    /// Nothing pending
    Idle,
}

/// Restart requested through the reboot command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebootRequest {
    /// Persist the configuration before restarting
    pub save: bool,
}

/// Built-in command topics, in matching precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Reboot,
    EnableSend,
    DebugLocal,
    DebugRemote,
    Announce,
}

pub struct MessageBusRouter {
    client: Box<dyn BusClient>,
    client_id: String,
    config: BusConfig,
    topics: TopicNamespace,
    retry: RetryTimer,
    state: BusState,
    availability_pending: bool,
    send_enabled: bool,
}

impl MessageBusRouter {
    pub fn new(client: Box<dyn BusClient>) -> Self {
        Self {
            client,
            client_id: String::new(),
            config: BusConfig::default(),
            topics: TopicNamespace::new("node", ""),
            retry: RetryTimer::new(RetryStrategy::default()),
            state: BusState::Disconnected,
            availability_pending: true,
            send_enabled: true,
        }
    }

    /// Builder: override the reconnect policy
    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry = RetryTimer::new(strategy);
        self
    }

    /// Apply broker settings and the node's topic namespace
    pub fn configure(&mut self, client_id: &str, config: BusConfig, topics: TopicNamespace) {
        self.client_id = client_id.to_string();
        self.config = config;
        self.topics = topics;
    }

    pub fn set_topics(&mut self, topics: TopicNamespace) {
        self.topics = topics;
    }

    pub fn topics(&self) -> &TopicNamespace {
        &self.topics
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn health(&self) -> &ConnectionHealth {
        self.retry.health()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn is_availability_pending(&self) -> bool {
        self.availability_pending
    }

    pub fn is_send_enabled(&self) -> bool {
        self.send_enabled
    }

    pub fn set_send_enabled(&mut self, enabled: bool) {
        self.send_enabled = enabled;
    }

    /// Connect or reconnect, gated by the retry timer. Returns the connection state.
    pub fn maintain_connection(&mut self, now: Duration) -> bool {
        if self.client.is_connected() {
            self.state = BusState::Connected;
            return true;
        }

        if self.state == BusState::Connected {
            warn!("MQTT: connection to {} lost", self.config.server);
            self.state = BusState::Disconnected;
        }

        if self.config.server.is_empty() || !self.retry.ready(now) {
            return false;
        }

        self.state = BusState::Connecting;
        let options = self.connect_options();

        match self.client.connect(&options) {
            Ok(()) if self.client.is_connected() => {
                self.retry.mark_connected();
                self.state = BusState::Connected;
                self.availability_pending = true;
                info!("MQTT: connection established to {}", self.config.server);

                for filter in [
                    self.topics.node_command_topic("#"),
                    self.topics.common_command_topic("#"),
                ] {
                    if let Err(e) = self.client.subscribe(&filter) {
                        warn!("MQTT: subscribe to {} failed: {}", filter, e);
                    }
                }
                true
            }
            result => {
                self.retry.mark_failed(now);
                self.state = BusState::Disconnected;
                match result {
                    Err(e) => warn!("MQTT: connection could not be established: {}", e),
                    Ok(()) => warn!("MQTT: connection could not be established"),
                }
                false
            }
        }
    }

    fn connect_options(&self) -> ConnectOptions {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        ConnectOptions {
            client_id: self.client_id.clone(),
            host: self.config.server.clone(),
            port: self.config.port,
            username: non_empty(&self.config.user),
            password: non_empty(&self.config.password),
            keep_alive: KEEP_ALIVE,
            clean_session: true,
            timeout: CONNECT_TIMEOUT,
        }
    }

    /// Announce or withdraw the node
    ///
    /// With `resetting` the offline payload is sent whatever the pending flag
    /// says. Otherwise a pending online payload is attempted; only an
    /// acknowledged publish clears the flag, sends the status companions and
    /// runs the availability callbacks.
    pub fn publish_availability(
        &mut self,
        resetting: bool,
        debug: &DebugConfig,
        registry: &mut CallbackRegistry,
    ) -> Availability {
        let topic = self.topics.node_topic(AVAILABLE_SUBTOPIC);

        if resetting {
            info!("MQTT: preparing reset, sending available --> {}", OFFLINE_PAYLOAD);
            let delivered = self.publish(&topic, OFFLINE_PAYLOAD);
            return Availability::Offline { delivered };
        }

        if !self.availability_pending {
            return Availability::Idle;
        }

        debug!("MQTT: sending pending available state --> {}", ONLINE_PAYLOAD);
        if !self.publish(&topic, ONLINE_PAYLOAD) {
            return Availability::Pending;
        }
        self.availability_pending = false;

        let send_enabled = on_off_payload(self.send_enabled);
        for (sub, payload) in [
            (ENABLE_SEND_SUBTOPIC, send_enabled),
            (DEBUG_LOCAL_SUBTOPIC, on_off_payload(debug.local)),
            (DEBUG_REMOTE_SUBTOPIC, on_off_payload(debug.remote)),
        ] {
            let topic = self.topics.node_topic(sub);
            self.publish(&topic, payload);
        }

        let mut ctx = BusContext::new(self);
        registry.dispatch_available(&mut ctx);
        Availability::Announced
    }

    /// Re-arm the availability handshake
    pub fn request_announce(&mut self) {
        self.availability_pending = true;
    }

    /// Next inbound message from the client
    pub fn poll(&mut self) -> Option<Message> {
        self.client.poll()
    }

    fn match_builtin(&self, topic: &str) -> Option<Builtin> {
        if topic == self.topics.node_command_topic(REBOOT_SUBTOPIC) {
            Some(Builtin::Reboot)
        } else if topic == self.topics.node_command_topic(ENABLE_SEND_SUBTOPIC) {
            Some(Builtin::EnableSend)
        } else if topic == self.topics.node_command_topic(DEBUG_LOCAL_SUBTOPIC) {
            Some(Builtin::DebugLocal)
        } else if topic == self.topics.node_command_topic(DEBUG_REMOTE_SUBTOPIC) {
            Some(Builtin::DebugRemote)
        } else if topic == self.topics.common_command_topic("") {
            Some(Builtin::Announce)
        } else {
            None
        }
    }

    /// Handle one inbound message
    ///
    /// Built-in commands are consumed here and never reach the message
    /// callbacks. A reboot command is handed back to the caller, which owns
    /// the configuration store and the restart.
    pub fn dispatch(
        &mut self,
        message: &Message,
        debug: &mut DebugConfig,
        registry: &mut CallbackRegistry,
    ) -> Option<RebootRequest> {
        debug!("MQTT: message arrived {}", message);

        let builtin = match self.match_builtin(&message.topic) {
            Some(builtin) => builtin,
            None => {
                let mut ctx = BusContext::new(self);
                registry.dispatch_message(&mut ctx, message);
                return None;
            }
        };

        let (sub, flag) = match builtin {
            Builtin::Reboot => {
                return Some(RebootRequest {
                    save: message.payload == SAVE_PAYLOAD,
                });
            }
            Builtin::Announce => {
                if message.payload == ANNOUNCE_PAYLOAD {
                    self.request_announce();
                    self.publish_availability(false, debug, registry);
                } else {
                    warn!("MQTT: unknown payload in topic {}", message);
                }
                return None;
            }
            Builtin::EnableSend => (ENABLE_SEND_SUBTOPIC, &mut self.send_enabled),
            Builtin::DebugLocal => (DEBUG_LOCAL_SUBTOPIC, &mut debug.local),
            Builtin::DebugRemote => (DEBUG_REMOTE_SUBTOPIC, &mut debug.remote),
        };

        match parse_on_off(&message.payload) {
            Some(on) => {
                *flag = on;
                let topic = self.topics.node_topic(sub);
                self.publish(&topic, &message.payload);
            }
            None => warn!("MQTT: unknown payload in topic {}", message),
        }
        None
    }

    /// Feature publish, suppressed while sending is disabled
    pub fn send(&mut self, topic: &str, payload: &str) -> bool {
        if !self.send_enabled {
            return false;
        }
        self.publish(topic, payload)
    }

    /// Publish bypassing the send switch; used for status and debug output
    pub fn publish(&mut self, topic: &str, payload: &str) -> bool {
        match self.client.publish(topic, payload) {
            Ok(()) => true,
            Err(e) => {
                debug!("MQTT: publish '{}' failed: {}", topic, e);
                false
            }
        }
    }

    /// Remote debug output on the node's log topic
    pub fn publish_log(&mut self, line: &str) -> bool {
        if !self.client.is_connected() {
            return false;
        }
        let topic = self.topics.node_topic(DEBUG_LOG_SUBTOPIC);
        self.publish(&topic, line)
    }
}

/// Bus access handed to availability and message callbacks
pub struct BusContext<'a> {
    router: &'a mut MessageBusRouter,
}

impl<'a> BusContext<'a> {
    pub fn new(router: &'a mut MessageBusRouter) -> Self {
        Self { router }
    }

    /// See [`MessageBusRouter::send`]
    pub fn send(&mut self, topic: &str, payload: &str) -> bool {
        self.router.send(topic, payload)
    }

    pub fn node_topic(&self, sub: &str) -> String {
        self.router.topics.node_topic(sub)
    }

    pub fn node_command_topic(&self, sub: &str) -> String {
        self.router.topics.node_command_topic(sub)
    }

    pub fn on_off_payload(&self, on: bool) -> &'static str {
        on_off_payload(on)
    }

    pub fn is_connected(&self) -> bool {
        self.router.is_connected()
    }

    pub fn is_send_enabled(&self) -> bool {
        self.router.send_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::LoopbackBus;
    use std::cell::RefCell;
    use std::rc::Rc;

    const NAME: &str = "relay_a0b1c2d3e4f5";

    fn router() -> (MessageBusRouter, LoopbackBus) {
        let bus = LoopbackBus::new();
        let mut router = MessageBusRouter::new(Box::new(bus.clone()));
        let config = BusConfig {
            server: "broker.local".to_string(),
            user: "node".to_string(),
            ..BusConfig::default()
        };
        router.configure(NAME, config, TopicNamespace::new(NAME, ""));
        (router, bus)
    }

    fn topic(sub: &str) -> String {
        format!("fieldnode/{}/{}", NAME, sub)
    }

    #[test]
    fn test_connect_subscribes_and_arms_availability() {
        let (mut router, bus) = router();

        assert!(router.maintain_connection(Duration::ZERO));
        assert_eq!(router.state(), BusState::Connected);
        assert!(router.is_availability_pending());
        assert_eq!(
            bus.subscriptions(),
            vec![topic("cmd/#"), "fieldnode/cmd/#".to_string()]
        );

        let options = bus.last_options().unwrap();
        assert_eq!(options.client_id, NAME);
        assert_eq!(options.keep_alive, KEEP_ALIVE);
        assert!(options.clean_session);
        assert_eq!(options.timeout, CONNECT_TIMEOUT);
        assert_eq!(options.username.as_deref(), Some("node"));
        assert_eq!(options.password, None);
    }

    #[test]
    fn test_reconnect_waits_for_retry_delay() {
        let (mut router, bus) = router();
        bus.set_online(false);

        assert!(!router.maintain_connection(Duration::from_secs(1)));
        assert_eq!(bus.connect_calls(), 1);

        assert!(!router.maintain_connection(Duration::from_secs(5)));
        assert!(!router.maintain_connection(Duration::from_millis(10_999)));
        assert_eq!(bus.connect_calls(), 1);

        bus.set_online(true);
        assert!(router.maintain_connection(Duration::from_secs(11)));
        assert_eq!(bus.connect_calls(), 2);
    }

    #[test]
    fn test_no_server_no_attempt() {
        let bus = LoopbackBus::new();
        let mut router = MessageBusRouter::new(Box::new(bus.clone()));

        assert!(!router.maintain_connection(Duration::ZERO));
        assert_eq!(bus.connect_calls(), 0);
    }

    #[test]
    fn test_availability_retried_until_acknowledged() {
        let (mut router, bus) = router();
        let mut registry = CallbackRegistry::new();
        let fired = Rc::new(RefCell::new(0));
        {
            let fired = fired.clone();
            registry
                .register_available(move |_| {
                    *fired.borrow_mut() += 1;
                    Ok(())
                })
                .unwrap();
        }
        let debug = DebugConfig::default();

        router.maintain_connection(Duration::ZERO);
        bus.set_publish_failing(true);
        for _ in 0..3 {
            assert_eq!(
                router.publish_availability(false, &debug, &mut registry),
                Availability::Pending
            );
        }
        assert!(router.is_availability_pending());
        assert_eq!(*fired.borrow(), 0);

        bus.set_publish_failing(false);
        assert_eq!(
            router.publish_availability(false, &debug, &mut registry),
            Availability::Announced
        );
        assert_eq!(
            router.publish_availability(false, &debug, &mut registry),
            Availability::Idle
        );
        assert_eq!(*fired.borrow(), 1);

        assert_eq!(bus.payloads_on(&topic("available")), vec!["true"]);
        assert_eq!(bus.payloads_on(&topic("mqtt/send")), vec!["on"]);
        assert_eq!(bus.payloads_on(&topic("debug/serial")), vec!["on"]);
        assert_eq!(bus.payloads_on(&topic("debug/remote")), vec!["off"]);
    }

    #[test]
    fn test_resetting_ignores_pending_flag() {
        let (mut router, bus) = router();
        let mut registry = CallbackRegistry::new();
        router.maintain_connection(Duration::ZERO);
        router.publish_availability(false, &DebugConfig::default(), &mut registry);

        let outcome = router.publish_availability(true, &DebugConfig::default(), &mut registry);
        assert_eq!(outcome, Availability::Offline { delivered: true });
        assert_eq!(bus.payloads_on(&topic("available")), vec!["true", "false"]);
    }

    #[test]
    fn test_send_gate() {
        let (mut router, bus) = router();
        let mut registry = CallbackRegistry::new();
        let mut debug = DebugConfig::default();
        router.maintain_connection(Duration::ZERO);

        assert!(router.send("x/state", "1"));
        router.dispatch(
            &Message::new(topic("cmd/mqtt/send"), "off"),
            &mut debug,
            &mut registry,
        );
        assert!(!router.is_send_enabled());
        assert!(!router.send("x/state", "2"));
        assert_eq!(bus.payloads_on("x/state"), vec!["1"]);

        // status publishes bypass the switch
        assert!(router.publish_log("still here"));
    }

    #[test]
    fn test_toggle_commands_echo_and_reject_garbage() {
        let (mut router, bus) = router();
        let mut registry = CallbackRegistry::new();
        let mut debug = DebugConfig::default();
        router.maintain_connection(Duration::ZERO);

        router.dispatch(&Message::new(topic("cmd/debug/remote"), "on"), &mut debug, &mut registry);
        assert!(debug.remote);
        assert_eq!(bus.payloads_on(&topic("debug/remote")), vec!["on"]);

        router.dispatch(&Message::new(topic("cmd/debug/serial"), "ON"), &mut debug, &mut registry);
        assert!(debug.local);
        assert!(bus.payloads_on(&topic("debug/serial")).is_empty());
    }

    #[test]
    fn test_reboot_command() {
        let (mut router, _bus) = router();
        let mut registry = CallbackRegistry::new();
        let mut debug = DebugConfig::default();

        let plain = router.dispatch(&Message::new(topic("cmd/reboot"), ""), &mut debug, &mut registry);
        assert_eq!(plain, Some(RebootRequest { save: false }));

        let save = router.dispatch(&Message::new(topic("cmd/reboot"), "save"), &mut debug, &mut registry);
        assert_eq!(save, Some(RebootRequest { save: true }));
    }

    #[test]
    fn test_announce_republishes_availability() {
        let (mut router, bus) = router();
        let mut registry = CallbackRegistry::new();
        let mut debug = DebugConfig::default();
        router.maintain_connection(Duration::ZERO);
        router.publish_availability(false, &debug, &mut registry);

        router.dispatch(&Message::new("fieldnode/cmd", "hello"), &mut debug, &mut registry);
        assert_eq!(bus.payloads_on(&topic("available")).len(), 1);

        router.dispatch(&Message::new("fieldnode/cmd", "announce"), &mut debug, &mut registry);
        assert_eq!(bus.payloads_on(&topic("available")), vec!["true", "true"]);
        assert!(!router.is_availability_pending());
    }

    #[test]
    fn test_builtins_never_forwarded() {
        let (mut router, _bus) = router();
        let mut registry = CallbackRegistry::new();
        let mut debug = DebugConfig::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            registry
                .register_message(move |_, msg| {
                    seen.borrow_mut().push(msg.clone());
                    Ok(())
                })
                .unwrap();
        }

        router.dispatch(&Message::new(topic("cmd/mqtt/send"), "banana"), &mut debug, &mut registry);
        router.dispatch(&Message::new(topic("cmd/relay"), "on"), &mut debug, &mut registry);

        assert_eq!(*seen.borrow(), vec![Message::new(topic("cmd/relay"), "on")]);
        assert!(router.is_send_enabled());
    }
}
