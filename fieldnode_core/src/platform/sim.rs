//! In-memory platform doubles
//!
//! Every double is a cheap handle over shared state: clone it, hand one copy
//! to the runtime as a boxed trait object and keep the other to drive or
//! inspect the simulated device.

use super::{
    BusClient, Clock, ConnectOptions, Diagnostics, LinkStatus, NetworkLink, PortalServer, Storage,
    SystemControl,
};
use crate::communication::topics::topic_matches;
use crate::communication::Message;
use crate::core::RestartReason;
use crate::error::{NodeError, NodeResult};
use crate::portal::http::{PendingRequest, PortalRequest, ResponseSink};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use std::time::Duration;

/// Clock that only moves when told to; `sleep` advances it
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Address handed out by [`SimLink`] after a successful connect
pub const SIM_LINK_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 4, 2));

#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    addr: Option<IpAddr>,
    failures_left: usize,
    connect_calls: usize,
    disconnect_calls: usize,
    reset_calls: usize,
    ssid: String,
    password: String,
    rssi: Option<i32>,
}

/// Scriptable network link
#[derive(Debug, Clone, Default)]
pub struct SimLink {
    state: Rc<RefCell<LinkState>>,
}

impl SimLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A link that is already up
    pub fn connected() -> Self {
        let link = Self::new();
        link.set_connected(true);
        link
    }

    pub fn set_connected(&self, connected: bool) {
        let mut state = self.state.borrow_mut();
        state.connected = connected;
        state.addr = connected.then_some(SIM_LINK_ADDR);
    }

    /// Report connected while no address is bound
    pub fn set_stale(&self) {
        let mut state = self.state.borrow_mut();
        state.connected = true;
        state.addr = None;
    }

    /// Make the next `count` connect attempts fail
    pub fn fail_connects(&self, count: usize) {
        self.state.borrow_mut().failures_left = count;
    }

    pub fn set_signal_strength(&self, rssi: Option<i32>) {
        self.state.borrow_mut().rssi = rssi;
    }

    pub fn connect_calls(&self) -> usize {
        self.state.borrow().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.borrow().disconnect_calls
    }

    pub fn reset_calls(&self) -> usize {
        self.state.borrow().reset_calls
    }

    pub fn password(&self) -> String {
        self.state.borrow().password.clone()
    }
}

impl NetworkLink for SimLink {
    fn status(&self) -> LinkStatus {
        if self.state.borrow().connected {
            LinkStatus::Connected
        } else {
            LinkStatus::Disconnected
        }
    }

    fn local_addr(&self) -> Option<IpAddr> {
        self.state.borrow().addr
    }

    fn connect(&mut self, _hostname: &str) -> NodeResult<()> {
        let mut state = self.state.borrow_mut();
        state.connect_calls += 1;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(NodeError::communication("association failed"));
        }
        state.connected = true;
        state.addr = Some(SIM_LINK_ADDR);
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.state.borrow_mut();
        state.disconnect_calls += 1;
        state.connected = false;
        state.addr = None;
    }

    fn ssid(&self) -> String {
        self.state.borrow().ssid.clone()
    }

    fn signal_strength(&self) -> Option<i32> {
        self.state.borrow().rssi
    }

    fn configure(&mut self, ssid: &str, password: Option<&str>) -> NodeResult<()> {
        let mut state = self.state.borrow_mut();
        state.ssid = ssid.to_string();
        if let Some(password) = password {
            state.password = password.to_string();
        }
        Ok(())
    }

    fn reset_settings(&mut self) -> NodeResult<()> {
        let mut state = self.state.borrow_mut();
        state.reset_calls += 1;
        state.ssid.clear();
        state.password.clear();
        Ok(())
    }
}

/// Publishes kept by [`LoopbackBus`] for inspection; older ones are dropped
pub const PUBLISHED_RECORD_LIMIT: usize = 1024;

#[derive(Debug)]
struct BusState {
    online: bool,
    connected: bool,
    fail_publish: bool,
    connect_calls: usize,
    last_options: Option<ConnectOptions>,
    subscriptions: Vec<String>,
    published: VecDeque<Message>,
    inbox: VecDeque<Message>,
}

impl Default for BusState {
    fn default() -> Self {
        Self {
            online: true,
            connected: false,
            fail_publish: false,
            connect_calls: 0,
            last_options: None,
            subscriptions: Vec::new(),
            published: VecDeque::new(),
            inbox: VecDeque::new(),
        }
    }
}

/// In-process broker with a single client
///
/// Publishes on a subscribed topic are delivered back to the client, so a
/// node can talk to itself through its own command topics.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBus {
    state: Rc<RefCell<BusState>>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether connect attempts reach the broker
    pub fn set_online(&self, online: bool) {
        self.state.borrow_mut().online = online;
    }

    /// Drop the current session as a broker restart would
    pub fn drop_connection(&self) {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.subscriptions.clear();
    }

    /// Make publishes fail while the session stays up
    pub fn set_publish_failing(&self, failing: bool) {
        self.state.borrow_mut().fail_publish = failing;
    }

    /// Queue an inbound message regardless of subscriptions
    pub fn inject(&self, topic: &str, payload: &str) {
        self.state
            .borrow_mut()
            .inbox
            .push_back(Message::new(topic, payload));
    }

    pub fn connect_calls(&self) -> usize {
        self.state.borrow().connect_calls
    }

    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.state.borrow().last_options.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.borrow().subscriptions.clone()
    }

    /// The most recent successful publishes, oldest first
    pub fn published(&self) -> Vec<Message> {
        self.state.borrow().published.iter().cloned().collect()
    }

    /// Payloads published on `topic`, oldest first
    pub fn payloads_on(&self, topic: &str) -> Vec<String> {
        self.state
            .borrow()
            .published
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }
}

impl BusClient for LoopbackBus {
    fn connect(&mut self, options: &ConnectOptions) -> NodeResult<()> {
        let mut state = self.state.borrow_mut();
        state.connect_calls += 1;
        state.last_options = Some(options.clone());

        if !state.online {
            state.connected = false;
            return Err(NodeError::communication(format!(
                "broker {}:{} unreachable",
                options.host, options.port
            )));
        }

        if options.clean_session {
            state.subscriptions.clear();
        }
        state.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn subscribe(&mut self, filter: &str) -> NodeResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return Err(NodeError::communication("not connected"));
        }
        state.subscriptions.push(filter.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str) -> NodeResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return Err(NodeError::communication("not connected"));
        }
        if state.fail_publish {
            return Err(NodeError::communication(format!("publish to {} failed", topic)));
        }

        let message = Message::new(topic, payload);
        if state.subscriptions.iter().any(|f| topic_matches(f, topic)) {
            state.inbox.push_back(message.clone());
        }
        if state.published.len() == PUBLISHED_RECORD_LIMIT {
            state.published.pop_front();
        }
        state.published.push_back(message);
        Ok(())
    }

    fn poll(&mut self) -> Option<Message> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return None;
        }
        state.inbox.pop_front()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    fail_writes: bool,
    fail_removes: bool,
    writes: usize,
}

/// Storage held in a map
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a document directly, bypassing the write counter
    pub fn insert(&self, path: &str, data: impl AsRef<[u8]>) {
        self.state
            .borrow_mut()
            .files
            .insert(path.to_string(), data.as_ref().to_vec());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state.borrow().files.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.state.borrow().files.get(path).cloned()
    }

    pub fn get_string(&self, path: &str) -> Option<String> {
        self.get(path)
            .and_then(|data| String::from_utf8(data).ok())
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.borrow().files.keys().cloned().collect()
    }

    /// Successful writes so far
    pub fn write_count(&self) -> usize {
        self.state.borrow().writes
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.borrow_mut().fail_writes = fail;
    }

    pub fn fail_removes(&self, fail: bool) {
        self.state.borrow_mut().fail_removes = fail;
    }
}

impl Storage for MemoryStorage {
    fn exists(&self, path: &str) -> bool {
        self.contains(path)
    }

    fn read(&self, path: &str) -> NodeResult<Vec<u8>> {
        self.get(path)
            .ok_or_else(|| NodeError::NotFound(path.to_string()))
    }

    fn write(&mut self, path: &str, data: &[u8]) -> NodeResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(NodeError::storage(format!("storage full writing {}", path)));
        }
        state.files.insert(path.to_string(), data.to_vec());
        state.writes += 1;
        Ok(())
    }

    fn remove(&mut self, path: &str) -> NodeResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_removes {
            return Err(NodeError::storage(format!("cannot remove {}", path)));
        }
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| NodeError::NotFound(path.to_string()))
    }

    fn format(&mut self) -> NodeResult<()> {
        let mut state = self.state.borrow_mut();
        state.files.clear();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ResponseState {
    status: Option<u16>,
    content_type: String,
    headers: Vec<(String, String)>,
    chunks: Vec<String>,
    ended: bool,
}

/// Response sink that records everything written to it
#[derive(Debug, Clone, Default)]
pub struct RecordedResponse {
    state: Rc<RefCell<ResponseState>>,
}

impl RecordedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status code, `None` until the response was started
    pub fn status(&self) -> Option<u16> {
        self.state.borrow().status
    }

    pub fn content_type(&self) -> String {
        self.state.borrow().content_type.clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.state
            .borrow()
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    pub fn chunks(&self) -> Vec<String> {
        self.state.borrow().chunks.clone()
    }

    /// All chunks concatenated
    pub fn body(&self) -> String {
        self.state.borrow().chunks.concat()
    }

    pub fn is_ended(&self) -> bool {
        self.state.borrow().ended
    }
}

impl ResponseSink for RecordedResponse {
    fn begin(&mut self, status: u16, content_type: &str, headers: &[(String, String)]) {
        let mut state = self.state.borrow_mut();
        state.status = Some(status);
        state.content_type = content_type.to_string();
        state.headers = headers.to_vec();
    }

    fn chunk(&mut self, content: &str) {
        self.state.borrow_mut().chunks.push(content.to_string());
    }

    fn end(&mut self) {
        self.state.borrow_mut().ended = true;
    }
}

/// Portal listener fed by the test
#[derive(Debug, Clone, Default)]
pub struct QueuedPortal {
    queue: Rc<RefCell<VecDeque<PendingRequest>>>,
}

impl QueuedPortal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `request` and return the handle its response will be recorded in
    pub fn push(&self, request: PortalRequest) -> RecordedResponse {
        let response = RecordedResponse::new();
        self.queue
            .borrow_mut()
            .push_back(PendingRequest::new(request, Box::new(response.clone())));
        response
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl PortalServer for QueuedPortal {
    fn accept(&mut self) -> Option<PendingRequest> {
        self.queue.borrow_mut().pop_front()
    }
}

#[derive(Debug, Default)]
struct SystemState {
    hardware_id: [u8; 6],
    restarts: Vec<RestartReason>,
    firmware: Vec<Vec<u8>>,
    fail_firmware: bool,
    diagnostics: Diagnostics,
}

/// Records restarts and firmware images instead of acting on them
#[derive(Debug, Clone, Default)]
pub struct SimSystem {
    state: Rc<RefCell<SystemState>>,
}

impl SimSystem {
    pub fn new(hardware_id: [u8; 6]) -> Self {
        let system = Self::default();
        system.state.borrow_mut().hardware_id = hardware_id;
        system
    }

    pub fn restarts(&self) -> Vec<RestartReason> {
        self.state.borrow().restarts.clone()
    }

    pub fn firmware_images(&self) -> Vec<Vec<u8>> {
        self.state.borrow().firmware.clone()
    }

    pub fn fail_firmware(&self, fail: bool) {
        self.state.borrow_mut().fail_firmware = fail;
    }

    pub fn set_diagnostics(&self, diagnostics: Diagnostics) {
        self.state.borrow_mut().diagnostics = diagnostics;
    }
}

impl SystemControl for SimSystem {
    fn hardware_id(&self) -> [u8; 6] {
        self.state.borrow().hardware_id
    }

    fn restart(&mut self, reason: &RestartReason) {
        self.state.borrow_mut().restarts.push(reason.clone());
    }

    fn apply_firmware(&mut self, image: &[u8]) -> NodeResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_firmware {
            return Err(NodeError::storage("firmware image rejected"));
        }
        if image.is_empty() {
            return Err(NodeError::InvalidInput("empty firmware image".to_string()));
        }
        state.firmware.push(image.to_vec());
        Ok(())
    }

    fn diagnostics(&self) -> Diagnostics {
        self.state.borrow().diagnostics.clone()
    }
}
