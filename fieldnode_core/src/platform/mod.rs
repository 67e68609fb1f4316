//! # Platform services
//!
//! The runtime never touches hardware directly. Radio, storage, the message-bus
//! transport, the HTTP listener and the restart primitive are provided by the
//! surrounding firmware or host through the traits in this module.
//!
//! - [`fs`]: filesystem-backed [`Storage`] for host builds
//! - [`sim`]: in-memory doubles used by tests and the host daemon

pub mod fs;
pub mod sim;

use crate::communication::Message;
use crate::core::RestartReason;
use crate::error::NodeResult;
use crate::portal::http::PendingRequest;
use std::net::IpAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time source measured from boot
pub trait Clock {
    /// Time elapsed since boot
    fn now(&self) -> Duration;

    /// Block the caller for `duration`
    fn sleep(&self, duration: Duration);
}

/// Wall-clock backed [`Clock`] for host builds
#[derive(Debug, Clone)]
pub struct SystemClock {
    boot: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.boot.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Link-layer state as reported by the radio driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

/// Network link (Wi-Fi station or equivalent)
pub trait NetworkLink {
    fn status(&self) -> LinkStatus;

    /// Address bound to the link, `None` while unassigned
    fn local_addr(&self) -> Option<IpAddr>;

    /// Blocking connect primitive; one attempt per call
    fn connect(&mut self, hostname: &str) -> NodeResult<()>;

    fn disconnect(&mut self);

    /// Name of the configured network
    fn ssid(&self) -> String;

    /// Received signal strength in dBm, if the link reports one
    fn signal_strength(&self) -> Option<i32> {
        None
    }

    /// Store new network credentials. `None` keeps the current password.
    fn configure(&mut self, ssid: &str, password: Option<&str>) -> NodeResult<()>;

    /// Forget stored network credentials
    fn reset_settings(&mut self) -> NodeResult<()>;
}

/// Parameters for one message-bus connect call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub timeout: Duration,
}

/// Publish/subscribe client (MQTT or equivalent)
pub trait BusClient {
    fn connect(&mut self, options: &ConnectOptions) -> NodeResult<()>;

    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, filter: &str) -> NodeResult<()>;

    /// Publish one message; `Ok` means the client acknowledged the send
    fn publish(&mut self, topic: &str, payload: &str) -> NodeResult<()>;

    /// Pump the client and return the next inbound message, if any
    fn poll(&mut self) -> Option<Message>;
}

/// Persistent storage holding whole documents addressed by absolute path
pub trait Storage {
    fn exists(&self, path: &str) -> bool;

    fn read(&self, path: &str) -> NodeResult<Vec<u8>>;

    /// Create or truncate `path` and write `data`
    fn write(&mut self, path: &str, data: &[u8]) -> NodeResult<()>;

    fn remove(&mut self, path: &str) -> NodeResult<()>;

    /// Erase every document
    fn format(&mut self) -> NodeResult<()>;
}

/// HTTP listener feeding the configuration portal
pub trait PortalServer {
    /// Next request waiting to be served, if any
    fn accept(&mut self) -> Option<PendingRequest>;
}

/// Optional system figures shown on the status page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub cpu_mhz: Option<u32>,
    pub free_heap: Option<u64>,
    pub sketch_size: Option<u64>,
    pub free_sketch_space: Option<u64>,
}

/// Device-level control: identity, restart and firmware replacement
pub trait SystemControl {
    /// Hardware identifier (MAC address) used for the unique node name
    fn hardware_id(&self) -> [u8; 6];

    /// Perform or schedule a full device restart
    fn restart(&mut self, reason: &RestartReason);

    /// Write a new firmware image; takes effect on the next restart
    fn apply_firmware(&mut self, image: &[u8]) -> NodeResult<()>;

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics::default()
    }
}

/// Bundle of platform services handed to [`crate::NodeRuntime::new`]
pub struct Platform {
    pub clock: Rc<dyn Clock>,
    pub link: Box<dyn NetworkLink>,
    pub bus: Box<dyn BusClient>,
    pub storage: Box<dyn Storage>,
    pub portal: Box<dyn PortalServer>,
    pub system: Box<dyn SystemControl>,
}
