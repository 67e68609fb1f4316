//! Network link supervision
//!
//! [`ConnectivitySupervisor::poll`] is the cooperative step: it looks at the
//! link once and makes at most one connect attempt. The blocking
//! [`ConnectivitySupervisor::ensure_connected`] loops that step until the link
//! is up, which stalls every other component while it runs.

use crate::communication::reconnect::{ConnectionHealth, RetryStrategy, RetryTimer};
use crate::error::NodeResult;
use crate::platform::{Clock, LinkStatus, NetworkLink};
use log::{debug, info, warn};
use std::net::IpAddr;
use std::time::Duration;

/// Pause between attempts in blocking mode when the policy asks for none
const BLOCKING_IDLE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Which supervisor step the runtime calls each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorMode {
    /// One non-blocking attempt per tick
    #[default]
    Cooperative,
    /// Retry until connected before anything else runs
    Blocking,
}

pub struct ConnectivitySupervisor {
    link: Box<dyn NetworkLink>,
    hostname: String,
    retry: RetryTimer,
    state: LinkState,
    mode: SupervisorMode,
}

impl ConnectivitySupervisor {
    /// Unlimited immediate retries, cooperative stepping
    pub fn new(link: Box<dyn NetworkLink>) -> Self {
        Self {
            link,
            hostname: String::new(),
            retry: RetryTimer::new(RetryStrategy::immediate()),
            state: LinkState::Disconnected,
            mode: SupervisorMode::default(),
        }
    }

    /// Builder: override the retry policy
    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry = RetryTimer::new(strategy);
        self
    }

    /// Builder: select blocking or cooperative stepping
    pub fn with_mode(mut self, mode: SupervisorMode) -> Self {
        self.mode = mode;
        self
    }

    /// Name announced to the network on connect
    pub fn set_hostname(&mut self, hostname: &str) {
        self.hostname = hostname.to_string();
    }

    pub fn mode(&self) -> SupervisorMode {
        self.mode
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn health(&self) -> &ConnectionHealth {
        self.retry.health()
    }

    /// Link up with a usable address
    pub fn is_connected(&self) -> bool {
        self.link.status() == LinkStatus::Connected && self.has_address()
    }

    fn has_address(&self) -> bool {
        self.link
            .local_addr()
            .is_some_and(|addr| !addr.is_unspecified())
    }

    /// One supervision step; returns whether the link is usable afterwards
    pub fn poll(&mut self, now: Duration) -> bool {
        if self.is_connected() {
            if self.state != LinkState::Connected {
                info!("WIFI: connected as {:?}", self.link.local_addr());
                self.retry.mark_connected();
                self.state = LinkState::Connected;
            }
            return true;
        }

        if self.state == LinkState::Connected {
            warn!("WIFI: connection lost");
        }
        self.state = LinkState::Disconnected;

        if self.link.status() == LinkStatus::Connected {
            // connected without an address
            warn!("WIFI: link up without address, disconnecting");
            self.link.disconnect();
        }

        if !self.retry.ready(now) {
            return false;
        }

        self.state = LinkState::Connecting;
        debug!("WIFI: connecting as '{}'", self.hostname);

        match self.link.connect(&self.hostname) {
            Ok(()) if self.is_connected() => {
                info!("WIFI: connected as {:?}", self.link.local_addr());
                self.retry.mark_connected();
                self.state = LinkState::Connected;
                true
            }
            result => {
                if let Err(e) = result {
                    warn!("WIFI: connect failed: {}", e);
                }
                self.retry.mark_failed(now);
                self.state = LinkState::Disconnected;
                false
            }
        }
    }

    /// Step until connected or the retry policy gives up
    pub fn ensure_connected(&mut self, clock: &dyn Clock) -> bool {
        loop {
            if self.poll(clock.now()) {
                return true;
            }
            if self.retry.is_exhausted() {
                warn!("WIFI: giving up after {} attempts", self.retry.failures());
                return false;
            }

            let wait = self.retry.remaining(clock.now());
            clock.sleep(if wait.is_zero() { BLOCKING_IDLE } else { wait });
        }
    }

    /// Step in the configured mode
    pub fn step(&mut self, clock: &dyn Clock) -> bool {
        match self.mode {
            SupervisorMode::Cooperative => self.poll(clock.now()),
            SupervisorMode::Blocking => self.ensure_connected(clock),
        }
    }

    /// Hand new network credentials to the link; `None` keeps the password
    pub fn reconfigure(&mut self, ssid: &str, password: Option<&str>) -> NodeResult<()> {
        info!("WIFI: changing to network '{}'", ssid);
        self.link.configure(ssid, password)
    }

    pub fn reset_settings(&mut self) -> NodeResult<()> {
        info!("WIFI: clearing network settings");
        self.link.reset_settings()
    }

    pub fn ssid(&self) -> String {
        self.link.ssid()
    }

    pub fn local_addr(&self) -> Option<IpAddr> {
        self.link.local_addr()
    }

    pub fn signal_strength(&self) -> Option<i32> {
        self.link.signal_strength()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::{ManualClock, SimLink};

    #[test]
    fn test_poll_makes_one_attempt() {
        let link = SimLink::new();
        link.fail_connects(3);
        let mut supervisor = ConnectivitySupervisor::new(Box::new(link.clone()));

        assert!(!supervisor.poll(Duration::ZERO));
        assert_eq!(link.connect_calls(), 1);
        assert_eq!(supervisor.state(), LinkState::Disconnected);
        assert_eq!(supervisor.health(), &ConnectionHealth::Reconnecting { attempt: 1 });
    }

    #[test]
    fn test_unlimited_retry_until_connected() {
        let link = SimLink::new();
        link.fail_connects(25);
        let mut supervisor = ConnectivitySupervisor::new(Box::new(link.clone()));

        let mut steps = 0;
        while !supervisor.poll(Duration::ZERO) {
            steps += 1;
        }

        assert_eq!(steps, 25);
        assert!(supervisor.is_connected());
        assert_eq!(supervisor.health(), &ConnectionHealth::Connected);
    }

    #[test]
    fn test_stale_link_is_disconnected_first() {
        let link = SimLink::new();
        link.set_stale();
        let mut supervisor = ConnectivitySupervisor::new(Box::new(link.clone()));

        assert!(!supervisor.is_connected());
        assert!(supervisor.poll(Duration::ZERO));
        assert_eq!(link.disconnect_calls(), 1);
        assert_eq!(link.connect_calls(), 1);
    }

    #[test]
    fn test_connected_link_needs_no_attempt() {
        let link = SimLink::connected();
        let mut supervisor = ConnectivitySupervisor::new(Box::new(link.clone()));

        assert!(supervisor.poll(Duration::ZERO));
        assert_eq!(link.connect_calls(), 0);
        assert_eq!(supervisor.state(), LinkState::Connected);
    }

    #[test]
    fn test_blocking_mode_loops() {
        let link = SimLink::new();
        link.fail_connects(4);
        let clock = ManualClock::new();
        let mut supervisor = ConnectivitySupervisor::new(Box::new(link.clone()))
            .with_mode(SupervisorMode::Blocking);

        assert!(supervisor.step(&clock));
        assert_eq!(link.connect_calls(), 5);
        assert_eq!(clock.now(), BLOCKING_IDLE * 4);
    }

    #[test]
    fn test_blocking_gives_up_with_limited_policy() {
        let link = SimLink::new();
        link.fail_connects(10);
        let clock = ManualClock::new();
        let mut supervisor = ConnectivitySupervisor::new(Box::new(link.clone()))
            .with_retry_strategy(RetryStrategy::fixed(Duration::from_secs(1)).with_max_retries(3));

        assert!(!supervisor.ensure_connected(&clock));
        assert_eq!(link.connect_calls(), 3);
        assert_eq!(clock.now(), Duration::from_secs(2));
    }

    #[test]
    fn test_reconfigure_keeps_password() {
        let link = SimLink::new();
        let mut supervisor = ConnectivitySupervisor::new(Box::new(link.clone()));

        supervisor.reconfigure("shed", Some("secret")).unwrap();
        supervisor.reconfigure("barn", None).unwrap();
        assert_eq!(supervisor.ssid(), "barn");
        assert_eq!(link.password(), "secret");
    }
}
