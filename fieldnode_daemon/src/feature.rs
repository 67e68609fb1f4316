//! Heartbeat: a small demo feature publishing a counter at a fixed interval
//!
//! - `{base}/heartbeat` carries the counter
//! - `{base}/cmd/heartbeat` with `on`/`off` switches it, echoed on
//!   `{base}/heartbeat/enabled`
//! - `/heartbeat` in the portal shows the state and switches it via `?enabled=`
//! - the switch is persisted in `/heartbeat.json` whenever the node saves

use fieldnode_core::communication::topics::parse_on_off;
use fieldnode_core::error::{NodeError, NodeResult};
use fieldnode_core::{Feature, NodeRuntime, OpenMode};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

pub const STATE_PATH: &str = "/heartbeat.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StoredState {
    enabled: bool,
}

#[derive(Debug)]
struct State {
    enabled: bool,
    beats: u64,
    last_beat: Option<Duration>,
}

pub struct Heartbeat {
    interval: Duration,
    state: Rc<RefCell<State>>,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Rc::new(RefCell::new(State {
                enabled: true,
                beats: 0,
                last_beat: None,
            })),
        }
    }

    fn load(&self, node: &mut NodeRuntime) -> NodeResult<()> {
        let stored = match node.open_config_file(STATE_PATH, OpenMode::Read) {
            Ok(file) => file.read_json::<StoredState>()?,
            Err(NodeError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        self.state.borrow_mut().enabled = stored.enabled;
        Ok(())
    }
}

impl Feature for Heartbeat {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn setup(&mut self, node: &mut NodeRuntime) -> NodeResult<()> {
        if let Err(e) = self.load(node) {
            node.log(&format!("heartbeat: ignoring stored state: {}", e));
        }

        node.register_button("/heartbeat", "Heartbeat")?;

        let state = self.state.clone();
        node.register_route("/heartbeat", move |ctx| {
            if let Some(switch) = ctx.arg("enabled").and_then(parse_on_off) {
                let mut state = state.borrow_mut();
                if state.enabled != switch {
                    state.enabled = switch;
                    ctx.request_save();
                }
            }

            let state = state.borrow();
            let enabled = if state.enabled { "on" } else { "off" };
            let beats = state.beats.to_string();
            ctx.begin_page("Heartbeat");
            ctx.content_with(
                "<p>Heartbeat is {enabled}, {beats} beats sent.</p>\
                 <a href='/heartbeat?enabled=on'><button>On</button></a>\
                 <a href='/heartbeat?enabled=off'><button>Off</button></a><hr>",
                &[("enabled", enabled), ("beats", beats.as_str())],
            );
            ctx.content("<a href='/'><button>Back</button></a>");
            Ok(())
        });

        let command = node.node_command_topic("heartbeat");
        let state = self.state.clone();
        node.register_message_callback(move |bus, message| {
            if message.topic != command {
                return Ok(());
            }
            let Some(switch) = parse_on_off(&message.payload) else {
                return Err(NodeError::InvalidInput(format!(
                    "heartbeat switch '{}'",
                    message.payload
                )));
            };
            state.borrow_mut().enabled = switch;
            let topic = bus.node_topic("heartbeat/enabled");
            let payload = bus.on_off_payload(switch);
            bus.send(&topic, payload);
            Ok(())
        })?;

        let state = self.state.clone();
        node.register_availability_callback(move |bus| {
            let topic = bus.node_topic("heartbeat/enabled");
            let payload = bus.on_off_payload(state.borrow().enabled);
            bus.send(&topic, payload);
            Ok(())
        })?;

        let state = self.state.clone();
        node.register_save_callback(move |ctx| {
            let stored = StoredState {
                enabled: state.borrow().enabled,
            };
            ctx.open_config_file(STATE_PATH, OpenMode::Write)?
                .write_json(&stored)
        })?;

        Ok(())
    }

    fn tick(&mut self, node: &mut NodeRuntime) {
        let now = node.uptime();
        let beats = {
            let mut state = self.state.borrow_mut();
            let due = state
                .last_beat
                .map_or(true, |last| now.saturating_sub(last) >= self.interval);
            if !state.enabled || !due || !node.is_bus_connected() {
                return;
            }
            state.beats += 1;
            state.last_beat = Some(now);
            state.beats
        };

        let topic = node.node_topic("heartbeat");
        if !node.send(&topic, &beats.to_string()) {
            node.log(&format!("heartbeat {} not sent", beats));
        }
    }
}
