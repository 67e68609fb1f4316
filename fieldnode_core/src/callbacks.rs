//! Bounded extension callback tables
//!
//! Feature modules hook into runtime events through three independent tables.
//! A registration takes the next free slot; there is no removal. A full table
//! rejects the handler with [`NodeError::CapacityExhausted`], which the
//! runtime escalates to a restart.

use crate::communication::{BusContext, Message};
use crate::config::SaveContext;
use crate::error::{NodeError, NodeResult};
use log::{debug, error};

/// Slots per table
pub const CALLBACK_CAPACITY: usize = 5;

pub type SaveHandler = Box<dyn FnMut(&mut SaveContext<'_>) -> NodeResult<()>>;
pub type AvailableHandler = Box<dyn FnMut(&mut BusContext<'_>) -> NodeResult<()>>;
pub type MessageHandler = Box<dyn FnMut(&mut BusContext<'_>, &Message) -> NodeResult<()>>;

/// Event kinds with a callback table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    ConfigSaved,
    BusAvailable,
    MessageReceived,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::ConfigSaved => "config-saved",
            CallbackKind::BusAvailable => "bus-available",
            CallbackKind::MessageReceived => "message-received",
        }
    }
}

/// Ordered handler list with an optional hard capacity
pub struct SlotTable<H> {
    name: &'static str,
    slots: Vec<H>,
    capacity: Option<usize>,
}

impl<H> SlotTable<H> {
    pub fn new(name: &'static str, capacity: Option<usize>) -> Self {
        Self {
            name,
            slots: Vec::with_capacity(capacity.unwrap_or(0)),
            capacity,
        }
    }

    /// Place `handler` in the first free slot and return its index
    pub fn register(&mut self, handler: H) -> NodeResult<usize> {
        if let Some(capacity) = self.capacity {
            if self.slots.len() >= capacity {
                return Err(NodeError::CapacityExhausted {
                    table: self.name,
                    capacity,
                });
            }
        }

        self.slots.push(handler);
        debug!("CALLBACK: added {}[{}]", self.name, self.slots.len() - 1);
        Ok(self.slots.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|capacity| self.slots.len() >= capacity)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut H)> {
        self.slots.iter_mut().enumerate()
    }
}

fn report(table: &str, index: usize, result: NodeResult<()>) {
    if let Err(e) = result {
        error!("CALLBACK: {}[{}] failed: {}", table, index, e);
    }
}

/// The three callback tables of a node
pub struct CallbackRegistry {
    saved: SlotTable<SaveHandler>,
    available: SlotTable<AvailableHandler>,
    received: SlotTable<MessageHandler>,
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    /// Tables capped at [`CALLBACK_CAPACITY`]
    pub fn new() -> Self {
        Self::with_capacity(Some(CALLBACK_CAPACITY))
    }

    /// `None` removes the cap
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            saved: SlotTable::new(CallbackKind::ConfigSaved.as_str(), capacity),
            available: SlotTable::new(CallbackKind::BusAvailable.as_str(), capacity),
            received: SlotTable::new(CallbackKind::MessageReceived.as_str(), capacity),
        }
    }

    pub fn register_save<F>(&mut self, handler: F) -> NodeResult<usize>
    where
        F: FnMut(&mut SaveContext<'_>) -> NodeResult<()> + 'static,
    {
        self.saved.register(Box::new(handler))
    }

    pub fn register_available<F>(&mut self, handler: F) -> NodeResult<usize>
    where
        F: FnMut(&mut BusContext<'_>) -> NodeResult<()> + 'static,
    {
        self.available.register(Box::new(handler))
    }

    pub fn register_message<F>(&mut self, handler: F) -> NodeResult<usize>
    where
        F: FnMut(&mut BusContext<'_>, &Message) -> NodeResult<()> + 'static,
    {
        self.received.register(Box::new(handler))
    }

    pub fn len(&self, kind: CallbackKind) -> usize {
        match kind {
            CallbackKind::ConfigSaved => self.saved.len(),
            CallbackKind::BusAvailable => self.available.len(),
            CallbackKind::MessageReceived => self.received.len(),
        }
    }

    pub fn is_full(&self, kind: CallbackKind) -> bool {
        match kind {
            CallbackKind::ConfigSaved => self.saved.is_full(),
            CallbackKind::BusAvailable => self.available.is_full(),
            CallbackKind::MessageReceived => self.received.is_full(),
        }
    }

    /// Run every save handler; returns the number invoked
    pub fn dispatch_saved(&mut self, ctx: &mut SaveContext<'_>) -> usize {
        let mut count = 0;
        for (index, handler) in self.saved.iter_mut() {
            report(CallbackKind::ConfigSaved.as_str(), index, handler(ctx));
            count += 1;
        }
        count
    }

    /// Run every availability handler; returns the number invoked
    pub fn dispatch_available(&mut self, ctx: &mut BusContext<'_>) -> usize {
        let mut count = 0;
        for (index, handler) in self.available.iter_mut() {
            report(CallbackKind::BusAvailable.as_str(), index, handler(ctx));
            count += 1;
        }
        count
    }

    /// Hand `message` to every receive handler; returns the number invoked
    pub fn dispatch_message(&mut self, ctx: &mut BusContext<'_>, message: &Message) -> usize {
        let mut count = 0;
        for (index, handler) in self.received.iter_mut() {
            report(
                CallbackKind::MessageReceived.as_str(),
                index,
                handler(ctx, message),
            );
            count += 1;
        }
        count
    }
}
