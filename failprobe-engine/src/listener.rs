//! Topology listeners composed by the orchestrator

use failprobe_core::{ServerAddress, TopologyListener, TopologyNotification};
use std::sync::Arc;
use tracing::info;

/// Fans every event out to each listener, in registration order
#[derive(Default, Clone)]
pub struct CompositeListener {
    listeners: Vec<Arc<dyn TopologyListener>>,
}

impl CompositeListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, listener: Arc<dyn TopologyListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn push(&mut self, listener: Arc<dyn TopologyListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl TopologyListener for CompositeListener {
    fn on_server_opened(&self, address: &ServerAddress) {
        for listener in &self.listeners {
            listener.on_server_opened(address);
        }
    }

    fn on_description_changed(&self, notification: &TopologyNotification) {
        for listener in &self.listeners {
            listener.on_description_changed(notification);
        }
    }

    fn on_server_closed(&self, address: &ServerAddress) {
        for listener in &self.listeners {
            listener.on_server_closed(address);
        }
    }
}

/// Logs every topology event
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl TopologyListener for LoggingListener {
    fn on_server_opened(&self, address: &ServerAddress) {
        info!(server = %address, "Server opened");
    }

    fn on_description_changed(&self, notification: &TopologyNotification) {
        info!(
            server = %notification.address,
            previous = %notification.previous,
            new = %notification.new,
            "Server description changed"
        );
    }

    fn on_server_closed(&self, address: &ServerAddress) {
        info!(server = %address, "Server closed");
    }
}
