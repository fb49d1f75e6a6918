//! Destination-based dispatch of `MESSAGE` frames.
//!
//! Many handlers can share one destination; the router keeps a single wire
//! subscription per destination and fans every message out to all of them.
//!
//! # Matching
//!
//! A message is delivered to a subscription when its destination equals the
//! subscribed destination or starts with it. A handler on `/topic/scanner`
//! therefore also receives `/topic/scanner/events`. The match is a plain
//! string prefix, so `/topic/scan` matches `/topic/scanner` as well.
//!
//! # Connection lifecycle
//!
//! Registrations outlive the connection. When the link drops the wire ids
//! are forgotten; on the next successful connect every destination that
//! still has handlers is subscribed again with a fresh id.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tillbridge_core::constants::HEADER_SUBSCRIPTION;
use tillbridge_protocol::{Frame, Headers};
use tracing::{debug, trace, warn};

use crate::{Outbound, Result, Unsubscribe};

type Handler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// A `MESSAGE` frame as seen by subscription handlers.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub destination: String,
    pub subscription: Option<String>,
    pub headers: Headers,
    pub body: Bytes,
}

impl InboundMessage {
    /// Deserialize the JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            tillbridge_core::Error::invalid_payload(&self.destination, e.to_string()).into()
        })
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

#[derive(Clone)]
pub struct SubscriptionRouter {
    state: Arc<Mutex<RouterState>>,
    outbound: Outbound,
}

#[derive(Default)]
struct RouterState {
    destinations: BTreeMap<String, Destination>,
    next_wire_id: u64,
    next_handler_id: u64,
}

#[derive(Default)]
struct Destination {
    wire_id: Option<String>,
    handlers: Vec<(u64, Handler)>,
}

impl RouterState {
    fn allocate_wire_id(&mut self) -> String {
        let id = format!("sub-{}", self.next_wire_id);
        self.next_wire_id += 1;
        id
    }
}

impl SubscriptionRouter {
    pub fn new(outbound: Outbound) -> Self {
        Self {
            state: Arc::default(),
            outbound,
        }
    }

    /// Register `handler` for messages on `destination`.
    ///
    /// Never fails: if the connection is down the `SUBSCRIBE` goes out on the
    /// next connect.
    pub fn subscribe(
        &self,
        destination: &str,
        handler: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> Unsubscribe {
        let handler_id = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let handler_id = state.next_handler_id;
            state.next_handler_id += 1;

            let entry = state.destinations.entry(destination.to_string()).or_default();
            entry.handlers.push((handler_id, Arc::new(handler)));

            if entry.wire_id.is_none() && self.outbound.is_attached() {
                let id = format!("sub-{}", state.next_wire_id);
                state.next_wire_id += 1;
                match self.outbound.send(Frame::subscribe(&id, destination)) {
                    Ok(()) => {
                        debug!(destination, subscription = %id, "Subscribed");
                        entry.wire_id = Some(id);
                    }
                    Err(e) => debug!(destination, "Subscribe deferred: {}", e),
                }
            }
            handler_id
        };

        let router = self.clone();
        let destination = destination.to_string();
        Unsubscribe::new(move || router.remove(&destination, handler_id))
    }

    fn remove(&self, destination: &str, handler_id: u64) {
        let mut state = self.state.lock();
        let Some(entry) = state.destinations.get_mut(destination) else {
            return;
        };

        entry.handlers.retain(|(id, _)| *id != handler_id);
        if !entry.handlers.is_empty() {
            return;
        }

        if let Some(entry) = state.destinations.remove(destination)
            && let Some(id) = entry.wire_id
        {
            match self.outbound.send(Frame::unsubscribe(&id)) {
                Ok(()) => debug!(destination, subscription = %id, "Unsubscribed"),
                Err(e) => trace!(destination, "Unsubscribe not sent: {}", e),
            }
        }
    }

    /// Deliver a `MESSAGE` frame to every matching handler.
    pub fn dispatch(&self, frame: &Frame) {
        let Some(destination) = frame.destination() else {
            warn!("MESSAGE without destination header dropped");
            return;
        };

        let handlers: Vec<Handler> = self
            .state
            .lock()
            .destinations
            .iter()
            .filter(|(subscribed, _)| destination.starts_with(subscribed.as_str()))
            .flat_map(|(_, entry)| entry.handlers.iter().map(|(_, h)| Arc::clone(h)))
            .collect();

        if handlers.is_empty() {
            debug!(destination, "No handler for message");
            return;
        }

        let message = InboundMessage {
            destination: destination.to_string(),
            subscription: frame.header(HEADER_SUBSCRIPTION).map(str::to_string),
            headers: frame.headers.clone(),
            body: frame.body.clone(),
        };

        trace!(destination, handlers = handlers.len(), "Dispatching message");
        for handler in handlers {
            handler(&message);
        }
    }

    /// Subscribe every destination that has handlers but no live wire id.
    pub(crate) fn on_connected(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let pending: Vec<String> = state
            .destinations
            .iter()
            .filter(|(_, entry)| entry.wire_id.is_none())
            .map(|(dest, _)| dest.clone())
            .collect();

        for destination in pending {
            let id = state.allocate_wire_id();
            if let Err(e) = self.outbound.send(Frame::subscribe(&id, &destination)) {
                warn!(destination = %destination, "Resubscribe failed: {}", e);
                return;
            }
            debug!(destination = %destination, subscription = %id, "Subscribed");
            if let Some(entry) = state.destinations.get_mut(&destination) {
                entry.wire_id = Some(id);
            }
        }
    }

    /// Forget wire ids; handlers stay registered.
    pub(crate) fn on_connection_lost(&self) {
        for entry in self.state.lock().destinations.values_mut() {
            entry.wire_id = None;
        }
    }

    /// Drop every registration without sending anything.
    pub fn clear(&self) {
        self.state.lock().destinations.clear();
    }

    pub fn destinations(&self) -> Vec<String> {
        self.state.lock().destinations.keys().cloned().collect()
    }

    pub fn handler_count(&self, destination: &str) -> usize {
        self.state
            .lock()
            .destinations
            .get(destination)
            .map_or(0, |entry| entry.handlers.len())
    }

    /// Wire subscription id currently used for `destination`.
    pub fn wire_id(&self, destination: &str) -> Option<String> {
        self.state
            .lock()
            .destinations
            .get(destination)
            .and_then(|entry| entry.wire_id.clone())
    }
}
