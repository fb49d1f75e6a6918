//! Last-known device capabilities advertised by the bridge.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tillbridge_core::constants::DEST_CAPABILITIES;
use tillbridge_core::{Capabilities, CapabilitiesMessage, Peripheral};
use tracing::{debug, warn};

use crate::listeners::Listeners;
use crate::{InboundMessage, SubscriptionRouter, Unsubscribe};

/// Tracks the capability broadcast.
///
/// Every message on `/topic/capabilities` replaces the whole value; fields
/// missing from the latest message are gone afterwards. Reads are snapshot
/// reads of the last message and never wait.
#[derive(Clone)]
pub struct CapabilityRegistry {
    inner: Arc<Registry>,
}

struct Registry {
    router: SubscriptionRouter,
    snapshot: RwLock<Snapshot>,
    listeners: Listeners<Capabilities>,
    subscription: Mutex<Option<Unsubscribe>>,
}

#[derive(Default)]
struct Snapshot {
    capabilities: Capabilities,
    device_id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl CapabilityRegistry {
    /// Create an empty registry. Call [`start`](Self::start) to follow the
    /// broadcast.
    pub fn new(router: SubscriptionRouter) -> Self {
        Self {
            inner: Arc::new(Registry {
                router,
                snapshot: RwLock::new(Snapshot::default()),
                listeners: Listeners::new(),
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to the capability broadcast. Idempotent.
    pub fn start(&self) {
        let mut subscription = self.inner.subscription.lock();
        if subscription.is_some() {
            return;
        }

        let registry: Weak<Registry> = Arc::downgrade(&self.inner);
        *subscription = Some(self.inner.router.subscribe(DEST_CAPABILITIES, move |msg| {
            if let Some(registry) = registry.upgrade() {
                registry.apply(msg);
            }
        }));
    }

    /// Drop the broadcast subscription. The last snapshot is kept.
    pub fn stop(&self) {
        if let Some(subscription) = self.inner.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }

    /// Peripherals from the last broadcast, or none before the first one.
    pub fn capabilities(&self) -> Capabilities {
        self.inner.snapshot.read().capabilities.clone()
    }

    /// Whether the last broadcast listed `peripheral` as available.
    pub fn is_available(&self, peripheral: Peripheral) -> bool {
        self.inner.snapshot.read().capabilities.is_available(peripheral)
    }

    /// Bridge device id from the last broadcast that carried one.
    ///
    /// Cleared by a broadcast without `deviceId`, like every other field.
    pub fn device_id(&self) -> Option<String> {
        self.inner.snapshot.read().device_id.clone()
    }

    /// Bridge timestamp of the last broadcast.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.inner.snapshot.read().timestamp
    }

    /// Register a listener called with each new snapshot.
    pub fn on_change(
        &self,
        listener: impl Fn(&Capabilities) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.inner.listeners.add(listener)
    }
}

impl Registry {
    fn apply(&self, msg: &InboundMessage) {
        let message: CapabilitiesMessage = match msg.json() {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring capability broadcast: {}", e);
                return;
            }
        };

        debug!(
            device_id = message.device_id.as_deref().unwrap_or("-"),
            "Capabilities updated"
        );

        let capabilities = message.capabilities.clone();
        *self.snapshot.write() = Snapshot {
            capabilities: message.capabilities,
            device_id: message.device_id,
            timestamp: message.timestamp,
        };
        self.listeners.notify(&capabilities);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Outbound;
    use tillbridge_protocol::{Command, Frame};
    use tokio::sync::mpsc;

    fn registry() -> (CapabilityRegistry, SubscriptionRouter, mpsc::UnboundedReceiver<Frame>) {
        let outbound = Outbound::new();
        let (tx, rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        let router = SubscriptionRouter::new(outbound);
        (CapabilityRegistry::new(router.clone()), router, rx)
    }

    fn broadcast(router: &SubscriptionRouter, body: serde_json::Value) {
        router.dispatch(
            &Frame::new(Command::Message)
                .with_header("destination", DEST_CAPABILITIES)
                .with_body(body.to_string()),
        );
    }

    #[test]
    fn test_start_is_idempotent() {
        let (registry, router, mut rx) = registry();
        registry.start();
        registry.start();

        assert_eq!(router.handler_count(DEST_CAPABILITIES), 1);
        assert_eq!(rx.try_recv().unwrap().command, Command::Subscribe);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_replaces_not_merges() {
        let (registry, router, _rx) = registry();
        registry.start();

        broadcast(
            &router,
            serde_json::json!({
                "type": "capabilities",
                "deviceId": "lane-1",
                "capabilities": {
                    "scanner": { "available": true },
                    "printer": { "available": true, "type": "thermal" }
                }
            }),
        );
        assert!(registry.is_available(Peripheral::Printer));
        assert_eq!(registry.device_id().as_deref(), Some("lane-1"));

        broadcast(
            &router,
            serde_json::json!({
                "type": "capabilities",
                "capabilities": { "scanner": { "available": true } }
            }),
        );

        let caps = registry.capabilities();
        assert!(caps.printer.is_none());
        assert!(caps.scanner.is_some());
        assert!(!registry.is_available(Peripheral::Printer));
        assert_eq!(registry.device_id(), None);
    }

    #[test]
    fn test_listeners_receive_update() {
        let (registry, router, _rx) = registry();
        registry.start();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = registry.on_change(move |caps| {
            sink.lock().push(caps.is_available(Peripheral::Payment));
        });

        broadcast(
            &router,
            serde_json::json!({
                "timestamp": "2025-10-05T12:46:06Z",
                "capabilities": { "payment": { "available": true, "methods": ["chip"] } }
            }),
        );

        assert_eq!(*seen.lock(), vec![true]);
        assert!(registry.last_updated().is_some());
    }

    #[test]
    fn test_invalid_broadcast_keeps_previous() {
        let (registry, router, _rx) = registry();
        registry.start();

        broadcast(
            &router,
            serde_json::json!({ "capabilities": { "lights": { "available": true } } }),
        );
        router.dispatch(
            &Frame::new(Command::Message)
                .with_header("destination", DEST_CAPABILITIES)
                .with_body("garbage"),
        );

        assert!(registry.is_available(Peripheral::Lights));
    }

    #[test]
    fn test_stop_unsubscribes() {
        let (registry, router, _rx) = registry();
        registry.start();
        registry.stop();
        assert_eq!(router.handler_count(DEST_CAPABILITIES), 0);
    }
}
