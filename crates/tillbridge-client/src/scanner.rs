//! Barcode scanner commands and scan events.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tillbridge_core::constants::{DEST_SCANNER_DISABLE, DEST_SCANNER_ENABLE, DEST_SCANNER_EVENTS};
use tillbridge_core::{ScanEvent, ScannerAction, ScannerCommand, ScannerEvent};
use tracing::{debug, info, warn};

use crate::listeners::Listeners;
use crate::{InboundMessage, Outbound, Result, SubscriptionRouter, Unsubscribe};

/// Enable/disable the scanner and receive its reads.
///
/// Commands are fire-and-forget: they are queued on the connection and the
/// local `enabled` flag flips as soon as queueing succeeds.
#[derive(Clone)]
pub struct ScannerService {
    inner: Arc<ScannerInner>,
}

struct ScannerInner {
    outbound: Outbound,
    router: SubscriptionRouter,
    enabled: AtomicBool,
    handlers: Listeners<ScanEvent>,
    /// Router registration shared by all scan handlers.
    subscription: Mutex<Option<Unsubscribe>>,
}

impl ScannerService {
    pub fn new(outbound: Outbound, router: SubscriptionRouter) -> Self {
        Self {
            inner: Arc::new(ScannerInner {
                outbound,
                router,
                enabled: AtomicBool::new(false),
                handlers: Listeners::new(),
                subscription: Mutex::new(None),
            }),
        }
    }

    pub fn enable(&self) -> Result<()> {
        self.command(ScannerAction::Enable, DEST_SCANNER_ENABLE)
    }

    pub fn disable(&self) -> Result<()> {
        self.command(ScannerAction::Disable, DEST_SCANNER_DISABLE)
    }

    fn command(&self, action: ScannerAction, destination: &str) -> Result<()> {
        self.inner
            .outbound
            .publish_json(destination, &ScannerCommand { action })?;

        let enabled = action == ScannerAction::Enable;
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "Scanner command sent");
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Register a handler for scan events.
    ///
    /// The first handler subscribes to `/topic/scanner/events`; removing the
    /// last one releases that subscription.
    pub fn on_scan(&self, handler: impl Fn(&ScanEvent) + Send + Sync + 'static) -> Unsubscribe {
        let registration = {
            let mut subscription = self.inner.subscription.lock();
            let registration = self.inner.handlers.add(handler);
            if subscription.is_none() {
                *subscription = Some(self.inner.subscribe_events());
            }
            registration
        };

        let inner = Arc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            let Some(inner) = inner.upgrade() else {
                registration.unsubscribe();
                return;
            };

            let mut subscription = inner.subscription.lock();
            registration.unsubscribe();
            if inner.handlers.is_empty()
                && let Some(active) = subscription.take()
            {
                active.unsubscribe();
            }
        })
    }

    /// Drop every scan handler and the event subscription.
    pub fn destroy(&self) {
        let active = self.inner.subscription.lock().take();
        if let Some(active) = active {
            active.unsubscribe();
        }
        self.inner.handlers.clear();
        debug!("Scanner service destroyed");
    }
}

impl ScannerInner {
    fn subscribe_events(self: &Arc<Self>) -> Unsubscribe {
        let inner: Weak<ScannerInner> = Arc::downgrade(self);
        self.router.subscribe(DEST_SCANNER_EVENTS, move |msg| {
            if let Some(inner) = inner.upgrade() {
                inner.handle(msg);
            }
        })
    }

    fn handle(&self, msg: &InboundMessage) {
        match msg.json::<ScannerEvent>() {
            Ok(ScannerEvent::Scan { event }) => {
                debug!(barcode = %event.barcode, symbology = %event.symbology, "Scan received");
                self.handlers.notify(&event);
            }
            Err(e) => warn!("Ignoring scanner event: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientError;
    use tillbridge_protocol::{Command, Frame};
    use tokio::sync::mpsc;

    fn service() -> (ScannerService, SubscriptionRouter, mpsc::UnboundedReceiver<Frame>) {
        let outbound = Outbound::new();
        let (tx, rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        let router = SubscriptionRouter::new(outbound.clone());
        (ScannerService::new(outbound, router.clone()), router, rx)
    }

    fn scan(router: &SubscriptionRouter, barcode: &str) {
        let body = serde_json::json!({
            "type": "scan",
            "event": { "barcode": barcode, "symbology": "ean13", "timestamp": "2025-10-05T12:46:06Z" }
        });
        router.dispatch(
            &Frame::new(Command::Message)
                .with_header("destination", DEST_SCANNER_EVENTS)
                .with_body(body.to_string()),
        );
    }

    #[test]
    fn test_enable_publishes_and_sets_flag() {
        let (scanner, _router, mut rx) = service();

        scanner.enable().unwrap();
        assert!(scanner.is_enabled());

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.destination(), Some(DEST_SCANNER_ENABLE));
        assert_eq!(frame.body_str(), Some(r#"{"action":"enable"}"#));
    }

    #[test]
    fn test_disable_publishes_and_clears_flag() {
        let (scanner, _router, mut rx) = service();
        scanner.enable().unwrap();
        scanner.disable().unwrap();

        assert!(!scanner.is_enabled());
        let _enable = rx.try_recv().unwrap();
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.destination(), Some(DEST_SCANNER_DISABLE));
        assert_eq!(frame.body_str(), Some(r#"{"action":"disable"}"#));
    }

    #[test]
    fn test_enable_while_disconnected_keeps_flag() {
        let outbound = Outbound::new();
        let scanner = ScannerService::new(outbound.clone(), SubscriptionRouter::new(outbound));

        assert!(matches!(scanner.enable(), Err(ClientError::NotConnected)));
        assert!(!scanner.is_enabled());
    }

    #[test]
    fn test_on_scan_receives_events() {
        let (scanner, router, mut rx) = service();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = scanner.on_scan(move |event| sink.lock().push(event.barcode.clone()));

        let subscribe = rx.try_recv().unwrap();
        assert_eq!(subscribe.destination(), Some(DEST_SCANNER_EVENTS));

        scan(&router, "0012345678905");
        assert_eq!(*seen.lock(), vec!["0012345678905"]);
    }

    #[test]
    fn test_handlers_share_one_subscription() {
        let (scanner, router, mut rx) = service();
        let first = scanner.on_scan(|_| {});
        let second = scanner.on_scan(|_| {});

        assert_eq!(router.handler_count(DEST_SCANNER_EVENTS), 1);
        let _subscribe = rx.try_recv().unwrap();

        first.unsubscribe();
        assert_eq!(router.handler_count(DEST_SCANNER_EVENTS), 1);

        second.unsubscribe();
        assert_eq!(router.handler_count(DEST_SCANNER_EVENTS), 0);
        assert_eq!(rx.try_recv().unwrap().command, Command::Unsubscribe);
    }

    #[test]
    fn test_destroy_drops_handlers() {
        let (scanner, router, _rx) = service();
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let _handle = scanner.on_scan(move |_| *sink.lock() += 1);

        scanner.destroy();
        scan(&router, "123");

        assert_eq!(*seen.lock(), 0);
        assert_eq!(router.handler_count(DEST_SCANNER_EVENTS), 0);
    }

    #[test]
    fn test_malformed_scan_ignored() {
        let (scanner, router, _rx) = service();
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let _handle = scanner.on_scan(move |_| *sink.lock() += 1);

        router.dispatch(
            &Frame::new(Command::Message)
                .with_header("destination", DEST_SCANNER_EVENTS)
                .with_body(r#"{"type":"jam"}"#),
        );
        assert_eq!(*seen.lock(), 0);
    }
}
