//! Card payment collection.
//!
//! # Single flight
//!
//! At most one collection is in flight. [`PaymentService::collect`] checks
//! that before touching the wire or the state machine and fails with
//! [`ClientError::CollectionInProgress`] otherwise.
//!
//! # Settlement
//!
//! A pending collection is settled exactly once, by the first of:
//!
//! | Trigger | Outcome |
//! |---------|---------|
//! | `result` event | `Ok(result)` |
//! | `state_change: cancelled` | `Ok({approved: false, error: "cancelled"})` |
//! | `state_change: error` | `Ok({approved: false, error: <reason>})` |
//! | deadline passes | `Err(CollectionTimeout)` |
//! | connection drops | `Err(ConnectionLost)` |
//!
//! Every settlement puts the state back to `idle`. Events arriving with no
//! collection pending still update the state but settle nothing.
//!
//! Connection loss is pushed in through [`PaymentService::connection_lost`].
//! [`PeripheralClient`](crate::PeripheralClient) wires it to the transport's
//! `Disconnected` event, so the collection settles before any reconnect
//! attempt can start.
//!
//! # State diagram
//!
//! ```text
//!        collect()                    state_change events
//!  idle ───────────> idle ──> card_presented ──> ... ──> authorizing
//!   ▲                                                        │
//!   └──────── result / cancelled / error / timeout / lost ◄──┘
//! ```

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tillbridge_core::constants::{DEST_PAYMENT_CANCEL, DEST_PAYMENT_COLLECT, DEST_PAYMENT_EVENTS};
use tillbridge_core::{PaymentCommand, PaymentEvent, PaymentRequest, PaymentResult, PaymentState};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::listeners::Listeners;
use crate::{ClientError, InboundMessage, Outbound, Result, SubscriptionRouter, Unsubscribe};

type Outcome = Result<PaymentResult>;

/// Outcome of one [`PaymentService::collect`] call.
///
/// Resolves exactly once. Dropping it does not cancel the collection on the
/// terminal; use [`PaymentService::cancel`] for that.
#[must_use = "a collection settles whether or not it is awaited"]
#[derive(Debug)]
pub struct Collection {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for Collection {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(ClientError::connection_lost("payment service dropped"))
            })
        })
    }
}

/// Drives the card terminal through the bridge.
#[derive(Clone)]
pub struct PaymentService {
    inner: Arc<PaymentInner>,
}

struct PaymentInner {
    outbound: Outbound,
    router: SubscriptionRouter,
    default_timeout: Duration,
    machine: Mutex<Machine>,
    listeners: Listeners<PaymentState>,
    subscription: Mutex<Option<Unsubscribe>>,
}

#[derive(Default)]
struct Machine {
    state: PaymentState,
    pending: Option<PendingCollection>,
    next_attempt: u64,
}

/// The single in-flight collection.
struct PendingCollection {
    attempt: u64,
    resolver: oneshot::Sender<Outcome>,
    watcher: Option<AbortHandle>,
}

impl PaymentService {
    /// Create the service on a transport's outbound queue and router.
    ///
    /// `default_timeout` applies to requests whose `timeout_ms` is `0`.
    /// Nothing is subscribed until the first [`collect`](Self::collect) or
    /// [`on_state_change`](Self::on_state_change).
    pub fn new(outbound: Outbound, router: SubscriptionRouter, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PaymentInner {
                outbound,
                router,
                default_timeout,
                machine: Mutex::new(Machine::default()),
                listeners: Listeners::new(),
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Start a collection.
    ///
    /// Returns as soon as the `collect` command is queued; await the
    /// returned [`Collection`] for the outcome. A request timeout of `0`
    /// uses the configured default. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ClientError::CollectionInProgress`] if a collection is pending
    /// - [`ClientError::NotConnected`] if the command cannot be queued
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tillbridge_client::{ClientConfig, PeripheralClient};
    /// use tillbridge_core::PaymentRequest;
    ///
    /// # async fn example() -> Result<(), tillbridge_client::ClientError> {
    /// let client = PeripheralClient::new(ClientConfig::default());
    /// client.connect().await?;
    ///
    /// let result = client.payment().collect(PaymentRequest::new(4750, "USD"))?.await?;
    /// println!("approved: {}", result.approved);
    /// # Ok(())
    /// # }
    /// ```
    pub fn collect(&self, request: PaymentRequest) -> Result<Collection> {
        let timeout = match request.timeout_ms {
            0 => self.inner.default_timeout,
            ms => Duration::from_millis(ms),
        };
        let (resolver, rx) = oneshot::channel();

        let attempt = {
            let mut machine = self.inner.machine.lock();
            if machine.pending.is_some() {
                return Err(ClientError::CollectionInProgress);
            }
            machine.state = PaymentState::Idle;
            machine.next_attempt += 1;
            let attempt = machine.next_attempt;
            machine.pending = Some(PendingCollection {
                attempt,
                resolver,
                watcher: None,
            });
            attempt
        };

        self.inner.ensure_subscribed();

        let amount = request.amount_minor_units;
        let currency = request.currency.clone();
        if let Err(e) = self
            .inner
            .outbound
            .publish_json(DEST_PAYMENT_COLLECT, &PaymentCommand::Collect { request })
        {
            let mut machine = self.inner.machine.lock();
            if machine.pending.as_ref().is_some_and(|p| p.attempt == attempt) {
                machine.pending = None;
            }
            return Err(e);
        }

        let watcher = tokio::spawn(expire_collection(
            Arc::downgrade(&self.inner),
            attempt,
            Instant::now() + timeout,
            timeout,
        ));
        {
            let mut machine = self.inner.machine.lock();
            match machine.pending.as_mut() {
                Some(pending) if pending.attempt == attempt => {
                    pending.watcher = Some(watcher.abort_handle());
                }
                _ => watcher.abort(),
            }
        }

        info!(
            attempt,
            amount,
            currency = %currency,
            timeout_ms = timeout.as_millis() as u64,
            "Payment collection started"
        );
        Ok(Collection { rx })
    }

    /// Ask the terminal to cancel the current collection.
    ///
    /// Cooperative: the pending collection settles when the bridge reports
    /// `cancelled`, not when this returns.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] if the command cannot be queued.
    pub fn cancel(&self) -> Result<()> {
        self.inner
            .outbound
            .publish_json(DEST_PAYMENT_CANCEL, &PaymentCommand::Cancel)?;
        info!("Payment cancel requested");
        Ok(())
    }

    /// Last state reported by the terminal, or `idle` after a settlement.
    pub fn state(&self) -> PaymentState {
        self.inner.machine.lock().state
    }

    /// Whether a [`Collection`] is waiting to settle.
    pub fn is_collecting(&self) -> bool {
        self.inner.machine.lock().pending.is_some()
    }

    /// Register a listener for payment state changes.
    ///
    /// Called for every `state_change` the bridge reports, and with `idle`
    /// whenever the state falls back to idle: a collection settling for any
    /// reason, or a `result` arriving on its own.
    pub fn on_state_change(
        &self,
        listener: impl Fn(&PaymentState) + Send + Sync + 'static,
    ) -> Unsubscribe {
        let registration = self.inner.listeners.add(listener);
        self.inner.ensure_subscribed();
        registration
    }

    /// Settle the pending collection with [`ClientError::ConnectionLost`].
    ///
    /// Call this when the transport reports `Disconnected`. Does nothing if
    /// no collection is pending.
    pub fn connection_lost(&self, reason: &str) {
        if self
            .inner
            .settle(None, Err(ClientError::connection_lost(reason)))
        {
            warn!("Connection lost during payment collection: {}", reason);
        }
    }

    /// Drop listeners and the event subscription.
    ///
    /// A pending collection settles with [`ClientError::ConnectionLost`].
    pub fn destroy(&self) {
        if let Some(active) = self.inner.subscription.lock().take() {
            active.unsubscribe();
        }
        self.inner.listeners.clear();
        if self.inner.settle(
            None,
            Err(ClientError::connection_lost("payment service destroyed")),
        ) {
            debug!("Pending collection settled on destroy");
        }
    }
}

impl PaymentInner {
    fn ensure_subscribed(self: &Arc<Self>) {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return;
        }

        let inner: Weak<PaymentInner> = Arc::downgrade(self);
        *subscription = Some(self.router.subscribe(DEST_PAYMENT_EVENTS, move |msg| {
            if let Some(inner) = inner.upgrade() {
                inner.handle(msg);
            }
        }));
    }

    fn handle(&self, msg: &InboundMessage) {
        let event: PaymentEvent = match msg.json() {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring payment event: {}", e);
                return;
            }
        };

        if let PaymentEvent::StateChange { state, .. } = &event {
            debug!(state = %state, "Payment state changed");
            self.machine.lock().state = *state;
            self.listeners.notify(state);
        }

        let settled = match event.settlement() {
            Some(result) => {
                info!(
                    approved = result.approved,
                    error = result.error.as_deref().unwrap_or(""),
                    "Payment outcome received"
                );
                let settled = self.settle(None, Ok(result));
                if !settled {
                    debug!("No collection pending, outcome ignored");
                }
                settled
            }
            None => false,
        };

        if !settled && let PaymentEvent::Result(_) = event {
            let previous = std::mem::take(&mut self.machine.lock().state);
            self.announce_idle(previous);
        }
    }

    /// Settle the pending collection if it is `attempt` (any attempt for `None`).
    ///
    /// Returns whether something was settled.
    fn settle(&self, attempt: Option<u64>, outcome: Outcome) -> bool {
        let (pending, previous) = {
            let mut machine = self.machine.lock();
            let Some(pending) = machine.pending.take_if(|pending| {
                attempt.is_none_or(|attempt| pending.attempt == attempt)
            }) else {
                return false;
            };
            (pending, std::mem::take(&mut machine.state))
        };

        if let Some(watcher) = pending.watcher {
            watcher.abort();
        }
        let _ = pending.resolver.send(outcome);
        self.announce_idle(previous);
        true
    }

    fn announce_idle(&self, previous: PaymentState) {
        if previous != PaymentState::Idle {
            self.listeners.notify(&PaymentState::Idle);
        }
    }
}

/// Settle `attempt` with [`ClientError::CollectionTimeout`] at `deadline`.
async fn expire_collection(
    inner: Weak<PaymentInner>,
    attempt: u64,
    deadline: Instant,
    timeout: Duration,
) {
    tokio::time::sleep_until(deadline).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let expired = ClientError::CollectionTimeout {
        timeout_ms: timeout.as_millis() as u64,
    };
    if inner.settle(Some(attempt), Err(expired)) {
        warn!(attempt, "Payment collection timed out after {}ms", timeout.as_millis());
    }
}
