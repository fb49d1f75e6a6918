//! Single persistent connection to the bridge.
//!
//! # Architecture
//!
//! ```text
//! connect() ──> TcpStream + StompCodec ──> CONNECT / CONNECTED
//!                                              │
//!                                              ▼
//!                                      connection task (select!)
//!                    ┌──────────────┬──────────┴───────┬───────────────┐
//!                 inbound        outbound queue     heart-beat tick   read watchdog
//!                    │
//!      MESSAGE → SubscriptionRouter
//!      RECEIPT → ReceiptCorrelator
//!      ERROR   → ReceiptCorrelator + ConnectionEvent::Error
//! ```
//!
//! The task exclusively owns the socket. Everything else writes through
//! [`Outbound`], which queues frames for the task.
//!
//! # Failure handling
//!
//! When the link drops (socket closed, I/O error, heart-beat timeout) or
//! [`Transport::disconnect`] is called, the outbound queue is detached,
//! wire subscriptions are forgotten, every pending receipt is rejected with
//! [`ClientError::ConnectionLost`] and the state moves to
//! [`ConnectionState::Disconnected`]. There is no automatic reconnect.

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tillbridge_core::constants::{HEADER_RECEIPT, HEADER_VERSION, HEARTBEAT_GRACE_FACTOR};
use tillbridge_protocol::{Command, Frame, HeartBeat, Heartbeat, Inbound, Negotiated, StompCodec};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::listeners::Listeners;
use crate::{
    ClientConfig, ClientError, Outbound, ReceiptCorrelator, Result, SubscriptionRouter,
    Unsubscribe,
};

/// How long `disconnect` waits for the socket to close.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Capacity of the raw frame broadcast.
const FRAME_BROADCAST_CAPACITY: usize = 256;

type BridgeStream = Framed<TcpStream, StompCodec>;
type ConnectAttempt = Shared<BoxFuture<'static, Result<()>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Notification delivered to `on_connection_change` listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake finished and subscriptions were replayed.
    Connected,
    /// The link went away, either dropped or closed by the client.
    Disconnected { reason: String },
    /// The bridge sent an `ERROR` frame.
    Error {
        message: String,
        detail: Option<String>,
    },
}

enum Link {
    Idle,
    Connecting {
        generation: u64,
        attempt: ConnectAttempt,
        /// Dropping or firing this aborts the handshake.
        cancel: oneshot::Sender<()>,
    },
    Connected {
        generation: u64,
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<()>,
    },
}

/// Cloneable handle to the bridge connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    outbound: Outbound,
    router: SubscriptionRouter,
    receipts: ReceiptCorrelator,
    link: Mutex<Link>,
    generation: AtomicU64,
    state: watch::Sender<ConnectionState>,
    frames: broadcast::Sender<Frame>,
    listeners: Listeners<ConnectionEvent>,
}

impl Transport {
    /// Create a disconnected transport. Nothing touches the network until
    /// [`connect`](Self::connect).
    ///
    /// # Example
    ///
    /// ```
    /// use tillbridge_client::{ClientConfig, ConnectionState, Transport};
    ///
    /// let transport = Transport::new(ClientConfig::new("127.0.0.1:9100"));
    /// assert_eq!(transport.state(), ConnectionState::Disconnected);
    /// ```
    pub fn new(config: ClientConfig) -> Self {
        debug!("Creating transport for bridge {}", config.bridge_addr);

        let outbound = Outbound::new();
        let router = SubscriptionRouter::new(outbound.clone());
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (frames, _) = broadcast::channel(FRAME_BROADCAST_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                config,
                outbound,
                router,
                receipts: ReceiptCorrelator::new(),
                link: Mutex::new(Link::Idle),
                generation: AtomicU64::new(0),
                state,
                frames,
                listeners: Listeners::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Open the socket and complete the STOMP handshake.
    ///
    /// Returns immediately when already connected. Concurrent callers share
    /// one attempt and all see its outcome.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ConnectionTimeout`] if the handshake does not finish
    ///   within `connect_timeout`
    /// - [`ClientError::StompProtocol`] if the bridge answers with `ERROR`
    /// - [`ClientError::Io`] if the socket cannot be opened
    pub async fn connect(&self) -> Result<()> {
        let attempt = {
            let mut link = self.inner.link.lock();
            match &*link {
                Link::Connected { .. } => return Ok(()),
                Link::Connecting { attempt, .. } => attempt.clone(),
                Link::Idle => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let (cancel, cancelled) = oneshot::channel();
                    let attempt = Inner::establish(Arc::clone(&self.inner), generation, cancelled)
                        .boxed()
                        .shared();
                    *link = Link::Connecting {
                        generation,
                        attempt: attempt.clone(),
                        cancel,
                    };
                    self.inner.state.send_replace(ConnectionState::Connecting);
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Close the connection.
    ///
    /// Nothing further is written. Pending receipts are rejected with
    /// [`ClientError::ConnectionLost`] before this returns; registered
    /// subscription handlers are kept for a later `connect`.
    ///
    /// A handshake still in progress is aborted: its socket is dropped and
    /// every `connect` caller waiting on it gets
    /// [`ClientError::ConnectionLost`].
    pub async fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.inner.link.lock(), Link::Idle);

        match previous {
            Link::Idle => {}
            Link::Connecting { cancel, .. } => {
                info!("Abandoning connect attempt");
                self.inner.invalidate("disconnected by client".to_string());
                let _ = cancel.send(());
            }
            Link::Connected { shutdown, task, .. } => {
                info!("Disconnecting from bridge {}", self.inner.config.bridge_addr);
                self.inner.invalidate("disconnected by client".to_string());
                let _ = shutdown.send(());
                if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
                    warn!("Connection task did not stop within {}ms", CLOSE_TIMEOUT.as_millis());
                }
            }
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch channel following [`ConnectionState`].
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Every inbound frame, after internal dispatch.
    pub fn frames(&self) -> broadcast::Receiver<Frame> {
        self.inner.frames.subscribe()
    }

    /// Register a listener for connect, disconnect and bridge `ERROR`
    /// events. Listeners run synchronously on the thread that observed the
    /// change.
    pub fn on_connection_change(
        &self,
        listener: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.inner.listeners.add(listener)
    }

    pub fn outbound(&self) -> &Outbound {
        &self.inner.outbound
    }

    pub fn router(&self) -> &SubscriptionRouter {
        &self.inner.router
    }

    pub fn receipts(&self) -> &ReceiptCorrelator {
        &self.inner.receipts
    }

    /// Queue a frame without waiting for anything.
    pub fn send(&self, frame: Frame) -> Result<()> {
        self.inner.outbound.send(frame)
    }

    pub fn publish_json<T: serde::Serialize + ?Sized>(
        &self,
        destination: &str,
        payload: &T,
    ) -> Result<()> {
        self.inner.outbound.publish_json(destination, payload)
    }

    /// Register `handler` for `destination` and every destination below
    /// it. Shorthand for [`SubscriptionRouter::subscribe`].
    ///
    /// The wire `SUBSCRIBE` goes out now if connected, otherwise on the
    /// next successful `connect`.
    pub fn subscribe(
        &self,
        destination: &str,
        handler: impl Fn(&crate::InboundMessage) + Send + Sync + 'static,
    ) -> Unsubscribe {
        self.inner.router.subscribe(destination, handler)
    }

    /// Send `frame` with a fresh `receipt` header and wait for the bridge to
    /// confirm it.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotConnected`] if there is no connection
    /// - [`ClientError::StompProtocol`] if the bridge rejects the frame
    /// - [`ClientError::ConnectionLost`] if the link drops first
    /// - [`ClientError::ReceiptTimeout`] after `receipt_timeout`
    pub async fn send_with_receipt(&self, mut frame: Frame) -> Result<()> {
        let receipts = &self.inner.receipts;
        let pending = receipts.register();
        frame.headers.set(HEADER_RECEIPT, pending.id.clone());

        if let Err(e) = self.inner.outbound.send(frame) {
            receipts.forget(&pending.id);
            return Err(e);
        }

        receipts.wait(pending, self.inner.config.receipt_timeout).await
    }
}

impl Inner {
    async fn establish(
        inner: Arc<Inner>,
        generation: u64,
        cancelled: oneshot::Receiver<()>,
    ) -> Result<()> {
        let timeout = inner.config.connect_timeout;
        info!("Connecting to bridge at {}", inner.config.bridge_addr);

        let result = tokio::select! {
            result = tokio::time::timeout(timeout, handshake(&inner.config)) => match result {
                Ok(result) => result,
                Err(_) => {
                    warn!("Connection timeout after {}ms", timeout.as_millis());
                    Err(ClientError::ConnectionTimeout {
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
            },
            _ = cancelled => {
                debug!("Connect attempt cancelled");
                return Err(ClientError::connection_lost("disconnected while connecting"));
            }
        };

        let mut link = inner.link.lock();
        if !matches!(&*link, Link::Connecting { generation: g, .. } if *g == generation) {
            return Err(ClientError::connection_lost("disconnected while connecting"));
        }

        let (framed, negotiated) = match result {
            Ok(ok) => ok,
            Err(e) => {
                *link = Link::Idle;
                drop(link);
                error!("Connection failed: {}", e);
                inner.state.send_replace(ConnectionState::Disconnected);
                if let ClientError::StompProtocol { message, detail } = &e {
                    inner.listeners.notify(&ConnectionEvent::Error {
                        message: message.clone(),
                        detail: detail.clone(),
                    });
                }
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let (announced, started) = oneshot::channel();
        inner.outbound.attach(tx);
        let task = tokio::spawn(run_connection(
            Arc::clone(&inner),
            generation,
            framed,
            rx,
            shutdown_rx,
            started,
            negotiated,
        ));
        *link = Link::Connected {
            generation,
            shutdown,
            task,
        };
        // Under the link lock: a concurrent `disconnect` publishes after this.
        inner.state.send_replace(ConnectionState::Connected);
        inner.router.on_connected();
        drop(link);

        inner.listeners.notify(&ConnectionEvent::Connected);
        let _ = announced.send(());
        info!("Connected to bridge at {}", inner.config.bridge_addr);
        Ok(())
    }

    fn dispatch(&self, frame: Frame) {
        if self.frames.receiver_count() > 0 {
            let _ = self.frames.send(frame.clone());
        }

        match frame.command {
            Command::Message => self.router.dispatch(&frame),
            Command::Receipt => match frame.receipt_id() {
                Some(id) => {
                    self.receipts.resolve(id);
                }
                None => warn!("RECEIPT without receipt-id header dropped"),
            },
            Command::Error => {
                let error = ClientError::from_error_frame(&frame);
                warn!("Bridge sent ERROR: {}", error);
                self.receipts.reject_on_error(&frame, error.clone());
                if let ClientError::StompProtocol { message, detail } = error {
                    self.listeners
                        .notify(&ConnectionEvent::Error { message, detail });
                }
            }
            ref other => debug!(command = %other, "Ignoring frame"),
        }
    }

    /// Tear down after the connection task saw the link die.
    fn on_link_lost(&self, generation: u64, reason: String) {
        {
            let mut link = self.link.lock();
            if !matches!(&*link, Link::Connected { generation: g, .. } if *g == generation) {
                return;
            }
            *link = Link::Idle;
        }

        warn!("Connection to bridge lost: {}", reason);
        self.invalidate(reason);
    }

    fn invalidate(&self, reason: String) {
        self.outbound.detach();
        self.router.on_connection_lost();
        self.receipts
            .fail_all(ClientError::connection_lost(reason.clone()));
        self.state.send_replace(ConnectionState::Disconnected);
        self.listeners
            .notify(&ConnectionEvent::Disconnected { reason });
    }
}

/// Open the socket and exchange `CONNECT` / `CONNECTED`.
async fn handshake(config: &ClientConfig) -> Result<(BridgeStream, Negotiated)> {
    let stream = TcpStream::connect(&config.bridge_addr).await?;
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    let mut framed = Framed::new(stream, StompCodec::with_max_frame_size(config.max_frame_size));
    let ours = config.heart_beat();
    framed.send(Frame::connect(&config.host, ours)).await?;

    loop {
        let frame = match framed.next().await {
            Some(Ok(Inbound::Frame(frame))) => frame,
            Some(Ok(Inbound::Heartbeat)) => continue,
            Some(Ok(Inbound::Malformed(e))) => {
                warn!("Skipping malformed frame during handshake: {}", e);
                continue;
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ClientError::connection_lost("bridge closed during handshake")),
        };

        match frame.command {
            Command::Connected => {
                let server = frame.heart_beat().unwrap_or(HeartBeat::DISABLED);
                let negotiated = ours.negotiate(server);
                debug!(
                    version = frame.header(HEADER_VERSION).unwrap_or("unknown"),
                    heart_beat = %server,
                    "Handshake complete"
                );
                return Ok((framed, negotiated));
            }
            Command::Error => return Err(ClientError::from_error_frame(&frame)),
            ref other => debug!(command = %other, "Ignoring frame before CONNECTED"),
        }
    }
}

async fn run_connection(
    inner: Arc<Inner>,
    generation: u64,
    mut framed: BridgeStream,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    mut shutdown: oneshot::Receiver<()>,
    started: oneshot::Receiver<()>,
    negotiated: Negotiated,
) {
    // Nothing is read until listeners have seen Connected.
    let _ = started.await;

    let mut send_tick = negotiated.send_every.map(|every| {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let read_deadline = negotiated.read_deadline(HEARTBEAT_GRACE_FACTOR);
    let mut last_read = Instant::now();

    let reason = loop {
        tokio::select! {
            _ = &mut shutdown => {
                close(framed).await;
                return;
            }
            item = framed.next() => match item {
                Some(Ok(inbound)) => {
                    last_read = Instant::now();
                    match inbound {
                        Inbound::Frame(frame) => {
                            trace!(command = %frame.command, "Received frame");
                            inner.dispatch(frame);
                        }
                        Inbound::Heartbeat => trace!("Received heart-beat"),
                        Inbound::Malformed(e) => warn!("Skipping malformed frame: {}", e),
                    }
                }
                Some(Err(e)) => break format!("read failed: {e}"),
                None => break "bridge closed the connection".to_string(),
            },
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    trace!(command = %frame.command, "Sending frame");
                    if let Err(e) = framed.send(frame).await {
                        break format!("write failed: {e}");
                    }
                }
                None => {
                    close(framed).await;
                    return;
                }
            },
            _ = tick(&mut send_tick) => {
                trace!("Sending heart-beat");
                if let Err(e) = framed.send(Heartbeat).await {
                    break format!("heart-beat write failed: {e}");
                }
            }
            _ = silence(read_deadline, last_read) => {
                break format!(
                    "no data from bridge for {}ms",
                    read_deadline.map_or(0, |d| d.as_millis())
                );
            }
        }
    };

    inner.on_link_lost(generation, reason);
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn silence(deadline: Option<Duration>, last_read: Instant) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(last_read + deadline).await,
        None => std::future::pending().await,
    }
}

async fn close(mut framed: BridgeStream) {
    if tokio::time::timeout(CLOSE_TIMEOUT, framed.get_mut().shutdown())
        .await
        .is_err()
    {
        warn!("Socket shutdown timeout after {}ms", CLOSE_TIMEOUT.as_millis());
    }
    debug!("Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transport_is_disconnected() {
        let transport = Transport::new(ClientConfig::default());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(!transport.is_connected());
        assert!(!transport.outbound().is_attached());
    }

    #[test]
    fn test_send_without_connection() {
        let transport = Transport::new(ClientConfig::default());
        assert!(matches!(
            transport.send(Frame::disconnect()),
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_send_with_receipt_without_connection() {
        let transport = Transport::new(ClientConfig::default());
        let result = transport
            .send_with_receipt(Frame::send("/app/scanner/enable", "{}"))
            .await;

        assert!(matches!(result, Err(ClientError::NotConnected)));
        assert_eq!(transport.receipts().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let transport = Transport::new(ClientConfig::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let _handle = transport.on_connection_change(move |e| seen.lock().push(e.clone()));

        transport.disconnect().await;

        assert!(events.lock().is_empty());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_dispatch_routes_by_command() {
        let transport = Transport::new(ClientConfig::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let _handle = transport.on_connection_change(move |e| seen.lock().push(e.clone()));

        let pending = transport.receipts().register();
        transport.inner.dispatch(
            Frame::new(Command::Error)
                .with_header("receipt-id", pending.id.clone())
                .with_header("message", "denied"),
        );

        assert_eq!(transport.receipts().pending_count(), 0);
        assert_eq!(
            *events.lock(),
            vec![ConnectionEvent::Error {
                message: "denied".to_string(),
                detail: None
            }]
        );
    }

    #[tokio::test]
    async fn test_frames_broadcast() {
        let transport = Transport::new(ClientConfig::default());
        let mut frames = transport.frames();

        transport
            .inner
            .dispatch(Frame::new(Command::Receipt).with_header("receipt-id", "r-9"));

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.receipt_id(), Some("r-9"));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }
}
