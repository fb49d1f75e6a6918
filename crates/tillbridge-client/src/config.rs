use std::time::Duration;
use tillbridge_core::constants::*;
use tillbridge_protocol::HeartBeat;

/// Client configuration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tillbridge_client::ClientConfig;
///
/// let config = ClientConfig::new("10.0.0.5:9100")
///     .with_connect_timeout(Duration::from_secs(5))
///     .with_heartbeat(Duration::ZERO, Duration::ZERO);
///
/// assert_eq!(config.bridge_addr, "10.0.0.5:9100");
/// assert_eq!(config.heart_beat().to_string(), "0,0");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bridge address as `host:port`.
    pub bridge_addr: String,

    /// Value of the `host` header in `CONNECT`.
    pub host: String,

    /// Upper bound for TCP connect plus the STOMP handshake.
    pub connect_timeout: Duration,

    /// Interval we offer to send heart-beats at. Zero disables.
    pub heartbeat_outgoing: Duration,

    /// Interval we ask the bridge to send heart-beats at. Zero disables.
    pub heartbeat_incoming: Duration,

    pub receipt_timeout: Duration,

    /// Collection deadline used when a request carries `timeout: 0`.
    pub default_payment_timeout: Duration,

    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bridge_addr: DEFAULT_BRIDGE_ADDR.to_string(),
            host: DEFAULT_HOST.to_string(),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            heartbeat_outgoing: Duration::from_millis(DEFAULT_HEARTBEAT_OUTGOING_MS),
            heartbeat_incoming: Duration::from_millis(DEFAULT_HEARTBEAT_INCOMING_MS),
            receipt_timeout: Duration::from_millis(DEFAULT_RECEIPT_TIMEOUT_MS),
            default_payment_timeout: Duration::from_millis(DEFAULT_PAYMENT_TIMEOUT_MS),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new(bridge_addr: impl Into<String>) -> Self {
        Self {
            bridge_addr: bridge_addr.into(),
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, outgoing: Duration, incoming: Duration) -> Self {
        self.heartbeat_outgoing = outgoing;
        self.heartbeat_incoming = incoming;
        self
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    pub fn with_default_payment_timeout(mut self, timeout: Duration) -> Self {
        self.default_payment_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Heart-beat advertisement for the `CONNECT` frame.
    pub fn heart_beat(&self) -> HeartBeat {
        HeartBeat::new(
            self.heartbeat_outgoing.as_millis() as u64,
            self.heartbeat_incoming.as_millis() as u64,
        )
    }
}
