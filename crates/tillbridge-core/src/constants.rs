//! Protocol and destination constants for the peripheral bridge.
//!
//! The bridge speaks STOMP 1.2 over a single socket. Destinations are split in
//! two namespaces:
//!
//! | Namespace | Direction | Destinations |
//! |-----------|-----------|--------------|
//! | `/topic/*` | bridge → client | capabilities, scanner events, payment events |
//! | `/app/*` | client → bridge | scanner enable/disable, payment collect/cancel |
//!
//! # Usage
//!
//! ```
//! use tillbridge_core::constants::*;
//!
//! assert!(DEST_SCANNER_EVENTS.starts_with("/topic/"));
//! assert!(DEST_PAYMENT_COLLECT.starts_with("/app/"));
//! ```

// ============================================================================
// Protocol
// ============================================================================

/// STOMP protocol version requested in the `CONNECT` frame.
pub const STOMP_VERSION: &str = "1.2";

/// Virtual host sent in the `CONNECT` frame when none is configured.
pub const DEFAULT_HOST: &str = "localhost";

/// Frame terminator.
pub const NUL: u8 = 0x00;

/// Line terminator. CR before it is tolerated on decode.
pub const LF: u8 = b'\n';

/// Carriage return.
pub const CR: u8 = b'\r';

/// Content type attached to JSON bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";

// ============================================================================
// Header names
// ============================================================================

pub const HEADER_ACCEPT_VERSION: &str = "accept-version";
pub const HEADER_HOST: &str = "host";
pub const HEADER_HEART_BEAT: &str = "heart-beat";
pub const HEADER_VERSION: &str = "version";
pub const HEADER_DESTINATION: &str = "destination";
pub const HEADER_ID: &str = "id";
pub const HEADER_SUBSCRIPTION: &str = "subscription";
pub const HEADER_RECEIPT: &str = "receipt";
pub const HEADER_RECEIPT_ID: &str = "receipt-id";
pub const HEADER_MESSAGE: &str = "message";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_ACK: &str = "ack";

// ============================================================================
// Destinations
// ============================================================================

/// Capability broadcasts. Each message replaces the previous capability set.
pub const DEST_CAPABILITIES: &str = "/topic/capabilities";

/// Scan events (`{"type":"scan","event":{...}}`).
pub const DEST_SCANNER_EVENTS: &str = "/topic/scanner/events";

/// Payment terminal events (`state_change` and `result`).
pub const DEST_PAYMENT_EVENTS: &str = "/topic/payment/events";

pub const DEST_SCANNER_ENABLE: &str = "/app/scanner/enable";
pub const DEST_SCANNER_DISABLE: &str = "/app/scanner/disable";
pub const DEST_PAYMENT_COLLECT: &str = "/app/payment/collect";
pub const DEST_PAYMENT_CANCEL: &str = "/app/payment/cancel";

// ============================================================================
// Defaults
// ============================================================================

/// Bridge address used when none is configured.
pub const DEFAULT_BRIDGE_ADDR: &str = "127.0.0.1:9100";

/// Connect handshake timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Outgoing heart-beat interval offered to the bridge, in milliseconds.
pub const DEFAULT_HEARTBEAT_OUTGOING_MS: u64 = 10_000;

/// Incoming heart-beat interval requested from the bridge, in milliseconds.
pub const DEFAULT_HEARTBEAT_INCOMING_MS: u64 = 10_000;

/// How long a receipted `SEND` waits for its `RECEIPT`, in milliseconds.
pub const DEFAULT_RECEIPT_TIMEOUT_MS: u64 = 30_000;

/// Collection timeout applied when a request carries `timeout: 0`.
pub const DEFAULT_PAYMENT_TIMEOUT_MS: u64 = 120_000;

/// Largest frame accepted or produced by the codec (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Missed incoming heart-beat intervals tolerated before the link is declared dead.
pub const HEARTBEAT_GRACE_FACTOR: u32 = 2;

/// Error reason used when a payment `error` event carries no message.
pub const GENERIC_PAYMENT_ERROR: &str = "error";

/// Error reason reported for a cancelled collection.
pub const CANCELLED_PAYMENT_ERROR: &str = "cancelled";
