//! Async client for the point-of-sale peripheral bridge.
//!
//! The bridge speaks STOMP 1.2 over one TCP connection. This crate keeps that
//! connection alive and exposes the peripherals behind it:
//!
//! - [`CapabilityRegistry`]: which peripherals the bridge currently offers
//! - [`ScannerService`]: enable/disable the barcode scanner, receive scans
//! - [`PaymentService`]: collect card payments, one at a time
//!
//! [`PeripheralClient`] wires all of them onto a single [`Transport`].
//!
//! # Example
//!
//! ```no_run
//! use tillbridge_client::{ClientConfig, PeripheralClient};
//! use tillbridge_core::PaymentRequest;
//!
//! # async fn example() -> Result<(), tillbridge_client::ClientError> {
//! let client = PeripheralClient::new(ClientConfig::new("127.0.0.1:9100"));
//! client.connect().await?;
//!
//! let result = client
//!     .payment()
//!     .collect(PaymentRequest::new(4750, "USD").with_timeout_ms(60_000))?
//!     .await?;
//!
//! if result.approved {
//!     println!("approved: {:?}", result.transaction_id);
//! }
//! # Ok(())
//! # }
//! ```

mod capabilities;
mod client;
mod config;
mod error;
mod listeners;
mod outbound;
mod payment;
mod receipt;
mod router;
mod scanner;
mod transport;

pub use capabilities::CapabilityRegistry;
pub use client::PeripheralClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use listeners::Unsubscribe;
pub use outbound::Outbound;
pub use payment::{Collection, PaymentService};
pub use receipt::{PendingReceipt, ReceiptCorrelator};
pub use router::{InboundMessage, SubscriptionRouter};
pub use scanner::ScannerService;
pub use transport::{ConnectionEvent, ConnectionState, Transport};
