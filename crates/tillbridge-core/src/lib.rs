pub mod constants;
pub mod error;
pub mod payment;
pub mod types;

pub use error::{Error, FrameParseError, Result};
pub use payment::{PaymentCommand, PaymentEvent, PaymentRequest, PaymentResult, PaymentState};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
