//! Payment terminal wire types.
//!
//! Commands flow client → bridge on `/app/payment/*`, events flow back on
//! `/topic/payment/events`. Event bodies are normalized at the
//! deserialization boundary so the payment service only sees
//! [`PaymentEvent`] variants with the error reason already resolved.

use crate::constants::{CANCELLED_PAYMENT_ERROR, GENERIC_PAYMENT_ERROR};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payment terminal state as reported by the bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    #[default]
    Idle,
    CardPresented,
    ReadingCard,
    PinRequired,
    PinEntry,
    Authorizing,
    Approved,
    Declined,
    Cancelled,
    Error,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CardPresented => "card_presented",
            Self::ReadingCard => "reading_card",
            Self::PinRequired => "pin_required",
            Self::PinEntry => "pin_entry",
            Self::Authorizing => "authorizing",
            Self::Approved => "approved",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to collect a card payment.
///
/// # Examples
///
/// ```
/// use tillbridge_core::PaymentRequest;
///
/// let request = PaymentRequest::new(4750, "USD").with_timeout_ms(60_000);
/// let json = serde_json::to_value(&request).unwrap();
///
/// assert_eq!(json["amount"], 4750);
/// assert_eq!(json["timeout"], 60_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// Amount in the currency's minor units (cents).
    #[serde(rename = "amount")]
    pub amount_minor_units: u64,

    /// ISO 4217 currency code.
    pub currency: String,

    #[serde(default)]
    pub allow_cashback: bool,

    #[serde(default)]
    pub offline_floor_limit: u64,

    /// Local collection deadline. `0` selects the client default.
    #[serde(rename = "timeout", default)]
    pub timeout_ms: u64,
}

impl PaymentRequest {
    pub fn new(amount_minor_units: u64, currency: impl Into<String>) -> Self {
        Self {
            amount_minor_units,
            currency: currency.into(),
            allow_cashback: false,
            offline_floor_limit: 0,
            timeout_ms: 0,
        }
    }

    pub fn with_cashback(mut self, allow: bool) -> Self {
        self.allow_cashback = allow;
        self
    }

    pub fn with_offline_floor_limit(mut self, limit: u64) -> Self {
        self.offline_floor_limit = limit;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Outcome of one collection attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub approved: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_brand: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last4: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaymentResult {
    /// Result reported when the bridge cancels a collection.
    pub fn cancelled() -> Self {
        Self::failed(CANCELLED_PAYMENT_ERROR)
    }

    /// Unapproved result carrying an error reason.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            approved: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Command body published on `/app/payment/*`, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PaymentCommand {
    Collect { request: PaymentRequest },
    Cancel,
}

/// Normalized payment event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "WirePaymentEvent")]
pub enum PaymentEvent {
    /// The terminal moved to `state`. `error` is set only for the `error`
    /// state and is never empty.
    StateChange {
        state: PaymentState,
        error: Option<String>,
    },

    /// Final outcome of the collection.
    Result(PaymentResult),
}

impl PaymentEvent {
    /// The result this event settles a pending collection with, if any.
    pub fn settlement(&self) -> Option<PaymentResult> {
        match self {
            Self::StateChange {
                state: PaymentState::Cancelled,
                ..
            } => Some(PaymentResult::cancelled()),
            Self::StateChange {
                state: PaymentState::Error,
                error,
            } => Some(PaymentResult::failed(
                error.as_deref().unwrap_or(GENERIC_PAYMENT_ERROR),
            )),
            Self::StateChange { .. } => None,
            Self::Result(result) => Some(result.clone()),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePaymentEvent {
    StateChange {
        state: PaymentState,
        #[serde(default)]
        data: Option<WireStateData>,
    },
    Result {
        result: PaymentResult,
    },
}

// Bridges put the reason in either `error` or `message`, not always as a string.
#[derive(Deserialize, Default)]
struct WireStateData {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

impl WireStateData {
    fn reason(self) -> Option<String> {
        [self.error, self.message]
            .into_iter()
            .flatten()
            .find_map(|value| match value {
                serde_json::Value::String(s) if !s.is_empty() => Some(s),
                _ => None,
            })
    }
}

impl From<WirePaymentEvent> for PaymentEvent {
    fn from(wire: WirePaymentEvent) -> Self {
        match wire {
            WirePaymentEvent::StateChange { state, data } => {
                let error = match state {
                    PaymentState::Error => data.and_then(WireStateData::reason),
                    _ => None,
                };
                Self::StateChange { state, error }
            }
            WirePaymentEvent::Result { result } => Self::Result(result),
        }
    }
}
