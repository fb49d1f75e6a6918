use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Peripheral families a bridge can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peripheral {
    Scanner,
    Payment,
    Printer,
    Lights,
}

impl fmt::Display for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scanner => write!(f, "scanner"),
            Self::Payment => write!(f, "payment"),
            Self::Printer => write!(f, "printer"),
            Self::Lights => write!(f, "lights"),
        }
    }
}

/// Device capabilities advertised by the bridge.
///
/// A missing field means the bridge did not mention that peripheral at all,
/// which is different from a peripheral reported with `available: false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanner: Option<ScannerCapability>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentCapability>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer: Option<PrinterCapability>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lights: Option<LightsCapability>,
}

impl Capabilities {
    /// Check whether a peripheral is advertised and available.
    ///
    /// # Examples
    ///
    /// ```
    /// use tillbridge_core::{Capabilities, Peripheral, ScannerCapability};
    ///
    /// let caps = Capabilities {
    ///     scanner: Some(ScannerCapability { available: true, ..Default::default() }),
    ///     ..Default::default()
    /// };
    ///
    /// assert!(caps.is_available(Peripheral::Scanner));
    /// assert!(!caps.is_available(Peripheral::Printer));
    /// ```
    #[must_use]
    pub fn is_available(&self, peripheral: Peripheral) -> bool {
        match peripheral {
            Peripheral::Scanner => self.scanner.as_ref().is_some_and(|c| c.available),
            Peripheral::Payment => self.payment.as_ref().is_some_and(|c| c.available),
            Peripheral::Printer => self.printer.as_ref().is_some_and(|c| c.available),
            Peripheral::Lights => self.lights.as_ref().is_some_and(|c| c.available),
        }
    }

    /// Check whether the payment terminal is available and accepts `method`.
    #[must_use]
    pub fn supports_payment_method(&self, method: &str) -> bool {
        self.payment
            .as_ref()
            .is_some_and(|p| p.available && p.methods.contains(method))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerCapability {
    pub available: bool,

    /// Delivery mode reported by the bridge (`bridge`, `keyboard`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbologies: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCapability {
    pub available: bool,

    /// Card presentation methods (`chip`, `contactless`, `swipe`).
    #[serde(default)]
    pub methods: BTreeSet<String>,

    #[serde(default)]
    pub cashback: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterCapability {
    pub available: bool,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightsCapability {
    pub available: bool,
}

/// Body of a `/topic/capabilities` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub capabilities: Capabilities,
}

/// A barcode read reported by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub barcode: String,

    #[serde(default)]
    pub symbology: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Body of a `/topic/scanner/events` message, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScannerEvent {
    Scan { event: ScanEvent },
}

/// Scanner command body (`{"action":"enable"}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerCommand {
    pub action: ScannerAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScannerAction {
    Enable,
    Disable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(Peripheral::Scanner, true)]
    #[case(Peripheral::Payment, true)]
    #[case(Peripheral::Printer, false)]
    #[case(Peripheral::Lights, false)]
    fn test_is_available(#[case] peripheral: Peripheral, #[case] expected: bool) {
        let caps: Capabilities = serde_json::from_value(json!({
            "scanner": { "available": true, "mode": "bridge", "symbologies": ["ean13"] },
            "payment": { "available": true, "methods": ["chip", "contactless"] },
            "printer": { "available": false, "type": "thermal" }
        }))
        .unwrap();

        assert_eq!(caps.is_available(peripheral), expected);
    }

    #[test]
    fn test_supports_payment_method() {
        let caps: Capabilities = serde_json::from_value(json!({
            "payment": { "available": true, "methods": ["chip", "contactless"], "cashback": true }
        }))
        .unwrap();

        assert!(caps.supports_payment_method("chip"));
        assert!(!caps.supports_payment_method("swipe"));
        assert!(caps.payment.unwrap().cashback);
    }

    #[test]
    fn test_capabilities_message_from_bridge() {
        let msg: CapabilitiesMessage = serde_json::from_value(json!({
            "type": "capabilities",
            "timestamp": "2025-10-05T12:46:06Z",
            "deviceId": "lane-3",
            "capabilities": {
                "printer": { "available": true, "type": "thermal" },
                "lights": { "available": false }
            }
        }))
        .unwrap();

        assert_eq!(msg.device_id.as_deref(), Some("lane-3"));
        assert!(msg.timestamp.is_some());
        assert_eq!(
            msg.capabilities.printer.as_ref().and_then(|p| p.kind.as_deref()),
            Some("thermal")
        );
        assert!(msg.capabilities.scanner.is_none());
    }

    #[test]
    fn test_scanner_event_tagged_by_type() {
        let event: ScannerEvent = serde_json::from_value(json!({
            "type": "scan",
            "event": { "barcode": "0012345678905", "symbology": "ean13" }
        }))
        .unwrap();

        let ScannerEvent::Scan { event } = event;
        assert_eq!(event.barcode, "0012345678905");
        assert_eq!(event.symbology, "ean13");
        assert!(event.timestamp.is_none());
    }

    #[test]
    fn test_scanner_event_unknown_type_rejected() {
        let result = serde_json::from_value::<ScannerEvent>(json!({ "type": "jam" }));
        assert!(result.is_err());
    }

    #[rstest]
    #[case(ScannerAction::Enable, r#"{"action":"enable"}"#)]
    #[case(ScannerAction::Disable, r#"{"action":"disable"}"#)]
    fn test_scanner_command_json(#[case] action: ScannerAction, #[case] expected: &str) {
        let json = serde_json::to_string(&ScannerCommand { action }).unwrap();
        assert_eq!(json, expected);
    }
}
