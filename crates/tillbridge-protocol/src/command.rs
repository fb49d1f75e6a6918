//! STOMP frame commands.
//!
//! The client sends `CONNECT`, `SUBSCRIBE`, `UNSUBSCRIBE`, `SEND` and
//! `DISCONNECT`; the bridge answers with `CONNECTED`, `MESSAGE`, `RECEIPT` and
//! `ERROR`. Commands the client does not know are kept verbatim so the
//! connection can log and skip them.
//!
//! ```
//! use tillbridge_protocol::Command;
//!
//! assert_eq!(Command::parse("MESSAGE"), Command::Message);
//! assert_eq!(Command::Send.as_str(), "SEND");
//! assert_eq!(Command::parse("NACK"), Command::Unknown("NACK".into()));
//! ```

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    // Client frames
    Connect,
    Stomp,
    Subscribe,
    Unsubscribe,
    Send,
    Disconnect,

    // Server frames
    Connected,
    Message,
    Receipt,
    Error,

    Unknown(String),
}

impl Command {
    pub fn parse(s: &str) -> Self {
        match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "SEND" => Command::Send,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => Command::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Unknown(s) => s,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
