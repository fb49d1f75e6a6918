//! STOMP frame model and wire conversion.
//!
//! # Wire Format
//!
//! ```text
//! COMMAND\n
//! name:value\n
//! ...\n
//! \n
//! body\0
//! ```
//!
//! Header lines may end in CRLF. The body runs up to the first NUL byte;
//! `content-length` is not consulted, so bodies never contain NUL.

use bytes::{BufMut, Bytes, BytesMut};
use tillbridge_core::constants::*;
use tillbridge_core::FrameParseError;

use crate::headers::{escape_name, escape_value, unescape};
use crate::{Command, HeartBeat, Headers};

/// One protocol frame.
///
/// # Example
///
/// ```
/// use tillbridge_protocol::{Command, Frame};
///
/// let frame = Frame::send("/app/scanner/enable", r#"{"action":"enable"}"#);
/// assert_eq!(frame.command, Command::Send);
/// assert_eq!(frame.header("destination"), Some("/app/scanner/enable"));
///
/// let wire = frame.to_bytes();
/// assert_eq!(wire.last(), Some(&0u8));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Headers,
    pub body: Bytes,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// `CONNECT` frame opening a session.
    pub fn connect(host: &str, heart_beat: HeartBeat) -> Self {
        Self::new(Command::Connect)
            .with_header(HEADER_ACCEPT_VERSION, STOMP_VERSION)
            .with_header(HEADER_HOST, host)
            .with_header(HEADER_HEART_BEAT, heart_beat.to_string())
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header(HEADER_ID, id)
            .with_header(HEADER_DESTINATION, destination)
            .with_header(HEADER_ACK, "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header(HEADER_ID, id)
    }

    pub fn send(destination: &str, body: impl Into<Bytes>) -> Self {
        Self::new(Command::Send)
            .with_header(HEADER_DESTINATION, destination)
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn destination(&self) -> Option<&str> {
        self.header(HEADER_DESTINATION)
    }

    pub fn receipt_id(&self) -> Option<&str> {
        self.header(HEADER_RECEIPT_ID)
    }

    /// Server heart-beat advertisement, if present and well formed.
    pub fn heart_beat(&self) -> Option<HeartBeat> {
        self.header(HEADER_HEART_BEAT)
            .and_then(|v| HeartBeat::parse(v).ok())
    }

    /// Human readable summary of an `ERROR` frame.
    pub fn error_message(&self) -> String {
        match self.header(HEADER_MESSAGE) {
            Some(message) => message.to_string(),
            None => String::from_utf8_lossy(&self.body).trim().to_string(),
        }
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Append the wire encoding of this frame, NUL terminator included.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len_hint());
        dst.put_slice(self.command.as_str().as_bytes());
        dst.put_u8(LF);
        for (name, value) in self.headers.iter() {
            dst.put_slice(escape_name(name).as_bytes());
            dst.put_u8(b':');
            dst.put_slice(escape_value(value).as_bytes());
            dst.put_u8(LF);
        }
        dst.put_u8(LF);
        dst.put_slice(&self.body);
        dst.put_u8(NUL);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    fn encoded_len_hint(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(n, v)| n.len() + v.len() + 2)
            .sum();
        self.command.as_str().len() + headers + self.body.len() + 3
    }

    /// Parse one frame from a byte slice. A trailing NUL is optional.
    ///
    /// ```
    /// use tillbridge_protocol::Frame;
    ///
    /// let original = Frame::send("/app/payment/cancel", r#"{"action":"cancel"}"#);
    /// let decoded = Frame::decode(&original.to_bytes()).unwrap();
    /// assert_eq!(decoded, original);
    /// ```
    pub fn decode(raw: &[u8]) -> Result<Frame, FrameParseError> {
        let raw = raw.strip_suffix(&[NUL]).unwrap_or(raw);
        Self::parse(Bytes::copy_from_slice(raw))
    }

    /// Parse one frame from its wire bytes, NUL terminator excluded.
    ///
    /// Leading heart-beat EOLs must already be stripped.
    ///
    /// ```
    /// use bytes::Bytes;
    /// use tillbridge_protocol::{Command, Frame};
    ///
    /// let raw = Bytes::from_static(b"RECEIPT\r\nreceipt-id:r-1\r\n\r\n");
    /// let frame = Frame::parse(raw).unwrap();
    ///
    /// assert_eq!(frame.command, Command::Receipt);
    /// assert_eq!(frame.receipt_id(), Some("r-1"));
    /// assert!(frame.body.is_empty());
    /// ```
    pub fn parse(raw: Bytes) -> Result<Frame, FrameParseError> {
        if raw.is_empty() {
            return Err(FrameParseError::EmptyFrame);
        }

        let mut command: Option<Command> = None;
        let mut headers = Headers::new();
        let mut pos = 0;

        loop {
            let lf = raw[pos..]
                .iter()
                .position(|&b| b == LF)
                .map(|i| pos + i)
                .ok_or(FrameParseError::MissingHeaderTerminator)?;

            let mut line = &raw[pos..lf];
            if line.last() == Some(&CR) {
                line = &line[..line.len() - 1];
            }
            pos = lf + 1;

            let line = std::str::from_utf8(line).map_err(|e| FrameParseError::InvalidUtf8 {
                message: e.to_string(),
            })?;

            match command {
                None if line.is_empty() => return Err(FrameParseError::EmptyFrame),
                None => command = Some(Command::parse(line)),
                Some(_) if line.is_empty() => break,
                Some(_) => {
                    let (name, value) = parse_header_line(line)?;
                    headers.insert(name, value);
                }
            }
        }

        Ok(Frame {
            command: command.ok_or(FrameParseError::EmptyFrame)?,
            headers,
            body: raw.slice(pos..),
        })
    }
}

fn parse_header_line(line: &str) -> Result<(String, String), FrameParseError> {
    match line.split_once(':') {
        Some((name, value)) if !name.is_empty() => Ok((unescape(name), unescape(value))),
        _ => Err(FrameParseError::MalformedHeader {
            line: line.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(raw: &'static [u8]) -> Result<Frame, FrameParseError> {
        Frame::parse(Bytes::from_static(raw))
    }

    #[test]
    fn test_connect_frame_headers() {
        let frame = Frame::connect("localhost", HeartBeat::new(10_000, 10_000));
        let wire = frame.to_bytes();

        assert_eq!(
            &wire[..],
            b"CONNECT\naccept-version:1.2\nhost:localhost\nheart-beat:10000,10000\n\n\0"
        );
    }

    #[test]
    fn test_subscribe_frame() {
        let frame = Frame::subscribe("sub-0", "/topic/capabilities");
        assert_eq!(frame.header("id"), Some("sub-0"));
        assert_eq!(frame.destination(), Some("/topic/capabilities"));
        assert_eq!(frame.header("ack"), Some("auto"));
    }

    #[test]
    fn test_parse_message_with_body() {
        let frame = parse(
            b"MESSAGE\ndestination:/topic/scanner/events\nsubscription:sub-1\n\n{\"type\":\"scan\"}",
        )
        .unwrap();

        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.destination(), Some("/topic/scanner/events"));
        assert_eq!(frame.body_str(), Some("{\"type\":\"scan\"}"));
    }

    #[test]
    fn test_parse_no_headers() {
        let frame = parse(b"CONNECTED\n\n").unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert!(frame.headers.is_empty());
        assert!(frame.body.is_empty());
    }

    #[test]
    fn test_parse_value_with_colon() {
        let frame = parse(b"MESSAGE\nmessage-id:a:b:c\n\n").unwrap();
        assert_eq!(frame.header("message-id"), Some("a:b:c"));
    }

    #[test]
    fn test_parse_unescapes_headers() {
        let frame = parse(b"ERROR\nmessage:line1\\nline2\\cend\n\n").unwrap();
        assert_eq!(frame.header("message"), Some("line1\nline2:end"));
    }

    #[test]
    fn test_body_keeps_trailing_newline() {
        let frame = parse(b"MESSAGE\ndestination:/x\n\n{}\n").unwrap();
        assert_eq!(&frame.body[..], b"{}\n");
    }

    #[rstest]
    #[case(b"", FrameParseError::EmptyFrame)]
    #[case(b"\n\n", FrameParseError::EmptyFrame)]
    #[case(b"MESSAGE", FrameParseError::MissingHeaderTerminator)]
    #[case(b"MESSAGE\ndestination:/x", FrameParseError::MissingHeaderTerminator)]
    #[case(b"MESSAGE\nno-colon-here\n\n", FrameParseError::MalformedHeader { line: "no-colon-here".into() })]
    #[case(b"MESSAGE\n:value\n\n", FrameParseError::MalformedHeader { line: ":value".into() })]
    fn test_parse_errors(#[case] raw: &'static [u8], #[case] expected: FrameParseError) {
        assert_eq!(parse(raw).unwrap_err(), expected);
    }

    #[test]
    fn test_parse_invalid_utf8_head() {
        let err = parse(b"MESSAGE\ndestination:\xff\n\n").unwrap_err();
        assert!(matches!(err, FrameParseError::InvalidUtf8 { .. }));
    }

    #[test]
    fn test_error_message_prefers_header() {
        let frame = Frame::new(Command::Error)
            .with_header("message", "bad destination")
            .with_body("details");
        assert_eq!(frame.error_message(), "bad destination");

        let frame = Frame::new(Command::Error).with_body("only body\n");
        assert_eq!(frame.error_message(), "only body");
    }

    #[test]
    fn test_encode_escapes_special_characters() {
        let frame = Frame::new(Command::Send).with_header("x:y", "a\nb");
        let wire = frame.to_bytes();
        assert_eq!(&wire[..], b"SEND\nx\\cy:a\\nb\n\n\0");
    }

    #[test]
    fn test_decode_with_and_without_nul() {
        let with = Frame::decode(b"RECEIPT\nreceipt-id:9\n\n\0").unwrap();
        let without = Frame::decode(b"RECEIPT\nreceipt-id:9\n\n").unwrap();
        assert_eq!(with, without);
        assert_eq!(with.receipt_id(), Some("9"));
    }

    #[test]
    fn test_heart_beat_header() {
        let frame = parse(b"CONNECTED\nversion:1.2\nheart-beat:0,5000\n\n").unwrap();
        assert_eq!(frame.heart_beat(), Some(HeartBeat::new(0, 5000)));
    }
}
