//! Tokio codec for STOMP frames.
//!
//! `StompCodec` splits the byte stream on NUL terminators and turns each
//! chunk into a [`Frame`]. Bare EOLs between frames are heart-beats and are
//! surfaced as [`Inbound::Heartbeat`] so the connection can feed its read
//! watchdog.
//!
//! # Error Handling
//!
//! A frame that fails to parse is returned as [`Inbound::Malformed`] instead
//! of an error: `Framed` ends the stream after the first decoder error, and a
//! single bad frame must not kill the connection. Only unrecoverable
//! conditions (I/O failure, a frame larger than `max_frame_size`) are
//! reported as [`CodecError`].
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use futures::{SinkExt, StreamExt};
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//! use tillbridge_protocol::{Frame, HeartBeat, Inbound, StompCodec};
//!
//! # async fn example() -> Result<(), tillbridge_protocol::CodecError> {
//! let stream = TcpStream::connect("127.0.0.1:9100").await?;
//! let mut framed = Framed::new(stream, StompCodec::new());
//!
//! framed.send(Frame::connect("localhost", HeartBeat::DISABLED)).await?;
//!
//! while let Some(item) = framed.next().await {
//!     match item? {
//!         Inbound::Frame(frame) => println!("{}", frame.command),
//!         Inbound::Heartbeat => {}
//!         Inbound::Malformed(e) => eprintln!("skipped frame: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use tillbridge_core::constants::{CR, DEFAULT_MAX_FRAME_SIZE, LF, NUL};
use tillbridge_core::{Error, FrameParseError};

use crate::Frame;

/// Item produced by [`StompCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(Frame),
    Heartbeat,
    Malformed(FrameParseError),
}

/// Marker for an outgoing heart-beat (a single LF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat;

/// Fatal codec failure. The connection cannot continue after one of these.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] Error),
}

#[derive(Debug)]
pub struct StompCodec {
    max_frame_size: usize,

    /// Bytes of the buffered partial frame already searched for NUL.
    scanned: usize,
}

impl StompCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a codec with a custom frame size limit.
    ///
    /// ```
    /// use tillbridge_protocol::StompCodec;
    ///
    /// let codec = StompCodec::with_max_frame_size(128 * 1024);
    /// assert_eq!(codec.max_frame_size(), 128 * 1024);
    /// ```
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            scanned: 0,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn too_large(&self, size: usize) -> CodecError {
        CodecError::Protocol(Error::FrameTooLarge {
            size,
            max_size: self.max_frame_size,
        })
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StompCodec {
    type Item = Inbound;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, CodecError> {
        // Heart-beats only appear between frames.
        if self.scanned == 0 {
            match src.first() {
                None => return Ok(None),
                Some(&LF) => {
                    src.advance(1);
                    return Ok(Some(Inbound::Heartbeat));
                }
                Some(&CR) => match src.get(1) {
                    None => return Ok(None),
                    Some(&LF) => {
                        src.advance(2);
                        return Ok(Some(Inbound::Heartbeat));
                    }
                    Some(_) => {}
                },
                Some(_) => {}
            }
        }

        let Some(offset) = src[self.scanned..].iter().position(|&b| b == NUL) else {
            self.scanned = src.len();
            if src.len() > self.max_frame_size {
                return Err(self.too_large(src.len()));
            }
            return Ok(None);
        };

        let end = self.scanned + offset;
        self.scanned = 0;
        if end + 1 > self.max_frame_size {
            return Err(self.too_large(end + 1));
        }

        let raw = src.split_to(end + 1).freeze().slice(..end);
        trace!(len = raw.len(), "decoded frame bytes");

        Ok(Some(match Frame::parse(raw) {
            Ok(frame) => Inbound::Frame(frame),
            Err(e) => Inbound::Malformed(e),
        }))
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let start = dst.len();
        item.encode(dst);

        let size = dst.len() - start;
        if size > self.max_frame_size {
            dst.truncate(start);
            return Err(self.too_large(size));
        }
        Ok(())
    }
}

impl Encoder<Heartbeat> for StompCodec {
    type Error = CodecError;

    fn encode(&mut self, _item: Heartbeat, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.put_u8(LF);
        Ok(())
    }
}
