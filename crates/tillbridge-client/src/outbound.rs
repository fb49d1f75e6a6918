use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tillbridge_core::constants::{CONTENT_TYPE_JSON, HEADER_CONTENT_TYPE};
use tillbridge_protocol::Frame;
use tokio::sync::mpsc;
use tracing::trace;

use crate::{ClientError, Result};

/// Cloneable write handle onto the live connection.
///
/// Frames are queued for the connection task, so sending never blocks and
/// never suspends. While no connection is up every send fails with
/// [`ClientError::NotConnected`].
#[derive(Clone, Default)]
pub struct Outbound {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Frame>>>>,
}

impl Outbound {
    /// A detached queue. Sends fail until the transport connects.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `frame` for the connection task.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] if no connection is up, or the
    /// connection task has already exited.
    pub fn send(&self, frame: Frame) -> Result<()> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(ClientError::NotConnected)?;
        trace!(command = %frame.command, "Queueing frame");
        tx.send(frame).map_err(|_| ClientError::NotConnected)
    }

    /// Queue a `SEND` with a JSON body and `content-type: application/json`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Serialization`] if `payload` cannot be encoded
    /// - [`ClientError::NotConnected`] as for [`send`](Self::send)
    pub fn publish_json<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.send(
            Frame::send(destination, body).with_header(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON),
        )
    }

    /// Whether a live connection task is draining the queue.
    pub fn is_attached(&self) -> bool {
        self.tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub(crate) fn attach(&self, tx: mpsc::UnboundedSender<Frame>) {
        *self.tx.lock() = Some(tx);
    }

    pub(crate) fn detach(&self) {
        self.tx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_while_detached() {
        let outbound = Outbound::new();
        assert!(!outbound.is_attached());
        assert!(matches!(
            outbound.send(Frame::disconnect()),
            Err(ClientError::NotConnected)
        ));
    }

    #[test]
    fn test_publish_json() {
        let outbound = Outbound::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        outbound.attach(tx);

        outbound
            .publish_json("/app/scanner/enable", &json!({ "action": "enable" }))
            .unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.destination(), Some("/app/scanner/enable"));
        assert_eq!(frame.header("content-type"), Some("application/json"));
        assert_eq!(frame.body_str(), Some(r#"{"action":"enable"}"#));
    }

    #[test]
    fn test_detach_stops_sending() {
        let outbound = Outbound::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        assert!(outbound.is_attached());

        outbound.detach();
        assert!(outbound.send(Frame::disconnect()).is_err());
    }

    #[test]
    fn test_closed_receiver_is_not_connected() {
        let outbound = Outbound::new();
        let (tx, rx) = mpsc::unbounded_channel();
        outbound.attach(tx);
        drop(rx);

        assert!(!outbound.is_attached());
        assert!(matches!(
            outbound.send(Frame::disconnect()),
            Err(ClientError::NotConnected)
        ));
    }
}
