//! Correlation of outbound `receipt` headers with inbound `RECEIPT` frames.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tillbridge_protocol::Frame;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{ClientError, Result};

type Outcome = Result<()>;

/// Table of `receipt` ids waiting for the bridge's `RECEIPT`.
///
/// Ids are random UUIDs, so a late `RECEIPT` from an earlier connection can
/// never resolve a newer waiter.
///
/// # Example
///
/// ```
/// use tillbridge_client::ReceiptCorrelator;
///
/// let receipts = ReceiptCorrelator::new();
/// let pending = receipts.register();
/// assert_eq!(receipts.pending_count(), 1);
///
/// assert!(receipts.resolve(&pending.id));
/// assert!(!receipts.resolve(&pending.id));
/// assert_eq!(receipts.pending_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct ReceiptCorrelator {
    inner: Arc<Mutex<Pending>>,
}

#[derive(Default)]
struct Pending {
    next_seq: u64,
    waiting: HashMap<String, Waiter>,
}

struct Waiter {
    seq: u64,
    tx: oneshot::Sender<Outcome>,
}

/// A registered receipt id and the channel its outcome arrives on.
pub struct PendingReceipt {
    /// Value for the outgoing frame's `receipt` header.
    pub id: String,
    rx: oneshot::Receiver<Outcome>,
}

impl ReceiptCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh receipt id. Must happen before the frame is queued.
    pub fn register(&self) -> PendingReceipt {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        let mut pending = self.inner.lock();
        let seq = pending.next_seq;
        pending.next_seq += 1;
        pending.waiting.insert(id.clone(), Waiter { seq, tx });

        PendingReceipt { id, rx }
    }

    /// Resolve the waiter for `receipt_id`. Unknown and duplicate ids are ignored.
    pub fn resolve(&self, receipt_id: &str) -> bool {
        match self.inner.lock().waiting.remove(receipt_id) {
            Some(waiter) => {
                debug!(receipt_id, "Receipt confirmed");
                let _ = waiter.tx.send(Ok(()));
                true
            }
            None => {
                debug!(receipt_id, "Ignoring unknown or duplicate receipt");
                false
            }
        }
    }

    /// Reject the receipt an `ERROR` frame refers to.
    ///
    /// The frame's `receipt-id` is used when it names a waiting receipt;
    /// otherwise the most recently registered receipt is rejected.
    pub fn reject_on_error(&self, frame: &Frame, error: ClientError) -> bool {
        let waiter = {
            let mut pending = self.inner.lock();
            let target = frame
                .receipt_id()
                .filter(|id| pending.waiting.contains_key(*id))
                .map(str::to_string)
                .or_else(|| {
                    pending
                        .waiting
                        .iter()
                        .max_by_key(|(_, waiter)| waiter.seq)
                        .map(|(id, _)| id.clone())
                });
            target.and_then(|id| pending.waiting.remove(&id).map(|w| (id, w)))
        };

        match waiter {
            Some((id, waiter)) => {
                warn!(receipt_id = %id, "Receipt rejected by bridge: {}", error);
                let _ = waiter.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Reject every waiting receipt.
    pub fn fail_all(&self, error: ClientError) {
        let drained: Vec<Waiter> = self.inner.lock().waiting.drain().map(|(_, w)| w).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Failing pending receipts: {}", error);
        }
        for waiter in drained {
            let _ = waiter.tx.send(Err(error.clone()));
        }
    }

    /// Drop the waiter for `receipt_id` without settling it.
    ///
    /// For frames that never made it onto the queue; the waiter's channel
    /// closes and nothing is reported.
    pub fn forget(&self, receipt_id: &str) {
        self.inner.lock().waiting.remove(receipt_id);
    }

    /// Receipts still waiting for the bridge.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Wait for `receipt` to settle, at most `timeout`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::ReceiptTimeout`] if nothing arrives in time; the
    ///   waiter is removed
    /// - [`ClientError::StompProtocol`] if an `ERROR` frame rejected it
    /// - [`ClientError::ConnectionLost`] if the connection went away first
    pub async fn wait(&self, receipt: PendingReceipt, timeout: Duration) -> Result<()> {
        let PendingReceipt { id, rx } = receipt;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::connection_lost("receipt waiter dropped")),
            Err(_) => {
                self.forget(&id);
                warn!(receipt_id = %id, "Receipt timeout after {}ms", timeout.as_millis());
                Err(ClientError::ReceiptTimeout {
                    receipt_id: id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillbridge_protocol::Command;

    fn error_frame(receipt_id: Option<&str>) -> Frame {
        let frame = Frame::new(Command::Error).with_header("message", "rejected");
        match receipt_id {
            Some(id) => frame.with_header("receipt-id", id),
            None => frame,
        }
    }

    #[tokio::test]
    async fn test_resolve() {
        let receipts = ReceiptCorrelator::new();
        let pending = receipts.register();
        let id = pending.id.clone();

        assert!(receipts.resolve(&id));
        assert!(!receipts.resolve(&id));
        receipts.wait(pending, Duration::from_secs(1)).await.unwrap();
        assert_eq!(receipts.pending_count(), 0);
    }

    #[test]
    fn test_ids_are_unique() {
        let receipts = ReceiptCorrelator::new();
        let a = receipts.register();
        let b = receipts.register();
        assert_ne!(a.id, b.id);
        assert_eq!(receipts.pending_count(), 2);
    }

    #[tokio::test]
    async fn test_error_with_matching_receipt_id() {
        let receipts = ReceiptCorrelator::new();
        let first = receipts.register();
        let second = receipts.register();

        let frame = error_frame(Some(&first.id));
        assert!(receipts.reject_on_error(&frame, ClientError::from_error_frame(&frame)));

        let err = receipts.wait(first, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ClientError::StompProtocol { .. }));
        assert_eq!(receipts.pending_count(), 1);
        assert!(receipts.resolve(&second.id));
    }

    #[tokio::test]
    async fn test_error_without_receipt_id_rejects_most_recent() {
        let receipts = ReceiptCorrelator::new();
        let older = receipts.register();
        let newer = receipts.register();

        let frame = error_frame(None);
        receipts.reject_on_error(&frame, ClientError::from_error_frame(&frame));

        assert!(receipts.wait(newer, Duration::from_secs(1)).await.is_err());
        assert!(receipts.resolve(&older.id));
    }

    #[test]
    fn test_error_with_nothing_pending() {
        let receipts = ReceiptCorrelator::new();
        let frame = error_frame(Some("r-1"));
        assert!(!receipts.reject_on_error(&frame, ClientError::from_error_frame(&frame)));
    }

    #[tokio::test]
    async fn test_fail_all() {
        let receipts = ReceiptCorrelator::new();
        let a = receipts.register();
        let b = receipts.register();

        receipts.fail_all(ClientError::connection_lost("socket closed"));

        for pending in [a, b] {
            let err = receipts.wait(pending, Duration::from_secs(1)).await.unwrap_err();
            assert!(err.is_connection_lost());
        }
        assert_eq!(receipts.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let receipts = ReceiptCorrelator::new();
        let pending = receipts.register();

        let err = receipts
            .wait(pending, Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::ReceiptTimeout {
                timeout_ms: 100,
                ..
            }
        ));
        assert_eq!(receipts.pending_count(), 0);
    }
}
