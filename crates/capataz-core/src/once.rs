//! Exactly-once completion.
//!
//! A start or stop sequence races several notifications (ready, exit,
//! error, a timer). Each racer holds a [`Claim`]; the first to call
//! [`Claim::fire`] delivers its outcome and every later call is a no-op.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Shared sender side of a one-shot outcome.
#[derive(Debug)]
pub struct Claim<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Claim<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Claim<T> {
    /// Creates a claim and the receiver its winner will complete.
    #[must_use]
    pub fn pair() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Delivers `value` if nobody has yet. Returns whether this call won.
    pub fn fire(&self, value: T) -> bool {
        let sender = self.slot.lock().take();
        match sender {
            Some(tx) => {
                // A dropped receiver still counts as consumed.
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    /// Whether an outcome has been delivered.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.slot.lock().is_none()
    }
}
