//! Single-slot, latest-wins mailbox

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

/// Holds at most one value; a new post replaces whatever is waiting
///
/// Producers never block. The reader either polls with [`Mailbox::take`] or
/// waits with [`Mailbox::recv`].
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        // A panic while holding the lock leaves a plain Option behind
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Store `value`, returning the value it replaced
    pub fn post(&self, value: T) -> Option<T> {
        let replaced = self.lock().replace(value);
        self.notify.notify_one();
        replaced
    }

    /// Store `value` only if the slot is empty
    ///
    /// Returns the value back when the slot was occupied.
    pub fn offer(&self, value: T) -> Option<T> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Some(value);
        }
        *slot = Some(value);
        drop(slot);
        self.notify.notify_one();
        None
    }

    /// Non-blocking poll
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    /// Take the value only if `pred` accepts it; otherwise leave it in place
    pub fn take_if(&self, pred: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(pred) {
            slot.take()
        } else {
            None
        }
    }

    /// Whether a value is waiting
    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// Drop any waiting value
    pub fn clear(&self) {
        self.lock().take();
    }

    /// Wait until a value is available
    pub async fn recv(&self) -> T {
        loop {
            let notified = self.notify.notified();
            if let Some(value) = self.take() {
                return value;
            }
            notified.await;
        }
    }

    /// Wait up to `timeout` for a value
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_latest_wins() {
        let mailbox = Mailbox::new();
        assert_eq!(mailbox.post(1), None);
        assert_eq!(mailbox.post(2), Some(1));
        assert_eq!(mailbox.take(), Some(2));
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn test_offer_keeps_existing() {
        let mailbox = Mailbox::new();
        assert_eq!(mailbox.offer("first"), None);
        assert_eq!(mailbox.offer("second"), Some("second"));
        assert_eq!(mailbox.take(), Some("first"));
    }

    #[test]
    fn test_take_if() {
        let mailbox = Mailbox::new();
        mailbox.post(7);
        assert_eq!(mailbox.take_if(|v| *v > 10), None);
        assert!(!mailbox.is_empty());
        assert_eq!(mailbox.take_if(|v| *v == 7), Some(7));
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_post() {
        let mailbox = Arc::new(Mailbox::new());
        let reader = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move { mailbox.recv().await })
        };

        tokio::task::yield_now().await;
        mailbox.post("frame");
        assert_eq!(reader.await.unwrap(), "frame");
    }

    #[tokio::test]
    async fn test_recv_sees_value_posted_before_wait() {
        let mailbox = Mailbox::new();
        mailbox.post(3);
        assert_eq!(mailbox.recv().await, 3);
    }

    #[tokio::test]
    async fn test_recv_timeout_expires() {
        let mailbox: Mailbox<u8> = Mailbox::new();
        assert_eq!(mailbox.recv_timeout(Duration::from_millis(10)).await, None);
    }
}
