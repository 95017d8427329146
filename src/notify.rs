//! Best-effort "document updated" broadcasts.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Sent after every successful snapshot publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpdate {
    pub document: String,
    pub base_sequence: u64,
}

/// Fan-out of [`DocumentUpdate`] events.
///
/// Sending never blocks. A receiver that falls more than `capacity` events
/// behind loses the oldest ones.
#[derive(Debug)]
pub struct NotificationHub {
    sender: broadcast::Sender<DocumentUpdate>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentUpdate> {
        self.sender.subscribe()
    }

    /// Run `receiver` on a background task for every update.
    ///
    /// The callback runs off the publishing path, so a slow or panicking
    /// receiver only affects itself. Must be called within a tokio runtime.
    pub fn subscribe_with<F>(&self, mut receiver: F) -> JoinHandle<()>
    where
        F: FnMut(DocumentUpdate) + Send + 'static,
    {
        let mut rx = self.sender.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(update) => receiver(update),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "notification receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Send an update to every current subscriber. Returns how many saw it.
    pub fn broadcast(&self, update: DocumentUpdate) -> usize {
        match self.sender.send(update) {
            Ok(count) => count,
            Err(_) => {
                tracing::trace!("document update dropped: no subscribers");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    fn update(doc: &str, seq: u64) -> DocumentUpdate {
        DocumentUpdate {
            document: doc.to_string(),
            base_sequence: seq,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_updates() {
        let hub = NotificationHub::new(8);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.broadcast(update("/a.let", 1)), 2);
        assert_eq!(a.recv().await.unwrap(), update("/a.let", 1));
        assert_eq!(b.recv().await.unwrap(), update("/a.let", 1));
    }

    #[test]
    fn broadcast_without_subscribers_is_harmless() {
        let hub = NotificationHub::new(8);
        assert_eq!(hub.broadcast(update("/a.let", 1)), 0);
    }

    #[tokio::test]
    async fn slow_receiver_does_not_block_sender() {
        let hub = NotificationHub::new(2);
        let _stalled = hub.subscribe();
        for seq in 0..100 {
            hub.broadcast(update("/a.let", seq));
        }
        let mut late = hub.subscribe();
        hub.broadcast(update("/a.let", 100));
        assert_eq!(late.recv().await.unwrap().base_sequence, 100);
    }

    #[tokio::test]
    async fn callback_receivers_run_in_background() {
        let hub = NotificationHub::new(8);
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.subscribe_with(move |update| {
            let _ = tx.send(update.document);
        });
        hub.broadcast(update("/b.let", 3));
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("/b.let"));
    }
}
