use crate::error::{Result, SpeakerBusError};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Release = Box<dyn FnOnce() + Send>;

/// Handle for one topic subscription
///
/// Payloads arrive in the order the transport delivered them. The
/// subscription is released by [`Subscription::unsubscribe`] or on drop,
/// whichever comes first; releasing twice is a no-op.
pub struct Subscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Bytes>,
    release: Option<Release>,
}

impl Subscription {
    pub(crate) fn new(
        topic: impl Into<String>,
        rx: mpsc::UnboundedReceiver<Bytes>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            topic: topic.into(),
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// Topic this subscription listens on
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether the subscription is still attached
    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    /// Receive the next payload
    ///
    /// Returns `None` once unsubscribed or when the transport goes away.
    pub async fn recv(&mut self) -> Option<Bytes> {
        if !self.is_active() {
            return None;
        }
        self.rx.recv().await
    }

    /// Try to receive a payload without blocking
    ///
    /// Returns `None` if no payload is waiting or the subscription was released.
    pub fn try_recv(&mut self) -> Result<Option<Bytes>> {
        if !self.is_active() {
            return Ok(None);
        }
        match self.rx.try_recv() {
            Ok(payload) => Ok(Some(payload)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SpeakerBusError::ConnectionClosed),
        }
    }

    /// Detach from the topic. Safe to call any number of times.
    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::debug!("Unsubscribing from {}", self.topic);
            release();
            self.rx.close();
        }
    }

    /// Run `handler` for every payload on a background task.
    ///
    /// Aborting the returned handle drops the subscription, which releases it.
    pub fn spawn_handler<F>(mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(payload) = self.recv().await {
                handler(payload);
            }
            tracing::debug!("Subscription to {} ended", self.topic);
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted() -> (Subscription, mpsc::UnboundedSender<Bytes>, Arc<AtomicUsize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = releases.clone();
        let sub = Subscription::new("speaker.event", rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (sub, tx, releases)
    }

    #[tokio::test]
    async fn unsubscribe_twice_releases_once() {
        let (mut sub, tx, releases) = counted();
        tx.send(Bytes::from_static(b"one")).unwrap();
        assert_eq!(sub.recv().await, Some(Bytes::from_static(b"one")));

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        let _ = tx.send(Bytes::from_static(b"late"));
        assert_eq!(sub.recv().await, None);
        assert_eq!(sub.try_recv().unwrap(), None);
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn drop_releases() {
        let (sub, _tx, releases) = counted();
        drop(sub);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn try_recv_reports_closed_transport() {
        let (mut sub, tx, _) = counted();
        assert_eq!(sub.try_recv().unwrap(), None);
        drop(tx);
        assert!(matches!(sub.try_recv(), Err(SpeakerBusError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn handler_sees_payloads_in_order_and_abort_releases() {
        let (sub, tx, releases) = counted();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let handle = sub.spawn_handler(move |payload| {
            let _ = seen_tx.send(payload);
        });

        tx.send(Bytes::from_static(b"a")).unwrap();
        tx.send(Bytes::from_static(b"b")).unwrap();
        assert_eq!(seen_rx.recv().await, Some(Bytes::from_static(b"a")));
        assert_eq!(seen_rx.recv().await, Some(Bytes::from_static(b"b")));

        handle.abort();
        let _ = handle.await;
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
