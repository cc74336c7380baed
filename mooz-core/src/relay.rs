use crate::model::Id;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

type Release = Box<dyn FnOnce(Vec<Value>) + Send>;

/// Live feed of messages addressed to one recipient.
///
/// A subscription built with [`Subscription::on_release`] hands every message
/// it did not yield back to its relay when it is dropped or released, oldest
/// first, so nothing pushed to it is lost.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Value>,
    release: Option<Release>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { rx, release: None }
    }

    /// Run `release` with the unconsumed messages when this subscription ends.
    pub fn on_release(mut self, release: impl FnOnce(Vec<Value>) + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// `None` once the relay has stopped feeding this subscription.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }

    /// End the subscription. `unconsumed` holds messages already taken from
    /// it that never reached their consumer; they go back ahead of the rest.
    pub fn release(mut self, unconsumed: Vec<Value>) {
        self.finish(unconsumed);
    }

    fn finish(&mut self, mut leftovers: Vec<Value>) {
        let Some(release) = self.release.take() else {
            return;
        };
        self.rx.close();
        while let Ok(message) = self.rx.try_recv() {
            leftovers.push(message);
        }
        release(leftovers);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.finish(Vec::new());
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("releases", &self.release.is_some())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay unreachable: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("relay answered with status {0}")]
    Status(u16),
    #[error("failed to decode relay payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("relay did not answer in time")]
    Timeout,
    #[error("relay is closed")]
    Closed,
}

/// Store-and-forward mailbox keyed by recipient id.
///
/// Each message handed to `send` is observed exactly once, either by one
/// `pending` drain or by the subscriber that is live at the time, and always
/// in the order it was sent.
#[async_trait]
pub trait MessageRelay: Send + Sync {
    /// Append `message` to the queue of `to`. Returns once the append is durable.
    async fn send(&self, message: Value, to: &Id) -> Result<(), RelayError>;

    /// Drain every message queued for `to`, oldest first.
    async fn pending(&self, to: &Id) -> Result<Vec<Value>, RelayError>;

    /// Push delivery for `to`, if this relay supports it.
    async fn subscribe(&self, _to: &Id) -> Option<Subscription> {
        None
    }
}
