use async_trait::async_trait;
use dashmap::DashMap;
use mooz_core::{Id, MessageRelay, RelayError, Subscription};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

struct Subscriber {
    token: u64,
    tx: mpsc::UnboundedSender<Value>,
}

/// Per-recipient state. While a subscriber is attached and no replaced one is
/// still holding messages, the queue stays empty: everything goes straight to
/// the subscriber.
#[derive(Default)]
struct Mailbox {
    queue: VecDeque<Value>,
    subscriber: Option<Subscriber>,
    /// Replaced subscribers that have not handed back their unread messages.
    retiring: Vec<u64>,
}

impl Mailbox {
    fn is_idle(&self) -> bool {
        self.subscriber.is_none() && self.retiring.is_empty()
    }

    /// Move the queue to the current subscriber once no replaced subscriber
    /// can still return older messages.
    fn forward_queue(&mut self) {
        if !self.retiring.is_empty() {
            return;
        }
        let Some(sub) = &self.subscriber else {
            return;
        };
        while let Some(message) = self.queue.pop_front() {
            if let Err(e) = sub.tx.send(message) {
                self.queue.push_front(e.0);
                self.retire_subscriber();
                return;
            }
        }
    }

    /// A subscriber whose feed is closed may still be about to return what it
    /// held, so it waits with the replaced ones.
    fn retire_subscriber(&mut self) {
        if let Some(old) = self.subscriber.take() {
            self.retiring.push(old.token);
        }
    }
}

struct MemoryRelayInner {
    mailboxes: DashMap<Id, Mailbox>,
    next_token: AtomicU64,
}

/// Process-local relay. Each mailbox is only touched under its map shard lock,
/// which makes every append, drain and subscriber hand-over atomic.
#[derive(Clone)]
pub struct MemoryRelay {
    inner: Arc<MemoryRelayInner>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryRelayInner {
                mailboxes: DashMap::new(),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    pub fn push(&self, message: Value, to: &Id) {
        let mut entry = self.inner.mailboxes.entry(to.clone()).or_default();
        let mailbox = &mut *entry;

        let undelivered = match &mailbox.subscriber {
            Some(sub) if mailbox.retiring.is_empty() => sub.tx.send(message).err().map(|e| e.0),
            _ => Some(message),
        };

        if let Some(message) = undelivered {
            if mailbox.retiring.is_empty() && mailbox.subscriber.is_some() {
                debug!("Subscriber for {} went away, queueing instead", to);
                mailbox.retire_subscriber();
            }
            mailbox.queue.push_back(message);
        }
    }

    pub fn drain(&self, to: &Id) -> Vec<Value> {
        let mut drained = Vec::new();
        self.inner.mailboxes.remove_if_mut(to, |_, mailbox| {
            drained.extend(mailbox.queue.drain(..));
            mailbox.is_idle()
        });
        drained
    }

    /// Attach a push subscriber to `to`, replacing any earlier one. Messages
    /// already queued are handed over first.
    ///
    /// A replaced subscriber's feed ends; messages it still held come back
    /// when it is dropped and reach the new subscriber ahead of anything
    /// pushed since.
    pub fn attach(&self, to: &Id) -> Subscription {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut entry = self.inner.mailboxes.entry(to.clone()).or_default();
            let mailbox = &mut *entry;
            if let Some(old) = &mailbox.subscriber {
                debug!("Subscriber {} for {} replaced by {}", old.token, to, token);
            }
            mailbox.retire_subscriber();
            mailbox.subscriber = Some(Subscriber { token, tx });
            mailbox.forward_queue();
        }

        let relay = self.clone();
        let to = to.clone();
        Subscription::new(rx).on_release(move |leftovers| relay.unsubscribe(&to, token, leftovers))
    }

    /// Detach subscriber `token` from `to` and return the messages it never
    /// consumed to the head of the mailbox.
    fn unsubscribe(&self, to: &Id, token: u64, leftovers: Vec<Value>) {
        let mut entry = self.inner.mailboxes.entry(to.clone()).or_default();
        let mailbox = &mut *entry;

        if mailbox.subscriber.as_ref().is_some_and(|s| s.token == token) {
            mailbox.subscriber = None;
        }
        mailbox.retiring.retain(|t| *t != token);

        if !leftovers.is_empty() {
            debug!("Returning {} undelivered messages to {}", leftovers.len(), to);
        }
        for message in leftovers.into_iter().rev() {
            mailbox.queue.push_front(message);
        }
        mailbox.forward_queue();
    }

    /// Whether a push subscriber is currently attached for `to`.
    pub fn is_subscribed(&self, to: &Id) -> bool {
        self.inner
            .mailboxes
            .get(to)
            .is_some_and(|mailbox| mailbox.subscriber.is_some())
    }

    pub fn queued(&self, to: &Id) -> usize {
        self.inner
            .mailboxes
            .get(to)
            .map_or(0, |mailbox| mailbox.queue.len())
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageRelay for MemoryRelay {
    async fn send(&self, message: Value, to: &Id) -> Result<(), RelayError> {
        self.push(message, to);
        Ok(())
    }

    async fn pending(&self, to: &Id) -> Result<Vec<Value>, RelayError> {
        Ok(self.drain(to))
    }

    async fn subscribe(&self, to: &Id) -> Option<Subscription> {
        Some(self.attach(to))
    }
}
