use async_trait::async_trait;
use mooz_client::{Delivery, SessionConfig};
use mooz_core::{Id, MessageRelay, RelayError, Subscription};
use mooz_server::MemoryRelay;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Session settings tuned for tests: push delivery and near-instant pacing.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        batch_size: 10,
        flush_interval: Duration::from_millis(1),
        max_send_attempts: 5,
        send_timeout: Duration::from_millis(200),
        negotiation_timeout: Duration::from_secs(5),
        delivery: Delivery::Push {
            fallback_interval: Duration::from_millis(10),
        },
    }
}

pub fn poll_config(interval: Duration) -> SessionConfig {
    SessionConfig {
        delivery: Delivery::Poll { interval },
        ..fast_config()
    }
}

pub fn shared_relay() -> (MemoryRelay, Arc<dyn MessageRelay>) {
    let relay = MemoryRelay::new();
    let shared: Arc<dyn MessageRelay> = Arc::new(relay.clone());
    (relay, shared)
}

pub fn id(s: &str) -> Id {
    Id::parse(s).expect("Invalid test id")
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until<F: FnMut() -> bool>(what: &str, mut condition: F) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "Timed out waiting for {}", what);
}

/// Refuses the first `failures` sends, and always refuses payloads marked
/// `"poison": true`.
pub struct FlakyRelay {
    inner: MemoryRelay,
    failures: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl FlakyRelay {
    pub fn new(inner: MemoryRelay, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MessageRelay for FlakyRelay {
    async fn send(&self, message: Value, to: &Id) -> Result<(), RelayError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if message.get("poison") == Some(&Value::Bool(true)) {
            return Err(RelayError::Status(500));
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RelayError::Status(503));
        }
        self.inner.send(message, to).await
    }

    async fn pending(&self, to: &Id) -> Result<Vec<Value>, RelayError> {
        self.inner.pending(to).await
    }
}

/// Counts how often the inbound side touches the relay.
pub struct CountingRelay {
    inner: MemoryRelay,
    pub polls: AtomicUsize,
}

impl CountingRelay {
    pub fn new(inner: MemoryRelay) -> Self {
        Self {
            inner,
            polls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MessageRelay for CountingRelay {
    async fn send(&self, message: Value, to: &Id) -> Result<(), RelayError> {
        self.inner.send(message, to).await
    }

    async fn pending(&self, to: &Id) -> Result<Vec<Value>, RelayError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.inner.pending(to).await
    }

    async fn subscribe(&self, _to: &Id) -> Option<Subscription> {
        None
    }
}

/// Never answers sends of payloads marked `"stall": true`.
pub struct StalledRelay {
    inner: MemoryRelay,
}

impl StalledRelay {
    pub fn new(inner: MemoryRelay) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl MessageRelay for StalledRelay {
    async fn send(&self, message: Value, to: &Id) -> Result<(), RelayError> {
        if message.get("stall") == Some(&Value::Bool(true)) {
            return std::future::pending().await;
        }
        self.inner.send(message, to).await
    }

    async fn pending(&self, to: &Id) -> Result<Vec<Value>, RelayError> {
        self.inner.pending(to).await
    }
}
