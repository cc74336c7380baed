use crate::config::SessionConfig;
use crate::signaling::inbound::{Listeners, run_inbound};
use crate::signaling::pacer::{Outgoing, run_pacer};
use mooz_core::{Envelope, Id, Message, MessageRelay};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("signaling session is closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("relay payloads must be JSON objects")]
    NotAnObject,
}

/// One client's view of the relay.
///
/// Cheap to clone; all clones share the same id, outbound queue and
/// listeners. The background loops stop when the session is closed or the
/// last clone is dropped.
#[derive(Clone)]
pub struct SignalingSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Id,
    relay: Arc<dyn MessageRelay>,
    config: SessionConfig,
    outbox: mpsc::UnboundedSender<Outgoing>,
    listeners: Listeners,
    inbound: OnceLock<JoinHandle<()>>,
    pacer: JoinHandle<()>,
    closed: AtomicBool,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.pacer.abort();
        if let Some(inbound) = self.inbound.get() {
            inbound.abort();
        }
    }
}

impl SignalingSession {
    /// Open a session under a freshly minted id.
    pub fn new(relay: Arc<dyn MessageRelay>, config: SessionConfig) -> Self {
        Self::with_id(Id::new(), relay, config)
    }

    pub fn with_id(id: Id, relay: Arc<dyn MessageRelay>, config: SessionConfig) -> Self {
        let (outbox, rx) = mpsc::unbounded_channel();
        let pacer = tokio::spawn(run_pacer(Arc::clone(&relay), rx, config.clone()));
        info!("Signaling session opened as {}", id);

        Self {
            inner: Arc::new(SessionInner {
                id,
                relay,
                config,
                outbox,
                listeners: Arc::new(Mutex::new(Vec::new())),
                inbound: OnceLock::new(),
                pacer,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &Id {
        &self.inner.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Queue `message` for `to`, stamped with this session's id.
    pub fn send(&self, message: Message, to: &Id) -> Result<(), SessionError> {
        let envelope = Envelope::new(self.inner.id.clone(), message);
        let payload = serde_json::to_value(&envelope)?;
        self.enqueue(payload, to)
    }

    /// Queue an arbitrary JSON object for `to`. Its `from` field is
    /// overwritten with this session's id.
    pub fn send_value(&self, payload: Value, to: &Id) -> Result<(), SessionError> {
        let Value::Object(mut fields) = payload else {
            return Err(SessionError::NotAnObject);
        };
        fields.insert("from".to_owned(), Value::String(self.inner.id.to_string()));
        self.enqueue(Value::Object(fields), to)
    }

    fn enqueue(&self, payload: Value, to: &Id) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.inner
            .outbox
            .send(Outgoing::Message {
                payload,
                to: to.clone(),
            })
            .map_err(|_| SessionError::Closed)
    }

    /// Wait until everything queued so far has been handed to the relay or
    /// given up on.
    pub async fn flush(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let (done, wait) = oneshot::channel();
        self.inner
            .outbox
            .send(Outgoing::Barrier(done))
            .map_err(|_| SessionError::Closed)?;
        wait.await.map_err(|_| SessionError::Closed)
    }

    /// Register a listener. It sees every inbound message from now on, in
    /// arrival order. The first registration starts the inbound loop.
    pub fn on_message(&self) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.is_closed() {
            return rx;
        }

        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);

        self.inner.inbound.get_or_init(|| {
            debug!("Starting inbound loop for {}", self.inner.id);
            tokio::spawn(run_inbound(
                self.inner.id.clone(),
                Arc::clone(&self.inner.relay),
                self.inner.config.delivery,
                Arc::clone(&self.inner.listeners),
            ))
        });

        rx
    }

    /// Stop both loops. Queued but unsent messages are discarded and every
    /// listener channel ends.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.pacer.abort();
        if let Some(inbound) = self.inner.inbound.get() {
            inbound.abort();
        }
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("Signaling session {} closed", self.inner.id);
    }
}
