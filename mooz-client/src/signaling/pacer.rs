use crate::config::SessionConfig;
use mooz_core::{Id, MessageRelay, RelayError};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Work accepted by the outbound loop.
pub(crate) enum Outgoing {
    Message { payload: Value, to: Id },
    /// Resolved once everything queued before it has been handled.
    Barrier(oneshot::Sender<()>),
}

enum Queued {
    Message {
        payload: Value,
        to: Id,
        attempts: u32,
    },
    Barrier(oneshot::Sender<()>),
}

impl From<Outgoing> for Queued {
    fn from(item: Outgoing) -> Self {
        match item {
            Outgoing::Message { payload, to } => Queued::Message {
                payload,
                to,
                attempts: 0,
            },
            Outgoing::Barrier(done) => Queued::Barrier(done),
        }
    }
}

/// Hands queued messages to the relay at most `batch_size` per tick, in call
/// order. A message the relay refuses stays at the head and is retried on the
/// next tick until `max_send_attempts` is reached. A send that outlives
/// `send_timeout` counts as refused, so a stalled relay cannot hold the queue.
pub(crate) async fn run_pacer(
    relay: Arc<dyn MessageRelay>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    config: SessionConfig,
) {
    let limits = Limits {
        batch_size: config.batch_size.max(1),
        max_attempts: config.max_send_attempts.max(1),
        send_timeout: config.send_timeout,
    };
    let mut queue: VecDeque<Queued> = VecDeque::new();
    let mut last_tick: Option<Instant> = None;

    loop {
        if queue.is_empty() {
            match rx.recv().await {
                Some(item) => queue.push_back(item.into()),
                None => break,
            }
        }

        if let Some(last) = last_tick {
            tokio::time::sleep_until(last + config.flush_interval).await;
        }
        while let Ok(item) = rx.try_recv() {
            queue.push_back(item.into());
        }

        last_tick = Some(Instant::now());
        flush_batch(relay.as_ref(), &mut queue, &limits).await;
    }

    debug!("Outbound loop finished with {} unsent items", queue.len());
}

struct Limits {
    batch_size: usize,
    max_attempts: u32,
    send_timeout: Duration,
}

async fn send_within(
    relay: &dyn MessageRelay,
    payload: Value,
    to: &Id,
    limit: Duration,
) -> Result<(), RelayError> {
    match tokio::time::timeout(limit, relay.send(payload, to)).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::Timeout),
    }
}

async fn flush_batch(relay: &dyn MessageRelay, queue: &mut VecDeque<Queued>, limits: &Limits) {
    let mut sent = 0;

    while sent < limits.batch_size {
        let Some(front) = queue.front_mut() else {
            return;
        };

        match front {
            Queued::Barrier(_) => {
                if let Some(Queued::Barrier(done)) = queue.pop_front() {
                    let _ = done.send(());
                }
            }

            Queued::Message {
                payload,
                to,
                attempts,
            } => match send_within(relay, payload.clone(), to, limits.send_timeout).await {
                Ok(()) => {
                    queue.pop_front();
                    sent += 1;
                }
                Err(e) => {
                    *attempts += 1;
                    if *attempts >= limits.max_attempts {
                        error!(
                            "Dropping message to {} after {} attempts: {}",
                            to, attempts, e
                        );
                        queue.pop_front();
                    } else {
                        warn!(
                            "Send to {} failed (attempt {}), retrying next tick: {}",
                            to, attempts, e
                        );
                        return;
                    }
                }
            },
        }
    }
}
