use crate::config::Delivery;
use mooz_core::{Envelope, Id, MessageRelay};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub(crate) type Listeners = Arc<Mutex<Vec<mpsc::UnboundedSender<Envelope>>>>;

/// Feeds every message addressed to `id` to the registered listeners, by
/// subscription when the relay supports it, by polling otherwise.
pub(crate) async fn run_inbound(
    id: Id,
    relay: Arc<dyn MessageRelay>,
    delivery: Delivery,
    listeners: Listeners,
) {
    let poll_interval = match delivery {
        Delivery::Poll { interval } => interval,
        Delivery::Push { fallback_interval } => {
            match relay.subscribe(&id).await {
                Some(mut subscription) => {
                    info!("Receiving pushes for {}", id);
                    while let Some(raw) = subscription.recv().await {
                        dispatch(&id, raw, &listeners);
                    }
                    warn!("Push subscription for {} ended, falling back to polling", id);
                }
                None => {
                    info!("Relay cannot push to {}, polling instead", id);
                }
            }
            fallback_interval
        }
    };

    poll(id, relay, poll_interval, listeners).await;
}

async fn poll(id: Id, relay: Arc<dyn MessageRelay>, every: Duration, listeners: Listeners) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match relay.pending(&id).await {
            Ok(messages) => {
                if !messages.is_empty() {
                    debug!("Drained {} messages for {}", messages.len(), id);
                }
                for raw in messages {
                    dispatch(&id, raw, &listeners);
                }
            }
            Err(e) => warn!("Polling relay for {} failed: {}", id, e),
        }
    }
}

fn dispatch(id: &Id, raw: Value, listeners: &Listeners) {
    let envelope: Envelope = match serde_json::from_value(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Dropping malformed message for {}: {}", id, e);
            return;
        }
    };

    let mut listeners = listeners.lock().unwrap_or_else(PoisonError::into_inner);
    listeners.retain(|tx| tx.send(envelope.clone()).is_ok());
}
