use crate::negotiation::{NegotiationError, Negotiator, NegotiatorUpdate};
use crate::signaling::SignalingSession;
use crate::transport::{
    LinkId, LocalTrack, PeerTransport, RemoteTrack, TransportEvent, TransportFactory,
};
use mooz_core::{Envelope, Id, Message};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// An established pairwise connection.
///
/// Trickle candidates keep flowing and new remote tracks keep arriving in the
/// background until the connection is closed or dropped.
pub struct Connection {
    peer: Id,
    transport: Arc<dyn PeerTransport>,
    tracks: mpsc::UnboundedReceiver<RemoteTrack>,
    pump: JoinHandle<()>,
}

impl Connection {
    pub fn peer(&self) -> &Id {
        &self.peer
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    /// The next remote track, starting with those that arrived during
    /// negotiation. `None` once the connection is gone.
    pub async fn next_track(&mut self) -> Option<RemoteTrack> {
        self.tracks.recv().await
    }

    pub async fn close(self) {
        self.pump.abort();
        if let Err(e) = self.transport.close().await {
            debug!("Closing connection to {} failed: {}", self.peer, e);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Call `to` and wait until a direct connection is up, or until the
/// session's negotiation timeout runs out.
pub async fn make_call(
    to: &Id,
    session: &SignalingSession,
    factory: &dyn TransportFactory,
    tracks: &[LocalTrack],
) -> Result<Connection, NegotiationError> {
    let inbox = session.on_message();
    let (event_tx, events) = mpsc::channel(256);
    let link = LinkId::next();

    let transport = factory.create(link, tracks, event_tx).await?;
    let mut negotiator = Negotiator::initiator(link, to.clone(), transport, session.clone());
    info!("Calling {} on {}", to, link);

    if let Err(e) = negotiator.start().await {
        negotiator.close().await;
        return Err(e);
    }
    drive(negotiator, inbox, events).await
}

/// Wait for the first offer addressed to this session and answer it. Only
/// the negotiation after that offer is bounded by the timeout.
pub async fn listen(
    session: &SignalingSession,
    factory: &dyn TransportFactory,
    tracks: &[LocalTrack],
) -> Result<Connection, NegotiationError> {
    let inbox = session.on_message();
    let (event_tx, events) = mpsc::channel(256);
    let link = LinkId::next();

    let transport = factory.create(link, tracks, event_tx).await?;
    let negotiator = Negotiator::responder(link, None, transport, session.clone());
    info!("Listening for a call as {} on {}", session.id(), link);

    drive(negotiator, inbox, events).await
}

async fn drive(
    mut negotiator: Negotiator,
    mut inbox: mpsc::UnboundedReceiver<Envelope>,
    mut events: mpsc::Receiver<TransportEvent>,
) -> Result<Connection, NegotiationError> {
    let (track_tx, tracks) = mpsc::unbounded_channel();

    loop {
        let deadline = negotiator.deadline();

        let step = tokio::select! {
            envelope = inbox.recv() => match envelope {
                Some(envelope) => apply_envelope(&mut negotiator, envelope).await.map(|_| None),
                None => Err(NegotiationError::SessionClosed),
            },

            event = events.recv() => match event {
                Some(event) => negotiator.handle_event(event).await,
                None => Err(NegotiationError::Failed("transport event channel closed".into())),
            },

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                if deadline.is_some() =>
            {
                Err(negotiator.expire())
            }
        };

        match step {
            Ok(Some(NegotiatorUpdate::Connected)) => break,
            Ok(Some(NegotiatorUpdate::Track(track))) => {
                let _ = track_tx.send(track);
            }
            Ok(None) => {}
            Err(e) => {
                negotiator.close().await;
                return Err(e);
            }
        }
    }

    let Some(peer) = negotiator.peer().cloned() else {
        negotiator.close().await;
        return Err(NegotiationError::Failed("connected without a peer".into()));
    };
    let transport = Arc::clone(negotiator.transport());
    let pump = tokio::spawn(pump(negotiator, inbox, events, track_tx));

    Ok(Connection {
        peer,
        transport,
        tracks,
        pump,
    })
}

async fn apply_envelope(
    negotiator: &mut Negotiator,
    envelope: Envelope,
) -> Result<(), NegotiationError> {
    match envelope.message {
        Message::Signal { data } => negotiator.handle_signal(&envelope.from, data).await,
        other => {
            debug!("Ignoring {} from {}", other.kind(), envelope.from);
            Ok(())
        }
    }
}

/// Keeps a connected negotiator fed after the caller got its [`Connection`].
async fn pump(
    mut negotiator: Negotiator,
    mut inbox: mpsc::UnboundedReceiver<Envelope>,
    mut events: mpsc::Receiver<TransportEvent>,
    track_tx: mpsc::UnboundedSender<RemoteTrack>,
) {
    loop {
        tokio::select! {
            envelope = inbox.recv() => {
                let Some(envelope) = envelope else { break };
                if let Err(e) = apply_envelope(&mut negotiator, envelope).await {
                    warn!("Connection on {} stopped: {}", negotiator.link(), e);
                    break;
                }
            }

            event = events.recv() => {
                let Some(event) = event else { break };
                match negotiator.handle_event(event).await {
                    Ok(Some(NegotiatorUpdate::Track(track))) => {
                        let _ = track_tx.send(track);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        info!("Connection on {} ended: {}", negotiator.link(), e);
                        break;
                    }
                }
            }
        }
    }
}
