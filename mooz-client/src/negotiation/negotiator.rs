use crate::signaling::{SessionError, SignalingSession};
use crate::transport::{
    LinkId, PeerTransport, RemoteTrack, SessionDescription, TransportError, TransportEvent,
};
use mooz_core::{IceCandidate, Id, Message, SignalData};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("negotiation failed: {0}")]
    Failed(String),
    #[error("signaling session closed")]
    SessionClosed,
}

impl From<SessionError> for NegotiationError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Closed => NegotiationError::SessionClosed,
            other => NegotiationError::Failed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    OfferCreated,
    AwaitingRemote,
    Negotiating,
    Connected,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Something the owner of a negotiator has to react to.
#[derive(Debug)]
pub enum NegotiatorUpdate {
    Connected,
    Track(RemoteTrack),
}

/// Drives one pairwise connection from first offer to connected.
///
/// The negotiator never reads the relay itself: its owner feeds it the
/// signals addressed to it and the events raised by its transport.
pub struct Negotiator {
    link: LinkId,
    role: Role,
    phase: Phase,
    peer: Option<Id>,
    transport: Arc<dyn PeerTransport>,
    session: SignalingSession,
    remote_set: bool,
    remote_candidates: Vec<IceCandidate>,
    local_candidates: Vec<IceCandidate>,
    remote_tracks: Vec<RemoteTrack>,
    deadline: Option<Instant>,
}

impl Negotiator {
    /// The calling side. Nothing happens until [`Negotiator::start`].
    pub fn initiator(
        link: LinkId,
        to: Id,
        transport: Arc<dyn PeerTransport>,
        session: SignalingSession,
    ) -> Self {
        Self::build(link, Role::Initiator, Phase::Idle, Some(to), transport, session)
    }

    /// The answering side. With `peer` unset, the first offer decides who
    /// the peer is, and the clock only starts then.
    pub fn responder(
        link: LinkId,
        peer: Option<Id>,
        transport: Arc<dyn PeerTransport>,
        session: SignalingSession,
    ) -> Self {
        let armed = peer.is_some();
        let mut negotiator = Self::build(
            link,
            Role::Responder,
            Phase::AwaitingRemote,
            peer,
            transport,
            session,
        );
        if armed {
            negotiator.arm();
        }
        negotiator
    }

    fn build(
        link: LinkId,
        role: Role,
        phase: Phase,
        peer: Option<Id>,
        transport: Arc<dyn PeerTransport>,
        session: SignalingSession,
    ) -> Self {
        Self {
            link,
            role,
            phase,
            peer,
            transport,
            session,
            remote_set: false,
            remote_candidates: Vec::new(),
            local_candidates: Vec::new(),
            remote_tracks: Vec::new(),
            deadline: None,
        }
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn peer(&self) -> Option<&Id> {
        self.peer.as_ref()
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    pub fn remote_tracks(&self) -> &[RemoteTrack] {
        &self.remote_tracks
    }

    pub fn is_failed(&self) -> bool {
        self.phase == Phase::Failed
    }

    /// When this negotiation gives up unless it connects first. `None` while
    /// it is not yet waiting on anyone, and once it has connected or failed.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Connected | Phase::Failed => None,
            _ => self.deadline,
        }
    }

    fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.session.config().negotiation_timeout);
    }

    /// Fail the negotiation because the remote never got it connected.
    pub fn expire(&mut self) -> NegotiationError {
        self.phase = Phase::Failed;
        self.deadline = None;
        warn!(
            "Negotiation with {} on {} timed out",
            self.peer_label(),
            self.link
        );
        NegotiationError::Failed(format!("{} never answered", self.peer_label()))
    }

    /// Create and send the offer. Only meaningful for an idle initiator.
    pub async fn start(&mut self) -> Result<(), NegotiationError> {
        if self.role != Role::Initiator || self.phase != Phase::Idle {
            warn!("Ignoring start on {} in phase {}", self.link, self.phase);
            return Ok(());
        }
        self.arm();
        let result = self.send_offer().await;
        self.guard(result)
    }

    async fn send_offer(&mut self) -> Result<(), NegotiationError> {
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;
        self.phase = Phase::OfferCreated;

        let peer = self
            .peer
            .clone()
            .ok_or_else(|| NegotiationError::Failed("initiator has no peer".into()))?;
        self.session.send(
            Message::Signal {
                data: SignalData::Offer { sdp: offer.sdp },
            },
            &peer,
        )?;
        self.phase = Phase::AwaitingRemote;

        debug!("Offer sent to {} on {}", peer, self.link);
        Ok(())
    }

    /// Apply a signal received from `from`.
    pub async fn handle_signal(
        &mut self,
        from: &Id,
        data: SignalData,
    ) -> Result<(), NegotiationError> {
        if self.is_failed() {
            return Ok(());
        }

        match self.peer.clone() {
            Some(peer) if &peer != from => {
                debug!("Ignoring {} from {} on {}", data.kind(), from, self.link);
                return Ok(());
            }
            Some(_) => {}
            None => {
                let bound = self.bind_peer(from.clone());
                self.guard(bound)?;
            }
        }

        let result = match data {
            SignalData::Offer { sdp } => self.accept_offer(sdp).await,
            SignalData::Answer { sdp } => self.accept_answer(sdp).await,
            SignalData::IceCandidate { candidate } => {
                self.accept_candidate(candidate).await;
                Ok(())
            }
        };
        self.guard(result)
    }

    fn bind_peer(&mut self, peer: Id) -> Result<(), NegotiationError> {
        info!("Bound {} to peer {}", self.link, peer);
        for candidate in self.local_candidates.drain(..) {
            self.session.send(
                Message::Signal {
                    data: SignalData::IceCandidate { candidate },
                },
                &peer,
            )?;
        }
        self.peer = Some(peer);
        self.arm();
        Ok(())
    }

    async fn accept_offer(&mut self, sdp: String) -> Result<(), NegotiationError> {
        if self.role != Role::Responder || self.remote_set {
            warn!("Duplicate or unexpected offer on {}, ignoring", self.link);
            return Ok(());
        }

        self.transport
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        self.remote_set = true;
        self.phase = Phase::Negotiating;
        self.replay_candidates().await;

        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;

        if let Some(peer) = &self.peer {
            self.session.send(
                Message::Signal {
                    data: SignalData::Answer { sdp: answer.sdp },
                },
                peer,
            )?;
            debug!("Answer sent to {} on {}", peer, self.link);
        }
        Ok(())
    }

    async fn accept_answer(&mut self, sdp: String) -> Result<(), NegotiationError> {
        if self.role != Role::Initiator || self.phase != Phase::AwaitingRemote {
            warn!("Duplicate or unexpected answer on {}, ignoring", self.link);
            return Ok(());
        }

        self.transport
            .set_remote_description(SessionDescription::answer(sdp))
            .await?;
        self.remote_set = true;
        self.phase = Phase::Negotiating;
        self.replay_candidates().await;
        Ok(())
    }

    async fn accept_candidate(&mut self, candidate: IceCandidate) {
        if !self.remote_set {
            self.remote_candidates.push(candidate);
            return;
        }
        if let Err(e) = self.transport.add_ice_candidate(candidate).await {
            warn!("Failed to add ICE candidate on {}: {}", self.link, e);
        }
    }

    async fn replay_candidates(&mut self) {
        let buffered = std::mem::take(&mut self.remote_candidates);
        if !buffered.is_empty() {
            debug!("Replaying {} candidates on {}", buffered.len(), self.link);
        }
        for candidate in buffered {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                warn!("Failed to add ICE candidate on {}: {}", self.link, e);
            }
        }
    }

    /// Apply an event raised by this negotiator's transport.
    pub async fn handle_event(
        &mut self,
        event: TransportEvent,
    ) -> Result<Option<NegotiatorUpdate>, NegotiationError> {
        if self.is_failed() {
            return Ok(None);
        }

        match event {
            TransportEvent::CandidateGenerated(_, candidate) => {
                let Some(peer) = &self.peer else {
                    self.local_candidates.push(candidate);
                    return Ok(None);
                };
                let sent = self.session.send(
                    Message::Signal {
                        data: SignalData::IceCandidate { candidate },
                    },
                    peer,
                );
                self.guard(sent.map_err(NegotiationError::from))?;
                Ok(None)
            }

            TransportEvent::Connected(_) => {
                if self.phase == Phase::Connected {
                    return Ok(None);
                }
                self.phase = Phase::Connected;
                self.deadline = None;
                info!("{} connected on {}", self.peer_label(), self.link);
                Ok(Some(NegotiatorUpdate::Connected))
            }

            TransportEvent::TrackArrived(_, track) => {
                self.remote_tracks.push(track.clone());
                Ok(Some(NegotiatorUpdate::Track(track)))
            }

            TransportEvent::Disconnected(_) => {
                self.phase = Phase::Failed;
                Err(NegotiationError::Failed(format!(
                    "transport to {} disconnected",
                    self.peer_label()
                )))
            }
        }
    }

    /// Abort the negotiation and close the transport.
    pub async fn close(&mut self) {
        self.phase = Phase::Failed;
        if let Err(e) = self.transport.close().await {
            debug!("Closing {} failed: {}", self.link, e);
        }
    }

    fn peer_label(&self) -> String {
        match &self.peer {
            Some(peer) => peer.to_string(),
            None => "unknown peer".to_owned(),
        }
    }

    fn guard<T>(&mut self, result: Result<T, NegotiationError>) -> Result<T, NegotiationError> {
        if let Err(e) = &result {
            warn!("Negotiation on {} failed: {}", self.link, e);
            self.phase = Phase::Failed;
        }
        result
    }
}
