use crate::negotiation::{Negotiator, NegotiatorUpdate, Phase};
use crate::room::{PeerInfo, RoomBehavior, RoomCommand, RoomError, RoomHandle};
use crate::signaling::SignalingSession;
use crate::transport::{
    LinkId, LocalTrack, TransportError, TransportEvent, TransportFactory,
};
use mooz_core::{Envelope, Id, Message, SignalData};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomRole {
    /// Owns the room id and answers join requests.
    Host,
    Guest,
}

/// One participant's side of a full-mesh call.
///
/// Runs as a single task that owns every negotiator, so nothing in here is
/// shared or locked.
pub struct Room {
    my_id: Id,
    room_id: Id,
    role: RoomRole,
    session: SignalingSession,
    factory: Arc<dyn TransportFactory>,
    tracks: Vec<LocalTrack>,
    behavior: Box<dyn RoomBehavior>,
    negotiators: HashMap<Id, Negotiator>,
    links: HashMap<LinkId, Id>,
    connected: HashSet<Id>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    command_rx: mpsc::Receiver<RoomCommand>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    transport_tx: mpsc::Sender<TransportEvent>,
}

impl Room {
    /// Open a room addressed by this session's own id.
    pub fn host(
        session: SignalingSession,
        factory: Arc<dyn TransportFactory>,
        tracks: Vec<LocalTrack>,
        behavior: Box<dyn RoomBehavior>,
    ) -> RoomHandle {
        let room_id = session.id().clone();
        Self::spawn(room_id, RoomRole::Host, session, factory, tracks, behavior)
    }

    /// Ask the host of `room_id` to let this session in.
    pub fn join(
        room_id: Id,
        session: SignalingSession,
        factory: Arc<dyn TransportFactory>,
        tracks: Vec<LocalTrack>,
        behavior: Box<dyn RoomBehavior>,
    ) -> Result<RoomHandle, RoomError> {
        let messenger = session.clone();
        let handle = Self::spawn(
            room_id.clone(),
            RoomRole::Guest,
            session,
            factory,
            tracks,
            behavior,
        );
        messenger.send(Message::JoinRoom, &room_id)?;
        Ok(handle)
    }

    fn spawn(
        room_id: Id,
        role: RoomRole,
        session: SignalingSession,
        factory: Arc<dyn TransportFactory>,
        tracks: Vec<LocalTrack>,
        behavior: Box<dyn RoomBehavior>,
    ) -> RoomHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        let (transport_tx, transport_rx) = mpsc::channel(256);
        let my_id = session.id().clone();
        let inbox = session.on_message();

        let room = Self {
            my_id: my_id.clone(),
            room_id: room_id.clone(),
            role,
            session,
            factory,
            tracks,
            behavior,
            negotiators: HashMap::new(),
            links: HashMap::new(),
            connected: HashSet::new(),
            inbox,
            command_rx,
            transport_rx,
            transport_tx,
        };
        tokio::spawn(room.run());

        RoomHandle::new(my_id, room_id, command_tx)
    }

    async fn run(mut self) {
        info!("Room {} started as {:?} ({})", self.room_id, self.role, self.my_id);
        let mut leave_reply: Option<oneshot::Sender<()>> = None;

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(c) => {
                            if let ControlFlow::Break(reply) = self.handle_command(c).await {
                                leave_reply = Some(reply);
                                break;
                            }
                        }
                        None => {
                            info!("All handles to room {} dropped", self.room_id);
                            break;
                        }
                    }
                }

                envelope = self.inbox.recv() => {
                    match envelope {
                        Some(e) => self.handle_envelope(e).await,
                        None => {
                            warn!("Signaling session for room {} closed", self.room_id);
                            break;
                        }
                    }
                }

                Some(evt) = self.transport_rx.recv() => {
                    self.handle_transport_event(evt).await;
                }

                // Disabled while nothing is negotiating.
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    self.expire_overdue().await;
                }
            }
        }

        self.teardown().await;
        if let Some(reply) = leave_reply {
            let _ = reply.send(());
        }
        info!("Room {} finished", self.room_id);
    }

    /// `Break` carries the reply of a leave request.
    async fn handle_command(&mut self, cmd: RoomCommand) -> ControlFlow<oneshot::Sender<()>> {
        match cmd {
            RoomCommand::ReplaceTrack {
                old_track_id,
                new_track,
                reply,
            } => {
                let results = self.replace_track(&old_track_id, new_track).await;
                let _ = reply.send(results);
            }

            RoomCommand::Peers { reply } => {
                let mut peers: Vec<PeerInfo> = self
                    .negotiators
                    .iter()
                    .map(|(id, n)| PeerInfo {
                        id: id.clone(),
                        role: n.role(),
                        phase: n.phase(),
                    })
                    .collect();
                peers.sort_by(|a, b| a.id.cmp(&b.id));
                let _ = reply.send(peers);
            }

            RoomCommand::Leave { reply } => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        let Envelope { from, message } = envelope;
        if from == self.my_id {
            debug!("Ignoring {} sent by ourselves", message.kind());
            return;
        }

        match message {
            Message::JoinRoom => self.on_join_request(from),
            Message::RoomReply { should_call } => self.on_room_reply(from, should_call).await,
            Message::Call => self.on_call(from).await,
            Message::Signal { data } => self.on_signal(from, data).await,
        }
    }

    fn on_join_request(&mut self, from: Id) {
        if self.role != RoomRole::Host {
            warn!("Join request from {} reached guest {}, ignoring", from, self.my_id);
            return;
        }

        let mut should_call = vec![self.my_id.clone()];
        should_call.extend(self.negotiators.keys().filter(|id| **id != from).cloned());
        info!("{} joins room {}, {} peers to call", from, self.room_id, should_call.len());

        if let Err(e) = self.session.send(Message::RoomReply { should_call }, &from) {
            warn!("Failed to answer join request from {}: {}", from, e);
        }
    }

    async fn on_room_reply(&mut self, from: Id, should_call: Vec<Id>) {
        if from != self.room_id {
            warn!("Ignoring room reply from {}, room is {}", from, self.room_id);
            return;
        }

        for peer in should_call {
            if peer == self.my_id || self.negotiators.contains_key(&peer) {
                continue;
            }
            self.call(peer).await;
        }
    }

    async fn call(&mut self, peer: Id) {
        let link = LinkId::next();
        let transport = match self
            .factory
            .create(link, &self.tracks, self.transport_tx.clone())
            .await
        {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to create transport for {}: {}", peer, e);
                return;
            }
        };

        // Call goes out before the offer so the callee is ready for it.
        if let Err(e) = self.session.send(Message::Call, &peer) {
            warn!("Failed to call {}: {}", peer, e);
            let _ = transport.close().await;
            return;
        }

        let mut negotiator =
            Negotiator::initiator(link, peer.clone(), transport, self.session.clone());
        let started = negotiator.start().await;

        debug!("Calling {} on {}", peer, link);
        self.links.insert(link, peer.clone());
        self.negotiators.insert(peer.clone(), negotiator);

        if started.is_err() {
            self.fail_peer(&peer).await;
        }
    }

    async fn on_call(&mut self, from: Id) {
        if self.negotiators.contains_key(&from) {
            info!("{} called again, dropping the previous connection", from);
            self.fail_peer(&from).await;
        }

        let link = LinkId::next();
        let transport = match self
            .factory
            .create(link, &self.tracks, self.transport_tx.clone())
            .await
        {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to create transport for {}: {}", from, e);
                return;
            }
        };

        debug!("Answering {} on {}", from, link);
        let negotiator =
            Negotiator::responder(link, Some(from.clone()), transport, self.session.clone());
        self.links.insert(link, from.clone());
        self.negotiators.insert(from, negotiator);
    }

    async fn on_signal(&mut self, from: Id, data: SignalData) {
        let Some(negotiator) = self.negotiators.get_mut(&from) else {
            debug!("Dropping {} from {}, no negotiation", data.kind(), from);
            return;
        };

        if negotiator.handle_signal(&from, data).await.is_err() {
            self.fail_peer(&from).await;
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        let link = event.link();
        let Some(peer) = self.links.get(&link).cloned() else {
            debug!("Dropping event from stale {}", link);
            return;
        };
        let Some(negotiator) = self.negotiators.get_mut(&peer) else {
            return;
        };

        match negotiator.handle_event(event).await {
            Ok(Some(NegotiatorUpdate::Connected)) => {
                info!("Peer {} connected to {}", peer, self.my_id);
                self.connected.insert(peer.clone());
                self.behavior.on_peer_connected(peer).await;
            }
            Ok(Some(NegotiatorUpdate::Track(track))) => {
                self.behavior.on_track(peer, track).await;
            }
            Ok(None) => {}
            Err(e) => {
                info!("Lost peer {}: {}", peer, e);
                self.fail_peer(&peer).await;
            }
        }
    }

    async fn replace_track(
        &mut self,
        old_track_id: &str,
        new_track: LocalTrack,
    ) -> Vec<(Id, Result<(), TransportError>)> {
        let mut results = Vec::new();
        for (id, negotiator) in &self.negotiators {
            if negotiator.phase() == Phase::Failed {
                continue;
            }
            let result = negotiator
                .transport()
                .replace_track(old_track_id, new_track.clone())
                .await;
            if let Err(e) = &result {
                warn!("Track replacement for {} failed: {}", id, e);
            }
            results.push((id.clone(), result));
        }

        match self.tracks.iter_mut().find(|t| t.id() == old_track_id) {
            Some(slot) => *slot = new_track,
            None => self.tracks.push(new_track),
        }

        info!(
            "Replaced track {} across {} connections",
            old_track_id,
            results.len()
        );
        results
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.negotiators.values().filter_map(Negotiator::deadline).min()
    }

    /// Drop every peer whose negotiation ran out of time.
    async fn expire_overdue(&mut self) {
        let now = Instant::now();
        let overdue: Vec<Id> = self
            .negotiators
            .iter()
            .filter(|(_, n)| n.deadline().is_some_and(|d| d <= now))
            .map(|(id, _)| id.clone())
            .collect();

        for peer in overdue {
            if let Some(negotiator) = self.negotiators.get_mut(&peer) {
                let reason = negotiator.expire();
                info!("Giving up on {}: {}", peer, reason);
            }
            self.fail_peer(&peer).await;
        }
    }

    /// Drop one peer without touching the others.
    async fn fail_peer(&mut self, peer: &Id) {
        let Some(mut negotiator) = self.negotiators.remove(peer) else {
            return;
        };
        self.links.remove(&negotiator.link());
        negotiator.close().await;

        if self.connected.remove(peer) {
            self.behavior.on_peer_left(peer.clone()).await;
        }
    }

    async fn teardown(&mut self) {
        let peers: Vec<Id> = self.negotiators.keys().cloned().collect();
        for peer in peers {
            self.fail_peer(&peer).await;
        }
    }
}
