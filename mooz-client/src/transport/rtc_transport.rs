use crate::config::TransportConfig;
use crate::transport::{
    LinkId, LocalTrack, PeerTransport, RemoteTrack, SdpKind, SessionDescription, TransportError,
    TransportEvent, TransportFactory,
};
use anyhow::Result;
use async_trait::async_trait;
use mooz_core::IceCandidate;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// A [`PeerTransport`] backed by a `webrtc` peer connection.
pub struct RtcTransport {
    link: LinkId,
    peer_connection: Arc<RTCPeerConnection>,
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
}

impl RtcTransport {
    /// Build the peer connection, attach `tracks` and wire its callbacks into `event_tx`.
    pub async fn new(
        link: LinkId,
        config: &TransportConfig,
        tracks: &[LocalTrack],
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<Self> {
        // 1. Codecs for the audio and video tracks we send and receive
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;
        // 2. Default interceptors (NACK, RTCP reports)
        let registry = register_default_interceptors(Registry::new(), &mut m)?;

        // 3. API object
        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        // 4. STUN/TURN servers, credentials only where configured
        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        // 5. PeerConnection
        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);

        // --- Callbacks ---
        // Each closure gets its own sender clone since they must be 'static.

        // A. Connection state: only the transitions the negotiator cares about

        let state_tx = event_tx.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let tx = state_tx.clone();

                Box::pin(async move {
                    info!("Peer connection state changed on {}: {:?}", link, s);
                    let event = match s {
                        RTCPeerConnectionState::Connected => TransportEvent::Connected(link),
                        RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Closed => TransportEvent::Disconnected(link),
                        _ => return,
                    };
                    let _ = tx.send(event).await;
                })
            },
        ));

        // B. Trickle ICE: local candidates go out as soon as they are gathered
        let ice_tx = event_tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();

            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = c else { return };
                let init = match candidate.to_json() {
                    Ok(init) => init,
                    Err(e) => {
                        warn!("Failed to encode local candidate on {}: {}", link, e);
                        return;
                    }
                };
                let _ = tx
                    .send(TransportEvent::CandidateGenerated(link, from_rtc_candidate(init)))
                    .await;
            })
        }));

        // C. Remote media
        let track_tx = event_tx;
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = track_tx.clone();

                Box::pin(async move {
                    let track = RemoteTrack::from_rtc(track);
                    debug!("Remote {} track {} arrived on {}", track.kind, track.id, link);
                    let _ = tx.send(TransportEvent::TrackArrived(link, track)).await;
                })
            },
        ));

        // Senders are kept so tracks can be swapped without renegotiating.
        let mut senders = Vec::with_capacity(tracks.len());
        for track in tracks {
            senders.push(peer_connection.add_track(track.inner()).await?);
        }

        Ok(Self {
            link,
            peer_connection,
            senders: Mutex::new(senders),
        })
    }

    pub fn link(&self) -> LinkId {
        self.link
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let desc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(desc)
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_m_line_index,
        username_fragment: candidate.username_fragment,
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.peer_connection.create_offer(None).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self.peer_connection.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.peer_connection
            .set_local_description(to_rtc_description(desc)?)
            .await?;
        Ok(())
    }

    /// Apply the peer's offer or answer
    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.peer_connection
            .set_remote_description(to_rtc_description(desc)?)
            .await?;
        Ok(())
    }

    /// Add a remote candidate (Trickle ICE)
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.peer_connection
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await?;
        Ok(())
    }

    async fn replace_track(
        &self,
        old_track_id: &str,
        new_track: LocalTrack,
    ) -> Result<(), TransportError> {
        // Swap on the sender in place; no new offer is needed
        let senders = self.senders.lock().await;
        for sender in senders.iter() {
            let Some(current) = sender.track().await else {
                continue;
            };
            if current.id() == old_track_id {
                sender.replace_track(Some(new_track.inner())).await?;
                debug!(
                    "Replaced track {} with {} on {}",
                    old_track_id,
                    new_track.id(),
                    self.link
                );
                return Ok(());
            }
        }
        Err(TransportError::UnknownTrack(old_track_id.to_owned()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

/// Creates an [`RtcTransport`] per negotiation, all sharing one ICE configuration.
#[derive(Debug, Clone, Default)]
pub struct RtcTransportFactory {
    config: TransportConfig,
}

impl RtcTransportFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        link: LinkId,
        tracks: &[LocalTrack],
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let transport = RtcTransport::new(link, &self.config, tracks, events).await?;
        Ok(Arc::new(transport))
    }
}
