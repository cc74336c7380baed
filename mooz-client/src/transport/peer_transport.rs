use crate::transport::{LinkId, LocalTrack, TransportEvent};
use async_trait::async_trait;
use mooz_core::IceCandidate;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Rtc(#[from] webrtc::Error),
    #[error("no outgoing track with id {0}")]
    UnknownTrack(String),
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for TransportError {
    fn from(e: anyhow::Error) -> Self {
        TransportError::Other(format!("{:#}", e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// The primitive peer connection operations negotiation is built from.
///
/// Implementations report candidates, tracks and connectivity through the
/// event channel they were created with, never by calling back into the
/// negotiator.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription)
    -> Result<(), TransportError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Swap the outgoing track `old_track_id` for `new_track` without renegotiating.
    async fn replace_track(
        &self,
        old_track_id: &str,
        new_track: LocalTrack,
    ) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Builds one transport per pairwise negotiation.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        link: LinkId,
        tracks: &[LocalTrack],
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}
