use crate::transport::RemoteTrack;
use mooz_core::IceCandidate;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Names one transport for its whole life. Events from a transport that was
/// torn down keep their old link and are recognised as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Events a transport raises for whoever drives its negotiation.
#[derive(Debug)]
pub enum TransportEvent {
    /// A local ICE candidate was gathered and must reach the remote side.
    CandidateGenerated(LinkId, IceCandidate),

    /// The remote side started sending media.
    TrackArrived(LinkId, RemoteTrack),

    /// A direct route is established.
    Connected(LinkId),

    /// The connection failed, dropped or was closed.
    Disconnected(LinkId),
}

impl TransportEvent {
    pub fn link(&self) -> LinkId {
        match self {
            TransportEvent::CandidateGenerated(link, _)
            | TransportEvent::TrackArrived(link, _)
            | TransportEvent::Connected(link)
            | TransportEvent::Disconnected(link) => *link,
        }
    }
}
