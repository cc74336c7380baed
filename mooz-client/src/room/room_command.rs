use crate::negotiation::{Phase, Role};
use crate::transport::{LocalTrack, TransportError};
use mooz_core::Id;
use tokio::sync::oneshot;

/// A participant as seen from the local room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: Id,
    pub role: Role,
    pub phase: Phase,
}

/// Requests from a [`RoomHandle`](crate::room::RoomHandle) to the room task.
#[derive(Debug)]
pub enum RoomCommand {
    /// Swap an outgoing track on every live connection.
    ReplaceTrack {
        old_track_id: String,
        new_track: LocalTrack,
        reply: oneshot::Sender<Vec<(Id, Result<(), TransportError>)>>,
    },

    Peers {
        reply: oneshot::Sender<Vec<PeerInfo>>,
    },

    /// Close every connection and stop the task.
    Leave { reply: oneshot::Sender<()> },
}
