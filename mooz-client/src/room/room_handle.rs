use crate::room::{PeerInfo, RoomCommand};
use crate::signaling::SessionError;
use crate::transport::{LocalTrack, TransportError};
use mooz_core::Id;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room is closed")]
    Closed,
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Control surface of a running room. Dropping every handle stops the room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    my_id: Id,
    room_id: Id,
    command_tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub(crate) fn new(my_id: Id, room_id: Id, command_tx: mpsc::Sender<RoomCommand>) -> Self {
        Self {
            my_id,
            room_id,
            command_tx,
        }
    }

    pub fn my_id(&self) -> &Id {
        &self.my_id
    }

    pub fn room_id(&self) -> &Id {
        &self.room_id
    }

    pub fn is_host(&self) -> bool {
        self.my_id == self.room_id
    }

    /// Swap the outgoing track `old_track_id` for `new_track` on every live
    /// connection. Each peer's outcome is reported separately.
    pub async fn replace_track(
        &self,
        old_track_id: &str,
        new_track: LocalTrack,
    ) -> Result<Vec<(Id, Result<(), TransportError>)>, RoomError> {
        self.request(|reply| RoomCommand::ReplaceTrack {
            old_track_id: old_track_id.to_owned(),
            new_track,
            reply,
        })
        .await
    }

    pub async fn peers(&self) -> Result<Vec<PeerInfo>, RoomError> {
        self.request(|reply| RoomCommand::Peers { reply }).await
    }

    /// Close every connection and stop the room.
    pub async fn leave(&self) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Leave { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(command(reply))
            .await
            .map_err(|_| RoomError::Closed)?;
        response.await.map_err(|_| RoomError::Closed)
    }
}
