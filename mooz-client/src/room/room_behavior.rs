use crate::transport::RemoteTrack;
use async_trait::async_trait;
use mooz_core::Id;

/// Application hooks invoked by the room task, one call at a time.
#[async_trait]
pub trait RoomBehavior: Send + Sync + 'static {
    async fn on_peer_connected(&self, peer: Id);

    async fn on_track(&self, peer: Id, track: RemoteTrack);

    /// Only called for peers that reached `on_peer_connected`.
    async fn on_peer_left(&self, peer: Id);
}
