use std::fmt;
use std::sync::Arc;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

/// An outgoing media track owned by the capture layer.
#[derive(Clone)]
pub struct LocalTrack(Arc<dyn TrackLocal + Send + Sync>);

impl LocalTrack {
    pub fn new(track: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        Self(track)
    }

    /// A VP8 track fed with encoded samples.
    pub fn video(id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self::static_sample(MIME_TYPE_VP8, 90000, 0, id.into(), stream_id.into())
    }

    /// An Opus track fed with encoded samples.
    pub fn audio(id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self::static_sample(MIME_TYPE_OPUS, 48000, 2, id.into(), stream_id.into())
    }

    fn static_sample(
        mime_type: &str,
        clock_rate: u32,
        channels: u16,
        id: String,
        stream_id: String,
    ) -> Self {
        let codec = RTCRtpCodecCapability {
            mime_type: mime_type.to_owned(),
            clock_rate,
            channels,
            ..Default::default()
        };
        Self(Arc::new(TrackLocalStaticSample::new(codec, id, stream_id)))
    }

    pub fn id(&self) -> &str {
        self.0.id()
    }

    pub fn stream_id(&self) -> &str {
        self.0.stream_id()
    }

    pub fn inner(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.0)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id())
            .field("stream_id", &self.stream_id())
            .finish()
    }
}

/// Media arriving from a peer.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: String,
    handle: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    /// A track description with no RTP source behind it.
    pub fn new(
        id: impl Into<String>,
        stream_id: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind: kind.into(),
            handle: None,
        }
    }

    pub(crate) fn from_rtc(track: Arc<TrackRemote>) -> Self {
        Self {
            id: track.id(),
            stream_id: track.stream_id(),
            kind: track.kind().to_string(),
            handle: Some(track),
        }
    }

    /// The underlying RTP reader, when the track came from a real connection.
    pub fn handle(&self) -> Option<&Arc<TrackRemote>> {
        self.handle.as_ref()
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}
