use crate::error::MediaAccessError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Local capture tracks owned by a call
pub struct LocalMedia {
    pub stream_id: String,
    pub tracks: Vec<Arc<TrackLocalStaticSample>>,
}

impl LocalMedia {
    pub fn empty(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: Vec::new(),
        }
    }
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("stream_id", &self.stream_id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Capture capability supplied by the UI
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<LocalMedia, MediaAccessError>;

    /// Stops capture; called exactly once per acquired `LocalMedia`
    fn release(&self, media: LocalMedia);
}

/// Opus + VP8 sample tracks with nothing written to them. Stands in for a
/// camera and microphone on headless hosts.
pub struct SyntheticMediaSource {
    pub audio: bool,
    pub video: bool,
}

impl Default for SyntheticMediaSource {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self) -> Result<LocalMedia, MediaAccessError> {
        if !self.audio && !self.video {
            return Err(MediaAccessError::NoDevice(
                "neither audio nor video enabled".into(),
            ));
        }
        let stream_id = format!("roomcall-{}", crate::utils::random_id());
        let mut media = LocalMedia::empty(stream_id.clone());
        if self.audio {
            media.tracks.push(Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                "audio".to_owned(),
                stream_id.clone(),
            )));
        }
        if self.video {
            media.tracks.push(Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                "video".to_owned(),
                stream_id,
            )));
        }
        debug!("Acquired {} synthetic tracks", media.tracks.len());
        Ok(media)
    }

    fn release(&self, media: LocalMedia) {
        debug!("Releasing {} local tracks of {}", media.tracks.len(), media.stream_id);
    }
}
