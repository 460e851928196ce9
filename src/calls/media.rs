//! Local and remote media handles.
//!
//! The coordinator always acquires an audio track and, when requested (or
//! when an inbound offer asks for it), a video track. Tracks expose
//! `enabled` flags that the UI toggles without renegotiation; stopping a
//! track is terminal and happens only during teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::error::CallError;

/// Media modality of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// A local capture track.
///
/// The capture layer feeds samples into the RTP backing while observing
/// the `enabled` and `stopped` flags; the coordinator owns the lifecycle.
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    rtp: Option<Arc<TrackLocalStaticSample>>,
}

impl MediaTrack {
    /// Track without an RTP backing, for headless use and tests.
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: track_id(kind),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtp: None,
        }
    }

    /// Track backed by a `webrtc` sample track.
    pub fn with_rtp(kind: TrackKind, rtp: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            id: rtp.id().to_string(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtp: Some(rtp),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Flip the enabled flag, returning the new value.
    pub fn toggle(&self) -> bool {
        // fetch_xor returns the previous value.
        !self.enabled.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Terminal. The capture layer stops feeding samples once set.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    /// The RTP backing handed to the peer connection, when present.
    pub fn rtp(&self) -> Option<Arc<dyn TrackLocal + Send + Sync>> {
        self.rtp
            .as_ref()
            .map(|t| t.clone() as Arc<dyn TrackLocal + Send + Sync>)
    }

    /// Sample sink for the capture layer.
    pub fn sample_track(&self) -> Option<&Arc<TrackLocalStaticSample>> {
        self.rtp.as_ref()
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .field("rtp", &self.rtp.is_some())
            .finish()
    }
}

/// The local media held by the active session: one audio track always,
/// one video track when the call carries video.
#[derive(Debug, Clone)]
pub struct LocalMedia {
    audio: Arc<MediaTrack>,
    video: Option<Arc<MediaTrack>>,
}

impl LocalMedia {
    pub fn new(audio: Arc<MediaTrack>, video: Option<Arc<MediaTrack>>) -> Self {
        Self { audio, video }
    }

    pub fn audio(&self) -> &Arc<MediaTrack> {
        &self.audio
    }

    pub fn video(&self) -> Option<&Arc<MediaTrack>> {
        self.video.as_ref()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Attach a camera acquired mid-call.
    pub fn set_video(&mut self, track: Arc<MediaTrack>) {
        self.video = Some(track);
    }

    /// Flip audio mute, returning the new enabled value.
    pub fn toggle_audio(&self) -> bool {
        self.audio.toggle()
    }

    /// Flip the camera, returning the new enabled value, or `None` when no
    /// video track exists yet.
    pub fn toggle_video(&self) -> Option<bool> {
        self.video.as_ref().map(|t| t.toggle())
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Arc<MediaTrack>> {
        std::iter::once(&self.audio).chain(self.video.iter())
    }

    /// Stop every track. Called only from teardown.
    pub fn stop_all(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

/// Read-only handle to a track published by the remote peer.
#[derive(Clone)]
pub struct RemoteTrack {
    id: String,
    kind: TrackKind,
    rtp: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            rtp: None,
        }
    }

    pub fn from_rtp(rtp: Arc<TrackRemote>, kind: TrackKind) -> Self {
        Self {
            id: rtp.id(),
            kind,
            rtp: Some(rtp),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// RTP source the UI's media pipeline reads from, when present.
    pub fn rtp(&self) -> Option<&Arc<TrackRemote>> {
        self.rtp.as_ref()
    }
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Provider of local capture tracks.
///
/// Denial or device failure surfaces as [`CallError::Media`], which the
/// coordinator maps to an aborted call rather than a partially-started one.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire an audio track plus, when requested, a video track.
    async fn acquire(&self, with_video: bool) -> Result<LocalMedia, CallError>;

    /// Acquire a standalone camera track for mid-call renegotiation.
    async fn acquire_video(&self) -> Result<Arc<MediaTrack>, CallError>;
}

/// [`MediaSource`] producing `webrtc` sample tracks (Opus audio, VP8
/// video) that the platform capture layer feeds.
pub struct SampleMediaSource {
    stream_label: String,
}

impl SampleMediaSource {
    pub fn new(stream_label: impl Into<String>) -> Self {
        Self {
            stream_label: stream_label.into(),
        }
    }

    fn audio_track(&self) -> Arc<MediaTrack> {
        let rtp = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            track_id(TrackKind::Audio),
            self.stream_label.clone(),
        ));
        Arc::new(MediaTrack::with_rtp(TrackKind::Audio, rtp))
    }

    fn video_track(&self) -> Arc<MediaTrack> {
        let rtp = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            track_id(TrackKind::Video),
            self.stream_label.clone(),
        ));
        Arc::new(MediaTrack::with_rtp(TrackKind::Video, rtp))
    }
}

impl Default for SampleMediaSource {
    fn default() -> Self {
        Self::new("confab-local")
    }
}

#[async_trait]
impl MediaSource for SampleMediaSource {
    async fn acquire(&self, with_video: bool) -> Result<LocalMedia, CallError> {
        let video = with_video.then(|| self.video_track());
        Ok(LocalMedia::new(self.audio_track(), video))
    }

    async fn acquire_video(&self) -> Result<Arc<MediaTrack>, CallError> {
        Ok(self.video_track())
    }
}

fn track_id(kind: TrackKind) -> String {
    format!("{}-{:016x}", kind, rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_flips_enabled() {
        let track = MediaTrack::new(TrackKind::Audio);
        assert!(track.is_enabled());
        assert!(!track.toggle());
        assert!(!track.is_enabled());
        assert!(track.toggle());
        assert!(track.is_enabled());
    }

    #[test]
    fn test_toggle_video_without_camera() {
        let media = LocalMedia::new(Arc::new(MediaTrack::new(TrackKind::Audio)), None);
        assert!(!media.has_video());
        assert_eq!(media.toggle_video(), None);
    }

    #[test]
    fn test_stop_all_stops_every_track() {
        let mut media = LocalMedia::new(Arc::new(MediaTrack::new(TrackKind::Audio)), None);
        media.set_video(Arc::new(MediaTrack::new(TrackKind::Video)));

        media.stop_all();
        assert!(media.audio().is_stopped());
        assert!(media.video().unwrap().is_stopped());
    }

    #[test]
    fn test_track_ids_are_unique() {
        let a = MediaTrack::new(TrackKind::Audio);
        let b = MediaTrack::new(TrackKind::Audio);
        assert_ne!(a.id(), b.id());
    }
}
