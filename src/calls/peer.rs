//! Peer connection lifecycle management.
//!
//! One native negotiation object exists per active call. Three observation
//! points feed the rest of the system: locally discovered ICE candidates
//! are emitted straight over the signaling transport, remote tracks and
//! connection-state changes are forwarded to the coordinator as
//! [`PeerEvent`]s.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::mpsc;
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
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use super::error::CallError;
use super::media::{MediaTrack, RemoteTrack, TrackKind};
use super::signaling::{IceCandidate, SdpType, SessionDescription};
use super::transport::SignalingTransport;

/// Connection state reported by the native transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events surfaced by an active peer connection. Tagged with the room id
/// supplied at connection-creation time so the coordinator can discard
/// events from a connection it already tore down.
#[derive(Debug)]
pub enum PeerEvent {
    /// The remote peer published a media track.
    RemoteTrack {
        room_id: String,
        track: RemoteTrack,
    },
    /// The native connection state changed.
    StateChange {
        room_id: String,
        state: PeerConnectionState,
    },
}

/// A single negotiation object bound to one call.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, CallError>;
    async fn create_answer(&self) -> Result<SessionDescription, CallError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError>;
    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<(), CallError>;
    async fn close(&self);
}

/// Creates one peer connection per call attempt.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// `room_id` and `local_user` are captured into the candidate-emission
    /// callback at creation time; a room id read from session state at
    /// callback time could be stale.
    async fn create(
        &self,
        room_id: &str,
        local_user: &str,
        signaling: Arc<dyn SignalingTransport>,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, CallError>;
}

/// Production factory wrapping `webrtc` peer connections, parameterized
/// with a fixed list of public STUN resolvers.
pub struct WebRtcPeerFactory {
    stun_servers: Vec<String>,
}

impl WebRtcPeerFactory {
    pub fn new(stun_servers: Vec<String>) -> Self {
        Self { stun_servers }
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        room_id: &str,
        local_user: &str,
        signaling: Arc<dyn SignalingTransport>,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallError::Negotiation(format!("codec registration: {e}")))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| CallError::Negotiation(format!("interceptor registration: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| CallError::Negotiation(format!("peer connection: {e}")))?,
        );

        // Candidate emission, bound to the creation-time room id.
        {
            let room_id = room_id.to_string();
            let from = local_user.to_string();
            let signaling = signaling.clone();
            pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let room_id = room_id.clone();
                let from = from.clone();
                let signaling = signaling.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        debug!(target: "Calls/Peer", "candidate gathering complete for room {room_id}");
                        return;
                    };
                    let init = match candidate.to_json() {
                        Ok(init) => init,
                        Err(e) => {
                            warn!(target: "Calls/Peer", "failed to serialize candidate: {e}");
                            return;
                        }
                    };
                    let candidate = IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    };
                    if let Err(e) = signaling.send_candidate(&room_id, &from, candidate).await {
                        warn!(target: "Calls/Peer", "failed to emit candidate for room {room_id}: {e}");
                    }
                })
            }));
        }

        // Remote track arrival.
        {
            let room_id = room_id.to_string();
            let events = events.clone();
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let room_id = room_id.clone();
                let events = events.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Video => TrackKind::Video,
                        _ => TrackKind::Audio,
                    };
                    debug!(
                        target: "Calls/Peer",
                        "remote {kind} track {} arrived for room {room_id}",
                        track.id()
                    );
                    let remote = RemoteTrack::from_rtp(track, kind);
                    let _ = events
                        .send(PeerEvent::RemoteTrack {
                            room_id,
                            track: remote,
                        })
                        .await;
                })
            }));
        }

        // Connection-state observation.
        {
            let room_id = room_id.to_string();
            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let room_id = room_id.clone();
                let events = events.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::New => PeerConnectionState::New,
                        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
                        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
                        RTCPeerConnectionState::Unspecified => return,
                    };
                    let _ = events
                        .send(PeerEvent::StateChange { room_id, state })
                        .await;
                })
            }));
        }

        Ok(Arc::new(WebRtcPeerConnection { pc }))
    }
}

struct WebRtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
}

impl WebRtcPeerConnection {
    fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, CallError> {
        match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        }
        .map_err(|e| CallError::Negotiation(format!("session description: {e}")))
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::Negotiation(format!("create offer: {e}")))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::Negotiation(format!("create answer: {e}")))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.pc
            .set_local_description(Self::to_rtc(desc)?)
            .await
            .map_err(|e| CallError::Negotiation(format!("set local description: {e}")))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.pc
            .set_remote_description(Self::to_rtc(desc)?)
            .await
            .map_err(|e| CallError::Negotiation(format!("set remote description: {e}")))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| CallError::Negotiation(format!("add candidate: {e}")))
    }

    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<(), CallError> {
        let rtp = track
            .rtp()
            .ok_or_else(|| CallError::Media(format!("track {} has no RTP backing", track.id())))?;
        let sender = self
            .pc
            .add_track(rtp)
            .await
            .map_err(|e| CallError::Negotiation(format!("add track: {e}")))?;

        // Drain RTCP so the interceptors keep running.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while let Ok((_, _)) = sender.read(&mut buf).await {}
        });
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!(target: "Calls/Peer", "error closing peer connection: {e}");
        }
    }
}
