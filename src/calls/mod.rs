//! Call session coordination for Confab voice/video calls.
//!
//! This module negotiates, establishes, maintains, and tears down a
//! peer-to-peer audio/video session between two users. Signaling travels
//! over an unreliable, asynchronous channel; media flows directly between
//! peers via the underlying `webrtc` transport once connected.
//!
//! # Architecture
//!
//! - [`SignalMessage`]: The four signaling kinds (offer, answer,
//!   ice_candidate, end) exchanged over the transport, scoped by room id
//! - [`CallStatus`] & [`CallSession`]: Call state machine tracking the
//!   single active session
//! - [`SignalingTransport`]: Thin adapter over the real-time messaging
//!   channel, with WebSocket and in-process implementations
//! - [`MediaSource`] & [`LocalMedia`]: Capture-device acquisition and
//!   per-track mute/camera toggles
//! - [`PeerConnection`] & [`PeerConnectionFactory`]: One native negotiation
//!   object per call, with candidate emission and state observation
//! - [`CallCoordinator`]: Orchestrates call lifecycle, timeouts, and
//!   teardown; exposes the public call API consumed by the UI
//! - [`CallHistoryReporter`]: Fire-and-forget reporting of ended calls
//!
//! # Protocol Overview
//!
//! The initiator emits an `offer`, trickles `ice_candidate` messages, and
//! waits for an `answer`; either side may emit `end` at any time. Messages
//! are delivered at-most-once with no ordering guarantee between kinds, so
//! the coordinator never assumes delivery or cross-kind ordering.

mod coordinator;
mod error;
mod history;
mod media;
mod peer;
mod signaling;
mod state;
mod transport;

pub use coordinator::{CallCoordinator, CallEvent, CallSnapshot};
pub use error::CallError;
pub use history::{CallHistoryReporter, CallRecord, HttpHistoryReporter, NullHistoryReporter};
pub use media::{LocalMedia, MediaSource, MediaTrack, RemoteTrack, SampleMediaSource, TrackKind};
pub use peer::{
    PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent, WebRtcPeerFactory,
};
pub use signaling::{IceCandidate, SdpType, SessionDescription, SignalMessage};
pub use state::{CallDirection, CallSession, CallStatus, CallTransition, InvalidTransition};
pub use transport::{ChannelSignalingTransport, SignalingTransport, WsSignalingTransport};
