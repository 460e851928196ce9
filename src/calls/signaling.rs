//! Signaling wire schema for call control.
//!
//! Four message kinds travel over the signaling channel, each scoped by
//! the room id carried in the payload. Messages are modeled as a tagged
//! enum with fixed schemas; malformed payloads are rejected at the parse
//! boundary and never reach the coordinator.

use serde::{Deserialize, Serialize};

use super::error::CallError;

/// Kind of session description being exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A session description exchanged during offer/answer negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Whether the description carries a video media section. Used to
    /// decide if answering an inbound offer should request a camera.
    pub fn has_video(&self) -> bool {
        self.sdp.lines().any(|line| line.starts_with("m=video"))
    }
}

/// An ICE candidate proposed for peer-to-peer connectivity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate string, e.g.
    /// `candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host`.
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// A signaling message, tagged by `kind` on the wire.
///
/// Delivery is at-most-once and unordered between kinds; ordering within
/// one kind (successive candidates) is preserved by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalMessage {
    Offer {
        room_id: String,
        from: String,
        signal: SessionDescription,
    },
    Answer {
        room_id: String,
        from: String,
        signal: SessionDescription,
    },
    IceCandidate {
        room_id: String,
        from: String,
        candidate: IceCandidate,
    },
    End {
        room_id: String,
    },
}

impl SignalMessage {
    /// Room id scoping this message.
    pub fn room_id(&self) -> &str {
        match self {
            Self::Offer { room_id, .. }
            | Self::Answer { room_id, .. }
            | Self::IceCandidate { room_id, .. }
            | Self::End { room_id } => room_id,
        }
    }

    /// Parse a raw frame, rejecting anything that does not match one of
    /// the four schemas.
    pub fn parse(raw: &str) -> Result<Self, CallError> {
        serde_json::from_str(raw).map_err(|e| CallError::Parse(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, CallError> {
        serde_json::to_string(self).map_err(|e| CallError::Parse(e.to_string()))
    }
}
