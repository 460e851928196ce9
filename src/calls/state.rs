//! Call state machine implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::media::{LocalMedia, RemoteTrack};

/// Externally visible state of the call session.
///
/// `Idle` is both the initial and the terminal state; no call exists while
/// the session is `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum CallStatus {
    /// No active call.
    #[default]
    Idle,
    /// Outbound offer sent, waiting for the remote peer to answer.
    Calling,
    /// Inbound offer received, ringing locally.
    Ringing,
    /// Answer exchange in flight.
    Connecting,
    /// Signaling complete; media is converging or flowing.
    Connected,
}

impl CallStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_active(&self) -> bool {
        !self.is_idle()
    }

    pub fn can_answer(&self) -> bool {
        matches!(self, Self::Ringing)
    }
}

/// Which side initiated the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum CallDirection {
    #[default]
    Outbound,
    Inbound,
}

/// State transitions applied by the coordinator.
#[derive(Debug, Clone, Copy)]
pub enum CallTransition {
    /// The remote peer answered our offer.
    AnswerReceived,
    /// The local user picked up an inbound call.
    AnswerStarted,
    /// Answer sent or applied; the session counts as established.
    SignalingComplete,
}

/// The single active call session.
///
/// The zero value (`Default`) is the idle session; teardown resets the
/// coordinator back to it.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CallSession {
    pub status: CallStatus,
    pub direction: CallDirection,
    pub local_user: String,
    pub remote_user: String,
    /// Scopes every signaling message belonging to this call attempt.
    pub room_id: String,
    /// Set on the first transition into `Connected`; anchors duration.
    pub started_at: Option<DateTime<Utc>>,
    /// Exclusively owned; only the coordinator may stop its tracks.
    #[serde(skip)]
    pub local_media: Option<LocalMedia>,
    /// Populated by the peer-connection remote-track callback; read-only.
    #[serde(skip)]
    pub remote_media: Vec<RemoteTrack>,
    /// Whether the pending inbound offer requested video.
    pub pending_offer_has_video: bool,
}

impl CallSession {
    /// Session for a call we are placing. Starts in `Calling`: the slot is
    /// claimed before the first suspension point of call setup.
    pub fn new_outbound(local_user: &str, remote_user: &str, room_id: &str) -> Self {
        Self {
            status: CallStatus::Calling,
            direction: CallDirection::Outbound,
            local_user: local_user.to_string(),
            remote_user: remote_user.to_string(),
            room_id: room_id.to_string(),
            ..Default::default()
        }
    }

    /// Session for a call offered to us. Starts in `Ringing`.
    pub fn new_inbound(local_user: &str, remote_user: &str, room_id: &str) -> Self {
        Self {
            status: CallStatus::Ringing,
            direction: CallDirection::Inbound,
            local_user: local_user.to_string(),
            remote_user: remote_user.to_string(),
            room_id: room_id.to_string(),
            ..Default::default()
        }
    }

    pub fn is_same_room(&self, room_id: &str) -> bool {
        self.status.is_active() && self.room_id == room_id
    }

    pub fn caller(&self) -> &str {
        match self.direction {
            CallDirection::Outbound => &self.local_user,
            CallDirection::Inbound => &self.remote_user,
        }
    }

    pub fn callee(&self) -> &str {
        match self.direction {
            CallDirection::Outbound => &self.remote_user,
            CallDirection::Inbound => &self.local_user,
        }
    }

    /// Elapsed connected time, while the session is established.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.status, self.started_at) {
            (CallStatus::Connected, Some(started)) => {
                Some(Utc::now().signed_duration_since(started))
            }
            _ => None,
        }
    }

    /// Apply a state transition. Returns error if the transition is invalid.
    pub fn apply_transition(
        &mut self,
        transition: CallTransition,
    ) -> Result<(), InvalidTransition> {
        let new_status = match (self.status, transition) {
            (CallStatus::Calling, CallTransition::AnswerReceived) => CallStatus::Connecting,
            (CallStatus::Ringing, CallTransition::AnswerStarted) => CallStatus::Connecting,
            (
                CallStatus::Connecting | CallStatus::Connected,
                CallTransition::SignalingComplete,
            ) => {
                // Re-asserted by the transport's own connected event; the
                // clock never moves once set.
                self.started_at.get_or_insert_with(Utc::now);
                CallStatus::Connected
            }
            (current, attempted) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", attempted),
                });
            }
        };
        self.status = new_status;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
