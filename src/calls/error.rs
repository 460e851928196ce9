//! Call-related error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("media acquisition failed: {0}")]
    Media(String),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("signaling transport error: {0}")]
    Transport(String),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("no active call")]
    NoActiveCall,

    #[error("already in a call with {0}")]
    Busy(String),

    #[error("malformed signaling payload: {0}")]
    Parse(String),
}
