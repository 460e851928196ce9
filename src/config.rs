use std::time::Duration;

/// Configuration for the call coordinator.
#[derive(Clone, Debug)]
pub struct CallConfig {
    /// How long an outbound offer may ring before the call is cancelled.
    pub offer_timeout: Duration,
    /// How long an inbound call rings before it is auto-declined.
    pub ringing_timeout: Duration,
    /// Grace period for transient transport drops on a connected call.
    pub disconnect_grace: Duration,
    /// Public STUN resolvers handed to every peer connection.
    pub stun_servers: Vec<String>,
    /// Capacity of the peer-event and UI-event channels.
    pub event_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            offer_timeout: Duration::from_secs(60),
            ringing_timeout: Duration::from_secs(30),
            disconnect_grace: Duration::from_secs(5),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            event_capacity: 64,
        }
    }
}
