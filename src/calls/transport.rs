//! Signaling transport adapter.
//!
//! A thin wrapper over a bidirectional real-time messaging channel. Four
//! outbound operations, one inbound subscription; every message carries
//! its room id in the payload, never inferred from connection state.
//! Delivery is at-most-once and unordered between message kinds.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::error::CallError;
use super::signaling::{IceCandidate, SessionDescription, SignalMessage};

/// Outbound half of the signaling channel.
///
/// Send failures are surfaced as [`CallError::Transport`]; the coordinator
/// logs them and lets the call continue, since delivery retries are the
/// transport's responsibility.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send_offer(
        &self,
        room_id: &str,
        from: &str,
        signal: SessionDescription,
    ) -> Result<(), CallError>;

    async fn send_answer(
        &self,
        room_id: &str,
        from: &str,
        signal: SessionDescription,
    ) -> Result<(), CallError>;

    async fn send_candidate(
        &self,
        room_id: &str,
        from: &str,
        candidate: IceCandidate,
    ) -> Result<(), CallError>;

    async fn send_end(&self, room_id: &str) -> Result<(), CallError>;
}

/// WebSocket signaling transport: one JSON object per text frame.
///
/// `connect` returns the transport plus the inbound subscription; frames
/// that fail to parse are dropped at this boundary with a warning.
pub struct WsSignalingTransport {
    out_tx: mpsc::Sender<Message>,
}

impl WsSignalingTransport {
    pub async fn connect(
        url: &str,
        capacity: usize,
    ) -> Result<(Arc<Self>, mpsc::Receiver<SignalMessage>), CallError> {
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| CallError::Transport(format!("connect {url}: {e}")))?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(capacity);
        let (in_tx, in_rx) = mpsc::channel::<SignalMessage>(capacity);

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    warn!(target: "Calls/Signaling", "socket write failed: {e}");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(raw)) => match SignalMessage::parse(raw.as_str()) {
                        Ok(msg) => {
                            if in_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(target: "Calls/Signaling", "dropping malformed frame: {e}")
                        }
                    },
                    Ok(Message::Close(_)) => {
                        debug!(target: "Calls/Signaling", "signaling socket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(target: "Calls/Signaling", "socket read failed: {e}");
                        break;
                    }
                }
            }
        });

        Ok((Arc::new(Self { out_tx }), in_rx))
    }

    async fn send(&self, msg: SignalMessage) -> Result<(), CallError> {
        let raw = msg.encode()?;
        self.out_tx
            .send(Message::Text(raw.into()))
            .await
            .map_err(|_| CallError::Transport("signaling socket closed".to_string()))
    }
}

#[async_trait]
impl SignalingTransport for WsSignalingTransport {
    async fn send_offer(
        &self,
        room_id: &str,
        from: &str,
        signal: SessionDescription,
    ) -> Result<(), CallError> {
        self.send(SignalMessage::Offer {
            room_id: room_id.to_string(),
            from: from.to_string(),
            signal,
        })
        .await
    }

    async fn send_answer(
        &self,
        room_id: &str,
        from: &str,
        signal: SessionDescription,
    ) -> Result<(), CallError> {
        self.send(SignalMessage::Answer {
            room_id: room_id.to_string(),
            from: from.to_string(),
            signal,
        })
        .await
    }

    async fn send_candidate(
        &self,
        room_id: &str,
        from: &str,
        candidate: IceCandidate,
    ) -> Result<(), CallError> {
        self.send(SignalMessage::IceCandidate {
            room_id: room_id.to_string(),
            from: from.to_string(),
            candidate,
        })
        .await
    }

    async fn send_end(&self, room_id: &str) -> Result<(), CallError> {
        self.send(SignalMessage::End {
            room_id: room_id.to_string(),
        })
        .await
    }
}

/// In-process signaling transport: a cross-wired channel pair. Used by
/// tests and same-process loopback calls.
pub struct ChannelSignalingTransport {
    tx: mpsc::Sender<SignalMessage>,
}

impl ChannelSignalingTransport {
    /// Two endpoints wired to each other: what one sends, the other's
    /// receiver yields.
    pub fn pair(
        capacity: usize,
    ) -> (
        (Arc<Self>, mpsc::Receiver<SignalMessage>),
        (Arc<Self>, mpsc::Receiver<SignalMessage>),
    ) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            (Arc::new(Self { tx: a_tx }), a_rx),
            (Arc::new(Self { tx: b_tx }), b_rx),
        )
    }

    async fn send(&self, msg: SignalMessage) -> Result<(), CallError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| CallError::Transport("signaling peer dropped".to_string()))
    }
}

#[async_trait]
impl SignalingTransport for ChannelSignalingTransport {
    async fn send_offer(
        &self,
        room_id: &str,
        from: &str,
        signal: SessionDescription,
    ) -> Result<(), CallError> {
        self.send(SignalMessage::Offer {
            room_id: room_id.to_string(),
            from: from.to_string(),
            signal,
        })
        .await
    }

    async fn send_answer(
        &self,
        room_id: &str,
        from: &str,
        signal: SessionDescription,
    ) -> Result<(), CallError> {
        self.send(SignalMessage::Answer {
            room_id: room_id.to_string(),
            from: from.to_string(),
            signal,
        })
        .await
    }

    async fn send_candidate(
        &self,
        room_id: &str,
        from: &str,
        candidate: IceCandidate,
    ) -> Result<(), CallError> {
        self.send(SignalMessage::IceCandidate {
            room_id: room_id.to_string(),
            from: from.to_string(),
            candidate,
        })
        .await
    }

    async fn send_end(&self, room_id: &str) -> Result<(), CallError> {
        self.send(SignalMessage::End {
            room_id: room_id.to_string(),
        })
        .await
    }
}
