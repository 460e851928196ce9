//! Call session orchestration.
//!
//! [`CallCoordinator`] owns the single [`CallSession`], drives outbound
//! signaling, interprets inbound signaling, manages the three timeout
//! classes, and exposes the public call API consumed by the UI layer.
//!
//! Every teardown path (local hangup, remote end, timeout expiry, terminal
//! peer-connection state, setup failure) funnels into one idempotent
//! routine, so no failure can leave a half-open peer connection or an
//! orphaned media track behind.

use std::sync::{Arc, Weak};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::CallConfig;

use super::error::CallError;
use super::history::{CallHistoryReporter, CallRecord};
use super::media::{MediaSource, RemoteTrack};
use super::peer::{PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerEvent};
use super::signaling::{IceCandidate, SessionDescription, SignalMessage};
use super::state::{CallSession, CallStatus, CallTransition};
use super::transport::SignalingTransport;

/// Events published to the UI layer.
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallStatus),
    RemoteTrackAdded(RemoteTrack),
}

/// UI-facing view of the active session.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub status: CallStatus,
    pub caller: Option<String>,
    pub callee: Option<String>,
    pub local_media: Option<super::media::LocalMedia>,
    pub remote_media: Vec<RemoteTrack>,
    /// Elapsed connected time in seconds, while established.
    pub duration_secs: Option<i64>,
}

#[derive(Default)]
struct TimerSet {
    offer: Option<JoinHandle<()>>,
    ringing: Option<JoinHandle<()>>,
    disconnect_grace: Option<JoinHandle<()>>,
}

impl TimerSet {
    fn cancel_offer(&mut self) {
        if let Some(handle) = self.offer.take() {
            handle.abort();
        }
    }

    fn cancel_ringing(&mut self) {
        if let Some(handle) = self.ringing.take() {
            handle.abort();
        }
    }

    fn cancel_grace(&mut self) {
        if let Some(handle) = self.disconnect_grace.take() {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        self.cancel_offer();
        self.cancel_ringing();
        self.cancel_grace();
    }
}

#[derive(Default)]
struct Inner {
    session: CallSession,
    peer: Option<Arc<dyn PeerConnection>>,
    timers: TimerSet,
}

/// Coordinates the lifecycle of the single active call.
///
/// Instantiated once per client process; there is no hidden module-level
/// state.
///
/// # Example
/// ```ignore
/// let (transport, signaling_rx) =
///     WsSignalingTransport::connect("wss://signal.confab.app/ws", 64).await?;
/// let coordinator = CallCoordinator::new(
///     identity.user_id(),
///     CallConfig::default(),
///     transport,
///     Arc::new(SampleMediaSource::default()),
///     Arc::new(WebRtcPeerFactory::new(config.stun_servers.clone())),
///     Arc::new(HttpHistoryReporter::new("https://api.confab.app/call-history")),
/// );
/// coordinator.attach(signaling_rx);
///
/// coordinator.start_call("bob", "room-7", false).await?;
/// ```
pub struct CallCoordinator {
    /// Handle to self for the tasks spawned by timers and `attach`.
    weak: Weak<Self>,
    local_user: String,
    config: CallConfig,
    transport: Arc<dyn SignalingTransport>,
    media: Arc<dyn MediaSource>,
    peers: Arc<dyn PeerConnectionFactory>,
    history: Arc<dyn CallHistoryReporter>,
    inner: Mutex<Inner>,
    peer_events_tx: mpsc::Sender<PeerEvent>,
    peer_events_rx: std::sync::Mutex<Option<mpsc::Receiver<PeerEvent>>>,
    events: broadcast::Sender<CallEvent>,
}

impl CallCoordinator {
    pub fn new(
        local_user: impl Into<String>,
        config: CallConfig,
        transport: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaSource>,
        peers: Arc<dyn PeerConnectionFactory>,
        history: Arc<dyn CallHistoryReporter>,
    ) -> Arc<Self> {
        let (peer_events_tx, peer_events_rx) = mpsc::channel(config.event_capacity);
        let (events, _) = broadcast::channel(config.event_capacity);
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            local_user: local_user.into(),
            config,
            transport,
            media,
            peers,
            history,
            inner: Mutex::new(Inner::default()),
            peer_events_tx,
            peer_events_rx: std::sync::Mutex::new(Some(peer_events_rx)),
            events,
        })
    }

    /// Always succeeds while a method on `&self` is executing.
    fn strong(&self) -> Option<Arc<Self>> {
        self.weak.upgrade()
    }

    /// Wire the coordinator to its inbound event sources: the signaling
    /// subscription and the peer-connection event queue. Call once, right
    /// after construction.
    pub fn attach(&self, mut signaling_rx: mpsc::Receiver<SignalMessage>) {
        let Some(this) = self.strong() else { return };
        tokio::spawn({
            let this = this.clone();
            async move {
                while let Some(msg) = signaling_rx.recv().await {
                    this.handle_signal(msg).await;
                }
                debug!(target: "Calls", "signaling subscription closed");
            }
        });

        if let Some(mut rx) = self
            .peer_events_rx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
        {
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    this.on_peer_event(event).await;
                }
            });
        }
    }

    /// Subscribe to UI events.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Current view of the session.
    pub async fn snapshot(&self) -> CallSnapshot {
        let inner = self.inner.lock().await;
        let session = &inner.session;
        let (caller, callee) = if session.status.is_active() {
            (
                Some(session.caller().to_string()),
                Some(session.callee().to_string()),
            )
        } else {
            (None, None)
        };
        CallSnapshot {
            status: session.status,
            caller,
            callee,
            local_media: session.local_media.clone(),
            remote_media: session.remote_media.clone(),
            duration_secs: session.duration().map(|d| d.num_seconds()),
        }
    }

    /// Place an outbound call. Valid only while idle.
    pub async fn start_call(
        &self,
        remote_user: &str,
        room_id: &str,
        with_video: bool,
    ) -> Result<(), CallError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.session.status.is_active() {
                return Err(CallError::Busy(inner.session.remote_user.clone()));
            }
            // Claims the single-session slot before the first suspension
            // point; a competing start_call now fails with Busy.
            inner.session = CallSession::new_outbound(&self.local_user, remote_user, room_id);
        }
        self.publish(CallEvent::StateChanged(CallStatus::Calling));
        info!(target: "Calls", "calling {remote_user} on room {room_id} (video: {with_video})");

        match self.setup_outbound(room_id, with_video).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(target: "Calls", "call setup failed for room {room_id}: {e}");
                self.end_call().await;
                Err(e)
            }
        }
    }

    async fn setup_outbound(
        &self,
        room_id: &str,
        with_video: bool,
    ) -> Result<(), CallError> {
        let media = self.media.acquire(with_video).await?;

        // Re-validate after every suspension point: end_call may have
        // raced us while the device prompt was open.
        {
            let mut inner = self.inner.lock().await;
            if !inner.session.is_same_room(room_id) {
                media.stop_all();
                return Err(CallError::NoActiveCall);
            }
            inner.session.local_media = Some(media.clone());
        }

        let peer = self
            .peers
            .create(
                room_id,
                &self.local_user,
                self.transport.clone(),
                self.peer_events_tx.clone(),
            )
            .await?;
        let stale = {
            let mut inner = self.inner.lock().await;
            if inner.session.is_same_room(room_id) {
                inner.peer = Some(peer.clone());
                false
            } else {
                true
            }
        };
        if stale {
            peer.close().await;
            return Err(CallError::NoActiveCall);
        }

        for track in media.tracks() {
            peer.add_track(track.clone()).await?;
        }
        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;

        if let Err(e) = self
            .transport
            .send_offer(room_id, &self.local_user, offer)
            .await
        {
            // Delivery retries are the transport's responsibility; the
            // offer timer cleans up if the call never progresses.
            warn!(target: "Calls", "failed to send offer for room {room_id}: {e}");
        }

        self.arm_offer_timer(room_id).await;
        Ok(())
    }

    /// Dispatch one inbound signaling message.
    pub async fn handle_signal(&self, msg: SignalMessage) {
        match msg {
            SignalMessage::Offer {
                room_id,
                from,
                signal,
            } => {
                if let Err(e) = self.handle_incoming_offer(&from, &room_id, signal).await {
                    warn!(target: "Calls", "failed to handle offer from {from}: {e}");
                }
            }
            SignalMessage::Answer {
                room_id, signal, ..
            } => {
                if let Err(e) = self.handle_incoming_answer(&room_id, signal).await {
                    warn!(target: "Calls", "failed to handle answer for room {room_id}: {e}");
                }
            }
            SignalMessage::IceCandidate {
                room_id, candidate, ..
            } => self.handle_ice_candidate(&room_id, candidate).await,
            SignalMessage::End { room_id } => self.handle_remote_end(&room_id).await,
        }
    }

    /// An offer from `Idle` is a new inbound call; on the active room id it
    /// is a renegotiation; on a foreign room id it is rejected.
    pub async fn handle_incoming_offer(
        &self,
        from: &str,
        room_id: &str,
        signal: SessionDescription,
    ) -> Result<(), CallError> {
        enum Disposition {
            NewCall,
            Renegotiate,
            RejectForeign,
        }

        let disposition = {
            let mut inner = self.inner.lock().await;
            if inner.session.status.is_idle() {
                let mut session = CallSession::new_inbound(&self.local_user, from, room_id);
                session.pending_offer_has_video = signal.has_video();
                inner.session = session;
                Disposition::NewCall
            } else if inner.session.is_same_room(room_id) {
                Disposition::Renegotiate
            } else {
                Disposition::RejectForeign
            }
        };

        match disposition {
            Disposition::NewCall => {
                self.publish(CallEvent::StateChanged(CallStatus::Ringing));
                info!(target: "Calls", "incoming call from {from} on room {room_id}");
                match self.setup_inbound(room_id, signal).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        warn!(target: "Calls", "inbound call setup failed for room {room_id}: {e}");
                        self.end_call().await;
                        Err(e)
                    }
                }
            }
            Disposition::Renegotiate => {
                debug!(target: "Calls", "renegotiation offer on room {room_id}");
                match self.apply_renegotiation(room_id, signal).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        warn!(target: "Calls", "renegotiation failed for room {room_id}: {e}");
                        self.end_call().await;
                        Err(e)
                    }
                }
            }
            Disposition::RejectForeign => {
                warn!(
                    target: "Calls",
                    "rejecting offer from {from} on room {room_id} while busy"
                );
                if let Err(e) = self.transport.send_end(room_id).await {
                    warn!(target: "Calls", "failed to reject offer on room {room_id}: {e}");
                }
                Ok(())
            }
        }
    }

    async fn setup_inbound(
        &self,
        room_id: &str,
        offer: SessionDescription,
    ) -> Result<(), CallError> {
        let peer = self
            .peers
            .create(
                room_id,
                &self.local_user,
                self.transport.clone(),
                self.peer_events_tx.clone(),
            )
            .await?;
        let stale = {
            let mut inner = self.inner.lock().await;
            if inner.session.is_same_room(room_id) {
                inner.peer = Some(peer.clone());
                false
            } else {
                true
            }
        };
        if stale {
            peer.close().await;
            return Err(CallError::NoActiveCall);
        }

        peer.set_remote_description(offer).await?;
        self.arm_ringing_timer(room_id).await;
        Ok(())
    }

    /// Pick up the ringing inbound call.
    pub async fn answer_call(&self) -> Result<(), CallError> {
        let (room_id, with_video, peer) = {
            let mut inner = self.inner.lock().await;
            // Checked before the transition so a too-early answer (offer
            // still being applied) fails without killing the ringing call.
            let peer = inner.peer.clone().ok_or(CallError::NoActiveCall)?;
            inner.session.apply_transition(CallTransition::AnswerStarted)?;
            inner.timers.cancel_ringing();
            (
                inner.session.room_id.clone(),
                inner.session.pending_offer_has_video,
                peer,
            )
        };
        self.publish(CallEvent::StateChanged(CallStatus::Connecting));

        match self.finish_answer(&room_id, with_video, peer).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(target: "Calls", "answering failed for room {room_id}: {e}");
                self.end_call().await;
                Err(e)
            }
        }
    }

    async fn finish_answer(
        &self,
        room_id: &str,
        with_video: bool,
        peer: Arc<dyn PeerConnection>,
    ) -> Result<(), CallError> {
        let media = self.media.acquire(with_video).await?;
        let stale = {
            let mut inner = self.inner.lock().await;
            if inner.session.is_same_room(room_id)
                && inner.session.status == CallStatus::Connecting
            {
                inner.session.local_media = Some(media.clone());
                false
            } else {
                true
            }
        };
        if stale {
            media.stop_all();
            return Err(CallError::NoActiveCall);
        }

        for track in media.tracks() {
            peer.add_track(track.clone()).await?;
        }
        let answer = peer.create_answer().await?;
        peer.set_local_description(answer.clone()).await?;
        if let Err(e) = self
            .transport
            .send_answer(room_id, &self.local_user, answer)
            .await
        {
            warn!(target: "Calls", "failed to send answer for room {room_id}: {e}");
        }

        // Answer emission counts as establishment for duration tracking;
        // the transport's own connected event re-asserts this later.
        self.mark_connected(room_id).await;
        Ok(())
    }

    /// Apply an answer to the offer we initiated; a renegotiation answer
    /// while `Connected` is applied without touching state or clock.
    pub async fn handle_incoming_answer(
        &self,
        room_id: &str,
        signal: SessionDescription,
    ) -> Result<(), CallError> {
        let peer = {
            let mut inner = self.inner.lock().await;
            if !inner.session.is_same_room(room_id) {
                debug!(target: "Calls", "dropping answer for inactive room {room_id}");
                return Ok(());
            }
            match inner.session.status {
                CallStatus::Calling => {
                    inner.session.apply_transition(CallTransition::AnswerReceived)?;
                    inner.timers.cancel_offer();
                }
                // Renegotiation answer; no state change.
                CallStatus::Connected => {}
                status => {
                    debug!(target: "Calls", "dropping answer in state {status:?}");
                    return Ok(());
                }
            }
            inner.peer.clone().ok_or(CallError::NoActiveCall)?
        };

        if let Err(e) = peer.set_remote_description(signal).await {
            warn!(target: "Calls", "failed to apply answer for room {room_id}: {e}");
            self.end_call().await;
            return Err(e);
        }
        self.mark_connected(room_id).await;
        Ok(())
    }

    /// Forward a candidate to the live peer connection. Candidates with no
    /// live connection are dropped; trickle redundancy re-delivers.
    pub async fn handle_ice_candidate(&self, room_id: &str, candidate: IceCandidate) {
        let peer = {
            let inner = self.inner.lock().await;
            if !inner.session.is_same_room(room_id) {
                debug!(target: "Calls", "dropping candidate for inactive room {room_id}");
                return;
            }
            inner.peer.clone()
        };
        let Some(peer) = peer else {
            debug!(target: "Calls", "dropping candidate with no live peer connection");
            return;
        };
        // Malformed or stale candidates are never fatal.
        if let Err(e) = peer.add_ice_candidate(candidate).await {
            warn!(target: "Calls", "failed to add candidate for room {room_id}: {e}");
        }
    }

    /// Tear down in response to the remote peer's `end`, without echoing
    /// an `end` back.
    pub async fn handle_remote_end(&self, room_id: &str) {
        let relevant = { self.inner.lock().await.session.is_same_room(room_id) };
        if relevant {
            info!(target: "Calls", "remote ended call on room {room_id}");
            self.teardown(false).await;
        } else {
            debug!(target: "Calls", "ignoring end for inactive room {room_id}");
        }
    }

    /// Hang up. Valid from any state, including `Idle`; always safe to
    /// call twice.
    pub async fn end_call(&self) {
        self.teardown(true).await;
    }

    /// Flip the microphone, returning the new enabled value.
    pub async fn toggle_audio(&self) -> Result<bool, CallError> {
        let inner = self.inner.lock().await;
        let media = inner
            .session
            .local_media
            .as_ref()
            .ok_or(CallError::NoActiveCall)?;
        Ok(media.toggle_audio())
    }

    /// Flip the camera. With no video track yet, acquires one, attaches it
    /// to the existing peer connection, and emits a single renegotiation
    /// offer, the same path used when the remote peer adds video mid-call.
    pub async fn toggle_video(&self) -> Result<bool, CallError> {
        {
            let inner = self.inner.lock().await;
            let media = inner
                .session
                .local_media
                .as_ref()
                .ok_or(CallError::NoActiveCall)?;
            if let Some(enabled) = media.toggle_video() {
                return Ok(enabled);
            }
        }

        match self.add_video_and_renegotiate().await {
            Ok(()) => Ok(true),
            // Camera denied or session gone: the call itself continues.
            Err(e @ (CallError::Media(_) | CallError::NoActiveCall)) => Err(e),
            Err(e) => {
                self.end_call().await;
                Err(e)
            }
        }
    }

    async fn add_video_and_renegotiate(&self) -> Result<(), CallError> {
        let (room_id, peer) = {
            let inner = self.inner.lock().await;
            let peer = inner.peer.clone().ok_or(CallError::NoActiveCall)?;
            (inner.session.room_id.clone(), peer)
        };

        let track = self.media.acquire_video().await?;
        let stale = {
            let mut inner = self.inner.lock().await;
            match (
                inner.session.is_same_room(&room_id),
                inner.session.local_media.as_mut(),
            ) {
                (true, Some(media)) => {
                    media.set_video(track.clone());
                    false
                }
                _ => true,
            }
        };
        if stale {
            track.stop();
            return Err(CallError::NoActiveCall);
        }

        peer.add_track(track).await?;
        let offer = peer.create_offer().await?;
        peer.set_local_description(offer.clone()).await?;
        if let Err(e) = self
            .transport
            .send_offer(&room_id, &self.local_user, offer)
            .await
        {
            warn!(target: "Calls", "failed to send renegotiation offer for room {room_id}: {e}");
        }
        Ok(())
    }

    /// Apply a renegotiation offer on the active call without changing the
    /// externally visible status.
    async fn apply_renegotiation(
        &self,
        room_id: &str,
        offer: SessionDescription,
    ) -> Result<(), CallError> {
        let (peer, wants_video) = {
            let inner = self.inner.lock().await;
            let peer = inner.peer.clone().ok_or(CallError::NoActiveCall)?;
            let has_local_video = inner
                .session
                .local_media
                .as_ref()
                .map(|m| m.has_video())
                .unwrap_or(false);
            (peer, offer.has_video() && !has_local_video)
        };

        peer.set_remote_description(offer).await?;

        if wants_video {
            // The peer brought a camera up; opportunistically match it.
            match self.media.acquire_video().await {
                Ok(track) => {
                    let attached = {
                        let mut inner = self.inner.lock().await;
                        match (
                            inner.session.is_same_room(room_id),
                            inner.session.local_media.as_mut(),
                        ) {
                            (true, Some(media)) => {
                                media.set_video(track.clone());
                                true
                            }
                            _ => false,
                        }
                    };
                    if !attached {
                        track.stop();
                        return Err(CallError::NoActiveCall);
                    }
                    peer.add_track(track).await?;
                }
                Err(e) => {
                    warn!(target: "Calls", "camera unavailable, answering without video: {e}");
                }
            }
        }

        let answer = peer.create_answer().await?;
        peer.set_local_description(answer.clone()).await?;
        if let Err(e) = self
            .transport
            .send_answer(room_id, &self.local_user, answer)
            .await
        {
            warn!(target: "Calls", "failed to send renegotiation answer for room {room_id}: {e}");
        }
        Ok(())
    }

    async fn on_peer_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::RemoteTrack { room_id, track } => {
                let relevant = {
                    let mut inner = self.inner.lock().await;
                    if inner.session.is_same_room(&room_id) {
                        inner.session.remote_media.push(track.clone());
                        true
                    } else {
                        false
                    }
                };
                if relevant {
                    self.publish(CallEvent::RemoteTrackAdded(track));
                }
            }
            PeerEvent::StateChange { room_id, state } => {
                self.on_connection_state(&room_id, state).await;
            }
        }
    }

    async fn on_connection_state(&self, room_id: &str, state: PeerConnectionState) {
        {
            let inner = self.inner.lock().await;
            if !inner.session.is_same_room(room_id) {
                return;
            }
        }
        debug!(target: "Calls", "peer connection state for room {room_id}: {state:?}");
        match state {
            PeerConnectionState::Connected => {
                {
                    let mut inner = self.inner.lock().await;
                    if inner.session.is_same_room(room_id) {
                        inner.timers.cancel_grace();
                    }
                }
                self.mark_connected(room_id).await;
            }
            PeerConnectionState::Disconnected => {
                self.arm_grace_timer(room_id).await;
            }
            PeerConnectionState::Failed | PeerConnectionState::Closed => {
                info!(target: "Calls", "peer connection {state:?} for room {room_id}, ending call");
                self.end_call().await;
            }
            PeerConnectionState::New | PeerConnectionState::Connecting => {}
        }
    }

    /// Move the session to `Connected`, publishing only on a real change.
    async fn mark_connected(&self, room_id: &str) {
        let changed = {
            let mut inner = self.inner.lock().await;
            if !inner.session.is_same_room(room_id) {
                return;
            }
            let before = inner.session.status;
            match inner.session.apply_transition(CallTransition::SignalingComplete) {
                Ok(()) => before != inner.session.status,
                Err(e) => {
                    debug!(target: "Calls", "not marking connected: {e}");
                    return;
                }
            }
        };
        if changed {
            self.publish(CallEvent::StateChanged(CallStatus::Connected));
        }
    }

    /// The single teardown funnel. Cancels every timer, releases the peer
    /// connection and local media, reports history for calls that reached
    /// `Connected`, and resets to the zero session.
    async fn teardown(&self, notify_remote: bool) {
        let (session, peer) = {
            let mut inner = self.inner.lock().await;
            inner.timers.cancel_all();
            if inner.session.status.is_idle() {
                return;
            }
            (std::mem::take(&mut inner.session), inner.peer.take())
        };
        // The slot is free from here on; a new call may start while the
        // old resources are released below.

        info!(target: "Calls", "ending call on room {} ({:?})", session.room_id, session.status);

        if let Some(peer) = peer {
            peer.close().await;
        }
        if let Some(media) = session.local_media.as_ref() {
            media.stop_all();
        }

        if notify_remote {
            if let Err(e) = self.transport.send_end(&session.room_id).await {
                warn!(target: "Calls", "failed to send end for room {}: {e}", session.room_id);
            }
        }

        if session.status == CallStatus::Connected {
            if let Some(started) = session.started_at {
                let duration = Utc::now().signed_duration_since(started).num_seconds();
                let record =
                    CallRecord::ended(session.caller(), session.callee(), duration);
                let history = self.history.clone();
                tokio::spawn(async move {
                    if let Err(e) = history.report(record).await {
                        warn!(target: "Calls/History", "call history report failed: {e}");
                    }
                });
            }
        }

        self.publish(CallEvent::StateChanged(CallStatus::Idle));
    }

    async fn arm_offer_timer(&self, room_id: &str) {
        let mut inner = self.inner.lock().await;
        if !inner.session.is_same_room(room_id) || inner.session.status != CallStatus::Calling {
            return;
        }
        let Some(this) = self.strong() else { return };
        let room = room_id.to_string();
        let timeout = self.config.offer_timeout;
        inner.timers.offer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let fire = {
                let inner = this.inner.lock().await;
                inner.session.is_same_room(&room) && inner.session.status == CallStatus::Calling
            };
            if fire {
                info!(target: "Calls", "offer for room {room} went unanswered, cancelling");
                this.end_call().await;
            }
        }));
    }

    async fn arm_ringing_timer(&self, room_id: &str) {
        let mut inner = self.inner.lock().await;
        if !inner.session.is_same_room(room_id) || inner.session.status != CallStatus::Ringing {
            return;
        }
        let Some(this) = self.strong() else { return };
        let room = room_id.to_string();
        let timeout = self.config.ringing_timeout;
        inner.timers.ringing = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let fire = {
                let inner = this.inner.lock().await;
                inner.session.is_same_room(&room) && inner.session.status == CallStatus::Ringing
            };
            if fire {
                info!(target: "Calls", "inbound call on room {room} not answered, declining");
                this.end_call().await;
            }
        }));
    }

    async fn arm_grace_timer(&self, room_id: &str) {
        let mut inner = self.inner.lock().await;
        if !inner.session.is_same_room(room_id) || inner.session.status != CallStatus::Connected {
            return;
        }
        if inner.timers.disconnect_grace.is_some() {
            // Already counting down.
            return;
        }
        let Some(this) = self.strong() else { return };
        let room = room_id.to_string();
        let grace = self.config.disconnect_grace;
        warn!(
            target: "Calls",
            "transport disconnected for room {room_id}, waiting {grace:?} for recovery"
        );
        inner.timers.disconnect_grace = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let fire = {
                let inner = this.inner.lock().await;
                inner.session.is_same_room(&room) && inner.session.status == CallStatus::Connected
            };
            if fire {
                warn!(target: "Calls", "room {room} did not recover, ending call");
                this.end_call().await;
            }
        }));
    }

    fn publish(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }
}
