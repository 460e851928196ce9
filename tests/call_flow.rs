//! End-to-end call flow scenarios driven through fake collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use confab_calls::CallConfig;
use confab_calls::calls::{
    CallCoordinator, CallError, CallHistoryReporter, CallRecord, CallStatus,
    ChannelSignalingTransport, IceCandidate, LocalMedia, MediaSource, MediaTrack, PeerConnection,
    PeerConnectionFactory, PeerConnectionState, PeerEvent, RemoteTrack, SessionDescription,
    SignalMessage, SignalingTransport, TrackKind,
};

const AUDIO_SDP: &str = "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\n";
const VIDEO_SDP: &str =
    "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:1\r\n";

struct FakeMediaSource {
    fail_acquire: AtomicBool,
    video_requests: AtomicUsize,
    acquired: std::sync::Mutex<Vec<LocalMedia>>,
}

impl FakeMediaSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_acquire: AtomicBool::new(false),
            video_requests: AtomicUsize::new(0),
            acquired: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn first_acquired(&self) -> LocalMedia {
        self.acquired.lock().unwrap().first().cloned().unwrap()
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn acquire(&self, with_video: bool) -> Result<LocalMedia, CallError> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(CallError::Media("device denied".to_string()));
        }
        let media = LocalMedia::new(
            Arc::new(MediaTrack::new(TrackKind::Audio)),
            with_video.then(|| Arc::new(MediaTrack::new(TrackKind::Video))),
        );
        self.acquired.lock().unwrap().push(media.clone());
        Ok(media)
    }

    async fn acquire_video(&self) -> Result<Arc<MediaTrack>, CallError> {
        self.video_requests.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MediaTrack::new(TrackKind::Video)))
    }
}

struct FakePeer {
    tracks: std::sync::Mutex<Vec<Arc<MediaTrack>>>,
    remote_descriptions: std::sync::Mutex<Vec<SessionDescription>>,
    candidates: std::sync::Mutex<Vec<IceCandidate>>,
    offers_created: AtomicUsize,
    closed: AtomicBool,
}

impl FakePeer {
    fn new() -> Self {
        Self {
            tracks: std::sync::Mutex::new(Vec::new()),
            remote_descriptions: std::sync::Mutex::new(Vec::new()),
            candidates: std::sync::Mutex::new(Vec::new()),
            offers_created: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn sdp(&self) -> &'static str {
        let has_video = self
            .tracks
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.kind() == TrackKind::Video);
        if has_video { VIDEO_SDP } else { AUDIO_SDP }
    }

    fn has_video_track(&self) -> bool {
        self.tracks
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.kind() == TrackKind::Video)
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        self.offers_created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(self.sdp()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        Ok(SessionDescription::answer(self.sdp()))
    }

    async fn set_local_description(&self, _desc: SessionDescription) -> Result<(), CallError> {
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.remote_descriptions.lock().unwrap().push(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: Arc<MediaTrack>) -> Result<(), CallError> {
        self.tracks.lock().unwrap().push(track);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FakePeerFactory {
    created: std::sync::Mutex<Vec<Arc<FakePeer>>>,
    events: std::sync::Mutex<Option<mpsc::Sender<PeerEvent>>>,
}

impl FakePeerFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            created: std::sync::Mutex::new(Vec::new()),
            events: std::sync::Mutex::new(None),
        })
    }

    fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    fn first_peer(&self) -> Arc<FakePeer> {
        self.created.lock().unwrap().first().cloned().unwrap()
    }

    fn events_sender(&self) -> mpsc::Sender<PeerEvent> {
        self.events.lock().unwrap().clone().unwrap()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(
        &self,
        _room_id: &str,
        _local_user: &str,
        _signaling: Arc<dyn SignalingTransport>,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, CallError> {
        let peer = Arc::new(FakePeer::new());
        self.created.lock().unwrap().push(peer.clone());
        *self.events.lock().unwrap() = Some(events);
        Ok(peer)
    }
}

struct RecordingReporter {
    records: std::sync::Mutex<Vec<CallRecord>>,
}

impl RecordingReporter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            records: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn records(&self) -> Vec<CallRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallHistoryReporter for RecordingReporter {
    async fn report(&self, record: CallRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

struct Harness {
    coordinator: Arc<CallCoordinator>,
    remote: Arc<ChannelSignalingTransport>,
    remote_rx: mpsc::Receiver<SignalMessage>,
    media: Arc<FakeMediaSource>,
    peers: Arc<FakePeerFactory>,
    history: Arc<RecordingReporter>,
}

/// Timer durations long enough that they never fire during a test.
fn patient_config() -> CallConfig {
    CallConfig {
        offer_timeout: Duration::from_secs(30),
        ringing_timeout: Duration::from_secs(30),
        disconnect_grace: Duration::from_secs(30),
        stun_servers: vec![],
        event_capacity: 16,
    }
}

/// Patient everywhere except the one timer the test waits out.
fn short_offer_config() -> CallConfig {
    CallConfig {
        offer_timeout: Duration::from_millis(100),
        ..patient_config()
    }
}

fn short_ringing_config() -> CallConfig {
    CallConfig {
        ringing_timeout: Duration::from_millis(100),
        ..patient_config()
    }
}

fn short_grace_config() -> CallConfig {
    CallConfig {
        disconnect_grace: Duration::from_millis(100),
        ..patient_config()
    }
}

fn harness(config: CallConfig) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let ((local, local_rx), (remote, remote_rx)) = ChannelSignalingTransport::pair(32);
    let media = FakeMediaSource::new();
    let peers = FakePeerFactory::new();
    let history = RecordingReporter::new();
    let coordinator = CallCoordinator::new(
        "alice",
        config,
        local,
        media.clone(),
        peers.clone(),
        history.clone(),
    );
    coordinator.attach(local_rx);
    Harness {
        coordinator,
        remote,
        remote_rx,
        media,
        peers,
        history,
    }
}

async fn recv(rx: &mut mpsc::Receiver<SignalMessage>) -> SignalMessage {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for signaling message")
        .expect("signaling channel closed")
}

async fn wait_for_status(harness: &Harness, expected: CallStatus) {
    for _ in 0..100 {
        if harness.coordinator.snapshot().await.status == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "never reached {expected:?}, stuck in {:?}",
        harness.coordinator.snapshot().await.status
    );
}

/// Drive an outbound audio call to Connected, consuming the offer.
async fn establish_outbound(h: &mut Harness) {
    h.coordinator.start_call("bob", "r1", false).await.unwrap();
    match recv(&mut h.remote_rx).await {
        SignalMessage::Offer { room_id, .. } => assert_eq!(room_id, "r1"),
        other => panic!("expected offer, got {other:?}"),
    }
    h.remote
        .send_answer("r1", "bob", SessionDescription::answer(AUDIO_SDP))
        .await
        .unwrap();
    wait_for_status(h, CallStatus::Connected).await;
}

#[tokio::test]
async fn audio_call_full_lifecycle() {
    let mut h = harness(patient_config());

    h.coordinator.start_call("bob", "r1", false).await.unwrap();
    let offer = recv(&mut h.remote_rx).await;
    match &offer {
        SignalMessage::Offer {
            room_id,
            from,
            signal,
        } => {
            assert_eq!(room_id, "r1");
            assert_eq!(from, "alice");
            assert!(!signal.has_video(), "audio-only offer must carry no video line");
        }
        other => panic!("expected offer, got {other:?}"),
    }
    assert_eq!(h.coordinator.snapshot().await.status, CallStatus::Calling);

    h.remote
        .send_answer("r1", "bob", SessionDescription::answer(AUDIO_SDP))
        .await
        .unwrap();
    wait_for_status(&h, CallStatus::Connected).await;

    let snap = h.coordinator.snapshot().await;
    assert_eq!(snap.caller.as_deref(), Some("alice"));
    assert_eq!(snap.callee.as_deref(), Some("bob"));
    assert!(snap.duration_secs.is_some(), "started_at must be set");

    h.coordinator.end_call().await;
    assert_eq!(
        recv(&mut h.remote_rx).await,
        SignalMessage::End {
            room_id: "r1".to_string()
        }
    );
    assert_eq!(h.coordinator.snapshot().await.status, CallStatus::Idle);

    // Resources released, history reported.
    assert!(h.peers.first_peer().closed.load(Ordering::SeqCst));
    assert!(h.media.first_acquired().audio().is_stopped());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let records = h.history.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].caller, "alice");
    assert_eq!(records[0].callee, "bob");
    assert!(records[0].duration >= 0);
}

#[tokio::test]
async fn unanswered_offer_times_out_and_releases_everything() {
    let mut h = harness(short_offer_config());

    h.coordinator.start_call("bob", "r1", false).await.unwrap();
    let _offer = recv(&mut h.remote_rx).await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.coordinator.snapshot().await.status, CallStatus::Idle);
    assert!(h.peers.first_peer().closed.load(Ordering::SeqCst));
    assert!(h.media.first_acquired().audio().is_stopped());
    assert_eq!(
        recv(&mut h.remote_rx).await,
        SignalMessage::End {
            room_id: "r1".to_string()
        }
    );
    // The call never connected, so nothing is reported.
    assert!(h.history.records().is_empty());
}

#[tokio::test]
async fn end_call_is_idempotent_from_idle() {
    let mut h = harness(patient_config());

    h.coordinator.end_call().await;
    h.coordinator.end_call().await;

    assert_eq!(h.coordinator.snapshot().await.status, CallStatus::Idle);
    assert!(matches!(h.remote_rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn inbound_offer_rings_and_answer_connects() {
    let mut h = harness(patient_config());

    h.remote
        .send_offer("r1", "bob", SessionDescription::offer(VIDEO_SDP))
        .await
        .unwrap();
    wait_for_status(&h, CallStatus::Ringing).await;
    // Let the offer application finish before picking up.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snap = h.coordinator.snapshot().await;
    assert_eq!(snap.caller.as_deref(), Some("bob"));
    assert_eq!(snap.callee.as_deref(), Some("alice"));

    h.coordinator.answer_call().await.unwrap();

    match recv(&mut h.remote_rx).await {
        SignalMessage::Answer { room_id, from, .. } => {
            assert_eq!(room_id, "r1");
            assert_eq!(from, "alice");
        }
        other => panic!("expected answer, got {other:?}"),
    }

    let snap = h.coordinator.snapshot().await;
    assert_eq!(snap.status, CallStatus::Connected);
    assert!(snap.duration_secs.is_some());
    // The offer carried video, so answering requested a camera.
    assert!(snap.local_media.unwrap().has_video());
}

#[tokio::test]
async fn unanswered_inbound_call_auto_declines() {
    let mut h = harness(short_ringing_config());

    h.remote
        .send_offer("r1", "bob", SessionDescription::offer(AUDIO_SDP))
        .await
        .unwrap();

    // Well past the ringing timeout, the call has declined itself.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.coordinator.snapshot().await.status, CallStatus::Idle);
    assert_eq!(
        recv(&mut h.remote_rx).await,
        SignalMessage::End {
            room_id: "r1".to_string()
        }
    );
}

#[tokio::test]
async fn renegotiation_offer_keeps_connected_status() {
    let mut h = harness(patient_config());
    establish_outbound(&mut h).await;

    h.remote
        .send_offer("r1", "bob", SessionDescription::offer(VIDEO_SDP))
        .await
        .unwrap();

    match recv(&mut h.remote_rx).await {
        SignalMessage::Answer { room_id, .. } => assert_eq!(room_id, "r1"),
        other => panic!("expected renegotiation answer, got {other:?}"),
    }

    let snap = h.coordinator.snapshot().await;
    assert_eq!(snap.status, CallStatus::Connected);
    // No second session was created.
    assert_eq!(h.peers.created_count(), 1);
    // The peer added video, so we opportunistically matched it.
    assert_eq!(h.media.video_requests.load(Ordering::SeqCst), 1);
    assert!(h.peers.first_peer().has_video_track());
}

#[tokio::test]
async fn foreign_room_offer_is_rejected_while_busy() {
    let mut h = harness(patient_config());
    establish_outbound(&mut h).await;

    h.remote
        .send_offer("r2", "mallory", SessionDescription::offer(AUDIO_SDP))
        .await
        .unwrap();

    assert_eq!(
        recv(&mut h.remote_rx).await,
        SignalMessage::End {
            room_id: "r2".to_string()
        }
    );

    // The active session is untouched.
    let snap = h.coordinator.snapshot().await;
    assert_eq!(snap.status, CallStatus::Connected);
    assert_eq!(snap.callee.as_deref(), Some("bob"));
    assert_eq!(h.peers.created_count(), 1);
}

#[tokio::test]
async fn toggle_video_without_camera_renegotiates_once() {
    let mut h = harness(patient_config());
    establish_outbound(&mut h).await;

    let peer = h.peers.first_peer();
    let offers_before = peer.offers_created.load(Ordering::SeqCst);

    assert!(h.coordinator.toggle_video().await.unwrap());

    match recv(&mut h.remote_rx).await {
        SignalMessage::Offer { room_id, signal, .. } => {
            assert_eq!(room_id, "r1");
            assert!(signal.has_video());
        }
        other => panic!("expected renegotiation offer, got {other:?}"),
    }
    assert_eq!(
        peer.offers_created.load(Ordering::SeqCst),
        offers_before + 1,
        "exactly one renegotiation offer"
    );
    assert!(peer.has_video_track());
    assert_eq!(h.media.video_requests.load(Ordering::SeqCst), 1);

    // The remote answers the renegotiation; the session stays connected.
    h.remote
        .send_answer("r1", "bob", SessionDescription::answer(VIDEO_SDP))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.coordinator.snapshot().await.status, CallStatus::Connected);
    assert_eq!(peer.remote_descriptions.lock().unwrap().len(), 2);

    // A second toggle flips the existing track without another offer.
    assert!(!h.coordinator.toggle_video().await.unwrap());
    assert!(matches!(h.remote_rx.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(h.media.video_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_disconnect_recovers_within_grace() {
    let mut h = harness(short_grace_config());
    establish_outbound(&mut h).await;

    let events = h.peers.events_sender();
    events
        .send(PeerEvent::StateChange {
            room_id: "r1".to_string(),
            state: PeerConnectionState::Disconnected,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    events
        .send(PeerEvent::StateChange {
            room_id: "r1".to_string(),
            state: PeerConnectionState::Connected,
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.coordinator.snapshot().await.status, CallStatus::Connected);
    assert!(matches!(h.remote_rx.try_recv(), Err(TryRecvError::Empty)));
    assert!(h.history.records().is_empty());
}

#[tokio::test]
async fn unrecovered_disconnect_ends_call_exactly_once() {
    let mut h = harness(short_grace_config());
    establish_outbound(&mut h).await;

    h.peers
        .events_sender()
        .send(PeerEvent::StateChange {
            room_id: "r1".to_string(),
            state: PeerConnectionState::Disconnected,
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.coordinator.snapshot().await.status, CallStatus::Idle);
    assert_eq!(
        recv(&mut h.remote_rx).await,
        SignalMessage::End {
            room_id: "r1".to_string()
        }
    );
    assert!(matches!(h.remote_rx.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(h.history.records().len(), 1);
}

#[tokio::test]
async fn media_denial_aborts_the_call() {
    let mut h = harness(patient_config());
    h.media.fail_acquire.store(true, Ordering::SeqCst);

    let result = h.coordinator.start_call("bob", "r1", false).await;
    assert!(matches!(result, Err(CallError::Media(_))));

    assert_eq!(h.coordinator.snapshot().await.status, CallStatus::Idle);
    // No peer connection was ever created.
    assert_eq!(h.peers.created_count(), 0);
    // Teardown still notifies the remote side.
    assert_eq!(
        recv(&mut h.remote_rx).await,
        SignalMessage::End {
            room_id: "r1".to_string()
        }
    );
}

#[tokio::test]
async fn candidates_without_a_live_connection_are_dropped() {
    let mut h = harness(patient_config());

    // No call at all: silently dropped.
    h.remote
        .send_candidate("r1", "bob", IceCandidate::new("candidate:1"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.coordinator.snapshot().await.status, CallStatus::Idle);

    // With an active call, candidates reach the peer connection.
    establish_outbound(&mut h).await;
    h.remote
        .send_candidate("r1", "bob", IceCandidate::new("candidate:2"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let candidates = h.peers.first_peer().candidates.lock().unwrap().clone();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].candidate, "candidate:2");
}

#[tokio::test]
async fn second_start_call_fails_while_busy() {
    let mut h = harness(patient_config());
    establish_outbound(&mut h).await;

    let result = h.coordinator.start_call("carol", "r2", false).await;
    assert!(matches!(result, Err(CallError::Busy(_))));

    let snap = h.coordinator.snapshot().await;
    assert_eq!(snap.status, CallStatus::Connected);
    assert_eq!(snap.callee.as_deref(), Some("bob"));
    assert_eq!(h.peers.created_count(), 1);
}

#[tokio::test]
async fn remote_track_populates_session() {
    let mut h = harness(patient_config());
    establish_outbound(&mut h).await;

    h.peers
        .events_sender()
        .send(PeerEvent::RemoteTrack {
            room_id: "r1".to_string(),
            track: RemoteTrack::new("bob-audio", TrackKind::Audio),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snap = h.coordinator.snapshot().await;
    assert_eq!(snap.remote_media.len(), 1);
    assert_eq!(snap.remote_media[0].id(), "bob-audio");

    // Remote end empties the session again.
    h.remote.send_end("r1").await.unwrap();
    wait_for_status(&h, CallStatus::Idle).await;
    assert!(h.coordinator.snapshot().await.remote_media.is_empty());
}
