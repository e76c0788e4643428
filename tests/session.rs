//! Voice session end-to-end tests
//!
//! Drives the session state machine through a scripted transport and fake
//! audio pipelines, so no credentials, network, or hardware are needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use halo_voice::audio::capture::{CapturePipeline, ChunkSink, FaultSink};
use halo_voice::audio::pcm::{encode_transport, f32_to_pcm16};
use halo_voice::audio::playback::PlaybackPipeline;
use halo_voice::audio::{AudioChunk, TRANSPORT_INPUT_RATE};
use halo_voice::transport::{
    AudioPart, ClientContent, LiveConnection, LiveTransport, RealtimeInput, ServerMessage,
    SessionSetup, ToolCall, ToolResponse, TransportEvent,
};
use halo_voice::{
    Config, Error, Result, SessionRegistry, SessionStatus, ToolHandler, ToolRegistry, TurnMode,
    VoiceSession, CONTEXT_PREFIX, TOOL_ERROR_SENTINEL,
};

// --- fake capture -----------------------------------------------------------

#[derive(Default)]
struct CaptureState {
    running: AtomicBool,
    ever_started: AtomicBool,
    sink: Mutex<Option<ChunkSink>>,
}

impl CaptureState {
    fn emit(&self, chunk: AudioChunk) {
        let sink = self.sink.lock().unwrap();
        if let Some(sink) = sink.as_ref() {
            sink(chunk);
        }
    }
}

struct FakeCapture {
    state: Arc<CaptureState>,
}

impl CapturePipeline for FakeCapture {
    fn start(&mut self, on_chunk: ChunkSink, _on_error: FaultSink) -> Result<()> {
        self.state.ever_started.store(true, Ordering::SeqCst);
        self.state.running.store(true, Ordering::SeqCst);
        *self.state.sink.lock().unwrap() = Some(on_chunk);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
        *self.state.sink.lock().unwrap() = None;
    }

    fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

// --- fake playback ----------------------------------------------------------

#[derive(Default)]
struct PlaybackState {
    running: AtomicBool,
    played: Mutex<Vec<Vec<u8>>>,
    cleared: AtomicBool,
}

struct FakePlayback {
    state: Arc<PlaybackState>,
}

impl PlaybackPipeline for FakePlayback {
    fn start(&mut self) -> Result<()> {
        self.state.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn play(&mut self, pcm: &[u8]) -> Result<()> {
        if !self.state.running.load(Ordering::SeqCst) {
            return Err(Error::Audio("playback not started".to_string()));
        }
        self.state.played.lock().unwrap().push(pcm.to_vec());
        Ok(())
    }

    fn clear(&mut self) {
        self.state.cleared.store(true, Ordering::SeqCst);
        self.state.played.lock().unwrap().clear();
    }

    fn stop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

// --- fake transport ---------------------------------------------------------

#[derive(Default)]
struct ConnectionState {
    realtime: Mutex<Vec<RealtimeInput>>,
    content: Mutex<Vec<ClientContent>>,
    tool_responses: Mutex<Vec<ToolResponse>>,
    closed: AtomicBool,
}

struct FakeConnection {
    state: Arc<ConnectionState>,
}

#[async_trait]
impl LiveConnection for FakeConnection {
    async fn send_realtime_input(&self, input: RealtimeInput) -> Result<()> {
        self.state.realtime.lock().unwrap().push(input);
        Ok(())
    }

    async fn send_client_content(&self, content: ClientContent) -> Result<()> {
        self.state.content.lock().unwrap().push(content);
        Ok(())
    }

    async fn send_tool_response(&self, response: ToolResponse) -> Result<()> {
        self.state.tool_responses.lock().unwrap().push(response);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct TransportState {
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    connection: Arc<ConnectionState>,
    setup: Mutex<Option<SessionSetup>>,
}

struct FakeTransport {
    state: Arc<TransportState>,
    fail_connect: bool,
}

#[async_trait]
impl LiveTransport for FakeTransport {
    async fn connect(
        &self,
        _model_id: &str,
        setup: SessionSetup,
    ) -> Result<(Box<dyn LiveConnection>, mpsc::Receiver<TransportEvent>)> {
        if self.fail_connect {
            return Err(Error::Connection("connection refused".to_string()));
        }
        *self.state.setup.lock().unwrap() = Some(setup);
        let (tx, rx) = mpsc::channel(32);
        *self.state.events.lock().unwrap() = Some(tx);
        Ok((
            Box::new(FakeConnection {
                state: Arc::clone(&self.state.connection),
            }),
            rx,
        ))
    }
}

impl TransportState {
    async fn push(&self, event: TransportEvent) {
        let tx = self.events.lock().unwrap().clone().expect("not connected");
        tx.send(event).await.expect("event loop gone");
    }
}

// --- harness ----------------------------------------------------------------

struct Harness {
    session: VoiceSession,
    capture: Arc<CaptureState>,
    playback: Arc<PlaybackState>,
    transport: Arc<TransportState>,
}

fn build(api_key: Option<&str>, fail_connect: bool, tools: ToolRegistry) -> Harness {
    let capture = Arc::new(CaptureState::default());
    let playback = Arc::new(PlaybackState::default());
    let transport = Arc::new(TransportState::default());

    let config = Config {
        api_key: api_key.map(ToString::to_string),
        ..Config::default()
    };

    let session = VoiceSession::with_pipelines(
        config,
        Arc::new(FakeTransport {
            state: Arc::clone(&transport),
            fail_connect,
        }),
        Arc::new(tools),
        Box::new(FakeCapture {
            state: Arc::clone(&capture),
        }),
        Box::new(FakePlayback {
            state: Arc::clone(&playback),
        }),
    );

    Harness {
        session,
        capture,
        playback,
        transport,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn audio_part(samples: &[f32]) -> AudioPart {
    AudioPart {
        data: encode_transport(samples),
        mime_type: "audio/pcm;rate=24000".to_string(),
    }
}

struct Lookup;

#[async_trait]
impl ToolHandler for Lookup {
    async fn call(&self, args: &serde_json::Map<String, serde_json::Value>) -> Result<String> {
        Ok(format!(
            "found:{}",
            args.get("query").and_then(|v| v.as_str()).unwrap_or("?")
        ))
    }
}

// --- scenarios --------------------------------------------------------------

#[tokio::test]
async fn start_without_credential_fails_fast() {
    let mut h = build(None, false, ToolRegistry::new());

    let err = h.session.start_session(None).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(h.session.status(), SessionStatus::Error);
    // The microphone was never acquired
    assert!(!h.capture.ever_started.load(Ordering::SeqCst));
    assert!(!h.playback.running.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failed_connect_tears_down_local_resources() {
    let mut h = build(Some("key"), true, ToolRegistry::new());

    let err = h.session.start_session(None).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(h.session.status(), SessionStatus::Error);
    // Both pipelines were started and then released
    assert!(h.capture.ever_started.load(Ordering::SeqCst));
    assert!(!h.capture.running.load(Ordering::SeqCst));
    assert!(!h.playback.running.load(Ordering::SeqCst));
}

#[tokio::test]
async fn open_then_audio_then_turn_complete() {
    let mut h = build(Some("key"), false, ToolRegistry::new());
    let watch = h.session.status_watch();

    h.session.start_session(None).await.unwrap();
    assert_eq!(h.session.status(), SessionStatus::Connecting);

    h.transport.push(TransportEvent::Opened).await;
    wait_until(|| watch.status() == SessionStatus::Connected).await;
    assert_eq!(watch.turn_mode(), TurnMode::Idle);

    // Inline audio, no turn completion: playback gets the bytes, endpoint
    // is speaking
    let samples = vec![0.25f32; 240];
    h.transport
        .push(TransportEvent::Message(ServerMessage {
            audio: vec![audio_part(&samples)],
            ..ServerMessage::default()
        }))
        .await;
    wait_until(|| watch.turn_mode() == TurnMode::Speaking).await;
    assert_eq!(
        h.playback.played.lock().unwrap().as_slice(),
        &[f32_to_pcm16(&samples)]
    );

    // Bare turn completion: back to idle
    h.transport
        .push(TransportEvent::Message(ServerMessage {
            turn_complete: true,
            ..ServerMessage::default()
        }))
        .await;
    wait_until(|| watch.turn_mode() == TurnMode::Idle).await;
}

#[tokio::test]
async fn audio_parts_win_over_turn_complete_in_one_message() {
    let mut h = build(Some("key"), false, ToolRegistry::new());
    let watch = h.session.status_watch();

    h.session.start_session(None).await.unwrap();
    h.transport.push(TransportEvent::Opened).await;
    wait_until(|| watch.status() == SessionStatus::Connected).await;

    h.transport
        .push(TransportEvent::Message(ServerMessage {
            audio: vec![audio_part(&[0.1; 48])],
            turn_complete: true,
            ..ServerMessage::default()
        }))
        .await;

    wait_until(|| watch.turn_mode() == TurnMode::Speaking).await;
    assert_eq!(watch.turn_mode(), TurnMode::Speaking);
}

#[tokio::test]
async fn tool_batch_yields_single_batched_response() {
    let mut tools = ToolRegistry::new();
    tools.register("lookup", Arc::new(Lookup));
    let mut h = build(Some("key"), false, tools);
    let watch = h.session.status_watch();

    h.session.start_session(None).await.unwrap();
    h.transport.push(TransportEvent::Opened).await;
    wait_until(|| watch.status() == SessionStatus::Connected).await;

    let mut args = serde_json::Map::new();
    args.insert("query".to_string(), serde_json::json!("weather"));
    h.transport
        .push(TransportEvent::Message(ServerMessage {
            tool_calls: vec![
                ToolCall {
                    id: "call-1".to_string(),
                    name: "lookup".to_string(),
                    args,
                },
                ToolCall {
                    id: "call-2".to_string(),
                    name: "no_such_tool".to_string(),
                    args: serde_json::Map::new(),
                },
            ],
            ..ServerMessage::default()
        }))
        .await;

    wait_until(|| !h.transport.connection.tool_responses.lock().unwrap().is_empty()).await;

    let responses = h.transport.connection.tool_responses.lock().unwrap();
    assert_eq!(responses.len(), 1, "exactly one batched response");
    let results = &responses[0].function_responses;
    assert_eq!(results.len(), 2);

    let known = results.iter().find(|r| r.id == "call-1").unwrap();
    assert_eq!(known.response["output"], "found:weather");
    let unknown = results.iter().find(|r| r.id == "call-2").unwrap();
    assert_eq!(unknown.response["output"], TOOL_ERROR_SENTINEL);
}

#[tokio::test]
async fn capture_chunks_forward_only_while_connected() {
    let mut h = build(Some("key"), false, ToolRegistry::new());
    let watch = h.session.status_watch();

    h.session.start_session(None).await.unwrap();

    let chunk = AudioChunk {
        data: encode_transport(&[0.5; 160]),
        sample_rate: TRANSPORT_INPUT_RATE,
        bits_per_sample: 16,
        channels: 1,
    };

    // Produced before the connection opens: silently dropped
    h.capture.emit(chunk.clone());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.transport.connection.realtime.lock().unwrap().is_empty());

    h.transport.push(TransportEvent::Opened).await;
    wait_until(|| watch.status() == SessionStatus::Connected).await;

    h.capture.emit(chunk);
    wait_until(|| !h.transport.connection.realtime.lock().unwrap().is_empty()).await;

    let sent = h.transport.connection.realtime.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].mime_type, "audio/pcm;rate=16000");
}

#[tokio::test]
async fn initial_context_sent_on_open_with_marker() {
    let mut h = build(Some("key"), false, ToolRegistry::new());
    let watch = h.session.status_watch();

    h.session
        .start_session(Some("user is viewing invoice #42".to_string()))
        .await
        .unwrap();
    h.transport.push(TransportEvent::Opened).await;
    wait_until(|| watch.status() == SessionStatus::Connected).await;

    wait_until(|| !h.transport.connection.content.lock().unwrap().is_empty()).await;
    let content = h.transport.connection.content.lock().unwrap();
    assert!(content[0].turn_complete);
    assert_eq!(content[0].turns[0].role, "user");
    assert_eq!(
        content[0].turns[0].text,
        format!("{CONTEXT_PREFIX}user is viewing invoice #42")
    );
}

#[tokio::test]
async fn text_sends_are_noops_without_connection() {
    let h = build(Some("key"), false, ToolRegistry::new());

    h.session.send_text_message("hello").await.unwrap();
    h.session.send_contextual_update("ctx").await.unwrap();
    assert!(h.transport.connection.content.lock().unwrap().is_empty());
}

#[tokio::test]
async fn interrupted_message_flushes_pending_playback() {
    let mut h = build(Some("key"), false, ToolRegistry::new());
    let watch = h.session.status_watch();

    h.session.start_session(None).await.unwrap();
    h.transport.push(TransportEvent::Opened).await;
    wait_until(|| watch.status() == SessionStatus::Connected).await;

    h.transport
        .push(TransportEvent::Message(ServerMessage {
            audio: vec![audio_part(&[0.3; 48])],
            ..ServerMessage::default()
        }))
        .await;
    wait_until(|| !h.playback.played.lock().unwrap().is_empty()).await;

    h.transport
        .push(TransportEvent::Message(ServerMessage {
            interrupted: true,
            ..ServerMessage::default()
        }))
        .await;
    wait_until(|| h.playback.cleared.load(Ordering::SeqCst)).await;
}

#[tokio::test]
async fn transport_error_sets_status_but_leaves_pipelines_running() {
    let mut h = build(Some("key"), false, ToolRegistry::new());
    let watch = h.session.status_watch();

    h.session.start_session(None).await.unwrap();
    h.transport.push(TransportEvent::Opened).await;
    wait_until(|| watch.status() == SessionStatus::Connected).await;

    h.transport
        .push(TransportEvent::Error("socket reset".to_string()))
        .await;
    wait_until(|| watch.status() == SessionStatus::Error).await;

    // In-flight audio is not lost mid-error; teardown is end_session's job
    assert!(h.capture.running.load(Ordering::SeqCst));
    assert!(h.playback.running.load(Ordering::SeqCst));
}

#[tokio::test]
async fn end_session_releases_everything() {
    let mut h = build(Some("key"), false, ToolRegistry::new());
    let watch = h.session.status_watch();

    h.session.start_session(None).await.unwrap();
    h.transport.push(TransportEvent::Opened).await;
    wait_until(|| watch.status() == SessionStatus::Connected).await;

    // Leave pending playback and a mid-stream capture behind
    h.transport
        .push(TransportEvent::Message(ServerMessage {
            audio: vec![audio_part(&[0.2; 48])],
            ..ServerMessage::default()
        }))
        .await;
    wait_until(|| !h.playback.played.lock().unwrap().is_empty()).await;

    h.session.end_session().await;

    assert_eq!(h.session.status(), SessionStatus::Disconnected);
    assert_eq!(h.session.turn_mode(), TurnMode::Idle);
    assert!(h.transport.connection.closed.load(Ordering::SeqCst));
    assert!(!h.capture.running.load(Ordering::SeqCst));
    assert!(!h.playback.running.load(Ordering::SeqCst));
    // The capture sink is gone, so no further data callbacks can fire
    assert!(h.capture.sink.lock().unwrap().is_none());
    assert!(!h.session.is_connected());
}

#[tokio::test]
async fn remote_close_forces_idle_turn() {
    let mut h = build(Some("key"), false, ToolRegistry::new());
    let watch = h.session.status_watch();

    h.session.start_session(None).await.unwrap();
    h.transport.push(TransportEvent::Opened).await;
    wait_until(|| watch.status() == SessionStatus::Connected).await;

    h.transport
        .push(TransportEvent::Message(ServerMessage {
            audio: vec![audio_part(&[0.1; 48])],
            ..ServerMessage::default()
        }))
        .await;
    wait_until(|| watch.turn_mode() == TurnMode::Speaking).await;

    h.transport.push(TransportEvent::Closed).await;
    wait_until(|| watch.status() == SessionStatus::Disconnected).await;
    assert_eq!(watch.turn_mode(), TurnMode::Idle);
}

#[tokio::test]
async fn setup_carries_credential_and_voice() {
    let mut h = build(Some("secret-key"), false, ToolRegistry::new());
    h.session.start_session(None).await.unwrap();

    let setup = h.transport.setup.lock().unwrap().clone().unwrap();
    assert_eq!(setup.api_key, "secret-key");
    assert!(!setup.voice.is_empty());
    assert!(!setup.system_instruction.is_empty());
}

#[tokio::test]
async fn registry_holds_one_session_and_reports_replacement() {
    let a = build(Some("key"), false, ToolRegistry::new());
    let b = build(Some("key"), false, ToolRegistry::new());
    let a_id = a.session.id();
    let b_id = b.session.id();

    let mut registry = SessionRegistry::new();
    assert!(matches!(
        registry.install(a.session),
        halo_voice::Installed::Fresh
    ));
    assert_eq!(registry.active_id(), Some(a_id));

    match registry.install(b.session) {
        halo_voice::Installed::Replaced { previous } => {
            assert_eq!(previous.id(), a_id);
        }
        halo_voice::Installed::Fresh => panic!("expected replacement"),
    }
    assert_eq!(registry.active_id(), Some(b_id));

    assert!(registry.take().is_some());
    assert!(!registry.is_occupied());
}
