//! Voice session state machine
//!
//! Owns the remote connection lifecycle: wires capture output to the
//! transport, decodes server events into playback/turn/tool actions, drives
//! tool-call round trips, and publishes UI-visible status on every
//! transition.
//!
//! All inbound events are consumed by a single task in arrival order, so the
//! session's mutable protocol state needs no locks; the capture callback
//! only drops chunks onto a channel and never blocks the audio thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::capture::{self, CapturePipeline, ChunkSink, FaultSink};
use crate::audio::playback::{self, PlaybackPipeline};
use crate::audio::{pcm, AudioChunk};
use crate::config::{Config, CONTEXT_PREFIX};
use crate::session::status::{SessionStatus, StatusPublisher, StatusWatch, TurnMode};
use crate::session::tools::ToolRegistry;
use crate::transport::{
    ClientContent, LiveConnection, LiveTransport, RealtimeInput, ResponseModality, ServerMessage,
    SessionSetup, ToolResponse, TransportEvent, Turn,
};
use crate::{Error, Result};

/// Shared handle to the playback pipeline (session methods and the event
/// loop both touch it; every access is short and lock-only, never awaited)
type SharedPlayback = Arc<Mutex<Box<dyn PlaybackPipeline>>>;

/// The aggregate root: one live voice conversation
pub struct VoiceSession {
    id: Uuid,
    config: Config,
    transport: Arc<dyn LiveTransport>,
    tools: Arc<ToolRegistry>,
    publisher: StatusPublisher,
    watch: StatusWatch,
    capture: Box<dyn CapturePipeline>,
    playback: SharedPlayback,
    connection: Arc<tokio::sync::Mutex<Option<Arc<dyn LiveConnection>>>>,
    connected: Arc<AtomicBool>,
    cancel: Option<CancellationToken>,
    context_id: Option<String>,
}

impl VoiceSession {
    /// Create a session with platform-default capture and playback
    #[must_use]
    pub fn new(config: Config, transport: Arc<dyn LiveTransport>, tools: Arc<ToolRegistry>) -> Self {
        let capture = capture::platform_default(&config.audio);
        let playback = playback::platform_default(&config.audio);
        Self::with_pipelines(config, transport, tools, capture, playback)
    }

    /// Create a session with explicit pipelines (tests, embedded hosts)
    #[must_use]
    pub fn with_pipelines(
        config: Config,
        transport: Arc<dyn LiveTransport>,
        tools: Arc<ToolRegistry>,
        capture: Box<dyn CapturePipeline>,
        playback: Box<dyn PlaybackPipeline>,
    ) -> Self {
        let (publisher, watch) = StatusPublisher::new();
        Self {
            id: Uuid::new_v4(),
            config,
            transport,
            tools,
            publisher,
            watch,
            capture,
            playback: Arc::new(Mutex::new(playback)),
            connection: Arc::new(tokio::sync::Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            cancel: None,
            context_id: None,
        }
    }

    /// Session identifier
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Host-conversation identifier this voice session correlates to
    #[must_use]
    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref()
    }

    /// Correlate this session to a host conversation
    pub fn set_context_id(&mut self, context_id: impl Into<String>) {
        self.context_id = Some(context_id.into());
    }

    /// Read side of the status observable, for the UI layer
    #[must_use]
    pub fn status_watch(&self) -> StatusWatch {
        self.watch.clone()
    }

    /// Current lifecycle status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.publisher.status()
    }

    /// Current turn mode
    #[must_use]
    pub fn turn_mode(&self) -> TurnMode {
        self.publisher.turn_mode()
    }

    /// Whether the remote connection is live
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Start the session: playback, capture, then the remote connection
    ///
    /// Capture chunks are forwarded only while the connection is live;
    /// chunks produced before open or after drop are silently discarded.
    /// If `initial_context` is supplied it is sent as a completed user turn
    /// with the context marker as soon as the connection opens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no API key is configured,
    /// [`Error::PermissionDenied`] / [`Error::DeviceUnavailable`] when the
    /// microphone or speaker cannot be acquired, and [`Error::Connection`]
    /// when the remote open fails. Every failure path tears down whatever
    /// was already started and publishes `Error` status.
    pub async fn start_session(&mut self, initial_context: Option<String>) -> Result<()> {
        let Some(api_key) = self.config.api_key.clone().filter(|k| !k.is_empty()) else {
            self.publisher.set_status(SessionStatus::Error);
            return Err(Error::Config("no API key configured".to_string()));
        };

        self.publisher.set_status(SessionStatus::Connecting);

        if let Err(e) = self.start_playback() {
            self.publisher.set_status(SessionStatus::Error);
            return Err(e);
        }

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel::<AudioChunk>();
        let on_chunk: ChunkSink = Arc::new(move |chunk| {
            // Never blocks the audio thread; forwarding happens elsewhere
            let _ = chunk_tx.send(chunk);
        });
        let on_error: FaultSink = Arc::new(|e| {
            tracing::warn!(error = %e, "capture fault, microphone stream stopped");
        });

        if let Err(e) = self.capture.start(on_chunk, on_error) {
            self.stop_playback();
            self.publisher.set_status(SessionStatus::Error);
            return Err(e);
        }

        let setup = SessionSetup {
            api_key,
            system_instruction: self.config.system_instruction.clone(),
            voice: self.config.voice.clone(),
            response_modality: ResponseModality::Audio,
            tools: self.config.tools.clone(),
        };

        let (connection, event_rx) =
            match self.transport.connect(&self.config.model_id, setup).await {
                Ok(opened) => opened,
                Err(e) => {
                    self.capture.stop();
                    self.stop_playback();
                    self.publisher.set_status(SessionStatus::Error);
                    return Err(e);
                }
            };

        let connection: Arc<dyn LiveConnection> = Arc::from(connection);
        *self.connection.lock().await = Some(Arc::clone(&connection));

        let cancel = CancellationToken::new();
        tokio::spawn(forward_chunks(
            chunk_rx,
            Arc::clone(&connection),
            Arc::clone(&self.connected),
            cancel.clone(),
        ));
        tokio::spawn(run_event_loop(
            EventLoopCtx {
                publisher: self.publisher.clone(),
                playback: Arc::clone(&self.playback),
                connection,
                connected: Arc::clone(&self.connected),
                tools: Arc::clone(&self.tools),
                initial_context,
            },
            event_rx,
            cancel.clone(),
        ));
        self.cancel = Some(cancel);

        tracing::info!(session = %self.id, model = %self.config.model_id, "session starting");
        Ok(())
    }

    /// Tear the session down: close the connection, release the microphone
    /// and the sink, force status to `Disconnected` / turn to idle
    ///
    /// Safe to call in any state; close failures are logged, never
    /// propagated, and never prevent local resource release.
    pub async fn end_session(&mut self) {
        if let Some(connection) = self.connection.lock().await.take() {
            if let Err(e) = connection.close().await {
                tracing::warn!(error = %e, "connection close failed");
            }
        }
        self.connected.store(false, Ordering::Release);
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.capture.stop();
        self.stop_playback();
        self.publisher.set_status(SessionStatus::Disconnected);
        self.publisher.set_turn_mode(TurnMode::Idle, true);
        tracing::info!(session = %self.id, "session ended");
    }

    /// Send a user utterance as a completed turn; no-op when no connection
    /// is open
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the transport rejects the send
    pub async fn send_text_message(&self, text: &str) -> Result<()> {
        self.send_turn(text.to_string()).await
    }

    /// Send a contextual update (marked so the endpoint can tell it from an
    /// utterance); no-op when no connection is open
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the transport rejects the send
    pub async fn send_contextual_update(&self, text: &str) -> Result<()> {
        self.send_turn(format!("{CONTEXT_PREFIX}{text}")).await
    }

    async fn send_turn(&self, text: String) -> Result<()> {
        let guard = self.connection.lock().await;
        let Some(connection) = guard.as_ref() else {
            tracing::debug!("no connection open, dropping outbound turn");
            return Ok(());
        };
        connection
            .send_client_content(ClientContent {
                turns: vec![Turn::user(text)],
                turn_complete: true,
            })
            .await
    }

    fn start_playback(&self) -> Result<()> {
        self.playback
            .lock()
            .map_err(|_| Error::Session("playback pipeline poisoned".to_string()))?
            .start()
    }

    fn stop_playback(&self) {
        if let Ok(mut playback) = self.playback.lock() {
            playback.stop();
        }
    }
}

/// Everything the inbound consumer task owns
struct EventLoopCtx {
    publisher: StatusPublisher,
    playback: SharedPlayback,
    connection: Arc<dyn LiveConnection>,
    connected: Arc<AtomicBool>,
    tools: Arc<ToolRegistry>,
    initial_context: Option<String>,
}

/// Forward captured chunks to the live connection
///
/// Liveness gates forwarding: chunks produced while unconnected are dropped
/// silently, and send failures are logged and dropped, never surfaced back
/// toward the audio thread.
async fn forward_chunks(
    mut chunk_rx: mpsc::UnboundedReceiver<AudioChunk>,
    connection: Arc<dyn LiveConnection>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            maybe = chunk_rx.recv() => {
                let Some(chunk) = maybe else { break };
                if !connected.load(Ordering::Acquire) {
                    continue;
                }
                let mime_type = chunk.mime_type();
                let input = RealtimeInput {
                    data: chunk.data,
                    mime_type,
                };
                if let Err(e) = connection.send_realtime_input(input).await {
                    tracing::debug!(error = %e, "dropping outbound audio chunk");
                }
            }
        }
    }
}

/// Single consumer of transport events, processed synchronously in arrival
/// order
async fn run_event_loop(
    mut ctx: EventLoopCtx,
    mut event_rx: mpsc::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            maybe = event_rx.recv() => {
                let Some(event) = maybe else {
                    // Sender dropped without an explicit close
                    ctx.connected.store(false, Ordering::Release);
                    ctx.publisher.set_status(SessionStatus::Disconnected);
                    ctx.publisher.set_turn_mode(TurnMode::Idle, true);
                    break;
                };
                match event {
                    TransportEvent::Opened => handle_opened(&mut ctx).await,
                    TransportEvent::Message(msg) => handle_message(&mut ctx, msg).await,
                    TransportEvent::Error(e) => {
                        tracing::error!(error = %e, "transport fault");
                        // Capture and playback stay running so in-flight
                        // audio is not lost; end_session is the teardown
                        ctx.publisher.set_status(SessionStatus::Error);
                    }
                    TransportEvent::Closed => {
                        ctx.connected.store(false, Ordering::Release);
                        ctx.publisher.set_status(SessionStatus::Disconnected);
                        ctx.publisher.set_turn_mode(TurnMode::Idle, true);
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_opened(ctx: &mut EventLoopCtx) {
    ctx.connected.store(true, Ordering::Release);
    ctx.publisher.set_status(SessionStatus::Connected);
    ctx.publisher.set_turn_mode(TurnMode::Idle, false);

    if let Some(context) = ctx.initial_context.take() {
        let content = ClientContent {
            turns: vec![Turn::user(format!("{CONTEXT_PREFIX}{context}"))],
            turn_complete: true,
        };
        if let Err(e) = ctx.connection.send_client_content(content).await {
            tracing::warn!(error = %e, "failed to send initial context");
        }
    }
}

async fn handle_message(ctx: &mut EventLoopCtx, msg: ServerMessage) {
    if msg.interrupted {
        tracing::debug!("endpoint interrupted, flushing pending playback");
        if let Ok(mut playback) = ctx.playback.lock() {
            playback.clear();
        }
    }

    for part in &msg.audio {
        match pcm::unwrap_transport(&part.data) {
            Ok(bytes) => {
                if let Ok(mut playback) = ctx.playback.lock() {
                    if let Err(e) = playback.play(&bytes) {
                        tracing::warn!(error = %e, "failed to queue inbound audio");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "undecodable inbound audio part"),
        }
    }

    // Audio parts present win over turn completion within one message
    if msg.audio.is_empty() {
        if msg.turn_complete {
            ctx.publisher.set_turn_mode(TurnMode::Idle, false);
        }
    } else {
        ctx.publisher.set_turn_mode(TurnMode::Speaking, false);
    }

    if !msg.tool_calls.is_empty() {
        let results = ctx.tools.dispatch_batch(&msg.tool_calls).await;
        if results.is_empty() {
            return;
        }
        let response = ToolResponse {
            function_responses: results,
        };
        if let Err(e) = ctx.connection.send_tool_response(response).await {
            tracing::warn!(error = %e, "failed to send tool response");
        }
    }
}
