//! The realtime voice session: one live connection, one microphone, one speaker.
//!
//! All per-session state lives in `VoiceSession` and is mutated only through
//! `&mut self`. Inbound transport events, captured windows and the connect
//! deadline all funnel through `dispatch`, one at a time, in arrival order.

use super::transcript::Transcripts;
use crate::audio::AudioBackend;
use crate::audio::capture::CaptureInput;
use crate::audio::playback::PlaybackScheduler;
use crate::audio_utils::{CAPTURE_MIME, PLAYBACK_SAMPLE_RATE, decode_f32_from_base64_i16, encode_f32_to_base64_i16};
use crate::error::VoiceError;
use disasterguard_core::identity::{
    IdentityService, REGISTER_IDENTITY_DESCRIPTION, REGISTER_IDENTITY_TOOL,
    register_identity_parameters, system_directive,
};
use gemini_realtime::types::{Blob, FunctionCall, FunctionDeclaration, FunctionResponse, LiveServerContent, ServerMessage};
use gemini_realtime::{LiveConnection, LiveConnector, LiveEvent, LiveSetup};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Everything the session reacts to.
#[derive(Debug)]
pub enum SessionEvent {
    Transport(LiveEvent),
    /// A full capture window, ready to stream.
    Captured(Vec<f32>),
    /// The connection did not open in time.
    ConnectTimeout,
    /// The transport's event stream ended without a close frame.
    TransportGone,
}

/// Progress reported to whoever is driving the session.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceUpdate {
    State(SessionState),
    UserSpeech(String),
    AgentSpeech(String),
    IdentityRegistered(String),
    Failed(String),
}

pub struct VoiceSession {
    connector: Arc<dyn LiveConnector>,
    backend: Arc<dyn AudioBackend>,
    identity: IdentityService,
    connect_timeout: Duration,
    shutdown: CancellationToken,
    updates: Option<mpsc::UnboundedSender<VoiceUpdate>>,

    state: SessionState,
    live: Option<LiveConnection>,
    capture: Option<CaptureInput>,
    playback: Option<PlaybackScheduler>,
    transcripts: Transcripts,
    open_deadline: Option<Instant>,
}

impl VoiceSession {
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        backend: Arc<dyn AudioBackend>,
        identity: IdentityService,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            backend,
            identity,
            connect_timeout,
            shutdown: CancellationToken::new(),
            updates: None,
            state: SessionState::Idle,
            live: None,
            capture: None,
            playback: None,
            transcripts: Transcripts::default(),
            open_deadline: None,
        }
    }

    /// Sends `VoiceUpdate`s to `updates` as the session progresses.
    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<VoiceUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Cancelling `shutdown` aborts an in-flight connect and ends `run`.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcripts(&self) -> &Transcripts {
        &self.transcripts
    }

    /// Opens devices and the live connection. Any existing session is torn down first.
    ///
    /// On success the session is `Connecting`; it becomes `Active` when the
    /// transport reports `Open`.
    pub async fn start(&mut self) -> Result<(), VoiceError> {
        if self.state != SessionState::Idle {
            info!(state = %self.state, "Replacing existing voice session");
            self.teardown().await;
            self.set_state(SessionState::Idle);
        }

        let started = Instant::now();
        self.set_state(SessionState::Connecting);
        match self.open().await {
            Ok(()) => {
                self.open_deadline = Some(started + self.connect_timeout);
                Ok(())
            }
            Err(VoiceError::Cancelled) => {
                info!("Voice session start cancelled");
                self.teardown().await;
                self.set_state(SessionState::Idle);
                Err(VoiceError::Cancelled)
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn open(&mut self) -> Result<(), VoiceError> {
        self.capture = Some(self.backend.open_input()?);
        let sink = self.backend.open_output(PLAYBACK_SAMPLE_RATE)?;
        self.playback = Some(PlaybackScheduler::new(sink, PLAYBACK_SAMPLE_RATE));

        let identity = self.identity.current();
        let setup = LiveSetup {
            system_instruction: system_directive(identity.as_deref()),
            functions: vec![FunctionDeclaration {
                name: REGISTER_IDENTITY_TOOL.to_string(),
                description: REGISTER_IDENTITY_DESCRIPTION.to_string(),
                parameters: register_identity_parameters(),
            }],
        };
        info!(identity = identity.as_deref().unwrap_or("UNIDENTIFIED"), "Opening live connection");

        let connector = Arc::clone(&self.connector);
        let shutdown = self.shutdown.clone();
        let timeout = self.connect_timeout;
        let connection: Result<LiveConnection, VoiceError> = tokio::select! {
            _ = shutdown.cancelled() => Err(VoiceError::Cancelled),
            result = tokio::time::timeout(timeout, connector.connect(setup)) => match result {
                Ok(Ok(connection)) => Ok(connection),
                Ok(Err(e)) => Err(VoiceError::Transport(e.to_string())),
                Err(_) => Err(VoiceError::ConnectTimeout(timeout)),
            },
        };
        self.live = Some(connection?);
        Ok(())
    }

    /// Ends the session and releases every resource. Safe in any state.
    pub async fn stop(&mut self) -> Result<(), VoiceError> {
        self.teardown().await;
        self.set_state(SessionState::Idle);
        Ok(())
    }

    /// Waits for the next thing the session must react to.
    ///
    /// Returns `None` when there is no live connection.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let deadline = self.open_deadline;
        let live = self.live.as_mut()?;
        let capture = self.capture.as_mut();

        tokio::select! {
            event = live.events.recv() => Some(match event {
                Some(event) => SessionEvent::Transport(event),
                None => SessionEvent::TransportGone,
            }),
            Some(window) = next_window(capture) => Some(SessionEvent::Captured(window)),
            _ = deadline_elapsed(deadline) => Some(SessionEvent::ConnectTimeout),
        }
    }

    /// Drives the session until the connection ends or shutdown is requested.
    pub async fn run(&mut self) -> Result<(), VoiceError> {
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return self.stop().await,
                event = self.next_event() => match event {
                    Some(event) => self.dispatch(event).await?,
                    None => return Ok(()),
                },
            }
        }
    }

    /// Starts the session and drives it to the end. A shutdown requested
    /// while connecting is a clean exit.
    pub async fn serve(&mut self) -> Result<(), VoiceError> {
        let outcome = match self.start().await {
            Ok(()) => self.run().await,
            Err(e) => Err(e),
        };
        match outcome {
            Err(VoiceError::Cancelled) => Ok(()),
            other => other,
        }
    }

    /// Applies one event. An `Err` means the session has failed and is now `Error`.
    pub async fn dispatch(&mut self, event: SessionEvent) -> Result<(), VoiceError> {
        let outcome = match event {
            SessionEvent::Transport(LiveEvent::Open) => self.on_open(),
            SessionEvent::Transport(LiveEvent::Message(message)) => self.on_message(message).await,
            SessionEvent::Transport(LiveEvent::Closed(reason)) => {
                info!(?reason, "Live connection closed");
                self.stop().await
            }
            SessionEvent::TransportGone => {
                info!("Live event stream ended");
                self.stop().await
            }
            SessionEvent::Transport(LiveEvent::Error(message)) => {
                Err(VoiceError::Transport(message))
            }
            SessionEvent::Captured(window) => self.on_captured(window).await,
            SessionEvent::ConnectTimeout if self.state == SessionState::Connecting => {
                Err(VoiceError::ConnectTimeout(self.connect_timeout))
            }
            SessionEvent::ConnectTimeout => {
                self.open_deadline = None;
                Ok(())
            }
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e).await,
        }
    }

    fn on_open(&mut self) -> Result<(), VoiceError> {
        if self.state != SessionState::Connecting {
            debug!(state = %self.state, "Ignoring open signal");
            return Ok(());
        }
        self.open_deadline = None;
        self.transcripts.reset();
        if let Some(capture) = self.capture.as_mut() {
            capture.stream.start()?;
        }
        self.set_state(SessionState::Active);
        Ok(())
    }

    async fn on_message(&mut self, message: ServerMessage) -> Result<(), VoiceError> {
        if self.state != SessionState::Active {
            debug!(state = %self.state, "Dropping server message received outside an active session");
            return Ok(());
        }
        if let Some(tool_call) = message.tool_call {
            for call in tool_call.function_calls {
                self.on_function_call(call).await?;
            }
        }
        if let Some(content) = message.server_content {
            self.on_server_content(content);
        }
        if let Some(go_away) = message.go_away {
            warn!(time_left = ?go_away.time_left, "Live server is about to disconnect");
        }
        Ok(())
    }

    async fn on_function_call(&mut self, call: FunctionCall) -> Result<(), VoiceError> {
        info!(call_id = %call.id, name = %call.name, "Tool call received");
        let response = match self.identity.call(&call.name, &call.args) {
            Ok(ack) => {
                if let Some(name) = self.identity.current() {
                    self.notify(VoiceUpdate::IdentityRegistered(name));
                }
                json!({ "result": ack })
            }
            Err(e) => {
                warn!(call_id = %call.id, error = %e, "Tool call rejected");
                json!({ "error": e.to_string() })
            }
        };

        let live = self.live.as_mut().ok_or_else(connection_missing)?;
        live.transport
            .send_tool_response(FunctionResponse {
                id: call.id,
                name: call.name,
                response,
            })
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }

    fn on_server_content(&mut self, content: LiveServerContent) {
        if let Some(transcription) = content.input_transcription {
            self.transcripts.push_input(&transcription.text);
            self.notify(VoiceUpdate::UserSpeech(transcription.text));
        }
        if let Some(transcription) = content.output_transcription {
            self.transcripts.push_output(&transcription.text);
            self.notify(VoiceUpdate::AgentSpeech(transcription.text));
        }
        if content.interrupted == Some(true) {
            debug!("Agent turn interrupted");
        }

        let (Some(turn), Some(playback)) = (content.model_turn, self.playback.as_mut()) else {
            return;
        };
        for payload in turn.audio_payloads() {
            match decode_f32_from_base64_i16(payload) {
                Ok(samples) => {
                    playback.enqueue(samples);
                }
                Err(e) => warn!(error = %e, "Dropping undecodable audio chunk"),
            }
        }
    }

    async fn on_captured(&mut self, window: Vec<f32>) -> Result<(), VoiceError> {
        if self.state != SessionState::Active {
            return Ok(());
        }
        let live = self.live.as_mut().ok_or_else(connection_missing)?;
        live.transport
            .send_realtime_audio(Blob {
                mime_type: CAPTURE_MIME.to_string(),
                data: encode_f32_to_base64_i16(&window),
            })
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }

    async fn fail(&mut self, error: VoiceError) -> Result<(), VoiceError> {
        error!(error = %error, "Voice session failed");
        self.teardown().await;
        self.set_state(SessionState::Error);
        self.notify(VoiceUpdate::Failed(error.to_string()));
        Err(error)
    }

    async fn teardown(&mut self) {
        if let Some(mut live) = self.live.take() {
            if let Err(e) = live.transport.close().await {
                warn!(error = %e, "Error while closing live connection");
            }
        }
        if let Some(mut capture) = self.capture.take() {
            capture.stream.close();
        }
        if let Some(playback) = self.playback.take() {
            playback.close();
        }
        self.transcripts.reset();
        self.open_deadline = None;
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "Voice session state changed");
            self.state = state;
            self.notify(VoiceUpdate::State(state));
        }
    }

    fn notify(&self, update: VoiceUpdate) {
        if let Some(updates) = &self.updates {
            let _ = updates.send(update);
        }
    }
}

fn connection_missing() -> VoiceError {
    VoiceError::Transport("no open live connection".to_string())
}

async fn next_window(capture: Option<&mut CaptureInput>) -> Option<Vec<f32>> {
    match capture {
        Some(capture) => capture.windows.recv().await,
        None => std::future::pending().await,
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
