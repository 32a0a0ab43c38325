//! WebSocket client for the Gemini Live API.

use crate::transport::{LiveConnection, LiveConnector, LiveError, LiveEvent, LiveSetup, LiveTransport};
use crate::types::{
    AudioTranscriptionConfig, BidiGenerateContentSetup, ClientMessage, Content, GenerationConfig,
    Part, ResponseModality, ServerMessage, Tool,
};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, error, info, warn};

pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to Gemini Live with a fixed endpoint, key and model.
#[derive(Clone)]
pub struct GeminiLiveConnector {
    endpoint: String,
    api_key: String,
    model: String,
}

impl GeminiLiveConnector {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Builds the `setup` message: audio out, transcription both ways, the
    /// caller's directive and function declarations.
    pub fn setup_message(&self, setup: LiveSetup) -> ClientMessage {
        let tools = if setup.functions.is_empty() {
            vec![]
        } else {
            vec![Tool {
                function_declarations: setup.functions,
            }]
        };
        ClientMessage::Setup(BidiGenerateContentSetup {
            model: self.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
            },
            system_instruction: Some(Content {
                parts: vec![Part {
                    text: setup.system_instruction,
                }],
            }),
            tools,
            input_audio_transcription: Some(AudioTranscriptionConfig::default()),
            output_audio_transcription: Some(AudioTranscriptionConfig::default()),
        })
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, setup: LiveSetup) -> Result<LiveConnection, LiveError> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (ws_stream, _) = connect_async(url).await?;
        info!(model = %self.model, "Connected to Gemini Live WebSocket.");
        let (mut sink, stream) = ws_stream.split();

        let setup_msg = self.setup_message(setup);
        sink.send(WsMessage::Text(serde_json::to_string(&setup_msg)?.into()))
            .await?;
        debug!("Setup message sent, awaiting setupComplete.");

        let (events_tx, events_rx) = mpsc::channel(128);
        let reader = tokio::spawn(read_loop(stream, events_tx));

        Ok(LiveConnection {
            transport: Box::new(GeminiLiveTransport {
                sink,
                reader,
                closed: false,
            }),
            events: events_rx,
        })
    }
}

/// Forwards server frames as `LiveEvent`s until the socket ends or the receiver is dropped.
async fn read_loop(mut stream: SplitStream<WsStream>, events: mpsc::Sender<LiveEvent>) {
    let mut is_open = false;
    while let Some(frame) = stream.next().await {
        let event = match frame {
            Ok(WsMessage::Text(text)) => parse_event(&text, &mut is_open),
            // The server may deliver JSON in binary frames.
            Ok(WsMessage::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => parse_event(text, &mut is_open),
                Err(_) => {
                    warn!(len = bytes.len(), "Ignoring non-UTF-8 binary frame from Gemini.");
                    None
                }
            },
            Ok(WsMessage::Close(close_frame)) => {
                info!(?close_frame, "Gemini WebSocket connection closed by server.");
                let _ = events
                    .send(LiveEvent::Closed(close_frame.map(|f| f.reason.to_string())))
                    .await;
                return;
            }
            Ok(_) => None,
            Err(e) => {
                error!("Error reading from Gemini WebSocket: {}", e);
                let _ = events.send(LiveEvent::Error(e.to_string())).await;
                return;
            }
        };
        if let Some(event) = event {
            if events.send(event).await.is_err() {
                debug!("Live event receiver dropped; stopping reader.");
                return;
            }
        }
    }
    let _ = events.send(LiveEvent::Closed(None)).await;
}

fn parse_event(text: &str, is_open: &mut bool) -> Option<LiveEvent> {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) if msg.setup_complete.is_some() && !*is_open => {
            info!("Gemini session setup is complete. Ready for bidirectional streaming.");
            *is_open = true;
            Some(LiveEvent::Open)
        }
        Ok(msg) => Some(LiveEvent::Message(msg)),
        Err(e) => {
            error!(error = %e, "Failed to parse Gemini message. Raw text: {}", text);
            None
        }
    }
}

struct GeminiLiveTransport {
    sink: SplitSink<WsStream, WsMessage>,
    reader: JoinHandle<()>,
    closed: bool,
}

#[async_trait]
impl LiveTransport for GeminiLiveTransport {
    async fn send(&mut self, message: ClientMessage) -> Result<(), LiveError> {
        if self.closed {
            return Err(LiveError::Closed);
        }
        let payload = serde_json::to_string(&message)?;
        self.sink.send(WsMessage::Text(payload.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LiveError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.reader.abort();
        match self.sink.close().await {
            Ok(()) => Ok(()),
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for GeminiLiveTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
