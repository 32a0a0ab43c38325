//! Transport seam between a voice session and a live API connection.

use crate::types::{
    BidiGenerateContentRealtimeInput, BidiGenerateContentToolResponse, Blob, ClientMessage,
    FunctionDeclaration, FunctionResponse, ServerMessage,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Connection is closed")]
    Closed,
}

/// Lifecycle and content signals delivered by an open connection, in arrival order.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// The server acknowledged the setup; the session may stream.
    Open,
    Message(ServerMessage),
    /// The server closed the connection, with its reason if one was given.
    Closed(Option<String>),
    Error(String),
}

/// Per-session parameters supplied by the caller when connecting.
#[derive(Debug, Clone, Default)]
pub struct LiveSetup {
    pub system_instruction: String,
    pub functions: Vec<FunctionDeclaration>,
}

/// The outbound half of a live connection.
#[async_trait]
pub trait LiveTransport: Send {
    async fn send(&mut self, message: ClientMessage) -> Result<(), LiveError>;

    /// Closes the connection. Closing an already closed transport is not an error.
    async fn close(&mut self) -> Result<(), LiveError>;

    async fn send_realtime_audio(&mut self, audio: Blob) -> Result<(), LiveError> {
        self.send(ClientMessage::RealtimeInput(
            BidiGenerateContentRealtimeInput { audio },
        ))
        .await
    }

    async fn send_tool_response(&mut self, response: FunctionResponse) -> Result<(), LiveError> {
        self.send(ClientMessage::ToolResponse(BidiGenerateContentToolResponse {
            function_responses: vec![response],
        }))
        .await
    }
}

/// An open connection: the outbound handle plus the inbound event stream.
pub struct LiveConnection {
    pub transport: Box<dyn LiveTransport>,
    pub events: mpsc::Receiver<LiveEvent>,
}

/// Opens live connections.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, setup: LiveSetup) -> Result<LiveConnection, LiveError>;
}
