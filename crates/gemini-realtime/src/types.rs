//! Wire types for the Gemini Live `BidiGenerateContent` WebSocket API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Client -> server ---

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    RealtimeInput(BidiGenerateContentRealtimeInput),
    ToolResponse(BidiGenerateContentToolResponse),
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Text,
    Audio,
}

#[derive(Serialize, Debug, Clone)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Serialize, Debug, Clone)]
pub struct Part {
    pub text: String,
}

/// Enables transcription of one audio direction. Serializes to `{}`.
#[derive(Serialize, Debug, Clone, Default)]
pub struct AudioTranscriptionConfig {}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Serialize, Debug, Clone)]
pub struct BidiGenerateContentRealtimeInput {
    pub audio: Blob,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// The result of one function call, correlated by the call's `id`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

// --- Server -> client ---

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<LiveServerContent>,
    pub tool_call: Option<LiveServerToolCall>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub go_away: Option<GoAway>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct LiveServerContent {
    pub model_turn: Option<ServerContentTurn>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ServerContentTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

impl ServerContentTurn {
    /// Base64 payloads of every inline audio part, in order.
    pub fn audio_payloads(&self) -> impl Iterator<Item = &str> {
        self.parts
            .iter()
            .filter_map(|part| part.inline_data.as_ref())
            .map(|blob| blob.data.as_str())
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<ServerBlob>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ServerBlob {
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct LiveServerToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}
