//! Remote transport interface and wire message types
//!
//! The concrete wire client (WebSocket, gRPC, vendor SDK) lives outside this
//! crate; sessions talk to it through [`LiveTransport`] / [`LiveConnection`]
//! and consume its events from a channel, so all session state is mutated by
//! a single consumer task and needs no locks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::Result;

/// Response modality requested at connection open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    /// Synthesized speech
    Audio,
    /// Plain text (not used by the voice client, kept for wire parity)
    Text,
}

/// Tool surface advertised to the remote endpoint at connection open
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Tool name the endpoint will invoke
    pub name: String,
    /// Natural-language description of what the tool does
    pub description: String,
    /// JSON schema of the argument mapping
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Everything the transport needs to open a live connection
#[derive(Debug, Clone)]
pub struct SessionSetup {
    /// Credential for the remote endpoint
    pub api_key: String,
    /// System instruction sent once at open
    pub system_instruction: String,
    /// Voice selection for synthesized audio
    pub voice: String,
    /// Declared response modality
    pub response_modality: ResponseModality,
    /// Tool declarations
    pub tools: Vec<ToolDeclaration>,
}

/// One inline audio part of a server message: base64 PCM16 at the inbound
/// wire rate (24kHz mono)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPart {
    /// Base64-wrapped little-endian PCM16
    pub data: String,
    /// MIME type as delivered by the endpoint
    #[serde(default)]
    pub mime_type: String,
}

/// A structured remote-procedure invocation embedded in the audio protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque correlation id
    pub id: String,
    /// Tool name
    pub name: String,
    /// Argument mapping
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// The answer to one [`ToolCall`], correlated by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Correlation id from the originating call
    pub id: String,
    /// Tool name from the originating call
    pub name: String,
    /// Result payload
    pub response: serde_json::Value,
}

/// One decoded server message, delivered strictly in arrival order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Inline audio parts, in order
    #[serde(default)]
    pub audio: Vec<AudioPart>,
    /// Whether the endpoint considers the current turn complete
    #[serde(default)]
    pub turn_complete: bool,
    /// Whether the endpoint was interrupted (barge-in); pending playback
    /// should be flushed
    #[serde(default)]
    pub interrupted: bool,
    /// Embedded tool calls
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Outbound realtime media chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeInput {
    /// Base64-wrapped little-endian PCM16 at the outbound wire rate
    pub data: String,
    /// MIME type, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

/// One turn of client content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Speaker role, `user` for everything this client sends
    pub role: String,
    /// Turn text
    pub text: String,
}

impl Turn {
    /// Build a user turn
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            text: text.into(),
        }
    }
}

/// Completed client content message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContent {
    /// Turns to append
    pub turns: Vec<Turn>,
    /// Whether the turn is complete (always true for this client)
    pub turn_complete: bool,
}

/// Batched tool results for one server message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// One result per resolved call
    pub function_responses: Vec<ToolResult>,
}

/// Events the transport delivers to the session's consumer task
#[derive(Debug)]
pub enum TransportEvent {
    /// Protocol-level open acknowledged; the session is live
    Opened,
    /// One decoded server message
    Message(ServerMessage),
    /// Transport fault (the connection may or may not survive)
    Error(String),
    /// Connection closed, by either side
    Closed,
}

/// Factory for live connections
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Open a live connection to `model_id`
    ///
    /// Returns the connection handle plus the event stream feeding the
    /// session's consumer task.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Connection`] if the connection cannot be
    /// established
    async fn connect(
        &self,
        model_id: &str,
        setup: SessionSetup,
    ) -> Result<(Box<dyn LiveConnection>, mpsc::Receiver<TransportEvent>)>;
}

/// A live, open connection to the remote endpoint
#[async_trait]
pub trait LiveConnection: Send + Sync {
    /// Stream one outbound media chunk
    async fn send_realtime_input(&self, input: RealtimeInput) -> Result<()>;

    /// Send a completed client turn
    async fn send_client_content(&self, content: ClientContent) -> Result<()>;

    /// Send a batched tool response
    async fn send_tool_response(&self, response: ToolResponse) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_defaults_are_empty() {
        let msg: ServerMessage = serde_json::from_str("{}").unwrap();
        assert!(msg.audio.is_empty());
        assert!(!msg.turn_complete);
        assert!(!msg.interrupted);
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn tool_call_args_default_to_empty_mapping() {
        let call: ToolCall =
            serde_json::from_str(r#"{"id":"c1","name":"lookup"}"#).unwrap();
        assert_eq!(call.id, "c1");
        assert!(call.args.is_empty());
    }

    #[test]
    fn response_modality_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&ResponseModality::Audio).unwrap(),
            "\"AUDIO\""
        );
    }
}
