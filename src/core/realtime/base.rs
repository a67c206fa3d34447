//! Base traits and types for realtime dialogue sessions.
//!
//! A [`RealtimeTransport`] owns one WebSocket session with the dialogue service.
//! Everything it observes is reported on a single unbounded channel of
//! [`TransportEvent`]s, which the console loop drains.
//!
//! # Audio Format
//!
//! Input and output audio are PCM 16-bit signed little-endian at 24kHz.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::audio::TrackOffset;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Error event reported by the provider
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Session error
    #[error("Session error: {0}")]
    SessionError(String),
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Connection settings for a realtime transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// WebSocket endpoint override (defaults to the provider endpoint)
    #[serde(default)]
    pub url: Option<String>,

    /// Model to use (e.g., "gpt-4o-realtime-preview")
    #[serde(default)]
    pub model: String,
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    /// Model to use for transcription (e.g., "whisper-1")
    pub model: String,
}

impl InputTranscriptionConfig {
    pub fn whisper() -> Self {
        Self {
            model: "whisper-1".to_string(),
        }
    }
}

/// Service-side turn detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default)]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(default)]
        silence_duration_ms: Option<u32>,
    },
    /// Semantic-aware turn detection
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level (low, medium, high, auto)
        #[serde(default)]
        eagerness: Option<String>,
    },
}

impl TurnDetectionConfig {
    /// Plain `{type: "server_vad"}` with service defaults.
    pub fn server_vad() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: None,
            prefix_padding_ms: None,
            silence_duration_ms: None,
        }
    }
}

/// Tool definition for function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function definition
    pub function: FunctionDefinition,
}

/// Function definition for tool calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Function description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Partial session configuration. Unset fields are left untouched upstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub instructions: Option<String>,
    pub voice: Option<String>,
    pub modalities: Option<Vec<String>>,
    pub input_audio_transcription: Option<InputTranscriptionConfig>,
    /// `Some(None)` disables turn detection (manual mode)
    pub turn_detection: Option<Option<TurnDetectionConfig>>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub temperature: Option<f32>,
}

impl SessionUpdate {
    pub fn modalities(modalities: &[&str]) -> Self {
        Self {
            modalities: Some(modalities.iter().map(|m| m.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn turn_detection(turn_detection: Option<TurnDetectionConfig>) -> Self {
        Self {
            turn_detection: Some(turn_detection),
            ..Default::default()
        }
    }

    /// Full configuration pushed right after connecting.
    pub fn initial(
        instructions: &str,
        voice: &str,
        turn_detection: Option<TurnDetectionConfig>,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            instructions: Some(instructions.to_string()),
            voice: Some(voice.to_string()),
            input_audio_transcription: Some(InputTranscriptionConfig::whisper()),
            turn_detection: Some(turn_detection),
            tools: Some(tools),
            ..Default::default()
        }
    }
}

// =============================================================================
// Conversation items as reported by the protocol
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Message,
    FunctionCall,
    FunctionCallOutput,
}

impl ItemType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(Self::Message),
            "function_call" => Some(Self::FunctionCall),
            "function_call_output" => Some(Self::FunctionCallOutput),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemRole {
    User,
    Assistant,
    System,
}

impl ItemRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for ItemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemRole::User => write!(f, "user"),
            ItemRole::Assistant => write!(f, "assistant"),
            ItemRole::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    InProgress,
    Completed,
    Incomplete,
}

/// Function call descriptor carried by `function_call` items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub call_id: String,
    pub arguments: String,
}

/// Item state as reported by a protocol notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolItem {
    pub id: String,
    pub item_type: ItemType,
    pub role: Option<ItemRole>,
    pub status: ItemStatus,
    /// Concatenated text parts
    pub text: String,
    /// Concatenated transcripts of audio parts
    pub transcript: String,
    pub tool: Option<ToolCall>,
    pub output: Option<String>,
}

// =============================================================================
// Transport events
// =============================================================================

/// Direction of a raw protocol event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Client,
    Server,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::Client => write!(f, "client"),
            EventSource::Server => write!(f, "server"),
        }
    }
}

/// Item-level notification derived from server events.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent {
    Created {
        item: ProtocolItem,
        previous_item_id: Option<String>,
        /// Captured input audio attributed to a user audio item
        input_audio: Option<Vec<i16>>,
    },
    TextDelta {
        item_id: String,
        delta: String,
    },
    TranscriptDelta {
        item_id: String,
        delta: String,
    },
    AudioDelta {
        item_id: String,
        samples: Vec<i16>,
    },
    ArgumentsDelta {
        item_id: String,
        delta: String,
    },
    InputTranscript {
        item_id: String,
        transcript: String,
    },
    Completed {
        item: ProtocolItem,
    },
    Truncated {
        item_id: String,
        audio_end_ms: u32,
    },
    Deleted {
        item_id: String,
    },
}

/// Function call request from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    /// Call ID for the function call
    pub call_id: String,
    /// Function name
    pub name: String,
    /// JSON arguments
    pub arguments: String,
    /// Item ID
    pub item_id: Option<String>,
}

/// Everything a transport reports to its owner.
#[derive(Debug)]
pub enum TransportEvent {
    /// Raw protocol event, in either direction
    Realtime {
        source: EventSource,
        event: serde_json::Value,
    },
    /// Error event or undecodable frame
    Error(RealtimeError),
    /// The session dropped without a local `disconnect()`
    Disconnected,
    /// The service detected user speech while it may be responding
    Interrupted,
    Item(ItemEvent),
    FunctionCall(FunctionCallRequest),
}

/// Content of a user message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentInput {
    InputText(String),
    InputAudio(Vec<i16>),
}

// =============================================================================
// Base Trait
// =============================================================================

/// A realtime dialogue session.
///
/// Implementations report everything they observe through the receiver returned
/// by [`take_events`](RealtimeTransport::take_events), which stays valid across
/// reconnects.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Take the event receiver. Returns `None` after the first call.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    async fn connect(&mut self) -> RealtimeResult<()>;

    /// Close the session. No [`TransportEvent::Disconnected`] is reported for it.
    async fn disconnect(&mut self) -> RealtimeResult<()>;

    fn is_connected(&self) -> bool;

    async fn update_session(&mut self, update: SessionUpdate) -> RealtimeResult<()>;

    async fn append_input_audio(&mut self, samples: &[i16]) -> RealtimeResult<()>;

    /// Request a response, committing buffered input audio first when turn
    /// detection is off.
    async fn create_response(&mut self) -> RealtimeResult<()>;

    /// Cancel the in-flight response. With an offset, also truncate the played
    /// item to what the user actually heard.
    async fn cancel_response(&mut self, truncate: Option<TrackOffset>) -> RealtimeResult<()>;

    /// Add a user message and request a response.
    async fn send_user_message_content(&mut self, parts: Vec<ContentInput>) -> RealtimeResult<()>;

    /// Add a `function_call_output` item and request a response.
    async fn submit_function_result(&mut self, call_id: &str, output: &str) -> RealtimeResult<()>;

    async fn delete_item(&mut self, item_id: &str) -> RealtimeResult<()>;
}

/// Type alias for boxed transport instances.
pub type BoxedTransport = Box<dyn RealtimeTransport>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RealtimeError::ConnectionFailed("test".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = RealtimeError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }

    #[test]
    fn test_turn_detection_serialization() {
        let json = serde_json::to_value(TurnDetectionConfig::server_vad()).unwrap();
        assert_eq!(json["type"], "server_vad");
    }

    #[test]
    fn test_session_update_helpers() {
        let update = SessionUpdate::modalities(&["text", "audio"]);
        assert_eq!(
            update.modalities,
            Some(vec!["text".to_string(), "audio".to_string()])
        );
        assert!(update.turn_detection.is_none());

        let manual = SessionUpdate::turn_detection(None);
        assert_eq!(manual.turn_detection, Some(None));
    }

    #[test]
    fn test_item_enums_parse() {
        assert_eq!(ItemType::parse("function_call"), Some(ItemType::FunctionCall));
        assert_eq!(ItemType::parse("bogus"), None);
        assert_eq!(ItemRole::parse("assistant"), Some(ItemRole::Assistant));
        assert_eq!(ItemRole::System.to_string(), "system");
        assert_eq!(EventSource::Client.to_string(), "client");
    }
}
