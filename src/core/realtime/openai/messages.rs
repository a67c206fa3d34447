//! OpenAI Realtime API WebSocket message types.
//!
//! This module defines the client and server event types for the OpenAI Realtime API.
//! All events are JSON-encoded and sent over WebSocket.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Update session configuration
//! - input_audio_buffer.append - Append audio to buffer
//! - input_audio_buffer.commit - Commit audio buffer
//! - conversation.item.create - Add item to conversation
//! - conversation.item.truncate - Truncate played assistant audio
//! - conversation.item.delete - Delete conversation item
//! - response.create - Generate a response
//! - response.cancel - Cancel current response
//!
//! Server events (received from server):
//! - session.created / session.updated
//! - input_audio_buffer.speech_started / speech_stopped / committed
//! - conversation.item.created / truncated / deleted
//! - conversation.item.input_audio_transcription.completed
//! - response.output_item.added / done
//! - response.audio.delta, response.audio_transcript.delta, response.text.delta
//! - response.function_call_arguments.delta / done
//! - rate_limits.updated
//! - error
//!
//! Anything else decodes to [`ServerEvent::Other`] and is only logged.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::realtime::base::{
    ItemRole, ItemStatus, ItemType, ProtocolItem, ToolCall,
};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration for OpenAI Realtime API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration; `Some(None)` is sent as `null`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<Option<TurnDetection>>,

    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration in ms
        #[serde(default, skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    /// Semantic VAD
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// Eagerness level
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eagerness: Option<String>,
    },
}

/// Tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters JSON schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item as it appears on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl RealtimeItem {
    /// User message carrying the given content parts.
    pub fn user_message(content: Vec<ContentPart>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(content),
            ..Default::default()
        }
    }

    pub fn function_call_output(call_id: &str, output: &str) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.to_string()),
            output: Some(output.to_string()),
            ..Default::default()
        }
    }

    /// True for user items whose content includes input audio.
    pub fn has_input_audio(&self) -> bool {
        self.role.as_deref() == Some("user")
            && self
                .content
                .as_ref()
                .is_some_and(|parts| parts.iter().any(|p| p.content_type == "input_audio"))
    }

    /// Convert to the transport-neutral representation.
    ///
    /// Returns `None` for items without an id or with an unknown type.
    pub fn to_protocol(&self) -> Option<ProtocolItem> {
        let id = self.id.clone()?;
        let item_type = ItemType::parse(&self.item_type)?;

        let mut text = String::new();
        let mut transcript = String::new();
        for part in self.content.iter().flatten() {
            if let Some(t) = &part.text {
                text.push_str(t);
            }
            if let Some(t) = &part.transcript {
                transcript.push_str(t);
            }
        }

        let status = match self.status.as_deref() {
            Some("completed") => ItemStatus::Completed,
            Some("incomplete") => ItemStatus::Incomplete,
            _ => ItemStatus::InProgress,
        };

        let tool = match item_type {
            ItemType::FunctionCall => Some(ToolCall {
                name: self.name.clone().unwrap_or_default(),
                call_id: self.call_id.clone().unwrap_or_default(),
                arguments: self.arguments.clone().unwrap_or_default(),
            }),
            _ => None,
        };

        Some(ProtocolItem {
            id,
            item_type,
            role: self.role.as_deref().and_then(ItemRole::parse),
            status,
            text,
            transcript,
            tool,
            output: self.output.clone(),
        })
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Audio content (base64 encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Transcript of audio content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl ContentPart {
    pub fn input_text(text: &str) -> Self {
        Self {
            content_type: "input_text".to_string(),
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    /// Input audio from little-endian PCM16 bytes.
    pub fn input_audio(pcm: &[u8]) -> Self {
        Self {
            content_type: "input_audio".to_string(),
            audio: Some(BASE64_STANDARD.encode(pcm)),
            ..Default::default()
        }
    }
}

// =============================================================================
// Response Configuration
// =============================================================================

/// Response configuration for creating responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Response modalities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    /// System instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the OpenAI Realtime API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },

    /// Commit the input audio buffer
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: RealtimeItem,
        /// Previous item ID to insert after
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
    },

    /// Truncate a conversation item
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        /// Item ID
        item_id: String,
        /// Content index
        content_index: u32,
        /// Audio end in ms
        audio_end_ms: u32,
    },

    /// Delete a conversation item
    #[serde(rename = "conversation.item.delete")]
    ConversationItemDelete {
        /// Item ID
        item_id: String,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Cancel the current response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from raw bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the OpenAI Realtime API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        session: Session,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        session: Session,
    },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        audio_start_ms: u64,
        /// Item ID
        item_id: String,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        audio_end_ms: u64,
        /// Item ID
        item_id: String,
    },

    /// Audio buffer committed
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        /// Previous item ID
        #[serde(default)]
        previous_item_id: Option<String>,
        /// New item ID
        item_id: String,
    },

    /// Conversation item created
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        /// Previous item ID
        #[serde(default)]
        previous_item_id: Option<String>,
        /// Created item
        item: RealtimeItem,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Item ID
        item_id: String,
        /// Transcript text
        transcript: String,
    },

    /// Input audio transcription failed
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed {
        /// Item ID
        item_id: String,
        /// Error details
        error: ApiError,
    },

    /// Conversation item truncated
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated {
        /// Item ID
        item_id: String,
        /// Audio end in ms
        audio_end_ms: u32,
    },

    /// Conversation item deleted
    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted {
        /// Item ID
        item_id: String,
    },

    /// Response created
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Response information
        response: Response,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        response: Response,
    },

    /// Output item added to response
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Item
        item: RealtimeItem,
    },

    /// Output item done
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        /// Item
        item: RealtimeItem,
    },

    /// Text delta
    #[serde(rename = "response.text.delta")]
    TextDelta {
        /// Item ID
        item_id: String,
        /// Text delta
        delta: String,
    },

    /// Audio transcript delta
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        /// Item ID
        item_id: String,
        /// Transcript delta
        delta: String,
    },

    /// Audio delta (audio data chunk)
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Item ID
        item_id: String,
        /// Base64-encoded audio delta
        delta: String,
    },

    /// Function call arguments delta
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        /// Item ID
        item_id: String,
        /// Call ID
        call_id: String,
        /// Arguments delta
        delta: String,
    },

    /// Function call arguments done
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Item ID
        item_id: String,
        /// Call ID
        call_id: String,
        /// Full arguments
        arguments: String,
    },

    /// Rate limits updated
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        /// Rate limit information
        rate_limits: Vec<RateLimit>,
    },

    /// Any event type not handled above
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// Decode base64 audio from an AudioDelta event.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
    /// Event ID that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Session information.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Session {
    /// Session ID
    #[serde(default)]
    pub id: String,
    /// Model used
    #[serde(default)]
    pub model: String,
    /// Response modalities
    #[serde(default)]
    pub modalities: Vec<String>,
    /// Voice
    #[serde(default)]
    pub voice: Option<String>,
    /// Turn detection config
    #[serde(default)]
    pub turn_detection: Option<TurnDetection>,
}

/// Response information.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Response ID
    pub id: String,
    /// Response status
    #[serde(default)]
    pub status: String,
    /// Output items
    #[serde(default)]
    pub output: Vec<RealtimeItem>,
}

/// Rate limit information.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimit {
    /// Rate limit name
    pub name: String,
    /// Limit value
    #[serde(default)]
    pub limit: Option<u64>,
    /// Remaining value
    #[serde(default)]
    pub remaining: Option<u64>,
    /// Seconds until the limit resets
    #[serde(default)]
    pub reset_seconds: Option<f64>,
}

// =============================================================================
// Tests
// =============================================================================
