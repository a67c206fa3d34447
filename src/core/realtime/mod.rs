//! Realtime dialogue transport module.
//!
//! A transport owns the WebSocket session with the dialogue service and reports
//! everything it observes as [`TransportEvent`]s on a single channel.
//!
//! # Supported Providers
//!
//! - **OpenAI Realtime API** - Full duplex audio with GPT-4o
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_realtime_console::core::realtime::{OpenAIRealtime, RealtimeConfig, RealtimeTransport, SessionUpdate};
//!
//! let mut transport = OpenAIRealtime::new(RealtimeConfig {
//!     api_key: "sk-...".to_string(),
//!     ..Default::default()
//! })?;
//! let mut events = transport.take_events().unwrap();
//! transport.connect().await?;
//! transport.update_session(SessionUpdate::modalities(&["text", "audio"])).await?;
//! ```

mod base;
pub mod openai;

pub use base::{
    BoxedTransport, ContentInput, EventSource, FunctionCallRequest, FunctionDefinition,
    InputTranscriptionConfig, ItemEvent, ItemRole, ItemStatus, ItemType, ProtocolItem,
    RealtimeConfig, RealtimeError, RealtimeResult, RealtimeTransport, SessionUpdate, ToolCall,
    ToolDefinition, TransportEvent, TurnDetectionConfig,
};
pub use openai::{
    OPENAI_REALTIME_SAMPLE_RATE, OPENAI_REALTIME_URL, OpenAIRealtime, OpenAIRealtimeModel,
    OpenAIRealtimeVoice,
};
