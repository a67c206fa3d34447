//! Realtime session orchestrator.
//!
//! The console keeps one dialogue session alive and wires it to the audio
//! pipelines, the conversation mirror, the event log and the client tools. All
//! of that state is owned by a single task; callers talk to it through a
//! cloneable [`ConsoleHandle`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_realtime_console::console::{ConsoleManager, ConsoleOptions};
//!
//! let handle = ConsoleManager::spawn(transport, backend, tools, memory, ConsoleOptions::default())?;
//! handle.connect().await?;
//! handle.send_text("What's the weather in Paris?").await?;
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::core::audio::{AudioError, DEFAULT_FRAME_SAMPLES};
use crate::core::realtime::RealtimeError;

pub mod conversation;
pub mod event_log;
mod manager;
pub mod state;

pub use conversation::{ConversationItem, ConversationStore, DecodedAudio, FormattedContent, ItemView};
pub use event_log::{EventLog, EventSideEffect, RealtimeEventLogEntry};
pub use manager::{ConsoleHandle, ConsoleManager};
pub use state::{ConnectionState, Snapshot, TurnDetectionMode};

/// Instructions sent when none are configured.
pub const DEFAULT_INSTRUCTIONS: &str = "System settings:
Tool use: enabled.

Instructions:
- You are an artificial intelligence agent responsible for helping test realtime voice capabilities
- Please make sure to respond with a helpful voice via audio
- Be kind, helpful, and courteous
- It is okay to ask the user questions
- Use tools and functions you have available liberally
- Be open to exploration and conversation

Personality:
- Be upbeat and genuine
- Try speaking quickly as if excited
";

/// Errors returned by console operations.
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Acquiring a resource during connect failed; everything was rolled back
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Console setup failed: {0}")]
    Setup(String),

    /// The console task has stopped
    #[error("Console is closed")]
    Closed,
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;

/// Session behavior knobs.
#[derive(Debug, Clone)]
pub struct ConsoleOptions {
    pub instructions: String,
    pub voice: String,
    /// User text sent right after connecting
    pub greeting: Option<String>,
    pub mode: TurnDetectionMode,
    pub reconnect_delay: Duration,
    pub frame_samples: usize,
    pub weather_base_url: String,
    pub time_base_url: String,
    pub http_timeout: Duration,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            voice: "alloy".to_string(),
            greeting: Some("Hello!".to_string()),
            mode: TurnDetectionMode::Manual,
            reconnect_delay: Duration::from_secs(3),
            frame_samples: DEFAULT_FRAME_SAMPLES,
            weather_base_url: "https://api.open-meteo.com".to_string(),
            time_base_url: "https://worldtimeapi.org".to_string(),
            http_timeout: Duration::from_secs(10),
        }
    }
}
