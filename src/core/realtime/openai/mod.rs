//! OpenAI Realtime API module.
//!
//! Implements [`RealtimeTransport`](crate::core::realtime::RealtimeTransport) over
//! OpenAI's WebSocket Realtime API.
//!
//! # Supported Models
//!
//! - `gpt-4o-realtime-preview` - GPT-4o Realtime Preview
//! - `gpt-4o-realtime-preview-2024-10-01` - October 2024 version
//! - `gpt-4o-realtime-preview-2024-12-17` - December 2024 version
//! - `gpt-4o-mini-realtime-preview` - Mini model for lower latency
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse
//!
//! # Audio Format
//!
//! Input and output audio is PCM 16-bit signed little-endian at 24kHz.

mod client;
mod config;
mod messages;

pub use client::OpenAIRealtime;
pub use config::{
    DEFAULT_TRANSCRIPTION_MODEL, OPENAI_AUDIO_FORMAT, OPENAI_REALTIME_SAMPLE_RATE,
    OPENAI_REALTIME_URL, OpenAIRealtimeModel, OpenAIRealtimeVoice,
};
pub use messages::{
    ClientEvent, ContentPart, RateLimit, RealtimeItem, ResponseConfig, ServerEvent, SessionConfig,
    TurnDetection,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::base::{RealtimeConfig, RealtimeTransport};

    #[tokio::test]
    async fn test_openai_realtime_with_config() {
        let config = RealtimeConfig {
            api_key: "test_key".to_string(),
            model: "gpt-4o-mini-realtime-preview".to_string(),
            ..Default::default()
        };

        let realtime = OpenAIRealtime::new(config).unwrap();
        assert!(!realtime.is_connected());
        assert_eq!(
            realtime.model(),
            OpenAIRealtimeModel::Gpt4oMiniRealtimePreview
        );
        assert!(realtime.session_id().await.is_none());
    }

    #[test]
    fn test_realtime_url() {
        assert_eq!(OPENAI_REALTIME_URL, "wss://api.openai.com/v1/realtime");
    }

    #[test]
    fn test_sample_rate() {
        assert_eq!(OPENAI_REALTIME_SAMPLE_RATE, 24000);
        assert_eq!(OPENAI_AUDIO_FORMAT, "pcm16");
    }
}
