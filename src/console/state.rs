use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use time::OffsetDateTime;

use super::conversation::ItemView;
use super::event_log::RealtimeEventLogEntry;
use crate::core::realtime::TurnDetectionConfig;
use crate::memory::MemoryMap;
use crate::tools::CurrentLocation;

/// Lifecycle of the console's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Dropped by the service, a reconnect is scheduled
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Who decides when the user's turn ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDetectionMode {
    /// Push-to-talk: the client commits audio and requests responses
    #[default]
    Manual,
    /// The service detects speech boundaries
    ServerVad,
}

impl TurnDetectionMode {
    /// Session `turn_detection` value for this mode.
    pub fn to_config(self) -> Option<TurnDetectionConfig> {
        match self {
            TurnDetectionMode::Manual => None,
            TurnDetectionMode::ServerVad => Some(TurnDetectionConfig::server_vad()),
        }
    }
}

impl FromStr for TurnDetectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manual" | "none" | "push_to_talk" | "ptt" => Ok(TurnDetectionMode::Manual),
            "server_vad" | "vad" => Ok(TurnDetectionMode::ServerVad),
            other => Err(format!("Unknown turn detection mode: {other}")),
        }
    }
}

impl fmt::Display for TurnDetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnDetectionMode::Manual => write!(f, "manual"),
            TurnDetectionMode::ServerVad => write!(f, "server_vad"),
        }
    }
}

/// Everything a renderer needs to draw the console.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub state: ConnectionState,
    pub mode: TurnDetectionMode,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    pub is_recording: bool,
    pub items: Vec<ItemView>,
    pub events: Vec<RealtimeEventLogEntry>,
    pub memory: MemoryMap,
    pub location: Option<CurrentLocation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("vad".parse::<TurnDetectionMode>(), Ok(TurnDetectionMode::ServerVad));
        assert_eq!(
            "Server_VAD".parse::<TurnDetectionMode>(),
            Ok(TurnDetectionMode::ServerVad)
        );
        assert_eq!("none".parse::<TurnDetectionMode>(), Ok(TurnDetectionMode::Manual));
        assert!("loud".parse::<TurnDetectionMode>().is_err());
    }

    #[test]
    fn test_mode_to_config() {
        assert!(TurnDetectionMode::Manual.to_config().is_none());
        assert_eq!(
            TurnDetectionMode::ServerVad.to_config(),
            Some(TurnDetectionConfig::server_vad())
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
