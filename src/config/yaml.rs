//! YAML configuration file.
//!
//! Every field is optional; anything left out falls back to the environment
//! and then to defaults.
//!
//! ```yaml
//! openai:
//!   api_key: "sk-..."
//!   model: "gpt-4o-realtime-preview-2024-10-01"
//!   url: "wss://api.openai.com/v1/realtime"
//!
//! session:
//!   voice: "alloy"
//!   instructions: "Be brief."
//!   turn_detection: "server_vad"
//!   greeting: "Hello!"
//!   reconnect_delay_ms: 3000
//!   frame_samples: 2400
//!
//! memory:
//!   url: "http://localhost:8081"
//!   fallback_url: "http://localhost:8082"
//!   cache_path: "memory.json"
//!
//! services:
//!   weather_url: "https://api.open-meteo.com"
//!   time_url: "https://worldtimeapi.org"
//!   http_timeout_seconds: 10
//! ```

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsoleYaml {
    #[serde(default)]
    pub openai: Option<OpenAIYaml>,
    #[serde(default)]
    pub session: Option<SessionYaml>,
    #[serde(default)]
    pub memory: Option<MemoryYaml>,
    #[serde(default)]
    pub services: Option<ServicesYaml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionYaml {
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub turn_detection: Option<String>,
    /// Empty string disables the greeting
    pub greeting: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub frame_samples: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryYaml {
    pub url: Option<String>,
    pub fallback_url: Option<String>,
    pub cache_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServicesYaml {
    pub weather_url: Option<String>,
    pub time_url: Option<String>,
    pub http_timeout_seconds: Option<u64>,
}

impl ConsoleYaml {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid YAML for
    /// this schema (unknown keys included).
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: ConsoleYaml = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
