//! Configuration for the console binary.
//!
//! Sources, highest priority first: YAML file, environment variables, `.env`
//! values, defaults. `.env` is loaded in `main` before anything here runs.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use waav_realtime_console::config::ConsoleConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Environment only
//! let config = ConsoleConfig::from_env()?;
//!
//! // YAML with environment fallback
//! let config = ConsoleConfig::from_file(&PathBuf::from("console.yaml"))?;
//! println!("Using model {}", config.model);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::console::{ConsoleOptions, DEFAULT_INSTRUCTIONS, TurnDetectionMode};
use crate::core::audio::DEFAULT_FRAME_SAMPLES;
use crate::core::realtime::{OPENAI_REALTIME_URL, OpenAIRealtimeModel, RealtimeConfig};
use crate::memory::{MemoryPersistence, MemoryResult};
use crate::utils::{EndpointKind, validate_service_url};

mod env;
mod yaml;

pub use yaml::{ConsoleYaml, MemoryYaml, OpenAIYaml, ServicesYaml, SessionYaml};

pub const DEFAULT_VOICE: &str = "alloy";
pub const DEFAULT_GREETING: &str = "Hello!";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
pub const DEFAULT_WEATHER_URL: &str = "https://api.open-meteo.com";
pub const DEFAULT_TIME_URL: &str = "https://worldtimeapi.org";
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Fully resolved console configuration.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub openai_api_key: String,
    /// Realtime endpoint override
    pub realtime_url: Option<String>,
    pub model: String,
    pub voice: String,
    pub instructions: String,
    pub turn_detection: TurnDetectionMode,
    /// `None` disables the greeting
    pub greeting: Option<String>,
    pub reconnect_delay: Duration,
    pub frame_samples: usize,

    pub memory_url: Option<String>,
    pub memory_fallback_url: Option<String>,
    pub memory_cache_path: Option<PathBuf>,

    pub weather_url: String,
    pub time_url: String,
    pub http_timeout: Duration,
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for ConsoleConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.openai_api_key.zeroize();
    }
}

impl ConsoleConfig {
    /// Load configuration from environment variables and defaults.
    ///
    /// # Errors
    /// Returns an error if a numeric variable does not parse, the turn
    /// detection mode is unknown, or a service URL is invalid.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Self::resolve(None)
    }

    /// Load a YAML file on top of the environment.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the merged
    /// configuration is invalid.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml = ConsoleYaml::from_file(path)?;
        Self::resolve(Some(yaml))
    }

    fn resolve(yaml: Option<ConsoleYaml>) -> Result<Self, Box<dyn std::error::Error>> {
        let env = env::EnvValues::load()?;
        let yaml = yaml.unwrap_or_default();
        let openai = yaml.openai.unwrap_or_default();
        let session = yaml.session.unwrap_or_default();
        let memory = yaml.memory.unwrap_or_default();
        let services = yaml.services.unwrap_or_default();

        let turn_detection = match session.turn_detection.or(env.turn_detection) {
            Some(raw) => raw.parse::<TurnDetectionMode>()?,
            None => TurnDetectionMode::default(),
        };

        let greeting = session
            .greeting
            .or(env.greeting)
            .unwrap_or_else(|| DEFAULT_GREETING.to_string());
        let greeting = (!greeting.trim().is_empty()).then_some(greeting);

        let model = openai
            .model
            .or(env.model)
            .unwrap_or_else(|| OpenAIRealtimeModel::default().as_str().to_string());

        let config = Self {
            openai_api_key: openai.api_key.or(env.openai_api_key).unwrap_or_default(),
            realtime_url: openai.url.or(env.realtime_url),
            model,
            voice: session
                .voice
                .or(env.voice)
                .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            instructions: session
                .instructions
                .or(env.instructions)
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            turn_detection,
            greeting,
            reconnect_delay: Duration::from_millis(
                session
                    .reconnect_delay_ms
                    .or(env.reconnect_delay_ms)
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
            ),
            frame_samples: session
                .frame_samples
                .or(env.frame_samples)
                .unwrap_or(DEFAULT_FRAME_SAMPLES),
            memory_url: memory.url.or(env.memory_url),
            memory_fallback_url: memory.fallback_url.or(env.memory_fallback_url),
            memory_cache_path: memory.cache_path.or(env.memory_cache_path),
            weather_url: services
                .weather_url
                .or(env.weather_url)
                .unwrap_or_else(|| DEFAULT_WEATHER_URL.to_string()),
            time_url: services
                .time_url
                .or(env.time_url)
                .unwrap_or_else(|| DEFAULT_TIME_URL.to_string()),
            http_timeout: Duration::from_secs(
                services
                    .http_timeout_seconds
                    .or(env.http_timeout_seconds)
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECONDS),
            ),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.frame_samples == 0 {
            return Err("frame_samples must be greater than zero".into());
        }
        if self.http_timeout.is_zero() {
            return Err("http_timeout_seconds must be greater than zero".into());
        }

        if let Some(url) = &self.realtime_url {
            validate_service_url(url, EndpointKind::WebSocket)
                .map_err(|e| format!("Invalid realtime url: {e}"))?;
        }
        let http_urls = [
            ("memory url", self.memory_url.as_deref()),
            ("memory fallback url", self.memory_fallback_url.as_deref()),
            ("weather url", Some(self.weather_url.as_str())),
            ("time url", Some(self.time_url.as_str())),
        ];
        for (name, url) in http_urls {
            if let Some(url) = url {
                validate_service_url(url, EndpointKind::Http)
                    .map_err(|e| format!("Invalid {name}: {e}"))?;
            }
        }
        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        !self.openai_api_key.is_empty()
    }

    /// Realtime endpoint actually used.
    pub fn realtime_endpoint(&self) -> &str {
        self.realtime_url.as_deref().unwrap_or(OPENAI_REALTIME_URL)
    }

    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            api_key: self.openai_api_key.clone(),
            url: self.realtime_url.clone(),
            model: self.model.clone(),
        }
    }

    pub fn console_options(&self) -> ConsoleOptions {
        ConsoleOptions {
            instructions: self.instructions.clone(),
            voice: self.voice.clone(),
            greeting: self.greeting.clone(),
            mode: self.turn_detection,
            reconnect_delay: self.reconnect_delay,
            frame_samples: self.frame_samples,
            weather_base_url: self.weather_url.clone(),
            time_base_url: self.time_url.clone(),
            http_timeout: self.http_timeout,
        }
    }

    /// Memory chain: primary service, fallback service, local cache file.
    pub fn memory_persistence(&self) -> MemoryResult<MemoryPersistence> {
        MemoryPersistence::from_urls(
            self.memory_url.as_deref(),
            self.memory_fallback_url.as_deref(),
            self.memory_cache_path.as_deref(),
            self.http_timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "OPENAI_API_KEY",
        "OPENAI_REALTIME_URL",
        "OPENAI_REALTIME_MODEL",
        "CONSOLE_VOICE",
        "CONSOLE_INSTRUCTIONS",
        "CONSOLE_TURN_DETECTION",
        "CONSOLE_GREETING",
        "CONSOLE_RECONNECT_DELAY_MS",
        "CONSOLE_FRAME_SAMPLES",
        "MEMORY_SERVICE_URL",
        "MEMORY_FALLBACK_URL",
        "MEMORY_CACHE_PATH",
        "WEATHER_BASE_URL",
        "TIME_BASE_URL",
        "HTTP_TIMEOUT_SECONDS",
    ];

    fn cleanup_env_vars() {
        unsafe {
            for name in ENV_VARS {
                std::env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = ConsoleConfig::from_env().unwrap();
        assert!(!config.has_api_key());
        assert_eq!(config.model, "gpt-4o-realtime-preview");
        assert_eq!(config.voice, DEFAULT_VOICE);
        assert_eq!(config.instructions, DEFAULT_INSTRUCTIONS);
        assert_eq!(config.turn_detection, TurnDetectionMode::Manual);
        assert_eq!(config.greeting.as_deref(), Some("Hello!"));
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.frame_samples, DEFAULT_FRAME_SAMPLES);
        assert!(config.memory_url.is_none());
        assert_eq!(config.realtime_endpoint(), OPENAI_REALTIME_URL);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("OPENAI_API_KEY", "sk-env");
            std::env::set_var("CONSOLE_TURN_DETECTION", "server_vad");
            std::env::set_var("CONSOLE_RECONNECT_DELAY_MS", "250");
            std::env::set_var("MEMORY_SERVICE_URL", "http://localhost:8081");
            std::env::set_var("CONSOLE_GREETING", "");
        }

        let config = ConsoleConfig::from_env().unwrap();
        assert_eq!(config.openai_api_key, "sk-env");
        assert_eq!(config.turn_detection, TurnDetectionMode::ServerVad);
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.memory_url.as_deref(), Some("http://localhost:8081"));
        assert!(config.greeting.is_none());

        let options = config.console_options();
        assert_eq!(options.mode, TurnDetectionMode::ServerVad);
        assert!(options.greeting.is_none());
        assert_eq!(config.realtime_config().api_key, "sk-env");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_yaml_overrides_env() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("OPENAI_API_KEY", "sk-env");
            std::env::set_var("CONSOLE_VOICE", "echo");
            std::env::set_var("WEATHER_BASE_URL", "http://localhost:9001");
        }

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("console.yaml");
        fs::write(
            &path,
            r#"
openai:
  api_key: "sk-yaml"
session:
  voice: "shimmer"
  frame_samples: 1200
memory:
  cache_path: "cache.json"
"#,
        )
        .unwrap();

        let config = ConsoleConfig::from_file(&path).unwrap();
        assert_eq!(config.openai_api_key, "sk-yaml");
        assert_eq!(config.voice, "shimmer");
        assert_eq!(config.frame_samples, 1200);
        // Not in YAML, so the environment value stays.
        assert_eq!(config.weather_url, "http://localhost:9001");
        assert_eq!(config.memory_cache_path, Some(PathBuf::from("cache.json")));

        let persistence = config.memory_persistence().unwrap();
        assert!(!persistence.is_empty());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        cleanup_env_vars();

        unsafe {
            std::env::set_var("CONSOLE_TURN_DETECTION", "sometimes");
        }
        assert!(ConsoleConfig::from_env().is_err());
        cleanup_env_vars();

        unsafe {
            std::env::set_var("OPENAI_REALTIME_URL", "https://api.openai.com/v1/realtime");
        }
        let err = ConsoleConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("Invalid realtime url"));
        cleanup_env_vars();

        unsafe {
            std::env::set_var("MEMORY_FALLBACK_URL", "localhost:8082");
        }
        let err = ConsoleConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("memory fallback url"));
        cleanup_env_vars();

        unsafe {
            std::env::set_var("CONSOLE_FRAME_SAMPLES", "0");
        }
        assert!(ConsoleConfig::from_env().is_err());
        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_missing_file_is_an_error() {
        cleanup_env_vars();
        let temp_dir = TempDir::new().unwrap();
        let result = ConsoleConfig::from_file(&temp_dir.path().join("nope.yaml"));
        assert!(result.is_err());
    }
}
