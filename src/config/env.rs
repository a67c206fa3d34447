//! Environment variable loading.
//!
//! `.env` values are already in the process environment by the time this
//! runs (`dotenvy::dotenv()` in `main`), so real variables win over `.env`.

use std::path::PathBuf;
use std::str::FromStr;

/// Raw values read from the environment; parsing errors surface here.
#[derive(Debug, Default)]
pub(crate) struct EnvValues {
    pub openai_api_key: Option<String>,
    pub realtime_url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub turn_detection: Option<String>,
    pub greeting: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub frame_samples: Option<usize>,
    pub memory_url: Option<String>,
    pub memory_fallback_url: Option<String>,
    pub memory_cache_path: Option<PathBuf>,
    pub weather_url: Option<String>,
    pub time_url: Option<String>,
    pub http_timeout_seconds: Option<u64>,
}

impl EnvValues {
    pub(crate) fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            openai_api_key: var("OPENAI_API_KEY"),
            realtime_url: var("OPENAI_REALTIME_URL"),
            model: var("OPENAI_REALTIME_MODEL"),
            voice: var("CONSOLE_VOICE"),
            instructions: var("CONSOLE_INSTRUCTIONS"),
            turn_detection: var("CONSOLE_TURN_DETECTION"),
            // Kept even when empty: an empty greeting disables it.
            greeting: std::env::var("CONSOLE_GREETING").ok(),
            reconnect_delay_ms: parsed("CONSOLE_RECONNECT_DELAY_MS")?,
            frame_samples: parsed("CONSOLE_FRAME_SAMPLES")?,
            memory_url: var("MEMORY_SERVICE_URL"),
            memory_fallback_url: var("MEMORY_FALLBACK_URL"),
            memory_cache_path: var("MEMORY_CACHE_PATH").map(PathBuf::from),
            weather_url: var("WEATHER_BASE_URL"),
            time_url: var("TIME_BASE_URL"),
            http_timeout_seconds: parsed("HTTP_TIMEOUT_SECONDS")?,
        })
    }
}

/// Non-empty variable value.
fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name} ({raw}): {e}").into()),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_blank_variables_are_unset() {
        unsafe {
            std::env::set_var("CONSOLE_VOICE", "   ");
        }
        assert_eq!(var("CONSOLE_VOICE"), None);
        unsafe {
            std::env::remove_var("CONSOLE_VOICE");
        }
    }

    #[test]
    #[serial]
    fn test_numeric_parse_error_names_variable() {
        unsafe {
            std::env::set_var("CONSOLE_FRAME_SAMPLES", "lots");
        }
        let err = EnvValues::load().unwrap_err();
        assert!(err.to_string().contains("CONSOLE_FRAME_SAMPLES"));
        unsafe {
            std::env::remove_var("CONSOLE_FRAME_SAMPLES");
        }
    }
}
