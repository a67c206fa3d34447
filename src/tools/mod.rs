//! Client-side tools the model can call mid-conversation.
//!
//! Tools are registered by name in a [`ToolRegistry`]. Invoking a tool never
//! fails from the caller's point of view: errors, unknown names and panics are
//! all turned into an `{"error": "..."}` payload that is sent back to the model
//! as the function call output.
//!
//! Tools never touch console state directly. Side effects on the memory view or
//! the current location are reported as [`ToolEffect`]s on a channel that the
//! console loop drains.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::realtime::{FunctionDefinition, ToolDefinition};

mod memory;
mod time;
mod weather;

pub use memory::SetMemoryTool;
pub use time::{GetTimeTool, resolve_time_zone};
pub use weather::GetWeatherTool;

/// Errors a tool handler can return.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Execution(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Location shown by the renderer's map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CurrentLocation {
    pub name: String,
    /// Canonical identifier, e.g. the IANA time zone
    pub canonical_id: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// Latest provider observation for this location
    pub observation: Option<Value>,
}

/// Side effect requested by a tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEffect {
    SetMemory { key: String, value: Value },
    SetLocation(CurrentLocation),
    /// Attach an observation to the current location
    ObserveLocation(Value),
}

/// Shared plumbing handed to the built-in tools.
#[derive(Clone)]
pub struct ToolContext {
    pub effects: mpsc::UnboundedSender<ToolEffect>,
    pub http: reqwest::Client,
    pub weather_base_url: String,
    pub time_base_url: String,
}

impl ToolContext {
    pub fn new(
        effects: mpsc::UnboundedSender<ToolEffect>,
        weather_base_url: &str,
        time_base_url: &str,
        timeout: Duration,
    ) -> ToolResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            effects,
            http,
            weather_base_url: weather_base_url.trim_end_matches('/').to_string(),
            time_base_url: time_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn emit(&self, effect: ToolEffect) {
        if self.effects.send(effect).is_err() {
            tracing::debug!("Tool effect dropped, console loop is gone");
        }
    }

    /// GET a JSON document, mapping non-success statuses to an error.
    pub(crate) async fn get_json(&self, request: reqwest::RequestBuilder) -> ToolResult<Value> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Execution(format!(
                "Request failed with status {status}"
            )));
        }
        Ok(response.json::<Value>().await?)
    }
}

/// A client-side function the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the parameters object.
    fn parameters(&self) -> Value;

    async fn invoke(&self, params: Value) -> ToolResult<Value>;

    /// Descriptor sent in `session.update`.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: Some(self.description().to_string()),
                parameters: Some(self.parameters()),
            },
        }
    }
}

/// Name to tool map. Registering a name twice replaces the earlier tool.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!("Replaced tool {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn clear(&self) {
        self.tools.clear();
    }

    /// Descriptors of every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .iter()
            .map(|entry| entry.value().definition())
            .collect();
        definitions.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        definitions
    }

    /// Invoke a tool by name.
    ///
    /// The handler runs on its own task so a panic is contained. Every failure
    /// comes back as `{"error": message}`.
    pub async fn invoke(&self, name: &str, params: Value) -> Value {
        let Some(tool) = self.get(name) else {
            tracing::warn!("Tool call for unknown tool {}", name);
            return error_payload(format!("Tool \"{name}\" has not been added"));
        };

        let handle = tokio::spawn(async move { tool.invoke(params).await });
        match handle.await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::warn!(tool = %name, "Tool failed: {}", e);
                error_payload(e.to_string())
            }
            Err(join_error) if join_error.is_panic() => {
                let msg = panic_message(&join_error.into_panic());
                tracing::error!(tool = %name, message = %msg, "Tool panicked");
                error_payload(msg)
            }
            Err(join_error) => error_payload(join_error.to_string()),
        }
    }

    /// Invoke with the raw JSON argument string from a function call.
    pub async fn invoke_with_arguments(&self, name: &str, arguments: &str) -> Value {
        let params = if arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str::<Value>(arguments) {
                Ok(params) => params,
                Err(e) => {
                    return error_payload(
                        ToolError::InvalidArguments(e.to_string()).to_string(),
                    );
                }
            }
        };
        self.invoke(name, params).await
    }
}

/// Register `set_memory`, `get_weather` and `get_time`.
pub fn register_builtin_tools(registry: &ToolRegistry, context: &ToolContext) {
    registry.register(Arc::new(SetMemoryTool::new(context.clone())));
    registry.register(Arc::new(GetWeatherTool::new(context.clone())));
    registry.register(Arc::new(GetTimeTool::new(context.clone())));
}

fn error_payload(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Tool panicked".to_string()
    }
}

/// Required string field of a parameters object.
pub(crate) fn required_str<'a>(params: &'a Value, field: &str) -> ToolResult<&'a str> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string field `{field}`")))
}

/// Required numeric field of a parameters object.
pub(crate) fn required_f64(params: &Value, field: &str) -> ToolResult<f64> {
    params
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing numeric field `{field}`")))
}
