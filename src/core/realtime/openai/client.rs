//! OpenAI Realtime API client implementation.
//!
//! This module provides the OpenAI Realtime client that implements the
//! [`RealtimeTransport`] trait using OpenAI's WebSocket-based Realtime API.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_realtime_console::core::realtime::{OpenAIRealtime, RealtimeConfig, RealtimeTransport};
//!
//! let mut realtime = OpenAIRealtime::new(RealtimeConfig {
//!     api_key: "sk-...".to_string(),
//!     ..Default::default()
//! })?;
//! let mut events = realtime.take_events().unwrap();
//! realtime.connect().await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use super::config::{
    DEFAULT_TRANSCRIPTION_MODEL, OPENAI_REALTIME_URL, OpenAIRealtimeModel,
};
use super::messages::{
    ClientEvent, ContentPart, InputAudioTranscription, RealtimeItem, ServerEvent, SessionConfig,
    ToolDef, TurnDetection,
};
use crate::core::audio::TrackOffset;
use crate::core::audio::base::{le_bytes_to_pcm16, ms_to_samples, pcm16_to_le_bytes};
use crate::core::realtime::base::{
    ContentInput, EventSource, FunctionCallRequest, ItemEvent, RealtimeConfig, RealtimeError,
    RealtimeResult, RealtimeTransport, SessionUpdate, TransportEvent, TurnDetectionConfig,
};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `disconnect()` waits for the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Microphone audio kept for user items; older samples are dropped.
const MAX_RETAINED_INPUT_MS: u64 = 60_000;

// =============================================================================
// Input audio bookkeeping
// =============================================================================

/// Tracks appended microphone audio so user audio items can be given the
/// samples they were created from.
///
/// With server VAD the service reports speech spans in milliseconds from the
/// start of the session's input; without it, the audio appended since the last
/// commit belongs to the next user audio item.
#[derive(Debug, Default)]
struct InputAudioTracker {
    buffer: Vec<i16>,
    /// Absolute sample index of `buffer[0]`
    base: usize,
    /// Absolute sample index where uncommitted audio starts
    uncommitted_from: usize,
    speech_starts: HashMap<String, u64>,
    speech_spans: HashMap<String, (u64, u64)>,
    queued: Option<Vec<i16>>,
}

impl InputAudioTracker {
    fn end(&self) -> usize {
        self.base + self.buffer.len()
    }

    fn append(&mut self, samples: &[i16]) {
        self.buffer.extend_from_slice(samples);

        let limit = ms_to_samples(MAX_RETAINED_INPUT_MS);
        if self.buffer.len() > limit {
            let excess = self.buffer.len() - limit;
            self.buffer.drain(..excess);
            self.base += excess;
            self.uncommitted_from = self.uncommitted_from.max(self.base);
        }
    }

    fn has_uncommitted(&self) -> bool {
        self.end() > self.uncommitted_from
    }

    /// Move uncommitted audio into the queue for the next user audio item.
    fn commit(&mut self) {
        let from = self.uncommitted_from.saturating_sub(self.base);
        self.queued = Some(self.buffer[from..].to_vec());
        self.uncommitted_from = self.end();
        self.base = self.end();
        self.buffer.clear();
    }

    fn speech_started(&mut self, item_id: String, audio_start_ms: u64) {
        self.speech_starts.insert(item_id, audio_start_ms);
    }

    fn speech_stopped(&mut self, item_id: &str, audio_end_ms: u64) {
        let start = self.speech_starts.remove(item_id).unwrap_or(0);
        self.speech_spans
            .insert(item_id.to_string(), (start, audio_end_ms));
        self.uncommitted_from = self.uncommitted_from.max(ms_to_samples(audio_end_ms));
    }

    fn take_for_item(&mut self, item: &RealtimeItem) -> Option<Vec<i16>> {
        if !item.has_input_audio() {
            return None;
        }

        if let Some(id) = item.id.as_deref()
            && let Some((start_ms, end_ms)) = self.speech_spans.remove(id)
        {
            let start = ms_to_samples(start_ms).saturating_sub(self.base);
            let end = ms_to_samples(end_ms)
                .saturating_sub(self.base)
                .min(self.buffer.len());
            let slice = self.buffer[start.min(end)..end].to_vec();

            // Nothing before this span is needed any more unless speech is still open.
            if self.speech_starts.is_empty() {
                self.buffer.drain(..end);
                self.base += end;
            }
            return Some(slice);
        }

        self.queued.take()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

// =============================================================================
// OpenAI Realtime Client
// =============================================================================

/// OpenAI Realtime API client implementation.
///
/// # Thread Safety
///
/// State shared with the spawned WebSocket task sits behind `Arc`s. The
/// `connected` flag uses `Arc<AtomicBool>` for lock-free status checks.
///
/// # Disconnect Reporting
///
/// When the socket closes without a preceding [`disconnect`](RealtimeTransport::disconnect)
/// the task reports [`TransportEvent::Disconnected`]; reconnecting is left to the owner.
pub struct OpenAIRealtime {
    /// Configuration
    config: RealtimeConfig,
    /// Parsed model
    model: OpenAIRealtimeModel,
    /// Connected flag (shared with connection task)
    connected: Arc<AtomicBool>,
    /// Flag to indicate intentional disconnection
    intentional_disconnect: Arc<AtomicBool>,
    /// Session ID
    session_id: Arc<RwLock<Option<String>>>,

    /// WebSocket sender channel (serialized events)
    ws_sender: Arc<Mutex<Option<mpsc::Sender<String>>>>,

    /// Connection task handle
    connection_handle: Option<JoinHandle<()>>,

    /// Outbound notifications
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,

    input_audio: Arc<parking_lot::Mutex<InputAudioTracker>>,

    /// Whether the session currently has turn detection enabled
    server_vad: bool,
}

impl OpenAIRealtime {
    pub fn new(config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let model = if config.model.is_empty() {
            OpenAIRealtimeModel::default()
        } else {
            OpenAIRealtimeModel::from_str_or_default(&config.model)
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            model,
            connected: Arc::new(AtomicBool::new(false)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            session_id: Arc::new(RwLock::new(None)),
            ws_sender: Arc::new(Mutex::new(None)),
            connection_handle: None,
            events_tx,
            events_rx: Some(events_rx),
            input_audio: Arc::new(parking_lot::Mutex::new(InputAudioTracker::default())),
            server_vad: false,
        })
    }

    /// Get the configured model.
    pub fn model(&self) -> OpenAIRealtimeModel {
        self.model
    }

    /// Get the session ID if connected.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Build the WebSocket URL with model parameter.
    fn build_ws_url(&self) -> String {
        let base = self.config.url.as_deref().unwrap_or(OPENAI_REALTIME_URL);
        format!("{}?model={}", base, self.model.as_str())
    }

    fn build_session_config(&mut self, update: SessionUpdate) -> SessionConfig {
        if let Some(turn_detection) = &update.turn_detection {
            self.server_vad = turn_detection.is_some();
        }

        SessionConfig {
            modalities: update.modalities,
            instructions: update.instructions,
            voice: update.voice,
            input_audio_format: None,
            output_audio_format: None,
            input_audio_transcription: update.input_audio_transcription.map(|t| {
                InputAudioTranscription {
                    model: if t.model.is_empty() {
                        DEFAULT_TRANSCRIPTION_MODEL.to_string()
                    } else {
                        t.model
                    },
                }
            }),
            turn_detection: update.turn_detection.map(|td| {
                td.map(|td| match td {
                    TurnDetectionConfig::ServerVad {
                        threshold,
                        prefix_padding_ms,
                        silence_duration_ms,
                    } => TurnDetection::ServerVad {
                        threshold,
                        prefix_padding_ms,
                        silence_duration_ms,
                    },
                    TurnDetectionConfig::SemanticVad { eagerness } => {
                        TurnDetection::SemanticVad { eagerness }
                    }
                })
            }),
            tools: update.tools.map(|tools| {
                tools
                    .into_iter()
                    .map(|t| ToolDef {
                        tool_type: t.tool_type,
                        name: t.function.name,
                        description: t.function.description,
                        parameters: t.function.parameters,
                    })
                    .collect()
            }),
            tool_choice: None,
            temperature: update.temperature,
        }
    }

    fn ensure_connected(&self) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RealtimeError::NotConnected)
        }
    }

    /// Serialize, report and send an event.
    async fn send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        let mut value = serde_json::to_value(&event)
            .map_err(|e| RealtimeError::SerializationError(e.to_string()))?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "event_id".to_string(),
                serde_json::Value::String(format!("evt_{}", uuid::Uuid::new_v4().simple())),
            );
        }
        let text = value.to_string();

        let guard = self.ws_sender.lock().await;
        let Some(sender) = guard.as_ref() else {
            return Err(RealtimeError::NotConnected);
        };

        let _ = self.events_tx.send(TransportEvent::Realtime {
            source: EventSource::Client,
            event: value,
        });
        sender
            .send(text)
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }

    async fn create_item_and_respond(&self, item: RealtimeItem) -> RealtimeResult<()> {
        self.send_event(ClientEvent::ConversationItemCreate {
            item,
            previous_item_id: None,
        })
        .await?;
        self.send_event(ClientEvent::ResponseCreate { response: None })
            .await
    }
}

// =============================================================================
// Server event handling
// =============================================================================

/// State owned by the WebSocket task.
struct ServerEventHandler {
    events: mpsc::UnboundedSender<TransportEvent>,
    input_audio: Arc<parking_lot::Mutex<InputAudioTracker>>,
    session_id: Arc<RwLock<Option<String>>>,
    /// Pending function calls: maps call_id -> function_name.
    /// `response.function_call_arguments.done` carries no name, so it is
    /// captured from `response.output_item.added`.
    pending_function_calls: HashMap<String, String>,
}

impl ServerEventHandler {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn emit_item(&self, event: ItemEvent) {
        self.emit(TransportEvent::Item(event));
    }

    async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => self.emit(TransportEvent::Realtime {
                source: EventSource::Server,
                event: value,
            }),
            Err(e) => {
                tracing::warn!("Failed to parse server frame: {}", e);
                self.emit(TransportEvent::Error(RealtimeError::SerializationError(
                    e.to_string(),
                )));
                return;
            }
        }

        match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => tracing::debug!("Unexpected server event shape: {}", e),
        }
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { session } => {
                tracing::info!("OpenAI Realtime session created: {}", session.id);
                *self.session_id.write().await = Some(session.id);
            }

            ServerEvent::SessionUpdated { session } => {
                tracing::debug!(
                    modalities = ?session.modalities,
                    "OpenAI Realtime session updated: {}",
                    session.id
                );
            }

            ServerEvent::Error { error } => {
                tracing::error!(
                    "OpenAI Realtime error: {} - {}",
                    error.error_type,
                    error.message
                );
                self.emit(TransportEvent::Error(RealtimeError::ProviderError(format!(
                    "{}: {}",
                    error.error_type, error.message
                ))));
            }

            ServerEvent::SpeechStarted {
                audio_start_ms,
                item_id,
            } => {
                tracing::debug!("Speech started at {}ms", audio_start_ms);
                self.input_audio
                    .lock()
                    .speech_started(item_id, audio_start_ms);
                self.emit(TransportEvent::Interrupted);
            }

            ServerEvent::SpeechStopped {
                audio_end_ms,
                item_id,
            } => {
                tracing::debug!("Speech stopped at {}ms", audio_end_ms);
                self.input_audio.lock().speech_stopped(&item_id, audio_end_ms);
            }

            ServerEvent::ConversationItemCreated {
                previous_item_id,
                item,
            } => {
                let input_audio = self.input_audio.lock().take_for_item(&item);
                match item.to_protocol() {
                    Some(item) => self.emit_item(ItemEvent::Created {
                        item,
                        previous_item_id,
                        input_audio,
                    }),
                    None => tracing::debug!("Ignoring item without id or known type"),
                }
            }

            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => {
                tracing::debug!("User transcript: {}", transcript);
                self.emit_item(ItemEvent::InputTranscript {
                    item_id,
                    transcript,
                });
            }

            ServerEvent::TranscriptionFailed { item_id, error } => {
                tracing::warn!("Transcription failed for {}: {}", item_id, error.message);
            }

            ServerEvent::ConversationItemTruncated {
                item_id,
                audio_end_ms,
            } => self.emit_item(ItemEvent::Truncated {
                item_id,
                audio_end_ms,
            }),

            ServerEvent::ConversationItemDeleted { item_id } => {
                self.emit_item(ItemEvent::Deleted { item_id })
            }

            ServerEvent::OutputItemAdded { item } => {
                if item.item_type == "function_call"
                    && let (Some(call_id), Some(name)) = (&item.call_id, &item.name)
                {
                    tracing::debug!("Tracking function call: call_id={}, name={}", call_id, name);
                    self.pending_function_calls
                        .insert(call_id.clone(), name.clone());
                }
            }

            ServerEvent::OutputItemDone { item } => {
                if let Some(item) = item.to_protocol() {
                    self.emit_item(ItemEvent::Completed { item });
                }
            }

            ServerEvent::TextDelta { item_id, delta } => {
                self.emit_item(ItemEvent::TextDelta { item_id, delta })
            }

            ServerEvent::AudioTranscriptDelta { item_id, delta } => {
                self.emit_item(ItemEvent::TranscriptDelta { item_id, delta })
            }

            ServerEvent::AudioDelta { item_id, delta } => {
                match ServerEvent::decode_audio_delta(&delta) {
                    Ok(bytes) => self.emit_item(ItemEvent::AudioDelta {
                        item_id,
                        samples: le_bytes_to_pcm16(&bytes),
                    }),
                    Err(e) => tracing::error!("Failed to decode audio delta: {}", e),
                }
            }

            ServerEvent::FunctionCallArgumentsDelta { item_id, delta, .. } => {
                self.emit_item(ItemEvent::ArgumentsDelta { item_id, delta })
            }

            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                arguments,
                item_id,
            } => {
                let name = self
                    .pending_function_calls
                    .remove(&call_id)
                    .unwrap_or_else(|| {
                        tracing::warn!(
                            "Function name not found for call_id: {}. This may indicate a protocol issue.",
                            call_id
                        );
                        String::new()
                    });

                tracing::debug!(
                    "Function call complete: name={}, call_id={}, args={}",
                    name,
                    call_id,
                    arguments
                );

                self.emit(TransportEvent::FunctionCall(FunctionCallRequest {
                    call_id,
                    name,
                    arguments,
                    item_id: Some(item_id),
                }));
            }

            ServerEvent::ResponseDone { response } => {
                tracing::debug!("Response done: {} ({})", response.id, response.status);
            }

            _ => {
                tracing::trace!("Unhandled server event");
            }
        }
    }
}

#[async_trait]
impl RealtimeTransport for OpenAIRealtime {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    async fn connect(&mut self) -> RealtimeResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.intentional_disconnect.store(false, Ordering::SeqCst);
        self.input_audio.lock().reset();
        self.server_vad = false;

        let url = self.build_ws_url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| RealtimeError::InvalidConfiguration(e.to_string()))?;
        request.headers_mut().insert("Authorization", bearer);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        tracing::info!(model = %self.model, "Connected to OpenAI Realtime API");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<String>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock().await = Some(tx);

        let mut handler = ServerEventHandler {
            events: self.events_tx.clone(),
            input_audio: self.input_audio.clone(),
            session_id: self.session_id.clone(),
            pending_function_calls: HashMap::new(),
        };
        let connected = self.connected.clone();
        let intentional_disconnect = self.intentional_disconnect.clone();
        let events = self.events_tx.clone();

        self.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = rx.recv() => {
                        let Some(text) = outgoing else {
                            // Sender dropped by disconnect(): close politely.
                            let _ = ws_sink.close().await;
                            break;
                        };
                        if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            break;
                        }
                    }

                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => handler.handle_text(&text).await,
                            Some(Ok(Message::Close(_))) => {
                                tracing::info!("WebSocket closed by server");
                                break;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("WebSocket error: {}", e);
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            connected.store(false, Ordering::SeqCst);
            if intentional_disconnect.load(Ordering::SeqCst) {
                tracing::info!("OpenAI Realtime connection closed");
            } else {
                tracing::warn!("OpenAI Realtime connection lost");
                let _ = events.send(TransportEvent::Disconnected);
            }
        });

        self.connection_handle = Some(handle);
        Ok(())
    }

    async fn disconnect(&mut self) -> RealtimeResult<()> {
        self.intentional_disconnect.store(true, Ordering::SeqCst);

        // Dropping the sender lets the task send a close frame and exit.
        *self.ws_sender.lock().await = None;

        if let Some(mut handle) = self.connection_handle.take()
            && tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_err()
        {
            tracing::warn!("Close handshake timed out, aborting connection task");
            handle.abort();
        }

        self.connected.store(false, Ordering::SeqCst);
        *self.session_id.write().await = None;
        self.input_audio.lock().reset();

        tracing::info!("Disconnected from OpenAI Realtime API");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn update_session(&mut self, update: SessionUpdate) -> RealtimeResult<()> {
        self.ensure_connected()?;
        let session = self.build_session_config(update);
        self.send_event(ClientEvent::SessionUpdate { session }).await
    }

    async fn append_input_audio(&mut self, samples: &[i16]) -> RealtimeResult<()> {
        self.ensure_connected()?;
        if samples.is_empty() {
            return Ok(());
        }
        self.input_audio.lock().append(samples);
        self.send_event(ClientEvent::audio_append(&pcm16_to_le_bytes(samples)))
            .await
    }

    async fn create_response(&mut self) -> RealtimeResult<()> {
        self.ensure_connected()?;

        let commit = !self.server_vad && {
            let mut input = self.input_audio.lock();
            let pending = input.has_uncommitted();
            if pending {
                input.commit();
            }
            pending
        };
        if commit {
            self.send_event(ClientEvent::InputAudioBufferCommit).await?;
        }

        self.send_event(ClientEvent::ResponseCreate { response: None })
            .await
    }

    async fn cancel_response(&mut self, truncate: Option<TrackOffset>) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.send_event(ClientEvent::ResponseCancel).await?;

        if let Some(offset) = truncate {
            self.send_event(ClientEvent::ConversationItemTruncate {
                audio_end_ms: offset.audio_end_ms(),
                item_id: offset.track_id,
                content_index: 0,
            })
            .await?;
        }
        Ok(())
    }

    async fn send_user_message_content(&mut self, parts: Vec<ContentInput>) -> RealtimeResult<()> {
        self.ensure_connected()?;
        let content = parts
            .into_iter()
            .map(|part| match part {
                ContentInput::InputText(text) => ContentPart::input_text(&text),
                ContentInput::InputAudio(samples) => {
                    ContentPart::input_audio(&pcm16_to_le_bytes(&samples))
                }
            })
            .collect();
        self.create_item_and_respond(RealtimeItem::user_message(content))
            .await
    }

    async fn submit_function_result(&mut self, call_id: &str, output: &str) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.create_item_and_respond(RealtimeItem::function_call_output(call_id, output))
            .await
    }

    async fn delete_item(&mut self, item_id: &str) -> RealtimeResult<()> {
        self.ensure_connected()?;
        self.send_event(ClientEvent::ConversationItemDelete {
            item_id: item_id.to_string(),
        })
        .await
    }
}

impl Drop for OpenAIRealtime {
    fn drop(&mut self) {
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
