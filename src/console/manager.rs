//! The console task and its handle.
//!
//! One task owns the session, the audio pipelines, the conversation, the event
//! log and the memory view. It selects over:
//!
//! - commands from [`ConsoleHandle`]s
//! - transport events
//! - captured audio frames
//! - internal notifications (tool results, reconnect timer, loaded memory)
//! - tool side effects
//!
//! Because everything runs on this one loop, a paused capture can never have a
//! frame appended after the pause: frames carry the epoch of the `record()`
//! call that produced them and stale epochs are dropped. Work spawned for a
//! session (tool calls, memory loads) is tagged with that session's number in
//! the same way and its result is dropped once the session is gone.

use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::conversation::ConversationStore;
use super::event_log::{EventLog, EventSideEffect, side_effect};
use super::state::{ConnectionState, Snapshot, TurnDetectionMode};
use super::{ConsoleError, ConsoleOptions, ConsoleResult};
use crate::core::audio::{
    AudioBackend, AudioCapture, AudioPlayback, CapturedFrame, Frequencies, FrequencyKind,
};
use crate::core::realtime::{
    BoxedTransport, ContentInput, FunctionCallRequest, ItemEvent, SessionUpdate, TransportEvent,
};
use crate::memory::{MemoryMap, MemoryPersistence, MemoryWriter};
use crate::tools::{CurrentLocation, ToolContext, ToolEffect, ToolRegistry, register_builtin_tools};

/// Command channel capacity.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Memory key holding the rate-limit projection.
const RATE_LIMITS_KEY: &str = "rate_limits";

type Reply<T> = oneshot::Sender<ConsoleResult<T>>;

enum Command {
    Connect(Reply<()>),
    Disconnect(Reply<()>),
    SetTurnDetection(TurnDetectionMode, Reply<()>),
    StartRecording(Reply<()>),
    StopRecording(Reply<()>),
    SendText(String, Reply<()>),
    DeleteItem(String, Reply<()>),
    Snapshot(oneshot::Sender<Snapshot>),
    Frequencies(FrequencyKind, oneshot::Sender<Frequencies>),
    Shutdown(oneshot::Sender<()>),
}

enum Internal {
    ToolFinished {
        session: u64,
        call_id: String,
        output: Value,
    },
    ReconnectDue(u64),
    MemoryLoaded {
        session: u64,
        memory: MemoryMap,
    },
}

/// Cloneable handle to a running console.
#[derive(Clone)]
pub struct ConsoleHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
}

impl ConsoleHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> ConsoleResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| ConsoleError::Closed)?;
        rx.await.map_err(|_| ConsoleError::Closed)?
    }

    /// Open the session. Only valid while disconnected.
    pub async fn connect(&self) -> ConsoleResult<()> {
        self.request(Command::Connect).await
    }

    /// Close the session and clear the view. A no-op while disconnected.
    pub async fn disconnect(&self) -> ConsoleResult<()> {
        self.request(Command::Disconnect).await
    }

    pub async fn set_turn_detection_mode(&self, mode: TurnDetectionMode) -> ConsoleResult<()> {
        self.request(|reply| Command::SetTurnDetection(mode, reply))
            .await
    }

    /// Push-to-talk press: interrupt playback and start capturing.
    pub async fn start_recording(&self) -> ConsoleResult<()> {
        self.request(Command::StartRecording).await
    }

    /// Push-to-talk release: stop capturing and request a response.
    pub async fn stop_recording(&self) -> ConsoleResult<()> {
        self.request(Command::StopRecording).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> ConsoleResult<()> {
        let text = text.into();
        self.request(|reply| Command::SendText(text, reply)).await
    }

    /// Delete an item upstream, then locally.
    pub async fn delete_item(&self, item_id: impl Into<String>) -> ConsoleResult<()> {
        let item_id = item_id.into();
        self.request(|reply| Command::DeleteItem(item_id, reply))
            .await
    }

    pub async fn snapshot(&self) -> ConsoleResult<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(tx))
            .await
            .map_err(|_| ConsoleError::Closed)?;
        rx.await.map_err(|_| ConsoleError::Closed)
    }

    /// Spectrum of the audio currently playing.
    pub async fn frequencies(&self, kind: FrequencyKind) -> ConsoleResult<Frequencies> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Frequencies(kind, tx))
            .await
            .map_err(|_| ConsoleError::Closed)?;
        rx.await.map_err(|_| ConsoleError::Closed)
    }

    /// Receiver that sees a fresh snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Disconnect and stop the console task.
    pub async fn shutdown(&self) -> ConsoleResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(tx))
            .await
            .map_err(|_| ConsoleError::Closed)?;
        rx.await.map_err(|_| ConsoleError::Closed)
    }
}

/// Entry point for starting a console.
pub struct ConsoleManager;

impl ConsoleManager {
    /// Spawn the console task on the current runtime.
    ///
    /// The transport's event receiver is taken here and kept for the lifetime
    /// of the console, across reconnects.
    pub fn spawn(
        mut transport: BoxedTransport,
        audio: Arc<dyn AudioBackend>,
        tools: Arc<ToolRegistry>,
        memory_store: MemoryPersistence,
        options: ConsoleOptions,
    ) -> ConsoleResult<ConsoleHandle> {
        let transport_events = transport.take_events().ok_or_else(|| {
            ConsoleError::Setup("transport events were already taken".to_string())
        })?;

        let (effects_tx, effects_rx) = mpsc::unbounded_channel();
        let tool_context = ToolContext::new(
            effects_tx,
            &options.weather_base_url,
            &options.time_base_url,
            options.http_timeout,
        )
        .map_err(|e| ConsoleError::Setup(e.to_string()))?;

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot {
            mode: options.mode,
            ..Default::default()
        });

        let memory_writer =
            (!memory_store.is_empty()).then(|| MemoryWriter::spawn(memory_store.clone()));

        let actor = ConsoleActor {
            transport,
            capture: AudioCapture::new(audio.clone(), options.frame_samples),
            playback: AudioPlayback::new(audio),
            tools,
            tool_context,
            memory_store,
            memory_writer,
            mode: options.mode,
            options,
            state: ConnectionState::Disconnected,
            session: 0,
            started_at: None,
            recording: false,
            capture_epoch: 0,
            conversation: ConversationStore::new(),
            event_log: EventLog::new(),
            memory: MemoryMap::new(),
            location: None,
            reconnect: None,
            reconnect_generation: 0,
            commands: commands_rx,
            transport_events,
            frames_tx,
            frames_rx,
            internal_tx,
            internal_rx,
            effects_rx,
            snapshot_tx,
        };
        tokio::spawn(actor.run());

        Ok(ConsoleHandle {
            commands: commands_tx,
            snapshots: snapshot_rx,
        })
    }
}

struct ConsoleActor {
    transport: BoxedTransport,
    capture: AudioCapture,
    playback: AudioPlayback,
    tools: Arc<ToolRegistry>,
    tool_context: ToolContext,
    memory_store: MemoryPersistence,
    memory_writer: Option<MemoryWriter>,
    options: ConsoleOptions,

    state: ConnectionState,
    /// Bumped on every connect attempt and every disconnect
    session: u64,
    mode: TurnDetectionMode,
    started_at: Option<OffsetDateTime>,
    /// Frames of `capture_epoch` are being forwarded
    recording: bool,
    capture_epoch: u64,
    conversation: ConversationStore,
    event_log: EventLog,
    memory: MemoryMap,
    location: Option<CurrentLocation>,

    reconnect: Option<CancellationToken>,
    reconnect_generation: u64,

    commands: mpsc::Receiver<Command>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    frames_tx: mpsc::UnboundedSender<CapturedFrame>,
    frames_rx: mpsc::UnboundedReceiver<CapturedFrame>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    effects_rx: mpsc::UnboundedReceiver<ToolEffect>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl ConsoleActor {
    async fn run(mut self) {
        debug!("Console task started");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("All console handles dropped");
                        break;
                    };
                    if let Command::Shutdown(reply) = command {
                        self.close().await;
                        let _ = reply.send(());
                        self.publish();
                        return;
                    }
                    self.handle_command(command).await;
                }
                Some(event) = self.transport_events.recv() => {
                    self.handle_transport_event(event).await;
                }
                Some(frame) = self.frames_rx.recv() => {
                    self.append_frame(frame).await;
                }
                Some(internal) = self.internal_rx.recv() => {
                    self.handle_internal(internal).await;
                }
                Some(effect) = self.effects_rx.recv() => {
                    self.apply_tool_effect(effect);
                }
            }
            self.publish();
        }

        self.close().await;
        debug!("Console task stopped");
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            mode: self.mode,
            started_at: self.started_at,
            is_recording: self.recording,
            items: self.conversation.views(),
            events: self.event_log.entries().to_vec(),
            memory: self.memory.clone(),
            location: self.location.clone(),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                let _ = reply.send(self.connect().await);
            }
            Command::Disconnect(reply) => {
                let _ = reply.send(self.disconnect().await);
            }
            Command::SetTurnDetection(mode, reply) => {
                let _ = reply.send(self.set_turn_detection_mode(mode).await);
            }
            Command::StartRecording(reply) => {
                let _ = reply.send(self.start_recording().await);
            }
            Command::StopRecording(reply) => {
                let _ = reply.send(self.stop_recording().await);
            }
            Command::SendText(text, reply) => {
                let _ = reply.send(self.send_text(text).await);
            }
            Command::DeleteItem(item_id, reply) => {
                let _ = reply.send(self.delete_item(&item_id).await);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Frequencies(kind, reply) => {
                let _ = reply.send(self.playback.frequencies(kind));
            }
            Command::Shutdown(reply) => {
                self.close().await;
                let _ = reply.send(());
            }
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    async fn connect(&mut self) -> ConsoleResult<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(ConsoleError::InvalidState(format!(
                "cannot connect while {}",
                self.state
            )));
        }

        self.state = ConnectionState::Connecting;
        self.session += 1;
        self.started_at = Some(OffsetDateTime::now_utc());
        self.event_log.clear();
        self.conversation.clear();
        self.publish();

        match self.establish().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                info!(mode = %self.mode, "Console connected");
                Ok(())
            }
            Err(e) => {
                warn!("Console connect failed: {}", e);
                self.release_resources().await;
                self.state = ConnectionState::Disconnected;
                self.started_at = None;
                Err(ConsoleError::Connection(e.to_string()))
            }
        }
    }

    async fn establish(&mut self) -> ConsoleResult<()> {
        self.capture.begin()?;
        self.playback.connect()?;
        self.transport.connect().await?;

        register_builtin_tools(&self.tools, &self.tool_context);
        let update = SessionUpdate::initial(
            &self.options.instructions,
            &self.options.voice,
            self.mode.to_config(),
            self.tools.definitions(),
        );
        self.transport.update_session(update).await?;

        self.load_memory();

        if let Some(greeting) = self.options.greeting.clone() {
            self.transport
                .send_user_message_content(vec![ContentInput::InputText(greeting)])
                .await?;
        }

        if self.mode == TurnDetectionMode::ServerVad {
            self.start_capture()?;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> ConsoleResult<()> {
        if self.state == ConnectionState::Disconnected && self.reconnect.is_none() {
            return Ok(());
        }

        self.cancel_reconnect();
        self.release_resources().await;
        self.session += 1;

        self.conversation.clear();
        self.event_log.clear();
        self.memory.clear();
        self.location = None;
        self.started_at = None;
        self.state = ConnectionState::Disconnected;
        info!("Console disconnected");
        Ok(())
    }

    /// End capture, stop playback and close the transport.
    async fn release_resources(&mut self) {
        self.recording = false;
        self.capture.end();
        self.playback.interrupt();
        self.playback.disconnect();
        if let Err(e) = self.transport.disconnect().await {
            warn!("Transport disconnect failed: {}", e);
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.disconnect().await {
            warn!("Disconnect during shutdown failed: {}", e);
        }
    }

    /// The service dropped the session without a local disconnect.
    async fn handle_drop(&mut self) {
        if self.state != ConnectionState::Connected {
            debug!(state = %self.state, "Ignoring transport drop");
            return;
        }

        warn!(
            delay_ms = self.options.reconnect_delay.as_millis() as u64,
            "Realtime session dropped, scheduling reconnect"
        );
        self.release_resources().await;
        self.state = ConnectionState::Reconnecting;
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect();

        let generation = self.reconnect_generation;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let internal = self.internal_tx.clone();
        let delay = self.options.reconnect_delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = internal.send(Internal::ReconnectDue(generation));
                }
            }
        });
        self.reconnect = Some(token);
    }

    fn cancel_reconnect(&mut self) {
        if let Some(token) = self.reconnect.take() {
            token.cancel();
        }
        self.reconnect_generation += 1;
    }

    async fn reconnect(&mut self, generation: u64) {
        if generation != self.reconnect_generation || self.state != ConnectionState::Reconnecting {
            debug!(generation, "Ignoring stale reconnect timer");
            return;
        }

        self.reconnect = None;
        self.state = ConnectionState::Disconnected;
        info!("Reconnecting realtime session");
        if let Err(e) = self.connect().await {
            error!("Reconnect failed: {}", e);
        }
    }

    // -------------------------------------------------------------------------
    // Capture and turn detection
    // -------------------------------------------------------------------------

    fn start_capture(&mut self) -> ConsoleResult<()> {
        self.capture_epoch = self.capture.record(self.frames_tx.clone())?;
        self.recording = true;
        debug!(epoch = self.capture_epoch, "Capture started");
        Ok(())
    }

    /// Pause capture and forward whatever the current epoch already produced.
    async fn pause_capture(&mut self) {
        self.capture.pause();
        while let Ok(frame) = self.frames_rx.try_recv() {
            self.append_frame(frame).await;
        }
        self.recording = false;
        debug!(epoch = self.capture_epoch, "Capture paused");
    }

    async fn append_frame(&mut self, captured: CapturedFrame) {
        if !self.recording || captured.epoch != self.capture_epoch {
            debug!(epoch = captured.epoch, "Dropping stale capture frame");
            return;
        }
        if self.state != ConnectionState::Connected {
            return;
        }
        if let Err(e) = self
            .transport
            .append_input_audio(&captured.frame.samples)
            .await
        {
            warn!("Failed to append input audio: {}", e);
        }
    }

    async fn set_turn_detection_mode(&mut self, mode: TurnDetectionMode) -> ConsoleResult<()> {
        if mode == TurnDetectionMode::Manual && self.recording {
            self.pause_capture().await;
        }
        self.mode = mode;

        if self.state == ConnectionState::Connected {
            self.transport
                .update_session(SessionUpdate::turn_detection(mode.to_config()))
                .await?;
            if mode == TurnDetectionMode::ServerVad && !self.recording {
                self.start_capture()?;
            }
        }
        info!(mode = %mode, "Turn detection mode set");
        Ok(())
    }

    async fn start_recording(&mut self) -> ConsoleResult<()> {
        if self.mode != TurnDetectionMode::Manual {
            return Err(ConsoleError::InvalidState(
                "push-to-talk needs manual turn detection".to_string(),
            ));
        }
        self.require_connected()?;
        if self.recording {
            return Ok(());
        }

        self.barge_in().await?;
        self.start_capture()
    }

    async fn stop_recording(&mut self) -> ConsoleResult<()> {
        if self.mode != TurnDetectionMode::Manual {
            return Err(ConsoleError::InvalidState(
                "push-to-talk needs manual turn detection".to_string(),
            ));
        }
        if !self.recording {
            debug!("stop_recording without an active recording");
            return Ok(());
        }

        self.pause_capture().await;
        self.require_connected()?;
        self.transport.create_response().await?;
        Ok(())
    }

    /// Stop playback and tell the service how much of the reply was heard.
    async fn barge_in(&mut self) -> ConsoleResult<()> {
        if let Some(offset) = self.playback.interrupt() {
            debug!(track_id = %offset.track_id, offset = offset.offset, "Barge-in");
            self.transport.cancel_response(Some(offset)).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Conversation
    // -------------------------------------------------------------------------

    fn require_connected(&self) -> ConsoleResult<()> {
        if self.state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(ConsoleError::InvalidState(format!(
                "console is {}",
                self.state
            )))
        }
    }

    async fn send_text(&mut self, text: String) -> ConsoleResult<()> {
        self.require_connected()?;
        self.transport
            .send_user_message_content(vec![ContentInput::InputText(text)])
            .await?;
        Ok(())
    }

    async fn delete_item(&mut self, item_id: &str) -> ConsoleResult<()> {
        self.transport.delete_item(item_id).await?;
        if self.conversation.remove(item_id).is_none() {
            debug!(item = %item_id, "Deleted item was not in the local conversation");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Realtime { source, event } => {
                let effect = side_effect(source, &event, self.mode);
                self.event_log.record(source, event);
                match effect {
                    Some(EventSideEffect::WidenModalities) => {
                        if let Err(e) = self
                            .transport
                            .update_session(SessionUpdate::modalities(&["text", "audio"]))
                            .await
                        {
                            warn!("Failed to widen modalities: {}", e);
                        }
                    }
                    Some(EventSideEffect::RateLimits(projection)) => {
                        self.memory.insert(RATE_LIMITS_KEY.to_string(), projection);
                    }
                    None => {}
                }
            }
            TransportEvent::Error(e) => {
                error!("Realtime error: {}", e);
            }
            TransportEvent::Disconnected => self.handle_drop().await,
            TransportEvent::Interrupted => {
                if let Err(e) = self.barge_in().await {
                    warn!("Failed to cancel interrupted response: {}", e);
                }
            }
            TransportEvent::Item(item_event) => {
                if let ItemEvent::AudioDelta { item_id, samples } = &item_event
                    && let Err(e) = self.playback.add_16bit_pcm(samples, item_id)
                {
                    debug!("Audio delta not played: {}", e);
                }
                self.conversation.apply(item_event);
            }
            TransportEvent::FunctionCall(call) => self.dispatch_tool(call),
        }
    }

    fn dispatch_tool(&self, call: FunctionCallRequest) {
        info!(tool = %call.name, call_id = %call.call_id, "Dispatching tool call");
        let tools = self.tools.clone();
        let internal = self.internal_tx.clone();
        let session = self.session;

        tokio::spawn(async move {
            let output = tools
                .invoke_with_arguments(&call.name, &call.arguments)
                .await;
            let _ = internal.send(Internal::ToolFinished {
                session,
                call_id: call.call_id,
                output,
            });
        });
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::ToolFinished {
                session,
                call_id,
                output,
            } => {
                if !self.is_current_session(session) {
                    debug!(call_id = %call_id, session, "Dropping tool result, session is gone");
                    return;
                }
                if let Err(e) = self
                    .transport
                    .submit_function_result(&call_id, &output.to_string())
                    .await
                {
                    warn!(call_id = %call_id, "Failed to submit tool result: {}", e);
                }
            }
            Internal::ReconnectDue(generation) => self.reconnect(generation).await,
            Internal::MemoryLoaded { session, memory } => {
                if !self.is_current_session(session) {
                    debug!(session, "Dropping memory loaded for a closed session");
                    return;
                }
                for (key, value) in memory {
                    self.memory.entry(key).or_insert(value);
                }
            }
        }
    }

    fn is_current_session(&self, session: u64) -> bool {
        session == self.session && self.state == ConnectionState::Connected
    }

    // -------------------------------------------------------------------------
    // Memory and location
    // -------------------------------------------------------------------------

    fn apply_tool_effect(&mut self, effect: ToolEffect) {
        match effect {
            ToolEffect::SetMemory { key, value } => {
                self.memory.insert(key, value);
                self.persist_memory();
            }
            ToolEffect::SetLocation(location) => {
                self.location = Some(location);
            }
            ToolEffect::ObserveLocation(observation) => match self.location.as_mut() {
                Some(location) => location.observation = Some(observation),
                None => debug!("Observation without a current location"),
            },
        }
    }

    fn persist_memory(&self) {
        let Some(writer) = self.memory_writer.as_ref() else {
            return;
        };
        let mut memory = self.memory.clone();
        memory.remove(RATE_LIMITS_KEY);
        writer.submit(memory);
    }

    fn load_memory(&self) {
        if self.memory_store.is_empty() {
            return;
        }
        let store = self.memory_store.clone();
        let internal = self.internal_tx.clone();
        let session = self.session;

        tokio::spawn(async move {
            match store.load().await {
                Ok(memory) => {
                    let _ = internal.send(Internal::MemoryLoaded { session, memory });
                }
                Err(e) => warn!("Memory was not loaded: {}", e),
            }
        });
    }
}
