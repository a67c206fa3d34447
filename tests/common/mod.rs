//! Shared fixtures for console integration tests.
//!
//! `FakeTransport` records every call the console makes and lets the test push
//! transport events as if they came from the service.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use waav_realtime_console::console::{ConsoleHandle, ConsoleManager, ConsoleOptions, Snapshot};
use waav_realtime_console::core::audio::{MemoryAudioBackend, TrackOffset};
use waav_realtime_console::core::realtime::{
    ContentInput, RealtimeError, RealtimeResult, RealtimeTransport, SessionUpdate, TransportEvent,
};
use waav_realtime_console::memory::MemoryPersistence;
use waav_realtime_console::tools::ToolRegistry;

/// A call made on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect,
    Disconnect,
    UpdateSession(SessionUpdate),
    AppendAudio(usize),
    CreateResponse,
    CancelResponse(Option<TrackOffset>),
    SendContent(Vec<ContentInput>),
    SubmitResult { call_id: String, output: String },
    DeleteItem(String),
}

pub struct FakeController {
    calls: Mutex<Vec<Call>>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    connects: AtomicUsize,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl FakeController {
    pub fn emit(&self, event: TransportEvent) {
        self.events.send(event).expect("console dropped the event receiver");
    }

    /// Simulate the service closing the socket.
    pub fn drop_session(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Disconnected);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn ensure_connected(&self) -> RealtimeResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(RealtimeError::NotConnected)
        }
    }
}

pub struct FakeTransport {
    controller: Arc<FakeController>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl FakeTransport {
    pub fn new() -> (Self, Arc<FakeController>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Arc::new(FakeController {
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            events: tx,
        });
        let transport = Self {
            controller: controller.clone(),
            events: Some(rx),
        };
        (transport, controller)
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.take()
    }

    async fn connect(&mut self) -> RealtimeResult<()> {
        self.controller.connects.fetch_add(1, Ordering::SeqCst);
        self.controller.record(Call::Connect);
        if self.controller.fail_connect.load(Ordering::SeqCst) {
            return Err(RealtimeError::ConnectionFailed("refused".to_string()));
        }
        self.controller.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> RealtimeResult<()> {
        self.controller.record(Call::Disconnect);
        self.controller.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.controller.is_connected()
    }

    async fn update_session(&mut self, update: SessionUpdate) -> RealtimeResult<()> {
        self.controller.ensure_connected()?;
        self.controller.record(Call::UpdateSession(update));
        Ok(())
    }

    async fn append_input_audio(&mut self, samples: &[i16]) -> RealtimeResult<()> {
        self.controller.ensure_connected()?;
        self.controller.record(Call::AppendAudio(samples.len()));
        Ok(())
    }

    async fn create_response(&mut self) -> RealtimeResult<()> {
        self.controller.ensure_connected()?;
        self.controller.record(Call::CreateResponse);
        Ok(())
    }

    async fn cancel_response(&mut self, truncate: Option<TrackOffset>) -> RealtimeResult<()> {
        self.controller.ensure_connected()?;
        self.controller.record(Call::CancelResponse(truncate));
        Ok(())
    }

    async fn send_user_message_content(&mut self, parts: Vec<ContentInput>) -> RealtimeResult<()> {
        self.controller.ensure_connected()?;
        self.controller.record(Call::SendContent(parts));
        Ok(())
    }

    async fn submit_function_result(&mut self, call_id: &str, output: &str) -> RealtimeResult<()> {
        self.controller.ensure_connected()?;
        self.controller.record(Call::SubmitResult {
            call_id: call_id.to_string(),
            output: output.to_string(),
        });
        Ok(())
    }

    async fn delete_item(&mut self, item_id: &str) -> RealtimeResult<()> {
        self.controller.ensure_connected()?;
        self.controller.record(Call::DeleteItem(item_id.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub console: ConsoleHandle,
    pub transport: Arc<FakeController>,
    pub audio: Arc<MemoryAudioBackend>,
}

/// Options without network dependencies or greeting noise.
pub fn test_options() -> ConsoleOptions {
    ConsoleOptions {
        greeting: None,
        frame_samples: 480,
        weather_base_url: "http://127.0.0.1:9".to_string(),
        time_base_url: "http://127.0.0.1:9".to_string(),
        http_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

pub fn spawn_console(options: ConsoleOptions) -> Harness {
    spawn_console_with(options, MemoryPersistence::default())
}

pub fn spawn_console_with(options: ConsoleOptions, memory: MemoryPersistence) -> Harness {
    spawn_console_with_tools(options, memory, Arc::new(ToolRegistry::new()))
}

/// Spawn with a registry that may already hold extra tools.
pub fn spawn_console_with_tools(
    options: ConsoleOptions,
    memory: MemoryPersistence,
    tools: Arc<ToolRegistry>,
) -> Harness {
    let (transport, controller) = FakeTransport::new();
    let audio = Arc::new(MemoryAudioBackend::new());
    let console = ConsoleManager::spawn(
        Box::new(transport),
        audio.clone(),
        tools,
        memory,
        options,
    )
    .expect("console spawn");
    Harness {
        console,
        transport: controller,
        audio,
    }
}

/// Poll `condition` until it holds, sleeping between attempts.
///
/// Bounded by attempts rather than wall time so it also works with a paused
/// clock.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Wait for a snapshot that satisfies `predicate`.
pub async fn wait_for_snapshot(
    console: &ConsoleHandle,
    predicate: impl Fn(&Snapshot) -> bool,
) -> Snapshot {
    for _ in 0..500 {
        let snapshot = console.snapshot().await.expect("console alive");
        if predicate(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("snapshot condition never held");
}
