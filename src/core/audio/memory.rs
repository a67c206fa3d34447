//! In-memory audio backend.
//!
//! Devices are plain slots holding the pipeline callbacks. A [`MemoryInputHandle`]
//! pushes samples into a started input device, a [`MemoryOutputHandle`] pulls
//! rendered samples out of a started output device. Used for headless sessions
//! and throughout the test suite.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::base::{
    AudioBackend, AudioError, AudioInputDevice, AudioOutputDevice, AudioResult, DeviceConfig,
    InputCallback, OutputCallback,
};

type InputSlot = Arc<Mutex<Option<InputCallback>>>;
type OutputSlot = Arc<Mutex<Option<OutputCallback>>>;

/// Backend whose devices are driven by test code or a pacing task.
pub struct MemoryAudioBackend {
    input_config: DeviceConfig,
    output_config: DeviceConfig,
    input: InputSlot,
    output: OutputSlot,
    fail_input: AtomicBool,
    fail_output: AtomicBool,
    inputs_opened: AtomicUsize,
    outputs_opened: AtomicUsize,
}

impl MemoryAudioBackend {
    pub fn new() -> Self {
        Self::with_configs(DeviceConfig::default(), DeviceConfig::default())
    }

    pub fn with_configs(input_config: DeviceConfig, output_config: DeviceConfig) -> Self {
        Self {
            input_config,
            output_config,
            input: Arc::new(Mutex::new(None)),
            output: Arc::new(Mutex::new(None)),
            fail_input: AtomicBool::new(false),
            fail_output: AtomicBool::new(false),
            inputs_opened: AtomicUsize::new(0),
            outputs_opened: AtomicUsize::new(0),
        }
    }

    /// Make subsequent `open_input()` calls fail.
    pub fn fail_input(&self, fail: bool) {
        self.fail_input.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `open_output()` calls fail.
    pub fn fail_output(&self, fail: bool) {
        self.fail_output.store(fail, Ordering::SeqCst);
    }

    pub fn inputs_opened(&self) -> usize {
        self.inputs_opened.load(Ordering::SeqCst)
    }

    pub fn outputs_opened(&self) -> usize {
        self.outputs_opened.load(Ordering::SeqCst)
    }

    pub fn input_handle(&self) -> MemoryInputHandle {
        MemoryInputHandle {
            slot: self.input.clone(),
        }
    }

    pub fn output_handle(&self) -> MemoryOutputHandle {
        MemoryOutputHandle {
            slot: self.output.clone(),
            channels: self.output_config.channels.max(1) as usize,
        }
    }
}

impl Default for MemoryAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for MemoryAudioBackend {
    fn open_input(&self) -> AudioResult<Box<dyn AudioInputDevice>> {
        if self.fail_input.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable(
                "memory input disabled".to_string(),
            ));
        }
        self.inputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryInputDevice {
            config: self.input_config,
            slot: self.input.clone(),
        }))
    }

    fn open_output(&self) -> AudioResult<Box<dyn AudioOutputDevice>> {
        if self.fail_output.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable(
                "memory output disabled".to_string(),
            ));
        }
        self.outputs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryOutputDevice {
            config: self.output_config,
            slot: self.output.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryInputDevice {
    config: DeviceConfig,
    slot: InputSlot,
}

impl AudioInputDevice for MemoryInputDevice {
    fn config(&self) -> DeviceConfig {
        self.config
    }

    fn start(&mut self, callback: InputCallback) -> AudioResult<()> {
        *self.slot.lock() = Some(callback);
        Ok(())
    }

    fn stop(&mut self) {
        self.slot.lock().take();
    }
}

struct MemoryOutputDevice {
    config: DeviceConfig,
    slot: OutputSlot,
}

impl AudioOutputDevice for MemoryOutputDevice {
    fn config(&self) -> DeviceConfig {
        self.config
    }

    fn start(&mut self, callback: OutputCallback) -> AudioResult<()> {
        *self.slot.lock() = Some(callback);
        Ok(())
    }

    fn stop(&mut self) {
        self.slot.lock().take();
    }
}

/// Feeds samples into the active input device, if any.
#[derive(Clone)]
pub struct MemoryInputHandle {
    slot: InputSlot,
}

impl MemoryInputHandle {
    /// Push interleaved samples. Returns `false` when no device is started.
    pub fn push(&self, samples: &[f32]) -> bool {
        match self.slot.lock().as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Pulls rendered samples from the active output device, if any.
#[derive(Clone)]
pub struct MemoryOutputHandle {
    slot: OutputSlot,
    channels: usize,
}

impl MemoryOutputHandle {
    /// Render `frames` frames. Returns `None` when no device is started.
    pub fn pull(&self, frames: usize) -> Option<Vec<f32>> {
        let mut guard = self.slot.lock();
        let callback = guard.as_mut()?;
        let mut buffer = vec![0.0; frames * self.channels];
        callback(&mut buffer);
        Some(buffer)
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some()
    }
}
