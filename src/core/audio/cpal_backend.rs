//! Native audio devices through `cpal`.
//!
//! `cpal::Stream` is not `Send` on every platform, so each started device owns a
//! dedicated thread that builds the stream, plays it and parks until stopped.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use super::base::{
    AudioBackend, AudioError, AudioInputDevice, AudioOutputDevice, AudioResult, DeviceConfig,
    InputCallback, OutputCallback, f32_to_i16, i16_to_f32,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

/// Backend over the default `cpal` host.
#[derive(Debug, Clone, Default)]
pub struct CpalAudioBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer the named devices over the host defaults.
    pub fn with_devices(input: Option<String>, output: Option<String>) -> Self {
        Self {
            input_device: input,
            output_device: output,
        }
    }
}

fn find_device(direction: Direction, name: Option<&str>) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    let device = match (direction, name) {
        (Direction::Input, None) => host.default_input_device(),
        (Direction::Output, None) => host.default_output_device(),
        (Direction::Input, Some(name)) => host
            .input_devices()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name)),
        (Direction::Output, Some(name)) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name)),
    };
    device.ok_or_else(|| {
        AudioError::DeviceUnavailable(format!(
            "no {:?} device{}",
            direction,
            name.map(|n| format!(" named {n}")).unwrap_or_default()
        ))
    })
}

fn default_config(
    direction: Direction,
    device: &cpal::Device,
) -> AudioResult<cpal::SupportedStreamConfig> {
    let config = match direction {
        Direction::Input => device.default_input_config(),
        Direction::Output => device.default_output_config(),
    };
    config.map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
}

fn probe(direction: Direction, name: Option<&str>) -> AudioResult<DeviceConfig> {
    let device = find_device(direction, name)?;
    let config = default_config(direction, &device)?;
    Ok(DeviceConfig {
        sample_rate: config.sample_rate().0,
        channels: config.channels(),
    })
}

enum Callback {
    Input(InputCallback),
    Output(OutputCallback),
}

fn build_stream(
    direction: Direction,
    name: Option<&str>,
    callback: Callback,
) -> AudioResult<cpal::Stream> {
    let device = find_device(direction, name)?;
    let supported = default_config(direction, &device)?;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let on_error = |err: cpal::StreamError| error!("Audio stream error: {}", err);

    let stream = match (callback, format) {
        (Callback::Input(mut cb), cpal::SampleFormat::F32) => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| cb(data),
            on_error,
            None,
        ),
        (Callback::Input(mut cb), cpal::SampleFormat::I16) => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|s| i16_to_f32(*s)));
                    cb(&scratch);
                },
                on_error,
                None,
            )
        }
        (Callback::Output(mut cb), cpal::SampleFormat::F32) => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| cb(data),
            on_error,
            None,
        ),
        (Callback::Output(mut cb), cpal::SampleFormat::I16) => {
            let mut scratch = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    cb(&mut scratch);
                    for (out, s) in data.iter_mut().zip(scratch.iter()) {
                        *out = f32_to_i16(*s);
                    }
                },
                on_error,
                None,
            )
        }
        (_, other) => {
            return Err(AudioError::DeviceUnavailable(format!(
                "unsupported sample format {other:?}"
            )));
        }
    };

    stream.map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
}

/// Owns the thread that keeps a stream alive.
struct StreamWorker {
    stop: std_mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamWorker {
    fn spawn(direction: Direction, name: Option<String>, callback: Callback) -> AudioResult<Self> {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<AudioResult<()>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(format!("waav-audio-{direction:?}").to_lowercase())
            .spawn(move || {
                let stream = match build_stream(direction, name.as_deref(), callback) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::Stream(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Park until the owner stops or drops us.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop: stop_tx,
                handle,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::Stream("audio thread exited during startup".to_string()))
            }
        }
    }

    fn shutdown(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            error!("Audio thread panicked");
        }
    }
}

struct CpalInputDevice {
    name: Option<String>,
    config: DeviceConfig,
    worker: Option<StreamWorker>,
}

impl AudioInputDevice for CpalInputDevice {
    fn config(&self) -> DeviceConfig {
        self.config
    }

    fn start(&mut self, callback: InputCallback) -> AudioResult<()> {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        self.worker = Some(StreamWorker::spawn(
            Direction::Input,
            self.name.clone(),
            Callback::Input(callback),
        )?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

struct CpalOutputDevice {
    name: Option<String>,
    config: DeviceConfig,
    worker: Option<StreamWorker>,
}

impl AudioOutputDevice for CpalOutputDevice {
    fn config(&self) -> DeviceConfig {
        self.config
    }

    fn start(&mut self, callback: OutputCallback) -> AudioResult<()> {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        self.worker = Some(StreamWorker::spawn(
            Direction::Output,
            self.name.clone(),
            Callback::Output(callback),
        )?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

impl AudioBackend for CpalAudioBackend {
    fn open_input(&self) -> AudioResult<Box<dyn AudioInputDevice>> {
        let config = probe(Direction::Input, self.input_device.as_deref())?;
        info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            "Opened cpal input device"
        );
        Ok(Box::new(CpalInputDevice {
            name: self.input_device.clone(),
            config,
            worker: None,
        }))
    }

    fn open_output(&self) -> AudioResult<Box<dyn AudioOutputDevice>> {
        let config = probe(Direction::Output, self.output_device.as_deref())?;
        info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            "Opened cpal output device"
        );
        Ok(Box::new(CpalOutputDevice {
            name: self.output_device.clone(),
            config,
            worker: None,
        }))
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}
