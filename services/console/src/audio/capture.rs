//! Microphone capture into fixed 16 kHz mono windows.

use super::device::StreamThread;
use crate::audio_utils::{CAPTURE_SAMPLE_RATE, CAPTURE_WINDOW, create_resampler};
use crate::error::VoiceError;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait};
use rubato::{FastFixedIn, Resampler};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Frames handed to the resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// A started or paused microphone stream.
pub trait InputStream: Send {
    /// Begins delivering windows.
    fn start(&mut self) -> Result<(), VoiceError>;
    /// Releases the device. Windows still in flight are dropped.
    fn close(&mut self);
}

/// An opened microphone: the stream handle plus the windows it produces.
pub struct CaptureInput {
    pub stream: Box<dyn InputStream>,
    pub windows: mpsc::Receiver<Vec<f32>>,
}

/// Converts device-rate mono samples into `CAPTURE_WINDOW`-sized 16 kHz windows.
pub struct CaptureChunker {
    resampler: Option<FastFixedIn<f32>>,
    pending_input: Vec<f32>,
    pending_output: Vec<f32>,
    window: usize,
}

impl CaptureChunker {
    pub fn new(native_rate: u32, window: usize) -> Result<Self, VoiceError> {
        let resampler = if native_rate == CAPTURE_SAMPLE_RATE {
            None
        } else {
            let resampler = create_resampler(
                native_rate as f64,
                CAPTURE_SAMPLE_RATE as f64,
                RESAMPLE_CHUNK,
            )
            .map_err(|e| VoiceError::DeviceUnavailable(format!("cannot resample capture: {e}")))?;
            Some(resampler)
        };
        Ok(Self {
            resampler,
            pending_input: Vec::new(),
            pending_output: Vec::new(),
            window,
        })
    }

    /// Feeds samples in and returns every window completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        match self.resampler.as_mut() {
            None => self.pending_output.extend_from_slice(samples),
            Some(resampler) => {
                self.pending_input.extend_from_slice(samples);
                loop {
                    let needed = resampler.input_frames_next();
                    if self.pending_input.len() < needed {
                        break;
                    }
                    let chunk: Vec<f32> = self.pending_input.drain(..needed).collect();
                    match resampler.process(&[chunk], None) {
                        Ok(mut output) => self.pending_output.append(&mut output[0]),
                        Err(e) => warn!("Capture resampling failed, dropping chunk: {e}"),
                    }
                }
            }
        }

        let mut windows = Vec::new();
        while self.pending_output.len() >= self.window {
            windows.push(self.pending_output.drain(..self.window).collect());
        }
        windows
    }
}

/// Averages interleaved frames down to mono.
fn to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// The default input device.
pub struct CpalInput {
    stream: Option<StreamThread>,
    forwarder: tokio::task::JoinHandle<()>,
}

impl CpalInput {
    /// Opens the default input device paused. Must be called inside a tokio runtime.
    pub fn open() -> Result<CaptureInput, VoiceError> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<Vec<f32>>(64);

        let (stream, (device_name, native_rate)) = StreamThread::spawn("capture", move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| VoiceError::DeviceUnavailable("no default input device".into()))?;
            let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());

            let default_config = device.default_input_config().map_err(|e| {
                VoiceError::DeviceUnavailable(format!("no default input config: {e}"))
            })?;
            let config = StreamConfig {
                channels: default_config.channels(),
                sample_rate: default_config.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            };
            let channels = config.channels as usize;

            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                        if raw_tx.try_send(to_mono(data, channels)).is_err() {
                            debug!("capture channel full, dropping samples");
                        }
                    },
                    move |err| {
                        error!("audio input stream error: {err}");
                    },
                    None,
                )
                .map_err(|e| {
                    VoiceError::DeviceUnavailable(format!("failed to build input stream: {e}"))
                })?;
            Ok((stream, (device_name, config.sample_rate.0)))
        })?;

        let mut chunker = CaptureChunker::new(native_rate, CAPTURE_WINDOW)?;
        let (windows_tx, windows) = mpsc::channel(16);
        let forwarder = tokio::spawn(async move {
            while let Some(samples) = raw_rx.recv().await {
                for window in chunker.push(&samples) {
                    if windows_tx.send(window).await.is_err() {
                        return;
                    }
                }
            }
        });

        info!(device = %device_name, native_rate, target_rate = CAPTURE_SAMPLE_RATE, "Audio capture opened");
        Ok(CaptureInput {
            stream: Box::new(CpalInput {
                stream: Some(stream),
                forwarder,
            }),
            windows,
        })
    }
}

impl InputStream for CpalInput {
    fn start(&mut self) -> Result<(), VoiceError> {
        match self.stream.as_ref() {
            Some(stream) => {
                stream.play()?;
                info!("Audio capture started");
                Ok(())
            }
            None => Err(VoiceError::DeviceUnavailable("capture is closed".into())),
        }
    }

    fn close(&mut self) {
        self.forwarder.abort();
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("Audio capture stopped");
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}
