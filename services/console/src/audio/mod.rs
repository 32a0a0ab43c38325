//! Audio devices for the voice session.

pub mod capture;
mod device;
pub mod playback;
pub mod timeline;

use crate::error::VoiceError;
use capture::{CaptureInput, CpalInput};
use playback::{CpalOutput, OutputSink};

/// Opens the microphone and speaker for a session.
pub trait AudioBackend: Send + Sync {
    /// Opens the microphone. Windows flow only after `InputStream::start`.
    fn open_input(&self) -> Result<CaptureInput, VoiceError>;
    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputSink>, VoiceError>;
}

/// The host's default input and output devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(&self) -> Result<CaptureInput, VoiceError> {
        CpalInput::open()
    }

    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputSink>, VoiceError> {
        Ok(Box::new(CpalOutput::open(sample_rate)?))
    }
}
