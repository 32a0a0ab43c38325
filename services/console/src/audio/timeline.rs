//! Sample-accurate mixer rendered by the output device callback.

use std::collections::BTreeMap;

struct Voice {
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mono buffers placed at absolute positions on a frame clock.
///
/// The clock only advances as frames are rendered, so `current_time` is the
/// position of the next frame the device will hear.
pub struct Timeline {
    sample_rate: u32,
    rendered: u64,
    voices: BTreeMap<u64, Voice>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            rendered: 0,
            voices: BTreeMap::new(),
        }
    }

    pub fn current_time(&self) -> f64 {
        self.rendered as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Places `samples` to start at `start_at` seconds and returns the start
    /// actually used. Times already rendered are moved up to the current frame.
    pub fn schedule(&mut self, id: u64, samples: Vec<f32>, start_at: f64) -> f64 {
        let requested = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        let start_frame = requested.max(self.rendered);
        self.voices.insert(
            id,
            Voice {
                start_frame,
                samples,
            },
        );
        start_frame as f64 / self.sample_rate as f64
    }

    pub fn cancel(&mut self, id: u64) {
        self.voices.remove(&id);
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Mixes the next `out.len() / channels` frames into `out`, duplicating
    /// the mono mix across channels, and advances the clock.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        out.fill(0.0);
        let frames = (out.len() / channels) as u64;
        let window_start = self.rendered;
        let window_end = window_start + frames;

        for voice in self.voices.values() {
            let from = voice.start_frame.max(window_start);
            let to = voice.end_frame().min(window_end);
            for frame in from..to {
                let sample = voice.samples[(frame - voice.start_frame) as usize];
                let base = (frame - window_start) as usize * channels;
                for slot in &mut out[base..base + channels] {
                    *slot += sample;
                }
            }
        }
        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        self.rendered = window_end;
        self.voices.retain(|_, voice| voice.end_frame() > window_end);
    }
}
