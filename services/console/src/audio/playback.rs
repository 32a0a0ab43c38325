//! Gapless playback of inbound agent audio.

use super::device::StreamThread;
use super::timeline::Timeline;
use crate::audio_utils::resample_buffer;
use crate::error::VoiceError;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, StreamConfig};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// An output device that plays buffers at absolute times on its own clock.
#[cfg_attr(test, mockall::automock)]
pub trait OutputSink: Send {
    /// Seconds of audio the device has played so far.
    fn current_time(&self) -> f64;
    /// Places a buffer no earlier than `start_at` and returns the start the
    /// device actually used, read under the same lock as the placement.
    fn schedule(&mut self, id: u64, samples: Vec<f32>, start_at: f64) -> f64;
    fn cancel(&mut self, id: u64);
    /// Releases the device. Further calls are no-ops.
    fn close(&mut self);
}

/// Queues decoded chunks back to back on an `OutputSink`.
pub struct PlaybackScheduler {
    sink: Box<dyn OutputSink>,
    sample_rate: u32,
    next_start: f64,
    next_id: u64,
    /// Unfinished buffers by id, with their end time.
    scheduled: BTreeMap<u64, f64>,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn OutputSink>, sample_rate: u32) -> Self {
        Self {
            sink,
            sample_rate,
            next_start: 0.0,
            next_id: 0,
            scheduled: BTreeMap::new(),
        }
    }

    /// Schedules `samples` right after everything already queued, or now if
    /// the queue has drained. Returns the start time the sink used.
    pub fn enqueue(&mut self, samples: Vec<f32>) -> f64 {
        let now = self.sink.current_time();
        self.scheduled.retain(|_, end| *end > now);
        if samples.is_empty() {
            return self.next_start.max(now);
        }

        let requested = self.next_start.max(now);
        let duration = samples.len() as f64 / self.sample_rate as f64;
        let id = self.next_id;
        self.next_id += 1;

        // The device clock may have moved since `now` was read.
        let start = self.sink.schedule(id, samples, requested).max(requested);
        self.scheduled.insert(id, start + duration);
        self.next_start = start + duration;
        debug!(id, start, duration, queued = self.scheduled.len(), "Scheduled playback buffer");
        start
    }

    /// Cancels every pending buffer and rewinds the cursor.
    pub fn teardown(&mut self) {
        for id in std::mem::take(&mut self.scheduled).into_keys() {
            self.sink.cancel(id);
        }
        self.next_start = 0.0;
    }

    /// Tears down and releases the output device.
    pub fn close(mut self) {
        self.teardown();
        self.sink.close();
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn pending(&self) -> usize {
        self.scheduled.len()
    }
}

/// Schedules buffers produced at `source_rate` onto a shared `Timeline`
/// running at the device rate, resampling when the two differ.
pub struct TimelineSink {
    timeline: Arc<Mutex<Timeline>>,
    source_rate: u32,
    device_rate: u32,
}

impl TimelineSink {
    pub fn new(timeline: Arc<Mutex<Timeline>>, source_rate: u32) -> Self {
        let device_rate = lock_timeline(&timeline).sample_rate();
        Self {
            timeline,
            source_rate,
            device_rate,
        }
    }

    fn timeline(&self) -> MutexGuard<'_, Timeline> {
        lock_timeline(&self.timeline)
    }
}

fn lock_timeline(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl OutputSink for TimelineSink {
    fn current_time(&self) -> f64 {
        self.timeline().current_time()
    }

    fn schedule(&mut self, id: u64, samples: Vec<f32>, start_at: f64) -> f64 {
        let samples = if self.source_rate == self.device_rate {
            samples
        } else {
            match resample_buffer(&samples, self.source_rate, self.device_rate) {
                Ok(resampled) => resampled,
                Err(e) => {
                    warn!(id, "Dropping playback buffer that failed to resample: {e}");
                    return start_at;
                }
            }
        };
        self.timeline().schedule(id, samples, start_at)
    }

    fn cancel(&mut self, id: u64) {
        self.timeline().cancel(id);
    }

    fn close(&mut self) {
        self.timeline().clear();
    }
}

/// The default output device rendering a shared `Timeline`.
pub struct CpalOutput {
    sink: TimelineSink,
    stream: Option<StreamThread>,
}

impl CpalOutput {
    /// Opens the default output device and starts it. Mono at `sample_rate`
    /// is used when the device supports it; otherwise the device's default
    /// format is used and buffers are resampled to it.
    pub fn open(sample_rate: u32) -> Result<Self, VoiceError> {
        let (stream, (device_name, config, timeline)) = StreamThread::spawn("playback", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| VoiceError::DeviceUnavailable("no default output device".into()))?;
            let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());

            let config = output_config(&device, sample_rate)?;
            let channels = config.channels as usize;
            let timeline = Arc::new(Mutex::new(Timeline::new(config.sample_rate.0)));
            let render_timeline = Arc::clone(&timeline);

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                        match render_timeline.lock() {
                            Ok(mut timeline) => timeline.render(data, channels),
                            Err(_) => data.fill(0.0),
                        }
                    },
                    move |err| {
                        error!("audio output stream error: {err}");
                    },
                    None,
                )
                .map_err(|e| {
                    VoiceError::DeviceUnavailable(format!("failed to build output stream: {e}"))
                })?;
            Ok((stream, (device_name, config, timeline)))
        })?;

        stream.play()?;
        info!(
            device = %device_name,
            sample_rate,
            device_rate = config.sample_rate.0,
            channels = config.channels,
            "Audio playback started"
        );
        Ok(Self {
            sink: TimelineSink::new(timeline, sample_rate),
            stream: Some(stream),
        })
    }
}

/// Mono f32 at `sample_rate` if any supported range allows it, else the
/// device default.
fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig, VoiceError> {
    let exact = device.supported_output_configs().ok().and_then(|mut ranges| {
        ranges.find(|range| {
            range.channels() == 1
                && range.sample_format() == SampleFormat::F32
                && range.min_sample_rate().0 <= sample_rate
                && sample_rate <= range.max_sample_rate().0
        })
    });
    if let Some(range) = exact {
        return Ok(range.with_sample_rate(cpal::SampleRate(sample_rate)).config());
    }

    let fallback = device.default_output_config().map_err(|e| {
        VoiceError::DeviceUnavailable(format!("no usable output format: {e}"))
    })?;
    debug!(
        format = ?fallback.sample_format(),
        rate = fallback.sample_rate().0,
        channels = fallback.channels(),
        "Mono {sample_rate} Hz output unsupported, using the device default"
    );
    Ok(fallback.config())
}

impl OutputSink for CpalOutput {
    fn current_time(&self) -> f64 {
        self.sink.current_time()
    }

    fn schedule(&mut self, id: u64, samples: Vec<f32>, start_at: f64) -> f64 {
        self.sink.schedule(id, samples, start_at)
    }

    fn cancel(&mut self, id: u64) {
        self.sink.cancel(id);
    }

    fn close(&mut self) {
        self.sink.close();
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("Audio playback stopped");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use mockall::predicate::eq;

    #[test]
    fn test_enqueue_chains_buffers_back_to_back() {
        let mut sink = MockOutputSink::new();
        sink.expect_current_time().return_const(0.0);
        sink.expect_schedule().times(3).returning(|_, _, start_at| start_at);

        let mut scheduler = PlaybackScheduler::new(Box::new(sink), 10);
        let first = scheduler.enqueue(vec![0.0; 5]);
        let second = scheduler.enqueue(vec![0.0; 10]);
        let third = scheduler.enqueue(vec![0.0; 5]);

        assert_abs_diff_eq!(first, 0.0);
        assert_abs_diff_eq!(second, 0.5);
        assert_abs_diff_eq!(third, 1.5);
        assert_abs_diff_eq!(scheduler.next_start(), 2.0);
    }

    #[test]
    fn test_late_chunk_starts_at_current_time() {
        let mut sink = MockOutputSink::new();
        let mut clock = mockall::Sequence::new();
        sink.expect_current_time()
            .times(1)
            .in_sequence(&mut clock)
            .return_const(0.0);
        sink.expect_current_time()
            .times(1)
            .in_sequence(&mut clock)
            .return_const(3.0);
        sink.expect_schedule()
            .with(eq(0), mockall::predicate::always(), eq(0.0))
            .times(1)
            .returning(|_, _, start_at| start_at);
        sink.expect_schedule()
            .with(eq(1), mockall::predicate::always(), eq(3.0))
            .times(1)
            .returning(|_, _, start_at| start_at);

        let mut scheduler = PlaybackScheduler::new(Box::new(sink), 10);
        scheduler.enqueue(vec![0.0; 10]);
        let start = scheduler.enqueue(vec![0.0; 10]);

        assert_abs_diff_eq!(start, 3.0);
        assert_abs_diff_eq!(scheduler.next_start(), 4.0);
    }

    #[test]
    fn test_finished_buffers_are_retired_on_enqueue() {
        let mut sink = MockOutputSink::new();
        let mut clock = mockall::Sequence::new();
        for now in [0.0, 0.0, 1.2] {
            sink.expect_current_time()
                .times(1)
                .in_sequence(&mut clock)
                .return_const(now);
        }
        sink.expect_schedule().times(3).returning(|_, _, start_at| start_at);

        let mut scheduler = PlaybackScheduler::new(Box::new(sink), 10);
        scheduler.enqueue(vec![0.0; 5]);
        scheduler.enqueue(vec![0.0; 5]);
        assert_eq!(scheduler.pending(), 2);

        scheduler.enqueue(vec![0.0; 5]);
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_empty_chunk_is_not_scheduled() {
        let mut sink = MockOutputSink::new();
        sink.expect_current_time().return_const(0.25);
        sink.expect_schedule().never();

        let mut scheduler = PlaybackScheduler::new(Box::new(sink), 10);
        assert_abs_diff_eq!(scheduler.enqueue(Vec::new()), 0.25);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_teardown_cancels_pending_and_resets_cursor() {
        let mut sink = MockOutputSink::new();
        sink.expect_current_time().return_const(0.0);
        sink.expect_schedule().times(2).returning(|_, _, start_at| start_at);
        sink.expect_cancel().with(eq(0)).times(1).return_const(());
        sink.expect_cancel().with(eq(1)).times(1).return_const(());
        sink.expect_close().times(1).return_const(());

        let mut scheduler = PlaybackScheduler::new(Box::new(sink), 10);
        scheduler.enqueue(vec![0.0; 5]);
        scheduler.enqueue(vec![0.0; 5]);

        scheduler.teardown();
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.next_start(), 0.0);

        // A second teardown has nothing left to cancel.
        scheduler.teardown();
        scheduler.close();
    }

    #[test]
    fn test_next_start_follows_the_start_the_sink_used() {
        let mut sink = MockOutputSink::new();
        sink.expect_current_time().return_const(0.0);
        sink.expect_schedule()
            .with(eq(0), mockall::predicate::always(), eq(0.0))
            .times(1)
            .returning(|_, _, start_at| start_at + 0.25);
        sink.expect_schedule()
            .with(eq(1), mockall::predicate::always(), eq(0.75))
            .times(1)
            .returning(|_, _, start_at| start_at);

        let mut scheduler = PlaybackScheduler::new(Box::new(sink), 10);
        assert_abs_diff_eq!(scheduler.enqueue(vec![0.0; 5]), 0.25);
        assert_abs_diff_eq!(scheduler.next_start(), 0.75);
        assert_abs_diff_eq!(scheduler.enqueue(vec![0.0; 5]), 0.75);
        assert_abs_diff_eq!(scheduler.next_start(), 1.25);
    }

    /// Renders `stall_frames` on the shared timeline the first time a buffer
    /// is scheduled, as a device callback firing mid-enqueue would.
    struct RenderingSink {
        inner: TimelineSink,
        timeline: Arc<Mutex<Timeline>>,
        stall_frames: Option<usize>,
    }

    impl OutputSink for RenderingSink {
        fn current_time(&self) -> f64 {
            self.inner.current_time()
        }

        fn schedule(&mut self, id: u64, samples: Vec<f32>, start_at: f64) -> f64 {
            if let Some(frames) = self.stall_frames.take() {
                let mut out = vec![0.0f32; frames];
                lock_timeline(&self.timeline).render(&mut out, 1);
            }
            self.inner.schedule(id, samples, start_at)
        }

        fn cancel(&mut self, id: u64) {
            self.inner.cancel(id);
        }

        fn close(&mut self) {
            self.inner.close();
        }
    }

    #[test]
    fn test_clock_advancing_during_schedule_does_not_overlap_chunks() {
        let timeline = Arc::new(Mutex::new(Timeline::new(24000)));
        let sink = RenderingSink {
            inner: TimelineSink::new(Arc::clone(&timeline), 24000),
            timeline: Arc::clone(&timeline),
            stall_frames: Some(480),
        };

        let mut scheduler = PlaybackScheduler::new(Box::new(sink), 24000);
        let first = scheduler.enqueue(vec![0.25; 2400]);
        let second = scheduler.enqueue(vec![0.25; 2400]);
        assert_abs_diff_eq!(first, 0.02, epsilon = 1e-9);
        assert_abs_diff_eq!(second, 0.12, epsilon = 1e-9);

        // Frames 480..5280 hold exactly one chunk each.
        let mut out = vec![0.0f32; 4800];
        lock_timeline(&timeline).render(&mut out, 1);
        let overlapped = out.iter().filter(|&&sample| sample > 0.25 + 1e-6).count();
        let silent = out.iter().filter(|&&sample| sample == 0.0).count();
        assert_eq!(overlapped, 0);
        assert_eq!(silent, 0);
        assert_eq!(lock_timeline(&timeline).active_voices(), 0);
    }

    #[test]
    fn test_resampled_playback_is_gapless_on_a_faster_device() {
        let timeline = Arc::new(Mutex::new(Timeline::new(48000)));
        let sink = TimelineSink::new(Arc::clone(&timeline), 24000);

        let mut scheduler = PlaybackScheduler::new(Box::new(sink), 24000);
        assert_abs_diff_eq!(scheduler.enqueue(vec![0.25; 2400]), 0.0);
        assert_abs_diff_eq!(scheduler.enqueue(vec![0.25; 2400]), 0.1, epsilon = 1e-9);

        let mut out = vec![0.0f32; 9600 * 2];
        lock_timeline(&timeline).render(&mut out, 2);
        // Interpolation may ring at the chunk edges, but never doubles up.
        assert!(out.iter().all(|&sample| sample < 0.4));
        for frame in [2400, 4700, 4900, 7200] {
            assert_abs_diff_eq!(out[frame * 2], 0.25, epsilon = 1e-3);
            assert_abs_diff_eq!(out[frame * 2 + 1], 0.25, epsilon = 1e-3);
        }
        assert_eq!(lock_timeline(&timeline).active_voices(), 0);
    }
}
