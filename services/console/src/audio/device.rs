//! Thread ownership for cpal streams.
//!
//! `cpal::Stream` is not `Send` on every host, so each stream lives on a
//! dedicated thread and is driven through a command channel.

use crate::error::VoiceError;
use cpal::traits::StreamTrait;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error};

enum StreamCommand {
    Play,
    Stop,
}

/// Handle to a stream owned by its own thread. Dropping it stops the stream.
pub struct StreamThread {
    label: &'static str,
    commands: std_mpsc::Sender<StreamCommand>,
    thread: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Builds a stream on a new thread. `build` returns the stream and a
    /// value describing it (such as its negotiated format).
    pub fn spawn<T, F>(label: &'static str, build: F) -> Result<(Self, T), VoiceError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<(cpal::Stream, T), VoiceError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let (commands, command_rx) = std_mpsc::channel();

        let thread = std::thread::Builder::new()
            .name(format!("dg-{label}"))
            .spawn(move || {
                let stream = match build() {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send(Ok(info));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok(command) = command_rx.recv() {
                    match command {
                        StreamCommand::Play => {
                            if let Err(e) = stream.play() {
                                error!(stream = label, "Failed to start audio stream: {e}");
                            }
                        }
                        StreamCommand::Stop => break,
                    }
                }
                drop(stream);
                debug!(stream = label, "Audio stream released");
            })
            .map_err(|e| VoiceError::DeviceUnavailable(format!("cannot spawn {label} thread: {e}")))?;

        let info = block_on_worker(|| ready_rx.recv()).map_err(|_| {
            VoiceError::DeviceUnavailable(format!("{label} thread exited before the stream was built"))
        })??;

        Ok((
            Self {
                label,
                commands,
                thread: Some(thread),
            },
            info,
        ))
    }

    pub fn play(&self) -> Result<(), VoiceError> {
        self.commands
            .send(StreamCommand::Play)
            .map_err(|_| VoiceError::DeviceUnavailable(format!("{} stream is gone", self.label)))
    }

    /// Stops and releases the stream, waiting for its thread to exit.
    pub fn stop(&mut self) {
        let _ = self.commands.send(StreamCommand::Stop);
        if let Some(thread) = self.thread.take() {
            if block_on_worker(|| thread.join()).is_err() {
                error!(stream = self.label, "Audio stream thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs a blocking wait on a stream thread. On a multi-threaded tokio
/// runtime the worker is handed off first so other tasks keep running;
/// `block_in_place` is unavailable on the current-thread runtime, where the
/// wait runs inline.
fn block_on_worker<R>(wait: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(wait)
        }
        _ => wait(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_worker_outside_runtime() {
        assert_eq!(block_on_worker(|| 7), 7);
    }

    #[tokio::test]
    async fn test_block_on_worker_on_current_thread_runtime() {
        assert_eq!(block_on_worker(|| 7), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_failure_is_reported_without_stalling_the_runtime() {
        let ticker = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        });

        let result = StreamThread::spawn::<(), _>("test", || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            Err(VoiceError::DeviceUnavailable("no device".into()))
        });
        match result {
            Err(VoiceError::DeviceUnavailable(reason)) => assert_eq!(reason, "no device"),
            _ => panic!("Expected DeviceUnavailable"),
        }
        ticker.await.expect("runtime kept scheduling tasks");
    }
}
