//! The producer thread: reads frames from a [`FrameSource`] and feeds them
//! into the upload path at its own cadence.
//!
//! The pump starts before the GPU exists. It blocks on a channel until the
//! consume stage finishes device initialisation and sends over a ready
//! upload sink; the same channel later delivers replacement sinks when the
//! host swaps the device. Shutdown is explicit: a signal channel plus a
//! joined handle, so teardown is well-defined rather than a detached thread.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::source::FrameSource;

/// Destination for raw frames; implemented by the GPU upload stage and by
/// recording doubles in tests.
pub trait UploadSink: Send {
    fn push(&mut self, pixels: &[u8]);
}

pub struct FramePump {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl FramePump {
    /// Spawns the producer thread.
    ///
    /// `sinks` delivers the first upload sink once the device is ready and a
    /// replacement after every device change. `interval` is the update
    /// cadence once frames are flowing.
    pub fn spawn<S, K>(source: S, sinks: Receiver<K>, interval: Duration) -> Result<Self>
    where
        S: FrameSource + 'static,
        K: UploadSink + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("framebridge-pump".into())
            .spawn(move || pump_loop(source, sinks, shutdown_rx, interval))
            .context("failed to spawn producer pump thread")?;
        Ok(Self {
            shutdown: shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for it to finish.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("producer pump thread panicked");
            }
        }
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

fn pump_loop<S, K>(
    mut source: S,
    sinks: Receiver<K>,
    shutdown: Receiver<()>,
    interval: Duration,
) where
    S: FrameSource,
    K: UploadSink,
{
    tracing::debug!("producer pump waiting for device initialisation");
    let mut sink = select! {
        recv(sinks) -> stage => match stage {
            Ok(stage) => stage,
            Err(_) => return,
        },
        recv(shutdown) -> _ => return,
    };
    tracing::info!("producer pump started");

    let mut frame = vec![0u8; source.frame_len()];
    loop {
        // Pick up a replacement sink after a device change; only the newest
        // matters.
        while let Ok(next) = sinks.try_recv() {
            sink = next;
        }

        // Check before reading, not only during the pacing wait, so a stop
        // signal never costs an extra frame.
        match shutdown.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => {
                tracing::debug!("producer pump stopping");
                return;
            }
        }

        match source.read_frame(&mut frame) {
            Ok(()) => sink.push(&frame),
            Err(error) => {
                tracing::warn!(%error, "frame source read failed; skipping update");
            }
        }

        match shutdown.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                tracing::debug!("producer pump stopping");
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crossbeam_channel::unbounded;

    use super::*;

    struct CountingSource {
        len: usize,
        next: u8,
    }

    impl FrameSource for CountingSource {
        fn frame_len(&self) -> usize {
            self.len
        }

        fn read_frame(&mut self, out: &mut [u8]) -> anyhow::Result<()> {
            out[..self.len].fill(self.next);
            self.next = self.next.wrapping_add(1);
            Ok(())
        }
    }

    #[derive(Clone)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl UploadSink for RecordingSink {
        fn push(&mut self, pixels: &[u8]) {
            self.frames.lock().unwrap().push(pixels.to_vec());
        }
    }

    #[test]
    fn no_frames_flow_before_the_init_signal() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = unbounded::<RecordingSink>();
        let pump = FramePump::spawn(
            CountingSource { len: 4, next: 0 },
            rx,
            Duration::from_millis(1),
        )
        .expect("spawn pump");

        std::thread::sleep(Duration::from_millis(30));
        assert!(frames.lock().unwrap().is_empty());

        tx.send(RecordingSink {
            frames: frames.clone(),
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        pump.stop();

        let recorded = frames.lock().unwrap();
        assert!(!recorded.is_empty(), "frames should flow after init");
        assert_eq!(recorded[0], vec![0u8; 4]);
    }

    #[test]
    fn shutdown_before_init_joins_cleanly() {
        let (_tx, rx) = unbounded::<RecordingSink>();
        let pump = FramePump::spawn(
            CountingSource { len: 4, next: 0 },
            rx,
            Duration::from_millis(1),
        )
        .expect("spawn pump");
        pump.stop();
    }

    #[test]
    fn stop_interrupts_the_pacing_wait() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = unbounded::<RecordingSink>();
        let pump = FramePump::spawn(
            CountingSource { len: 4, next: 0 },
            rx,
            Duration::from_secs(3600),
        )
        .expect("spawn pump");

        tx.send(RecordingSink {
            frames: frames.clone(),
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let started = std::time::Instant::now();
        pump.stop();
        assert!(
            started.elapsed() < Duration::from_secs(60),
            "stop must not wait out the update interval"
        );
        assert!(frames.lock().unwrap().len() <= 1, "no frame flows after stop");
    }

    #[test]
    fn replacement_sink_takes_over() {
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = unbounded::<RecordingSink>();
        let pump = FramePump::spawn(
            CountingSource { len: 2, next: 0 },
            rx,
            Duration::from_millis(1),
        )
        .expect("spawn pump");

        tx.send(RecordingSink {
            frames: first.clone(),
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        tx.send(RecordingSink {
            frames: second.clone(),
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        pump.stop();

        assert!(!first.lock().unwrap().is_empty());
        assert!(!second.lock().unwrap().is_empty());
    }
}
