//! GPU timestamp diagnostics for the upload path.
//!
//! Each measured upload walks an explicit phase sequence: `Idle` →
//! `DisjointOpen` (bracket opened) → `Stamped` (start/end timestamps
//! recorded around the surface copy) → `DisjointClosed` (resolve and
//! read-back copy recorded) → resolved back to `Idle` once the results
//! arrive. Collection is amortised: the producer polls non-blockingly on a
//! later update instead of spinning until the GPU catches up, so the
//! publish path never stalls on query latency.
//!
//! Purely observational: a missing feature, a dropped batch, or an unstable
//! clock degrade the report to "unavailable", never the handoff.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

/// Outcome of one measured upload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimingSample {
    /// GPU time spent on the bracketed interval.
    Elapsed(Duration),
    /// The clock was unstable (or unavailable) across the interval; no
    /// numeric value is reported.
    Unstable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TimerPhase {
    Idle,
    DisjointOpen,
    Stamped,
    DisjointClosed,
}

const TIMESTAMP_COUNT: u32 = 2;
const RESOLVE_BYTES: u64 = (TIMESTAMP_COUNT as u64) * std::mem::size_of::<u64>() as u64;

/// Producer-side half: records the bracket and collects results.
///
/// Created once per device initialisation and reused for every upload; only
/// the single producer thread touches it.
pub struct GpuTimer {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    readback: wgpu::Buffer,
    period_ns: f32,
    phase: TimerPhase,
    results: Receiver<Result<(), wgpu::BufferAsyncError>>,
}

/// Consumer-side half: requests the read-back after the batch carrying the
/// resolve actually executes.
pub struct TimingHandle {
    readback: wgpu::Buffer,
    completions: Sender<Result<(), wgpu::BufferAsyncError>>,
}

impl GpuTimer {
    /// Returns `None` when the device lacks timestamp support; diagnostics
    /// are then silently disabled.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Option<(Self, TimingHandle)> {
        let needed = wgpu::Features::TIMESTAMP_QUERY
            | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS;
        if !device.features().contains(needed) {
            tracing::debug!("timestamp queries unsupported; upload timing disabled");
            return None;
        }

        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("upload timing queries"),
            ty: wgpu::QueryType::Timestamp,
            count: TIMESTAMP_COUNT,
        });
        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("upload timing resolve"),
            size: RESOLVE_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("upload timing readback"),
            size: RESOLVE_BYTES,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let (completions, results) = unbounded();
        let timer = Self {
            query_set,
            resolve_buffer,
            readback: readback.clone(),
            period_ns: queue.get_timestamp_period(),
            phase: TimerPhase::Idle,
            results,
        };
        let handle = TimingHandle {
            readback,
            completions,
        };
        Some((timer, handle))
    }

    /// Opens the bracket for a new measurement. Returns false while a
    /// previous measurement is still in flight.
    pub(crate) fn open(&mut self) -> bool {
        if self.phase != TimerPhase::Idle {
            return false;
        }
        self.phase = TimerPhase::DisjointOpen;
        true
    }

    /// Records the start timestamp immediately before the surface copy.
    pub(crate) fn stamp_start(&mut self, encoder: &mut wgpu::CommandEncoder) {
        debug_assert_eq!(self.phase, TimerPhase::DisjointOpen);
        encoder.write_timestamp(&self.query_set, 0);
    }

    /// Records the end timestamp immediately after the surface copy.
    pub(crate) fn stamp_end(&mut self, encoder: &mut wgpu::CommandEncoder) {
        debug_assert_eq!(self.phase, TimerPhase::DisjointOpen);
        encoder.write_timestamp(&self.query_set, 1);
        self.phase = TimerPhase::Stamped;
    }

    /// Closes the bracket: resolves both queries and copies them into the
    /// read-back buffer, all inside the batch being recorded.
    pub(crate) fn close(&mut self, encoder: &mut wgpu::CommandEncoder) {
        debug_assert_eq!(self.phase, TimerPhase::Stamped);
        encoder.resolve_query_set(&self.query_set, 0..TIMESTAMP_COUNT, &self.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(&self.resolve_buffer, 0, &self.readback, 0, RESOLVE_BYTES);
        self.phase = TimerPhase::DisjointClosed;
    }

    /// The batch carrying this measurement was displaced before anyone could
    /// execute it; the read-back will never be requested, so the bracket is
    /// reusable immediately.
    pub(crate) fn abandon(&mut self) {
        if self.phase == TimerPhase::DisjointClosed {
            tracing::trace!("upload timing measurement abandoned with its batch");
            self.phase = TimerPhase::Idle;
        }
    }

    /// Non-blocking poll for a finished measurement. Call once per update;
    /// returns a sample when the read-back has completed.
    pub(crate) fn collect(&mut self, device: &wgpu::Device) -> Option<TimingSample> {
        if self.phase != TimerPhase::DisjointClosed {
            return None;
        }
        // Give the device a chance to run map callbacks without waiting.
        let _ = device.poll(wgpu::PollType::Poll);
        match self.results.try_recv() {
            Ok(Ok(())) => {
                let sample = {
                    let mapped = self.readback.slice(..).get_mapped_range();
                    let stamps: &[u64] = bytemuck::cast_slice(&mapped);
                    interpret_timestamps(stamps[0], stamps[1], self.period_ns)
                };
                self.readback.unmap();
                self.phase = TimerPhase::Idle;
                Some(sample)
            }
            Ok(Err(error)) => {
                tracing::warn!(%error, "timing readback map failed");
                self.phase = TimerPhase::Idle;
                Some(TimingSample::Unstable)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.phase = TimerPhase::Idle;
                None
            }
        }
    }
}

impl TimingHandle {
    /// Queues the read-back map once the submission carrying the resolve has
    /// been handed to the queue. The producer picks the result up later.
    pub(crate) fn request_resolve(&self) {
        let completions = self.completions.clone();
        self.readback
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = completions.send(result);
            });
    }
}

/// Disjoint-validity rule: a zero (or negative) tick period means the clock
/// frequency is unknown, and an end stamp before the start means the clock
/// was reset mid-interval. Both report as unstable rather than numeric.
fn interpret_timestamps(start: u64, end: u64, period_ns: f32) -> TimingSample {
    if period_ns <= 0.0 || end < start {
        return TimingSample::Unstable;
    }
    let elapsed_ns = (end - start) as f64 * period_ns as f64;
    TimingSample::Elapsed(Duration::from_nanos(elapsed_ns as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_interval_scales_by_period() {
        let sample = interpret_timestamps(1_000, 3_000, 0.5);
        assert_eq!(sample, TimingSample::Elapsed(Duration::from_nanos(1_000)));
    }

    #[test]
    fn zero_period_reports_unstable() {
        assert_eq!(interpret_timestamps(10, 20, 0.0), TimingSample::Unstable);
    }

    #[test]
    fn reversed_stamps_report_unstable() {
        assert_eq!(interpret_timestamps(50, 10, 1.0), TimingSample::Unstable);
    }

    #[test]
    fn zero_length_interval_is_valid() {
        assert_eq!(
            interpret_timestamps(42, 42, 1.0),
            TimingSample::Elapsed(Duration::ZERO)
        );
    }
}
