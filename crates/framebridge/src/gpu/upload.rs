//! Producer path: raw pixels in, published command batch out.

use std::sync::Arc;

use crate::gpu::pipeline::SURFACE_BYTES_PER_PIXEL;
use crate::gpu::timing::{GpuTimer, TimingSample};
use crate::pump::UploadSink;
use crate::slots::SlotRegistry;

/// A recorded, not-yet-executed unit of GPU work: one surface upload plus
/// its dependent state. Consumed exactly once, then released.
pub struct UploadBatch {
    /// Device generation this batch was recorded against. The consume stage
    /// refuses to submit a batch from a previous generation.
    pub epoch: u64,
    /// Whether a timing bracket rides inside the recorded commands.
    pub timing: bool,
    pub commands: wgpu::CommandBuffer,
}

/// The upload half of the bridge, owned by the producer thread.
///
/// Constructed by the consume stage once the device is initialised and
/// handed over through the pump's init channel; a device change constructs a
/// replacement. The stage existing at all is the "device is ready"
/// precondition, so an update can never race initialisation.
pub struct UploadStage {
    device: Arc<wgpu::Device>,
    surface: wgpu::Texture,
    width: u32,
    height: u32,
    epoch: u64,
    registry: Arc<SlotRegistry<UploadBatch>>,
    timer: Option<GpuTimer>,
    updates: u64,
}

impl UploadStage {
    pub(crate) fn new(
        device: Arc<wgpu::Device>,
        surface: wgpu::Texture,
        width: u32,
        height: u32,
        epoch: u64,
        registry: Arc<SlotRegistry<UploadBatch>>,
        timer: Option<GpuTimer>,
    ) -> Self {
        Self {
            device,
            surface,
            width,
            height,
            epoch,
            registry,
            timer,
            updates: 0,
        }
    }

    /// Writes `pixels` into the target surface and publishes the recorded
    /// work as the current command batch.
    ///
    /// The whole surface is overwritten on every call (write-discard); there
    /// are no partial updates. A payload larger than the surface capacity is
    /// rejected without touching the surface or the registry, so the
    /// previously published batch stays authoritative.
    pub fn update(&mut self, pixels: &[u8]) {
        if !payload_fits(pixels.len(), self.width, self.height) {
            tracing::warn!(
                len = pixels.len(),
                capacity = surface_capacity(self.width, self.height),
                "pixel payload exceeds surface capacity; update dropped"
            );
            return;
        }

        if let Some(timer) = self.timer.as_mut() {
            if let Some(sample) = timer.collect(&self.device) {
                match sample {
                    TimingSample::Elapsed(elapsed) => {
                        tracing::trace!(?elapsed, "upload GPU time");
                    }
                    TimingSample::Unstable => {
                        tracing::trace!("upload GPU time unavailable (clock unstable)");
                    }
                }
            }
        }

        let unpadded = (self.width * SURFACE_BYTES_PER_PIXEL) as usize;
        let padded = padded_bytes_per_row(self.width) as usize;

        // Transient staging buffer, mapped at creation: the write-discard
        // analogue. Its memory starts zeroed, so a short payload leaves the
        // tail of the surface transparent rather than stale.
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("bridge upload staging"),
            size: (padded * self.height as usize) as u64,
            usage: wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: true,
        });
        {
            let mut mapped = staging.slice(..).get_mapped_range_mut();
            pack_rows(pixels, &mut mapped, unpadded, padded);
        }
        staging.unmap();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("bridge upload encoder"),
            });

        let mut timing = false;
        if let Some(timer) = self.timer.as_mut() {
            if timer.open() {
                timer.stamp_start(&mut encoder);
                timing = true;
            }
        }

        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: &self.surface,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );

        if timing {
            if let Some(timer) = self.timer.as_mut() {
                timer.stamp_end(&mut encoder);
                timer.close(&mut encoder);
            }
        }

        let batch = UploadBatch {
            epoch: self.epoch,
            timing,
            commands: encoder.finish(),
        };

        if let Some(displaced) = self.registry.publish(batch) {
            // The render loop never got to this one; reclaim its timing
            // bracket so the next update can measure again.
            if displaced.timing {
                if let Some(timer) = self.timer.as_mut() {
                    timer.abandon();
                }
            }
        }

        self.updates += 1;
        tracing::trace!(updates = self.updates, timing, "published upload batch");
    }
}

impl UploadSink for UploadStage {
    fn push(&mut self, pixels: &[u8]) {
        self.update(pixels);
    }
}

/// Whole-surface capacity in bytes. Widened to `u64` so the largest
/// surfaces a device can expose (32768 squared is 4 GiB) never wrap.
fn surface_capacity(width: u32, height: u32) -> u64 {
    width as u64 * height as u64 * SURFACE_BYTES_PER_PIXEL as u64
}

/// An update larger than the surface is rejected outright; the whole-frame
/// contract admits no partial or spilling writes.
fn payload_fits(len: usize, width: u32, height: u32) -> bool {
    len as u64 <= surface_capacity(width, height)
}

/// Texture copies require rows padded to the device alignment.
pub(crate) fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * SURFACE_BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Copies tightly packed rows into a row-padded destination. A source
/// shorter than a full frame fills only what it covers.
fn pack_rows(src: &[u8], dst: &mut [u8], unpadded: usize, padded: usize) {
    for (row, chunk) in src.chunks(unpadded).enumerate() {
        let start = row * padded;
        dst[start..start + chunk.len()].copy_from_slice(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_padding_rounds_up_to_alignment() {
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        assert_eq!(padded_bytes_per_row(64), 64 * 4);
        assert_eq!(padded_bytes_per_row(1), align);
        assert_eq!(padded_bytes_per_row(65), 65u32 * 4 / align * align + align);
    }

    #[test]
    fn oversized_payloads_do_not_fit() {
        // 2x2 BGRA surface holds 16 bytes.
        assert!(payload_fits(16, 2, 2));
        assert!(payload_fits(12, 2, 2), "short payloads are accepted");
        assert!(!payload_fits(17, 2, 2));
        assert!(!payload_fits(usize::MAX, 2, 2));
    }

    #[test]
    fn capacity_does_not_wrap_on_the_largest_surfaces() {
        assert_eq!(surface_capacity(32_768, 32_768), 4 * 1024 * 1024 * 1024);
        assert!(payload_fits(1, 32_768, 32_768));
    }

    #[test]
    fn pack_rows_respects_padding() {
        let src: Vec<u8> = (0..8).collect();
        let mut dst = vec![0u8; 12];
        pack_rows(&src, &mut dst, 4, 6);
        assert_eq!(dst, vec![0, 1, 2, 3, 0, 0, 4, 5, 6, 7, 0, 0]);
    }

    #[test]
    fn pack_rows_handles_short_payloads() {
        let src: Vec<u8> = (0..6).collect();
        let mut dst = vec![0u8; 12];
        pack_rows(&src, &mut dst, 4, 6);
        assert_eq!(dst, vec![0, 1, 2, 3, 0, 0, 4, 5, 0, 0, 0, 0]);
    }
}
