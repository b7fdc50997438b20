//! The consume stage: a host render-loop plugin that executes the newest
//! published upload batch and draws the target surface into the host's
//! output target.

use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};

use crate::gpu::pipeline::QuadPipeline;
use crate::gpu::timing::{GpuTimer, TimingHandle};
use crate::gpu::upload::{UploadBatch, UploadStage};
use crate::host::{FrameContext, RenderFlags, RenderHook, RenderPass};
use crate::slots::SlotRegistry;

#[derive(Clone, Copy, Debug)]
pub struct BridgeConfig {
    /// Target surface width in pixels.
    pub width: u32,
    /// Target surface height in pixels.
    pub height: u32,
    /// Tell the host a colour read-back will follow each frame.
    pub announce_readback: bool,
    /// Bracket uploads with GPU timestamp diagnostics when supported.
    pub timing: bool,
}

impl BridgeConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            announce_readback: false,
            timing: true,
        }
    }
}

/// Everything rebuilt whenever the host hands over a different device.
struct GpuState {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: QuadPipeline,
    timing: Option<TimingHandle>,
    output_format: wgpu::TextureFormat,
}

/// The bridge plugin. Owned and driven by the host's render thread; the
/// producer side runs through the [`UploadStage`] handed out over the init
/// channel.
pub struct FrameBridge {
    config: BridgeConfig,
    registry: Arc<SlotRegistry<UploadBatch>>,
    gpu: Option<GpuState>,
    /// Bumped on every re-initialisation; batches from older epochs are
    /// discarded instead of submitted.
    epoch: u64,
    stages: Sender<UploadStage>,
    flags: RenderFlags,
}

impl FrameBridge {
    /// Creates the bridge and the receiving end of its init channel. Hand
    /// the receiver to [`FramePump::spawn`](crate::pump::FramePump::spawn);
    /// the pump gets a ready [`UploadStage`] once the host supplies a device
    /// and a replacement after every device change.
    pub fn new(config: BridgeConfig) -> (Self, Receiver<UploadStage>) {
        let (stages, stage_rx) = crossbeam_channel::unbounded();
        let bridge = Self {
            config,
            registry: Arc::new(SlotRegistry::new()),
            gpu: None,
            epoch: 0,
            stages,
            flags: RenderFlags::default(),
        };
        (bridge, stage_rx)
    }

    /// Flags computed during the most recent `pre_render`.
    pub fn flags(&self) -> RenderFlags {
        self.flags
    }

    fn initialise(
        &mut self,
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        output_format: wgpu::TextureFormat,
    ) -> Result<()> {
        let pipeline = QuadPipeline::new(&device, output_format, self.config.width, self.config.height)?;

        let (timer, timing) = if self.config.timing {
            match GpuTimer::new(&device, &queue) {
                Some((timer, handle)) => (Some(timer), Some(handle)),
                None => (None, None),
            }
        } else {
            (None, None)
        };

        self.epoch += 1;
        // Recorded work from the previous device must never reach the new
        // queue; batches published concurrently with this purge are caught
        // by the epoch check at submit time.
        self.registry.purge();

        let stage = UploadStage::new(
            device.clone(),
            pipeline.surface.clone(),
            self.config.width,
            self.config.height,
            self.epoch,
            Arc::clone(&self.registry),
            timer,
        );
        if self.stages.send(stage).is_err() {
            tracing::debug!("no producer pump attached; upload stage dropped");
        }

        tracing::info!(
            epoch = self.epoch,
            width = self.config.width,
            height = self.config.height,
            ?output_format,
            "initialised bridge GPU resources"
        );
        self.gpu = Some(GpuState {
            device,
            queue,
            pipeline,
            timing,
            output_format,
        });
        Ok(())
    }
}

/// Claims the newest publication and drops it when it was recorded against
/// an earlier device generation. A discarded value is still consumed: the
/// slot is emptied either way, so old-device work never lingers.
fn claim_current<T>(
    registry: &SlotRegistry<T>,
    current_epoch: u64,
    epoch_of: impl Fn(&T) -> u64,
) -> Option<T> {
    let value = registry.claim()?;
    let epoch = epoch_of(&value);
    if epoch == current_epoch {
        Some(value)
    } else {
        tracing::debug!(
            batch_epoch = epoch,
            current_epoch,
            "discarding upload batch recorded against a previous device"
        );
        None
    }
}

impl RenderHook for FrameBridge {
    fn pre_render(&mut self, frame: &mut FrameContext<'_>) {
        let (Some(device), Some(queue)) = (frame.device.clone(), frame.queue.clone()) else {
            self.flags = RenderFlags::default();
            frame.flags = self.flags;
            return;
        };

        let needs_init = match &self.gpu {
            None => true,
            Some(gpu) => {
                !Arc::ptr_eq(&gpu.device, &device) || gpu.output_format != frame.output_format
            }
        };
        if needs_init {
            if let Err(error) = self.initialise(device, queue, frame.output_format) {
                tracing::warn!(%error, "bridge initialisation failed; retrying next frame");
                self.gpu = None;
                self.flags = RenderFlags::default();
                frame.flags = self.flags;
                return;
            }
        }

        self.flags = RenderFlags {
            rendering_enabled: frame.render_pass == RenderPass::Default,
            will_read_back_color: self.config.announce_readback,
        };
        frame.flags = self.flags;
    }

    fn render(&mut self, frame: &mut FrameContext<'_>) {
        if frame.device.is_none() {
            return;
        }
        let Some(gpu) = self.gpu.as_ref() else {
            return;
        };
        let Some(output) = frame.output else {
            return;
        };

        // Execute the newest upload before the draw that samples its result.
        if let Some(batch) = claim_current(&self.registry, self.epoch, |batch| batch.epoch) {
            let timing = batch.timing;
            gpu.queue.submit(std::iter::once(batch.commands));
            if timing {
                if let Some(handle) = &gpu.timing {
                    handle.request_resolve();
                }
            }
        }

        // Fixed draw: clear, bind the quad and surface view, draw. Runs even
        // on a no-new-frame tick so the last surface contents stay visible.
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("bridge draw encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("bridge quad pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: output,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&gpu.pipeline.pipeline);
            pass.set_bind_group(0, &gpu.pipeline.bind_group, &[]);
            pass.set_vertex_buffer(0, gpu.pipeline.vertex_buffer.slice(..));
            pass.set_index_buffer(gpu.pipeline.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed(0..gpu.pipeline.index_count, 0, 0..1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FrameContext;

    #[test]
    fn pre_render_without_device_disables_rendering() {
        let (mut bridge, _stages) = FrameBridge::new(BridgeConfig::new(64, 64));
        let mut frame = FrameContext::pre_render(
            None,
            None,
            RenderPass::Default,
            wgpu::TextureFormat::Rgba8Unorm,
        );
        bridge.pre_render(&mut frame);
        assert!(!frame.flags.rendering_enabled);
        assert!(!bridge.flags().rendering_enabled);
    }

    #[test]
    fn render_without_initialisation_is_a_no_op() {
        let (mut bridge, _stages) = FrameBridge::new(BridgeConfig::new(64, 64));
        let mut frame = FrameContext::render(
            None,
            None,
            RenderPass::Default,
            wgpu::TextureFormat::Rgba8Unorm,
            None,
            (0, 0),
        );
        // Zero updates, no device: a skipped frame, never a fault.
        bridge.render(&mut frame);
    }

    struct Recorded {
        epoch: u64,
        payload: u32,
    }

    #[test]
    fn stale_epoch_publications_are_discarded_not_handed_out() {
        let registry = SlotRegistry::new();
        registry.publish(Recorded {
            epoch: 1,
            payload: 7,
        });

        // The device changed: the bridge is now on epoch 2.
        assert!(claim_current(&registry, 2, |r| r.epoch).is_none());
        // Discarding consumes the slot; the stale value does not resurface.
        assert!(registry.claim().is_none());
    }

    #[test]
    fn current_epoch_publications_pass_through() {
        let registry = SlotRegistry::new();
        registry.publish(Recorded {
            epoch: 2,
            payload: 9,
        });

        let claimed = claim_current(&registry, 2, |r| r.epoch).expect("current epoch passes");
        assert_eq!(claimed.payload, 9);
        assert!(claim_current(&registry, 2, |r| r.epoch).is_none(), "claimed at most once");
    }

    #[test]
    fn readback_announcement_follows_config() {
        let mut config = BridgeConfig::new(8, 8);
        config.announce_readback = true;
        let (bridge, _stages) = FrameBridge::new(config);
        assert!(!bridge.flags().will_read_back_color, "no frame seen yet");
    }
}
