use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use framebridge::{BridgeConfig, FrameBridge, FrameContext, FramePump, RenderHook, RenderPass};
use shmframe::{SharedMemorySource, SyntheticSource};
use tracing_subscriber::EnvFilter;

use crate::cli::{parse_size, Args};
use crate::context::{create_gpu, HostGpu};

pub fn run(args: Args) -> Result<()> {
    initialise_tracing();

    let (width, height) = parse_size(&args.size)?;
    let gpu = create_gpu(width, height)?;

    let mut config = BridgeConfig::new(width, height);
    config.timing = !args.no_timing;
    config.announce_readback = args.export.is_some();
    let (mut bridge, stages) = FrameBridge::new(config);

    let source_interval = Duration::from_secs_f32(1.0 / args.source_fps.max(1.0));
    let pump = if args.synthetic || args.shm.is_none() {
        if args.shm.is_none() && !args.synthetic {
            tracing::info!("no shared memory region named; using the synthetic test pattern");
        }
        FramePump::spawn(SyntheticSource::new(width, height), stages, source_interval)?
    } else {
        let name = args.shm.as_deref().unwrap_or_default();
        let source = SharedMemorySource::open_named(name, width, height)
            .with_context(|| format!("failed to open shared memory region '{name}'"))?;
        FramePump::spawn(source, stages, source_interval)?
    };

    let frame_interval = Duration::from_secs_f32(1.0 / args.fps.max(1.0));
    tracing::info!(
        frames = args.frames,
        width,
        height,
        "driving host render loop"
    );

    for frame_index in 0..args.frames {
        let mut pre = FrameContext::pre_render(
            Some(gpu.device.clone()),
            Some(gpu.queue.clone()),
            RenderPass::Default,
            gpu.output_format,
        );
        bridge.pre_render(&mut pre);

        // The host honours the flags the plugin computed: no draw call for a
        // disabled pass.
        if pre.flags.rendering_enabled {
            let mut render = FrameContext::render(
                Some(gpu.device.clone()),
                Some(gpu.queue.clone()),
                RenderPass::Default,
                gpu.output_format,
                Some(&gpu.output_view),
                gpu.size,
            );
            bridge.render(&mut render);
        } else {
            tracing::trace!(frame_index, "rendering disabled this frame");
        }

        std::thread::sleep(frame_interval);
    }

    if let Some(path) = args.export.as_deref() {
        export_png(&gpu, path)?;
        tracing::info!(path = %path.display(), "wrote output target");
    }

    pump.stop();
    Ok(())
}

pub fn initialise_tracing() {
    let default_filter =
        "warn,bridgehost=info,framebridge=info,shmframe=info,naga=error,wgpu=error,wgpu_core=error,wgpu_hal=error";
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Copies the output target into a read-back buffer and saves it as a PNG.
fn export_png(gpu: &HostGpu, path: &Path) -> Result<()> {
    let (width, height) = gpu.size;
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded = unpadded.div_ceil(align) * align;

    let readback = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("bridgehost readback"),
        size: (padded * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("bridgehost readback encoder"),
        });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: &gpu.output,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &readback,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let (sender, receiver) = crossbeam_channel::bounded(1);
    readback
        .slice(..)
        .map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
    gpu.device
        .poll(wgpu::PollType::Wait)
        .context("device poll failed during readback")?;
    receiver
        .recv()
        .context("readback map callback never fired")?
        .context("failed to map readback buffer")?;

    let mut pixels = Vec::with_capacity((unpadded * height) as usize);
    {
        let mapped = readback.slice(..).get_mapped_range();
        for row in 0..height {
            let start = (row * padded) as usize;
            pixels.extend_from_slice(&mapped[start..start + unpadded as usize]);
        }
    }
    readback.unmap();

    let image = image::RgbaImage::from_raw(width, height, pixels)
        .context("readback size mismatch while building image")?;
    image
        .save(path)
        .with_context(|| format!("failed to write PNG at {}", path.display()))?;
    Ok(())
}
