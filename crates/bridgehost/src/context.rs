//! Offscreen device and output-target creation for the harness.

use std::sync::Arc;

use anyhow::{Context, Result};

pub struct HostGpu {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub output: wgpu::Texture,
    pub output_view: wgpu::TextureView,
    pub output_format: wgpu::TextureFormat,
    pub size: (u32, u32),
}

pub fn create_gpu(width: u32, height: u32) -> Result<HostGpu> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .context("failed to find a suitable GPU adapter")?;

    let adapter_info = adapter.get_info();
    tracing::debug!(
        name = %adapter_info.name,
        backend = ?adapter_info.backend,
        device_type = ?adapter_info.device_type,
        "selected GPU adapter"
    );

    // Timestamp support is optional; the bridge degrades its diagnostics
    // when the features are missing.
    let timestamp_features = wgpu::Features::TIMESTAMP_QUERY
        | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS;
    let required_features = adapter.features() & timestamp_features;
    if required_features != timestamp_features {
        tracing::info!("adapter lacks timestamp queries; upload timing will be unavailable");
    }

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("bridgehost device"),
        required_features,
        required_limits: adapter.limits(),
        memory_hints: wgpu::MemoryHints::MemoryUsage,
        trace: wgpu::Trace::default(),
    }))
    .context("failed to create GPU device")?;

    let output_format = wgpu::TextureFormat::Rgba8Unorm;
    let output = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("bridgehost output target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: output_format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());

    Ok(HostGpu {
        device: Arc::new(device),
        queue: Arc::new(queue),
        output,
        output_view,
        output_format,
        size: (width, height),
    })
}
