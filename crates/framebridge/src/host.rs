//! Contract between the bridge and the host render loop.
//!
//! The host owns threading and timing: it calls [`RenderHook::pre_render`]
//! once per frame with a device handle and pass identifier, then
//! [`RenderHook::render`] with the output target for that pass. Device
//! handles may be swapped at any time; implementations must re-initialise
//! when that happens.

use std::sync::Arc;

/// Identifies which pass of the host frame is being rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderPass {
    /// The main colour pass; the bridge only draws here.
    Default,
    /// Any auxiliary pass (reflections, shadows, ...), identified by the
    /// host's own numbering.
    Auxiliary(u32),
}

/// Per-frame output record handed back to the host.
///
/// The host uses these to decide whether to invoke the draw at all and
/// whether a colour read-back will follow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderFlags {
    pub rendering_enabled: bool,
    pub will_read_back_color: bool,
}

/// Everything the host supplies for one callback invocation.
///
/// `pre_render` calls carry the device and pass; `render` calls additionally
/// carry the output target. Missing handles mean "nothing to do this tick",
/// never an error.
pub struct FrameContext<'a> {
    pub device: Option<Arc<wgpu::Device>>,
    pub queue: Option<Arc<wgpu::Queue>>,
    pub render_pass: RenderPass,
    pub output_format: wgpu::TextureFormat,
    pub output: Option<&'a wgpu::TextureView>,
    pub output_size: (u32, u32),
    /// Written by the hook during `pre_render`.
    pub flags: RenderFlags,
}

impl<'a> FrameContext<'a> {
    /// Context for a `pre_render` call (no output target yet).
    pub fn pre_render(
        device: Option<Arc<wgpu::Device>>,
        queue: Option<Arc<wgpu::Queue>>,
        render_pass: RenderPass,
        output_format: wgpu::TextureFormat,
    ) -> Self {
        Self {
            device,
            queue,
            render_pass,
            output_format,
            output: None,
            output_size: (0, 0),
            flags: RenderFlags::default(),
        }
    }

    /// Context for a `render` call against `output`.
    pub fn render(
        device: Option<Arc<wgpu::Device>>,
        queue: Option<Arc<wgpu::Queue>>,
        render_pass: RenderPass,
        output_format: wgpu::TextureFormat,
        output: Option<&'a wgpu::TextureView>,
        output_size: (u32, u32),
    ) -> Self {
        Self {
            device,
            queue,
            render_pass,
            output_format,
            output,
            output_size,
            flags: RenderFlags::default(),
        }
    }
}

/// The callback pair the host dispatches once per frame.
pub trait RenderHook {
    fn pre_render(&mut self, frame: &mut FrameContext<'_>);
    fn render(&mut self, frame: &mut FrameContext<'_>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_default_to_disabled() {
        let flags = RenderFlags::default();
        assert!(!flags.rendering_enabled);
        assert!(!flags.will_read_back_color);
    }

    #[test]
    fn pre_render_context_has_no_output() {
        let frame = FrameContext::pre_render(
            None,
            None,
            RenderPass::Default,
            wgpu::TextureFormat::Rgba8Unorm,
        );
        assert!(frame.output.is_none());
        assert_eq!(frame.output_size, (0, 0));
    }
}
