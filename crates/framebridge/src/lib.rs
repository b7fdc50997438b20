//! framebridge bridges an external, independently-timed pixel producer into
//! a host-driven GPU render loop.
//!
//! The producer side packs each raw frame into a GPU command batch; the
//! consumer side, invoked by the host once per displayed frame, always
//! executes the most recently completed batch. The handoff between the two
//! is a lock-free triple-slot rotation ([`SlotRegistry`]): the producer
//! never blocks the render thread, the consumer never sees a half-written
//! batch, and no batch executes twice.
//!
//! Wiring order: build a [`FrameBridge`], hand its stage receiver to
//! [`FramePump::spawn`] together with a [`FrameSource`], then let the host
//! drive the bridge through the [`RenderHook`] callbacks.

pub mod gpu;
pub mod host;
pub mod plugin;
pub mod pump;
pub mod slots;
pub mod source;

pub use gpu::timing::TimingSample;
pub use gpu::upload::{UploadBatch, UploadStage};
pub use host::{FrameContext, RenderFlags, RenderHook, RenderPass};
pub use plugin::{BridgeConfig, FrameBridge};
pub use pump::{FramePump, UploadSink};
pub use slots::SlotRegistry;
pub use source::FrameSource;
