//! Producer-side input: where raw frames come from.

use anyhow::Result;

/// A fixed-size supplier of tightly packed 4-byte-per-pixel frames.
///
/// The byte order is whatever the target surface expects; the bridge copies
/// it through verbatim.
pub trait FrameSource: Send {
    /// Number of bytes in one full frame (`width * height * 4`).
    fn frame_len(&self) -> usize;

    /// Copies the current frame into `out`, which is at least
    /// [`frame_len`](Self::frame_len) bytes.
    fn read_frame(&mut self, out: &mut [u8]) -> Result<()>;
}
