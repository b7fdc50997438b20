//! Frame sources for the bridge: a named shared-memory region owned by an
//! external producer process, and a synthetic pattern generator for demos
//! and tests.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Result;
use framebridge::FrameSource;
use memmap2::Mmap;

pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open shared memory region at {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("shared memory region at {path} holds {actual} bytes, need at least {expected}")]
    TooSmall {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
}

/// Read-only view of a named, fixed-size shared memory region containing one
/// tightly packed 4-byte-per-pixel frame.
///
/// The region is owned by an external process; this side never writes it and
/// does not interpret the pixel byte order beyond its size.
pub struct SharedMemorySource {
    map: Mmap,
    frame_len: usize,
}

impl SharedMemorySource {
    /// Opens a region published under `name` in the system shared-memory
    /// directory (`/dev/shm` on Linux).
    pub fn open_named(name: &str, width: u32, height: u32) -> Result<Self, SourceError> {
        Self::open_path(Path::new("/dev/shm").join(name), width, height)
    }

    /// Opens a region backed by an explicit filesystem path.
    pub fn open_path(
        path: impl Into<PathBuf>,
        width: u32,
        height: u32,
    ) -> Result<Self, SourceError> {
        let path = path.into();
        let frame_len = width as usize * height as usize * BYTES_PER_PIXEL;

        let file = File::open(&path).map_err(|source| SourceError::Open {
            path: path.clone(),
            source,
        })?;
        // Read-only mapping; the producer process owns the write side.
        let map = unsafe { Mmap::map(&file) }.map_err(|source| SourceError::Open {
            path: path.clone(),
            source,
        })?;

        if map.len() < frame_len {
            return Err(SourceError::TooSmall {
                path,
                expected: frame_len,
                actual: map.len(),
            });
        }

        tracing::info!(path = %path.display(), frame_len, "mapped shared memory frame source");
        Ok(Self { map, frame_len })
    }
}

impl FrameSource for SharedMemorySource {
    fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn read_frame(&mut self, out: &mut [u8]) -> Result<()> {
        out[..self.frame_len].copy_from_slice(&self.map[..self.frame_len]);
        Ok(())
    }
}

/// Procedurally generated animated gradient, for running the bridge without
/// an external producer.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    tick: u32,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    fn read_frame(&mut self, out: &mut [u8]) -> Result<()> {
        let phase = self.tick.wrapping_mul(3) as u8;
        for y in 0..self.height {
            for x in 0..self.width {
                let offset = ((y * self.width + x) as usize) * BYTES_PER_PIXEL;
                let fx = (x * 255 / self.width.max(1)) as u8;
                let fy = (y * 255 / self.height.max(1)) as u8;
                // Packed BGRA.
                out[offset] = fx.wrapping_add(phase);
                out[offset + 1] = fy;
                out[offset + 2] = phase;
                out[offset + 3] = 255;
            }
        }
        self.tick = self.tick.wrapping_add(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn shared_memory_source_reads_exact_bytes() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        let frame: Vec<u8> = (0..2 * 2 * BYTES_PER_PIXEL).map(|i| i as u8).collect();
        file.write_all(&frame).unwrap();
        file.flush().unwrap();

        let mut source = SharedMemorySource::open_path(file.path(), 2, 2).expect("open source");
        assert_eq!(source.frame_len(), frame.len());

        let mut out = vec![0u8; frame.len()];
        source.read_frame(&mut out).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn undersized_region_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(&[0u8; 8]).unwrap();
        file.flush().unwrap();

        let result = SharedMemorySource::open_path(file.path(), 4, 4);
        assert!(matches!(result, Err(SourceError::TooSmall { .. })));
    }

    #[test]
    fn missing_region_reports_open_error() {
        let result = SharedMemorySource::open_path("/nonexistent/framebridge-test", 2, 2);
        assert!(matches!(result, Err(SourceError::Open { .. })));
    }

    #[test]
    fn synthetic_source_animates() {
        let mut source = SyntheticSource::new(4, 4);
        let mut first = vec![0u8; source.frame_len()];
        let mut second = vec![0u8; source.frame_len()];
        source.read_frame(&mut first).unwrap();
        source.read_frame(&mut second).unwrap();
        assert_ne!(first, second, "successive frames should differ");
        assert!(first.chunks(4).all(|px| px[3] == 255));
    }
}
