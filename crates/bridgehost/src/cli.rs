use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "bridgehost",
    author,
    version,
    about = "Offscreen host harness for the framebridge render plugin"
)]
pub struct Args {
    /// Target surface size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", default_value = "640x360")]
    pub size: String,

    /// Named shared-memory region to read frames from; can also be supplied
    /// via the `FRAMEBRIDGE_SHM` env var.
    #[arg(long, value_name = "NAME", env = "FRAMEBRIDGE_SHM")]
    pub shm: Option<String>,

    /// Generate an animated synthetic test pattern instead of reading
    /// shared memory.
    #[arg(long)]
    pub synthetic: bool,

    /// Number of host frames to drive before exiting.
    #[arg(long, value_name = "N", default_value_t = 300)]
    pub frames: u32,

    /// Host render-loop cadence in frames per second.
    #[arg(long, value_name = "FPS", default_value_t = 60.0)]
    pub fps: f32,

    /// Producer update cadence in updates per second.
    #[arg(long, value_name = "UPS", default_value_t = 60.0)]
    pub source_fps: f32,

    /// Write the final output target to this PNG after the last frame.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,

    /// Disable the GPU timestamp diagnostics on the upload path.
    #[arg(long)]
    pub no_timing: bool,
}

pub fn parse() -> Args {
    Args::parse()
}

/// Parses `WIDTHxHEIGHT` strings such as `1920x1080`.
pub fn parse_size(value: &str) -> anyhow::Result<(u32, u32)> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow::anyhow!("size must look like 1280x720, got '{value}'"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid width in '{value}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid height in '{value}'"))?;
    if width == 0 || height == 0 {
        anyhow::bail!("size dimensions must be non-zero, got '{value}'");
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_sizes() {
        assert_eq!(parse_size("1280x720").unwrap(), (1280, 720));
        assert_eq!(parse_size("64X64").unwrap(), (64, 64));
    }

    #[test]
    fn rejects_malformed_sizes() {
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x720").is_err());
        assert!(parse_size("widexhigh").is_err());
    }
}
