use anyhow::{bail, Context, Result};
use std::process::Command;

/// Frame image extensions the emitter reacts to; everything else in the
/// watched directory is ignored.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg"];

pub fn ensure_ffmpeg_available() -> Result<()> {
    let out = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .context("failed to run ffmpeg -version")?;
    if !out.status.success() {
        bail!("ffmpeg exists but returned non-zero on -version");
    }
    Ok(())
}

pub fn is_image_name(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.iter().any(|e| *e == ext)
        })
        .unwrap_or(false)
}

/// Threads handed to each ffmpeg child. ffmpeg stops scaling well past 16
/// threads, so the per-process share of the cores is capped there.
pub fn ffmpeg_threads(workers: usize) -> usize {
    let cores = num_cpus::get().max(1);
    (cores / workers.max(1)).clamp(1, 16)
}
