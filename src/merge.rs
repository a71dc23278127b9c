use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Concatenates the sorted partial videos into `output` with the concat
/// demuxer, copying streams without a re-encode. A single partial is handed
/// back as-is and no process is spawned.
pub fn concat_parts(mut parts: Vec<PathBuf>, list_dir: &Path, output: PathBuf) -> Result<PathBuf> {
    if parts.is_empty() {
        bail!("no partial videos to concatenate");
    }
    parts.sort();
    if parts.len() == 1 {
        return Ok(parts.remove(0));
    }

    let list_path = list_dir.join("concat_parts.txt");
    write_concat_list(&parts, &list_path)?;

    let status = Command::new("ffmpeg")
        .arg("-loglevel")
        .arg("error")
        .arg("-f")
        .arg("concat")
        .arg("-safe")
        .arg("0")
        .arg("-i")
        .arg(&list_path)
        .arg("-c")
        .arg("copy")
        .arg(&output)
        .arg("-nostdin")
        .status()
        .context("failed to run ffmpeg concat")?;
    let _ = fs::remove_file(&list_path);
    if !status.success() {
        bail!("concat of {} parts failed: {status}", parts.len());
    }
    Ok(output)
}

/// Concat-demuxer entries resolve relative to the list file, so every part
/// is written as an absolute path.
fn write_concat_list(parts: &[PathBuf], list_path: &Path) -> Result<()> {
    let mut list = fs::File::create(list_path)
        .with_context(|| format!("create {}", list_path.display()))?;
    for part in parts {
        let abs = fs::canonicalize(part)
            .with_context(|| format!("resolve partial video {}", part.display()))?;
        writeln!(list, "file '{}'", abs.display())?;
    }
    Ok(())
}

/// Stream-copies `input` into `output`, rewriting the container only.
pub fn remux_copy(input: &Path, output: &Path) -> Result<()> {
    let status = Command::new("ffmpeg")
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(input)
        .arg("-c")
        .arg("copy")
        .arg(output)
        .arg("-nostdin")
        .status()
        .context("failed to run ffmpeg remux")?;
    if !status.success() {
        bail!("remux of {} failed: {status}", input.display());
    }
    Ok(())
}

/// Muxes `audio` into `video`, stream-copying both and cutting at the
/// shorter of the two.
pub fn mux_audio(video: &Path, audio: &Path, threads: usize, output: &Path) -> Result<()> {
    let status = Command::new("ffmpeg")
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(video)
        .arg("-i")
        .arg(audio)
        .arg("-shortest")
        .arg("-c")
        .arg("copy")
        .arg("-map")
        .arg("0:v:0")
        .arg("-map")
        .arg("1:a:0")
        .arg("-threads")
        .arg(threads.to_string())
        .arg(output)
        .arg("-nostdin")
        .status()
        .context("failed to run ffmpeg audio mux")?;
    if !status.success() {
        bail!("audio mux failed: {status}");
    }
    Ok(())
}
