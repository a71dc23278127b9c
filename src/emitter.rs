use crate::util;
use crate::window::WindowTracker;

use anyhow::{bail, Context, Result};
use crossbeam_channel::Sender;
use indicatif::ProgressBar;
use notify::event::{AccessKind, AccessMode, EventKind};
use notify::{RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// One completed (or terminal partial) window, owned by a single worker once
/// dispatched. Frame indices are 0-based and ascending.
#[derive(Debug, Clone)]
pub struct Task {
    pub window: u64,
    pub frames: Vec<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct EmitterReport {
    pub frames_seen: usize,
    pub windows_dispatched: usize,
    /// First observed event until the first completed window was dispatched.
    pub first_window_wait: Option<Duration>,
    /// First observed event until the configured frame total was reached.
    pub total_wait: Option<Duration>,
}

/// Blocking watch loop over the input directory.
///
/// Reacts to close-after-write events only, so partially written frames are
/// never picked up. Non-image names and directory entries are ignored.
/// Returns once the configured total has been observed, after flushing a
/// trailing partial window. A frame that never arrives stalls this loop
/// indefinitely; there is no timeout.
pub fn watch_frames(
    input_dir: &Path,
    window_size: u64,
    total_frames: usize,
    tasks: &Sender<Task>,
    progress: &ProgressBar,
) -> Result<EmitterReport> {
    let (fs_tx, fs_rx) = mpsc::channel();
    let mut watcher =
        notify::recommended_watcher(fs_tx).context("failed to create directory watcher")?;
    watcher
        .watch(input_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", input_dir.display()))?;

    let mut tracker = WindowTracker::new(window_size);
    let mut report = EmitterReport::default();
    let mut started: Option<Instant> = None;

    'watch: while report.frames_seen < total_frames {
        let event = fs_rx
            .recv()
            .context("watch event stream ended unexpectedly")?
            .context("directory watch error")?;
        if !matches!(
            event.kind,
            EventKind::Access(AccessKind::Close(AccessMode::Write))
        ) {
            continue;
        }
        if started.is_none() {
            started = Some(Instant::now());
        }

        for path in &event.paths {
            if path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !util::is_image_name(name) {
                continue;
            }

            let window = tracker.add_frame(name)?;
            report.frames_seen += 1;
            progress.inc(1);

            if tracker.is_complete(window) {
                let frames = tracker.flush(window)?;
                dispatch(tasks, Task { window, frames })?;
                report.windows_dispatched += 1;
                progress.set_message(format!("window {window} complete"));
                if report.first_window_wait.is_none() {
                    report.first_window_wait = started.map(|t| t.elapsed());
                }
            }

            if report.frames_seen == total_frames {
                break 'watch;
            }
        }
    }

    report.total_wait = started.map(|t| t.elapsed());

    // The stream is bounded, so at most one short window can still be open.
    if let Some(window) = tracker.last_window() {
        let frames = tracker.flush(window)?;
        if !frames.is_empty() {
            dispatch(tasks, Task { window, frames })?;
            report.windows_dispatched += 1;
        }
    }

    Ok(report)
}

fn dispatch(tasks: &Sender<Task>, task: Task) -> Result<()> {
    if tasks.send(task).is_err() {
        bail!("task channel closed: the worker farm is gone");
    }
    Ok(())
}
