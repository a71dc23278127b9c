use crate::emitter::Task;
use crate::spawn::{encode_command, EncodeArgs, Spawner, Stage};

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::Receiver;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

#[derive(Clone)]
pub struct FarmConfig {
    pub workers: usize,
    pub threads_per_child: usize,
    pub framerate: u32,
    pub re_encode: bool,
    /// printf-style frame pattern handed to ffmpeg, e.g. `frames/img_%d.png`.
    pub pattern: PathBuf,
    pub stage: Stage,
}

/// Bounded pool of encode workers sharing one task channel. Tasks are pulled
/// first-come first-served; the partition index comes from the task's window
/// id, so frame order is preserved no matter which worker runs a window.
pub struct Farm {
    handles: Vec<JoinHandle<Result<Vec<PathBuf>>>>,
}

pub fn spawn_workers(cfg: FarmConfig, tasks: Receiver<Task>, spawner: Spawner) -> Farm {
    let handles = (0..cfg.workers)
        .map(|worker| {
            let cfg = cfg.clone();
            let tasks = tasks.clone();
            let spawner = spawner.clone();
            thread::spawn(move || worker_loop(worker, &cfg, &tasks, &spawner))
        })
        .collect();
    Farm { handles }
}

fn worker_loop(
    worker: usize,
    cfg: &FarmConfig,
    tasks: &Receiver<Task>,
    spawner: &Spawner,
) -> Result<Vec<PathBuf>> {
    let mut produced = Vec::new();

    while let Ok(task) = tasks.recv() {
        let Some(&start) = task.frames.first() else {
            continue;
        };
        let partition = task.window as usize;
        let output = cfg.stage.partition_path(partition);
        eprintln!(
            " worker {worker}: window {} frames {}..{}",
            task.window,
            start,
            start + task.frames.len() as u64 - 1
        );

        let preset = if cfg.re_encode { "veryslow" } else { "medium" };
        // Frame names are 1-based; the window's 0-based start maps back.
        let cmd = encode_command(&EncodeArgs {
            pattern: &cfg.pattern,
            start_number: start + 1,
            frame_count: task.frames.len(),
            threads: cfg.threads_per_child,
            framerate: cfg.framerate,
            preset,
            output: &output,
        });

        if cfg.re_encode {
            // The reducing loop harvests this child asynchronously.
            spawner.spawn_tracked(cmd, partition)?;
        } else {
            let mut child = spawner.spawn(cmd)?;
            let status = child.wait()?;
            if !status.success() {
                bail!("encode for window {} failed: {status}", task.window);
            }
        }
        produced.push(output);
    }

    Ok(produced)
}

impl Farm {
    /// Waits for every worker and returns all partial artifact paths in
    /// partition order.
    pub fn join(self) -> Result<Vec<PathBuf>> {
        let mut produced = Vec::new();
        for handle in self.handles {
            let paths = handle
                .join()
                .map_err(|_| anyhow!("encode worker thread panicked"))??;
            produced.extend(paths);
        }
        produced.sort();
        Ok(produced)
    }
}
