use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::thread;

/// Exit notice for a tracked child, delivered on the shared exit channel and
/// consumed by the reducing loop.
#[derive(Debug, Clone, Copy)]
pub struct ExitEvent {
    pub partition: usize,
    pub success: bool,
}

/// Per-invocation parameters of a leaf encode. The frame pattern is handed
/// to ffmpeg verbatim (e.g. `frames/img_%d.png`); the start number is the
/// number of the first frame as it appears in the filenames.
pub struct EncodeArgs<'a> {
    pub pattern: &'a Path,
    pub start_number: u64,
    pub frame_count: usize,
    pub threads: usize,
    pub framerate: u32,
    pub preset: &'a str,
    pub output: &'a Path,
}

pub fn encode_command(args: &EncodeArgs) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-framerate")
        .arg(args.framerate.to_string())
        .arg("-start_number")
        .arg(args.start_number.to_string())
        .arg("-i")
        .arg(args.pattern)
        .arg("-threads")
        .arg(args.threads.to_string())
        .arg("-frames:v")
        .arg(args.frame_count.to_string())
        .arg("-vcodec")
        .arg("libx264")
        .arg("-preset")
        .arg(args.preset)
        .arg(args.output)
        .arg("-loglevel")
        .arg("error")
        .arg("-stats")
        .arg("-nostdin");
    cmd
}

/// Pairwise merge of two partial artifacts with the concat filter. `left`
/// must be the lower partition so frame order is preserved.
pub fn merge_command(left: &Path, right: &Path, threads: usize, output: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-i")
        .arg(left)
        .arg("-i")
        .arg(right)
        .arg("-filter_complex")
        .arg(" [0:v] [1:v] concat=n=2:v=1 ")
        .arg("-c:v")
        .arg("libx264")
        .arg("-threads")
        .arg(threads.to_string())
        .arg(output)
        .arg("-loglevel")
        .arg("error")
        .arg("-stats")
        .arg("-nostdin");
    cmd
}

/// Second encode pass over an already-assembled video, used by the
/// sequential path when re-encoding is requested.
pub fn reencode_command(input: &Path, threads: usize, output: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(input)
        .arg("-c:v")
        .arg("libx264")
        .arg("-preset")
        .arg("veryslow")
        .arg("-c:a")
        .arg("copy")
        .arg("-threads")
        .arg(threads.to_string())
        .arg(output)
        .arg("-nostdin");
    cmd
}

/// Maps partition indices (leaf or merge result) to artifact paths in the
/// staging directory. Merge ordering and artifact naming both key off the
/// partition index, so the mapping must stay deterministic.
#[derive(Debug, Clone)]
pub struct Stage {
    dir: PathBuf,
    output_name: String,
}

impl Stage {
    pub fn new(dir: PathBuf, output_name: impl Into<String>) -> Self {
        Self {
            dir,
            output_name: output_name.into(),
        }
    }

    pub fn partition_path(&self, partition: usize) -> PathBuf {
        self.dir
            .join(format!("part{:03}_{}.mov", partition, self.output_name))
    }
}

/// Launches external encode processes. Untracked spawns hand the child back
/// to the caller; tracked spawns register the partition and harvest the exit
/// asynchronously onto the exit channel.
#[derive(Clone)]
pub struct Spawner {
    exits: Sender<ExitEvent>,
}

impl Spawner {
    pub fn new(exits: Sender<ExitEvent>) -> Self {
        Self { exits }
    }

    /// Fire-and-forget spawn; the caller owns the child and reaps it.
    pub fn spawn(&self, mut cmd: Command) -> Result<Child> {
        cmd.spawn()
            .with_context(|| format!("failed to spawn {:?}", cmd.get_program()))
    }

    /// Spawns the command and waits for it on a harvest thread, posting an
    /// `ExitEvent` tagged with `partition` when it finishes. A spawn that
    /// fails to launch posts a failure event so the consumer of the exit
    /// channel never waits on a child that does not exist.
    pub fn spawn_tracked(&self, cmd: Command, partition: usize) -> Result<u32> {
        let mut child = match self.spawn(cmd) {
            Ok(child) => child,
            Err(err) => {
                let _ = self.exits.send(ExitEvent {
                    partition,
                    success: false,
                });
                return Err(err);
            }
        };
        let pid = child.id();
        let exits = self.exits.clone();
        thread::spawn(move || {
            let success = child.wait().map(|s| s.success()).unwrap_or(false);
            let _ = exits.send(ExitEvent { partition, success });
        });
        Ok(pid)
    }
}
