mod emitter;
mod farm;
mod merge;
mod reduce;
mod spawn;
mod util;
mod window;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{bounded, unbounded};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(
    name = "seq2vid",
    version,
    about = "Turn an incrementally produced image sequence into a video"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory for numbered frames and encode them in parallel
    Watch(WatchOpts),
    /// Encode an already-complete frame sequence in one ffmpeg pass
    Single(SingleOpts),
}

#[derive(Args)]
struct WatchOpts {
    /// Directory the frames are written into
    input_dir: PathBuf,

    /// printf-style frame name pattern, e.g. img_%d.png
    pattern: String,

    /// Name of the final video file, e.g. out.mp4
    output: String,

    /// Total number of frames that will arrive
    #[arg(long)]
    total_frames: usize,

    /// Worker count. Default: all cores.
    #[arg(long)]
    workers: Option<usize>,

    /// Threads per ffmpeg child; 0 derives a fair share of the cores
    #[arg(long, default_value_t = 0)]
    ffmpeg_threads: usize,

    #[arg(long, default_value_t = 30)]
    framerate: u32,

    /// Re-encode partials and merge them pairwise as workers finish
    #[arg(long, default_value_t = false)]
    re_encode: bool,

    /// Optional audio file muxed into the final video
    #[arg(long)]
    audio: Option<PathBuf>,

    /// Staging directory for partial and merge artifacts
    #[arg(long, default_value = "tmp")]
    tmp_dir: PathBuf,

    /// Directory the final video lands in
    #[arg(long, default_value = "output")]
    out_dir: PathBuf,

    /// Keep the staging directory instead of deleting it
    #[arg(long, default_value_t = false)]
    keep_tmp: bool,
}

#[derive(Args)]
struct SingleOpts {
    input_dir: PathBuf,

    /// printf-style frame name pattern, e.g. img_%d.png
    pattern: String,

    /// Name of the final video file, e.g. out.mp4
    output: String,

    /// Number of frames to encode
    #[arg(long)]
    total_frames: usize,

    #[arg(long, default_value_t = 1)]
    ffmpeg_threads: usize,

    #[arg(long, default_value_t = 30)]
    framerate: u32,

    /// Run a second veryslow encode pass over the assembled video
    #[arg(long, default_value_t = false)]
    re_encode: bool,

    /// Optional audio file muxed into the final video
    #[arg(long)]
    audio: Option<PathBuf>,

    #[arg(long, default_value = "tmp")]
    tmp_dir: PathBuf,

    #[arg(long, default_value = "output")]
    out_dir: PathBuf,

    #[arg(long, default_value_t = false)]
    keep_tmp: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    util::ensure_ffmpeg_available().context("ffmpeg not found in PATH")?;

    match cli.cmd {
        Commands::Watch(opts) => run_watch(opts),
        Commands::Single(opts) => run_single(opts),
    }
}

fn run_watch(opts: WatchOpts) -> Result<()> {
    if opts.total_frames == 0 {
        bail!("--total-frames must be positive");
    }
    if !opts.input_dir.is_dir() {
        bail!("input dir {} does not exist", opts.input_dir.display());
    }
    let workers = opts.workers.unwrap_or_else(num_cpus::get).max(1);
    if workers > opts.total_frames {
        bail!(
            "worker count {workers} exceeds total frame count {}",
            opts.total_frames
        );
    }

    // Both re-encode preconditions fail before any watching starts.
    let tree = if opts.re_encode {
        if opts.total_frames % workers != 0 {
            bail!(
                "--re-encode needs total frames ({}) divisible by workers ({workers})",
                opts.total_frames
            );
        }
        Some(reduce::ReduceTree::new(workers)?)
    } else {
        None
    };

    let window_size = (opts.total_frames / workers) as u64;
    let threads = if opts.ffmpeg_threads == 0 {
        util::ffmpeg_threads(workers)
    } else {
        opts.ffmpeg_threads
    };

    fs::create_dir_all(&opts.tmp_dir)?;
    fs::create_dir_all(&opts.out_dir)?;

    let stage = spawn::Stage::new(opts.tmp_dir.clone(), opts.output.clone());
    let pattern = opts.input_dir.join(&opts.pattern);

    eprintln!(
        "Watch plan: frames={} workers={} window={} threads/child={} re_encode={}",
        opts.total_frames, workers, window_size, threads, opts.re_encode
    );

    let progress = ProgressBar::new(opts.total_frames as u64);
    progress.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {wide_bar} {pos}/{len} frames {msg}")
            .unwrap(),
    );

    let (task_tx, task_rx) = bounded::<emitter::Task>(workers);
    let (exit_tx, exit_rx) = unbounded::<spawn::ExitEvent>();
    let exit_poison = exit_tx.clone();
    let spawner = spawn::Spawner::new(exit_tx);

    let started = Instant::now();

    let emitter_handle = {
        let input_dir = opts.input_dir.clone();
        let progress = progress.clone();
        let total = opts.total_frames;
        thread::spawn(move || {
            let result = emitter::watch_frames(&input_dir, window_size, total, &task_tx, &progress);
            if result.is_err() {
                // Unblock the reducing loop; the run has already failed.
                let _ = exit_poison.send(spawn::ExitEvent {
                    partition: usize::MAX,
                    success: false,
                });
            }
            result
        })
    };

    let farm_cfg = farm::FarmConfig {
        workers,
        threads_per_child: threads,
        framerate: opts.framerate,
        re_encode: opts.re_encode,
        pattern,
        stage: stage.clone(),
    };
    let farm = farm::spawn_workers(farm_cfg, task_rx, spawner.clone());

    // The reducing loop runs here while workers are still encoding, so
    // sibling merges overlap the remaining leaf encodes.
    let reduce_result = tree.map(|tree| {
        reduce::reduce_loop(tree, &exit_rx, |lo, hi, into| {
            eprintln!(" merge: part {lo} + part {hi} -> part {into}");
            let cmd = spawn::merge_command(
                &stage.partition_path(lo),
                &stage.partition_path(hi),
                threads,
                &stage.partition_path(into),
            );
            spawner.spawn_tracked(cmd, into).map(|_| ())
        })
    });

    // Reap both stages before propagating anything, then let the most
    // upstream failure win: a dead worker also kills the emitter's channel,
    // so the farm error is the root cause when both report one.
    let farm_result = farm.join();
    let emitter_result = emitter_handle
        .join()
        .map_err(|_| anyhow!("emitter thread panicked"))?;
    progress.finish_with_message("all frames observed");
    let parts = farm_result?;
    let report = emitter_result?;

    let merged = match reduce_result {
        Some(root) => stage.partition_path(root?),
        None => {
            let destination = if opts.audio.is_some() {
                opts.tmp_dir.join(format!("merged_{}", opts.output))
            } else {
                opts.out_dir.join(&opts.output)
            };
            merge::concat_parts(parts, &opts.tmp_dir, destination)?
        }
    };

    let final_path = finalize(
        merged,
        opts.audio.as_deref(),
        threads,
        &opts.out_dir,
        &opts.output,
    )?;

    println!(
        "Run summary: frames={} windows={} workers={} window_size={} first_window_wait={} total_watch_wait={} elapsed={} output={}",
        report.frames_seen,
        report.windows_dispatched,
        workers,
        window_size,
        fmt_wait(report.first_window_wait),
        fmt_wait(report.total_wait),
        fmt_ms(started.elapsed()),
        final_path.display()
    );

    if !opts.keep_tmp {
        let _ = fs::remove_dir_all(&opts.tmp_dir);
    }
    Ok(())
}

fn run_single(opts: SingleOpts) -> Result<()> {
    if opts.total_frames == 0 {
        bail!("--total-frames must be positive");
    }
    if !opts.input_dir.is_dir() {
        bail!("input dir {} does not exist", opts.input_dir.display());
    }

    fs::create_dir_all(&opts.tmp_dir)?;
    fs::create_dir_all(&opts.out_dir)?;

    let pattern = opts.input_dir.join(&opts.pattern);
    let threads = opts.ffmpeg_threads.max(1);
    let needs_staging = opts.re_encode || opts.audio.is_some();
    let encoded = if needs_staging {
        opts.tmp_dir.join(format!("single_{}.mov", opts.output))
    } else {
        opts.out_dir.join(&opts.output)
    };

    eprintln!(
        "Single plan: frames={} threads={} re_encode={}",
        opts.total_frames, threads, opts.re_encode
    );
    let started = Instant::now();

    let cmd = spawn::encode_command(&spawn::EncodeArgs {
        pattern: &pattern,
        start_number: 1,
        frame_count: opts.total_frames,
        threads,
        framerate: opts.framerate,
        preset: "veryslow",
        output: &encoded,
    });
    wait_for(cmd, "sequential encode")?;

    let reencoded = if opts.re_encode {
        let target = if opts.audio.is_some() {
            opts.tmp_dir.join(format!("reencoded_{}.mov", opts.output))
        } else {
            opts.out_dir.join(&opts.output)
        };
        wait_for(
            spawn::reencode_command(&encoded, threads, &target),
            "re-encode pass",
        )?;
        target
    } else {
        encoded
    };

    let final_path = finalize(
        reencoded,
        opts.audio.as_deref(),
        threads,
        &opts.out_dir,
        &opts.output,
    )?;

    println!(
        "Run summary: frames={} elapsed={} output={}",
        opts.total_frames,
        fmt_ms(started.elapsed()),
        final_path.display()
    );

    if !opts.keep_tmp {
        let _ = fs::remove_dir_all(&opts.tmp_dir);
    }
    Ok(())
}

/// Lands the merged artifact in the output directory, muxing audio on the
/// way when requested.
fn finalize(
    merged: PathBuf,
    audio: Option<&Path>,
    threads: usize,
    out_dir: &Path,
    output_name: &str,
) -> Result<PathBuf> {
    let destination = out_dir.join(output_name);
    if let Some(audio) = audio {
        merge::mux_audio(&merged, audio, threads, &destination)?;
    } else if merged != destination {
        // Staged artifacts are .mov; a stream-copy remux lands them in the
        // destination container without another encode.
        merge::remux_copy(&merged, &destination)?;
    }
    Ok(destination)
}

fn wait_for(mut cmd: std::process::Command, what: &str) -> Result<()> {
    let status = cmd
        .status()
        .with_context(|| format!("failed to spawn ffmpeg for {what}"))?;
    if !status.success() {
        bail!("{what} failed: {status}");
    }
    Ok(())
}

fn fmt_wait(wait: Option<Duration>) -> String {
    wait.map(fmt_ms).unwrap_or_else(|| "-".to_string())
}

fn fmt_ms(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}
