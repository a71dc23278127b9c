use std::fs;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn combined_output(output: &std::process::Output) -> String {
    format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

/// Renders `count` tiny test-card frames named img_1.png..img_<count>.png.
fn generate_frames(dir: &Path, count: usize) {
    fs::create_dir_all(dir).expect("mkdir frames");
    let status = Command::new("ffmpeg")
        .arg("-loglevel")
        .arg("error")
        .arg("-f")
        .arg("lavfi")
        .arg("-i")
        .arg("testsrc=size=64x64:rate=8")
        .arg("-frames:v")
        .arg(count.to_string())
        .arg(dir.join("img_%d.png"))
        .arg("-nostdin")
        .status()
        .expect("run ffmpeg testsrc");
    assert!(status.success(), "frame generation failed");
}

fn generate_audio(path: &Path) {
    let status = Command::new("ffmpeg")
        .arg("-loglevel")
        .arg("error")
        .arg("-f")
        .arg("lavfi")
        .arg("-i")
        .arg("sine=frequency=440:duration=2")
        .arg("-c:a")
        .arg("aac")
        .arg(path)
        .arg("-nostdin")
        .status()
        .expect("run ffmpeg sine");
    assert!(status.success(), "audio generation failed");
}

/// Copies pre-rendered frames into the watched directory one by one, so the
/// pipeline sees them arrive incrementally.
fn deliver_frames(src: &Path, dst: &Path, count: usize) {
    for n in 1..=count {
        let name = format!("img_{n}.png");
        fs::copy(src.join(&name), dst.join(&name)).expect("deliver frame");
        thread::sleep(Duration::from_millis(15));
    }
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> std::process::Output {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match child.try_wait().expect("poll pipeline") {
            Some(_) => return child.wait_with_output().expect("collect pipeline output"),
            None => thread::sleep(Duration::from_millis(100)),
        }
    }
    let _ = child.kill();
    let output = child.wait_with_output().expect("collect pipeline output");
    panic!(
        "pipeline timed out after {:?}; output: {}",
        timeout,
        combined_output(&output)
    );
}

fn assert_video_exists(path: &Path, context: &str) {
    let meta = fs::metadata(path)
        .unwrap_or_else(|_| panic!("{context}: missing output {}", path.display()));
    assert!(meta.len() > 0, "{context}: empty output {}", path.display());
}

#[test]
fn single_pass_encodes_a_complete_sequence() {
    if !ffmpeg_available() {
        return;
    }

    let tmp = TempDir::new().expect("tempdir");
    let frames = tmp.path().join("frames");
    generate_frames(&frames, 12);

    let out_dir = tmp.path().join("out");
    let run = Command::new(assert_cmd::cargo::cargo_bin!("seq2vid"))
        .arg("single")
        .arg(&frames)
        .arg("img_%d.png")
        .arg("out.mp4")
        .arg("--total-frames")
        .arg("12")
        .arg("--ffmpeg-threads")
        .arg("2")
        .arg("--framerate")
        .arg("8")
        .arg("--tmp-dir")
        .arg(tmp.path().join("stage"))
        .arg("--out-dir")
        .arg(&out_dir)
        .output()
        .expect("run single");
    assert!(run.status.success(), "{}", combined_output(&run));
    assert_video_exists(&out_dir.join("out.mp4"), "single");
    assert!(combined_output(&run).contains("Run summary:"));
}

#[test]
fn single_pass_muxes_audio_when_requested() {
    if !ffmpeg_available() {
        return;
    }

    let tmp = TempDir::new().expect("tempdir");
    let frames = tmp.path().join("frames");
    generate_frames(&frames, 8);
    let audio = tmp.path().join("tone.m4a");
    generate_audio(&audio);

    let out_dir = tmp.path().join("out");
    let run = Command::new(assert_cmd::cargo::cargo_bin!("seq2vid"))
        .arg("single")
        .arg(&frames)
        .arg("img_%d.png")
        .arg("out.mp4")
        .arg("--total-frames")
        .arg("8")
        .arg("--framerate")
        .arg("8")
        .arg("--audio")
        .arg(&audio)
        .arg("--tmp-dir")
        .arg(tmp.path().join("stage"))
        .arg("--out-dir")
        .arg(&out_dir)
        .output()
        .expect("run single with audio");
    assert!(run.status.success(), "{}", combined_output(&run));
    assert_video_exists(&out_dir.join("out.mp4"), "single+audio");
}

#[test]
fn watch_concat_mode_batches_windows_and_concatenates() {
    if !ffmpeg_available() {
        return;
    }

    let tmp = TempDir::new().expect("tempdir");
    let prepared = tmp.path().join("prepared");
    generate_frames(&prepared, 16);

    let input = tmp.path().join("incoming");
    fs::create_dir_all(&input).expect("mkdir incoming");
    let out_dir = tmp.path().join("out");

    let child = Command::new(assert_cmd::cargo::cargo_bin!("seq2vid"))
        .arg("watch")
        .arg(&input)
        .arg("img_%d.png")
        .arg("out.mp4")
        .arg("--total-frames")
        .arg("16")
        .arg("--workers")
        .arg("4")
        .arg("--framerate")
        .arg("8")
        .arg("--tmp-dir")
        .arg(tmp.path().join("stage"))
        .arg("--out-dir")
        .arg(&out_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn watch pipeline");

    // let the watch register before frames start arriving
    thread::sleep(Duration::from_millis(1000));
    deliver_frames(&prepared, &input, 16);

    let output = wait_with_timeout(child, Duration::from_secs(180));
    assert!(output.status.success(), "{}", combined_output(&output));
    let text = combined_output(&output);
    assert!(text.contains("windows=4"), "missing window count: {text}");
    assert_video_exists(&out_dir.join("out.mp4"), "watch concat");
}

#[test]
fn watch_re_encode_merges_partials_pairwise() {
    if !ffmpeg_available() {
        return;
    }

    let tmp = TempDir::new().expect("tempdir");
    let prepared = tmp.path().join("prepared");
    generate_frames(&prepared, 16);

    let input = tmp.path().join("incoming");
    fs::create_dir_all(&input).expect("mkdir incoming");
    let out_dir = tmp.path().join("out");

    let child = Command::new(assert_cmd::cargo::cargo_bin!("seq2vid"))
        .arg("watch")
        .arg(&input)
        .arg("img_%d.png")
        .arg("out.mp4")
        .arg("--total-frames")
        .arg("16")
        .arg("--workers")
        .arg("4")
        .arg("--framerate")
        .arg("8")
        .arg("--re-encode")
        .arg("--tmp-dir")
        .arg(tmp.path().join("stage"))
        .arg("--out-dir")
        .arg(&out_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn watch pipeline");

    thread::sleep(Duration::from_millis(1000));
    deliver_frames(&prepared, &input, 16);

    let output = wait_with_timeout(child, Duration::from_secs(180));
    assert!(output.status.success(), "{}", combined_output(&output));
    let text = combined_output(&output);
    // 4 leaves reduce through 2 sibling merges plus the root merge
    assert_eq!(
        text.matches(" merge: ").count(),
        3,
        "expected exactly 3 merges: {text}"
    );
    assert_video_exists(&out_dir.join("out.mp4"), "watch re-encode");
}

#[test]
fn re_encode_rejects_a_non_power_of_two_worker_count() {
    if !ffmpeg_available() {
        return;
    }

    let tmp = TempDir::new().expect("tempdir");
    let input = tmp.path().join("incoming");
    fs::create_dir_all(&input).expect("mkdir incoming");

    let run = Command::new(assert_cmd::cargo::cargo_bin!("seq2vid"))
        .arg("watch")
        .arg(&input)
        .arg("img_%d.png")
        .arg("out.mp4")
        .arg("--total-frames")
        .arg("18")
        .arg("--workers")
        .arg("3")
        .arg("--re-encode")
        .arg("--tmp-dir")
        .arg(tmp.path().join("stage"))
        .arg("--out-dir")
        .arg(tmp.path().join("out"))
        .output()
        .expect("run watch");
    assert!(!run.status.success(), "expected fast failure");
    assert!(
        combined_output(&run).contains("power-of-two"),
        "{}",
        combined_output(&run)
    );
}

#[test]
fn re_encode_rejects_totals_that_do_not_divide_across_workers() {
    if !ffmpeg_available() {
        return;
    }

    let tmp = TempDir::new().expect("tempdir");
    let input = tmp.path().join("incoming");
    fs::create_dir_all(&input).expect("mkdir incoming");

    let run = Command::new(assert_cmd::cargo::cargo_bin!("seq2vid"))
        .arg("watch")
        .arg(&input)
        .arg("img_%d.png")
        .arg("out.mp4")
        .arg("--total-frames")
        .arg("18")
        .arg("--workers")
        .arg("4")
        .arg("--re-encode")
        .arg("--tmp-dir")
        .arg(tmp.path().join("stage"))
        .arg("--out-dir")
        .arg(tmp.path().join("out"))
        .output()
        .expect("run watch");
    assert!(!run.status.success(), "expected fast failure");
    assert!(
        combined_output(&run).contains("divisible"),
        "{}",
        combined_output(&run)
    );
}
