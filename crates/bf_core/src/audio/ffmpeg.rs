//! FFmpeg / FFprobe driver.
//!
//! All loudness work, silence trimming, decoding, and delivery encoding
//! go through subprocess invocations of `ffmpeg`/`ffprobe` on PATH.
//! Loudness normalization uses the two-pass `loudnorm` recipe: measure
//! first, then apply with the measured statistics and `linear=true`.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Timeout for measurement and normalization passes.
pub const MEASURE_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for silence trimming.
pub const TRIM_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from external audio tools.
#[derive(Error, Debug)]
pub enum AudioToolError {
    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed with exit code {code}: {message}")]
    Failed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{tool} timed out after {seconds} s")]
    Timeout { tool: String, seconds: u64 },

    #[error("Failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Input file not found: {0}")]
    InputNotFound(String),
}

/// Result type for audio tool operations.
pub type ToolResult<T> = Result<T, AudioToolError>;

/// Captured output of a finished subprocess.
struct ToolOutput {
    status_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// Run a command, capturing output, killing it on timeout.
fn run_tool(mut cmd: Command, tool: &str, timeout: Option<Duration>) -> ToolResult<ToolOutput> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    tracing::debug!("Running {}: {:?}", tool, cmd);

    let mut child = cmd.spawn().map_err(|e| AudioToolError::Spawn {
        tool: tool.to_string(),
        source: e,
    })?;

    // Drain both pipes on reader threads so the child cannot block on a
    // full pipe buffer while we wait for it.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_thread = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_thread = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    });

    let deadline = timeout.map(|t| Instant::now() + t);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(AudioToolError::Timeout {
                            tool: tool.to_string(),
                            seconds: timeout.unwrap_or_default().as_secs(),
                        });
                    }
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(e) => {
                return Err(AudioToolError::Io {
                    operation: format!("waiting for {}", tool),
                    source: e,
                })
            }
        }
    };

    let stdout = stdout_thread.join().unwrap_or_default();
    let stderr = stderr_thread.join().unwrap_or_default();

    Ok(ToolOutput {
        status_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

fn require_success(output: ToolOutput, tool: &str) -> ToolResult<ToolOutput> {
    if output.status_code != 0 {
        let tail: String = String::from_utf8_lossy(&output.stderr)
            .lines()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join(" | ");
        return Err(AudioToolError::Failed {
            tool: tool.to_string(),
            code: output.status_code,
            message: tail,
        });
    }
    Ok(output)
}

fn check_input(path: &Path) -> ToolResult<()> {
    if !path.exists() {
        return Err(AudioToolError::InputNotFound(path.display().to_string()));
    }
    Ok(())
}

/// Whether `ffmpeg` is available on PATH.
pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Loudness statistics from a `loudnorm` measurement pass.
#[derive(Debug, Clone)]
pub struct LoudnessStats {
    /// Integrated loudness (LUFS).
    pub input_i: f64,
    /// Loudness range (LU).
    pub input_lra: f64,
    /// True peak (dBTP).
    pub input_tp: f64,
    /// Gating threshold (LUFS).
    pub input_thresh: f64,
}

/// Parse the JSON block `loudnorm` prints at the end of stderr.
fn parse_loudnorm_stats(stderr: &str) -> ToolResult<LoudnessStats> {
    let start = stderr.rfind('{');
    let end = stderr.rfind('}');
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) if e > s => (s, e),
        _ => {
            return Err(AudioToolError::Parse {
                what: "loudnorm stats".to_string(),
                message: "no JSON block in ffmpeg output".to_string(),
            })
        }
    };

    let value: serde_json::Value =
        serde_json::from_str(&stderr[start..=end]).map_err(|e| AudioToolError::Parse {
            what: "loudnorm stats".to_string(),
            message: e.to_string(),
        })?;

    let field = |name: &str| -> ToolResult<f64> {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| AudioToolError::Parse {
                what: "loudnorm stats".to_string(),
                message: format!("missing field {}", name),
            })
    };

    Ok(LoudnessStats {
        input_i: field("input_i")?,
        input_lra: field("input_lra")?,
        input_tp: field("input_tp")?,
        input_thresh: field("input_thresh")?,
    })
}

/// Measure loudness statistics without writing any output.
pub fn measure_loudness(input: &Path) -> ToolResult<LoudnessStats> {
    check_input(input)?;

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-i")
        .arg(input)
        .arg("-af")
        .arg("loudnorm=I=-16:TP=-1.0:print_format=json")
        .arg("-f")
        .arg("null")
        .arg("-");

    let output = run_tool(cmd, "ffmpeg", Some(MEASURE_TIMEOUT))?;
    let output = require_success(output, "ffmpeg")?;
    parse_loudnorm_stats(&String::from_utf8_lossy(&output.stderr))
}

/// Integrated loudness (gated BS.1770) in LUFS.
pub fn measure_lufs(input: &Path) -> ToolResult<f64> {
    Ok(measure_loudness(input)?.input_i)
}

/// Estimated true peak in dBTP.
pub fn measure_true_peak(input: &Path) -> ToolResult<f64> {
    Ok(measure_loudness(input)?.input_tp)
}

/// Normalize to the target integrated loudness with a true-peak ceiling.
///
/// Two passes: measure, then apply with measured statistics in linear
/// mode so the gain stays constant across the file.
pub fn normalize_lufs(
    input: &Path,
    output: &Path,
    target_lufs: f64,
    true_peak: f64,
) -> ToolResult<()> {
    check_input(input)?;
    let stats = measure_loudness(input)?;

    let filter = format!(
        "loudnorm=I={}:TP={}:measured_I={}:measured_LRA={}:measured_TP={}:measured_thresh={}:linear=true",
        target_lufs, true_peak, stats.input_i, stats.input_lra, stats.input_tp, stats.input_thresh
    );

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-af")
        .arg(filter)
        .arg(output);

    let out = run_tool(cmd, "ffmpeg", Some(MEASURE_TIMEOUT))?;
    require_success(out, "ffmpeg")?;
    Ok(())
}

/// Trim leading and trailing silence using `silenceremove`, applied
/// forward and then on the reversed signal.
pub fn trim_silence(
    input: &Path,
    output: &Path,
    threshold_db: f64,
    min_silence_ms: u32,
) -> ToolResult<()> {
    check_input(input)?;

    let duration_sec = min_silence_ms as f64 / 1000.0;
    let filter = format!(
        "silenceremove=start_periods=1:start_threshold={}dB:start_duration={},areverse,\
         silenceremove=start_periods=1:start_threshold={}dB:start_duration={},areverse",
        threshold_db, duration_sec, threshold_db, duration_sec
    );

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-af")
        .arg(filter)
        .arg(output);

    let out = run_tool(cmd, "ffmpeg", Some(TRIM_TIMEOUT))?;
    require_success(out, "ffmpeg")?;
    Ok(())
}

/// Decode any audio input to 16-bit PCM WAV.
pub fn decode_to_wav(input: &Path, output: &Path) -> ToolResult<()> {
    check_input(input)?;

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg(output);

    let out = run_tool(cmd, "ffmpeg", Some(MEASURE_TIMEOUT))?;
    require_success(out, "ffmpeg")?;
    Ok(())
}

/// Encode to MP3 at the given bitrate (kbps).
pub fn encode_mp3(input: &Path, output: &Path, bitrate_kbps: u32) -> ToolResult<()> {
    check_input(input)?;

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-codec:a")
        .arg("libmp3lame")
        .arg("-b:a")
        .arg(format!("{}k", bitrate_kbps))
        .arg(output);

    // Encoding a full chapter can legitimately take a while.
    let out = run_tool(cmd, "ffmpeg", None)?;
    require_success(out, "ffmpeg")?;
    Ok(())
}

/// Encode an M4B audiobook: concat list input, ffmetadata chapters,
/// optional cover as an attached picture, single AAC stream in an MP4
/// container.
pub fn encode_m4b_with_chapters(
    concat_list: &Path,
    metadata_file: &Path,
    cover: Option<&Path>,
    output: &Path,
    aac_bitrate_kbps: u32,
) -> ToolResult<()> {
    check_input(concat_list)?;
    check_input(metadata_file)?;

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y")
        .arg("-hide_banner")
        .arg("-f")
        .arg("concat")
        .arg("-safe")
        .arg("0")
        .arg("-i")
        .arg(concat_list)
        .arg("-i")
        .arg(metadata_file);

    if let Some(cover) = cover {
        cmd.arg("-i").arg(cover);
        cmd.arg("-map").arg("0:a").arg("-map").arg("2:v");
        cmd.arg("-disposition:v").arg("attached_pic");
        cmd.arg("-c:v").arg("copy");
    } else {
        cmd.arg("-map").arg("0:a");
    }

    cmd.arg("-map_metadata")
        .arg("1")
        .arg("-c:a")
        .arg("aac")
        .arg("-b:a")
        .arg(format!("{}k", aac_bitrate_kbps))
        .arg("-f")
        .arg("mp4")
        .arg(output);

    let out = run_tool(cmd, "ffmpeg", None)?;
    require_success(out, "ffmpeg")?;
    Ok(())
}

/// Duration in seconds via `ffprobe`.
pub fn get_duration(input: &Path) -> ToolResult<f64> {
    check_input(input)?;

    let mut cmd = Command::new("ffprobe");
    cmd.arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(input);

    let out = run_tool(cmd, "ffprobe", Some(MEASURE_TIMEOUT))?;
    let out = require_success(out, "ffprobe")?;

    let text = String::from_utf8_lossy(&out.stdout);
    text.trim()
        .parse::<f64>()
        .map_err(|e| AudioToolError::Parse {
            what: "ffprobe duration".to_string(),
            message: e.to_string(),
        })
}
