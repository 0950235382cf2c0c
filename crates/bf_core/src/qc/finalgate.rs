//! Final mix gate - broadcast-standard validation of mixed chapters.
//!
//! Per file: duration, integrated LUFS, true peak, hard clipping at
//! 0 dBFS, longest interior silence gap (50 ms windows below the
//! configured threshold), and the worst inter-window dBFS jump as a
//! boundary-artifact heuristic. Boundary jumps only warn; everything
//! else can fail the gate.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audio::{ffmpeg, linear_to_db, rms, AudioBuffer};
use crate::project::config::{MixConfig, QcFinalConfig};

/// Analysis window for silence and boundary scans.
const WINDOW_MS: usize = 50;

/// Minimum run of silence that counts as a gap.
const MIN_GAP_MS: usize = 500;

/// Inter-window jump that suggests a stitching artifact.
const BOUNDARY_JUMP_DB: f64 = 12.0;

/// Floor applied to silent windows when comparing levels.
const SILENCE_FLOOR_DB: f64 = -80.0;

/// LUFS tolerance at the final gate.
const FINAL_LUFS_TOLERANCE: f64 = 1.0;

/// QC verdict for one mixed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalMixResult {
    pub filename: String,
    pub duration_sec: f64,
    pub lufs: f64,
    pub true_peak: f64,
    pub clipped: bool,
    pub passed: bool,
    pub messages: Vec<String>,
    pub longest_silence_sec: f64,
    pub worst_boundary_jump_db: f64,
}

/// Full report for the final gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalQcReport {
    pub project_id: String,
    pub target_lufs: f64,
    pub true_peak_limit: f64,
    pub total_files: usize,
    pub passed_files: usize,
    pub failed_files: usize,
    pub results: Vec<FinalMixResult>,
}

impl FinalQcReport {
    pub fn new(project_id: impl Into<String>, target_lufs: f64, true_peak_limit: f64) -> Self {
        Self {
            project_id: project_id.into(),
            target_lufs,
            true_peak_limit,
            total_files: 0,
            passed_files: 0,
            failed_files: 0,
            results: Vec::new(),
        }
    }

    /// The gate passes only when files exist and none failed.
    pub fn passed(&self) -> bool {
        self.failed_files == 0 && self.total_files > 0
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let mut content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        content.push('\n');
        std::fs::write(path, content)
    }
}

/// Longest interior silence run, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceScan {
    pub longest_gap_sec: f64,
    pub gap_count: usize,
}

/// Scan for silence gaps: consecutive 50 ms windows below the
/// threshold, runs of at least `MIN_GAP_MS` recorded as gaps.
pub fn detect_silence_gaps(buffer: &AudioBuffer, threshold_dbfs: f64) -> SilenceScan {
    let mono = buffer.to_mono();
    let window = buffer.sample_rate as usize * WINDOW_MS / 1000;
    if window == 0 || mono.is_empty() {
        return SilenceScan {
            longest_gap_sec: 0.0,
            gap_count: 0,
        };
    }

    let mut gaps: Vec<usize> = Vec::new();
    let mut current_ms = 0usize;

    for chunk in mono.chunks(window) {
        let level = linear_to_db(rms(chunk));
        if level < threshold_dbfs {
            current_ms += WINDOW_MS;
        } else {
            if current_ms >= MIN_GAP_MS {
                gaps.push(current_ms);
            }
            current_ms = 0;
        }
    }
    if current_ms >= MIN_GAP_MS {
        gaps.push(current_ms);
    }

    SilenceScan {
        longest_gap_sec: gaps.iter().max().map(|ms| *ms as f64 / 1000.0).unwrap_or(0.0),
        gap_count: gaps.len(),
    }
}

/// Boundary-artifact heuristic result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundaryScan {
    pub worst_jump_db: f64,
    pub worst_position_sec: f64,
    pub has_artifacts: bool,
}

/// Worst dBFS jump between adjacent 50 ms windows. Silent windows are
/// floored so a pause against speech does not read as an artifact spike
/// beyond the floor distance.
pub fn detect_boundary_artifacts(buffer: &AudioBuffer) -> BoundaryScan {
    let mono = buffer.to_mono();
    let window = buffer.sample_rate as usize * WINDOW_MS / 1000;
    if window == 0 || mono.len() < window * 2 {
        return BoundaryScan {
            worst_jump_db: 0.0,
            worst_position_sec: 0.0,
            has_artifacts: false,
        };
    }

    let mut worst_jump = 0.0f64;
    let mut worst_pos = 0.0f64;
    let mut prev_level: Option<f64> = None;

    for (i, chunk) in mono.chunks(window).enumerate() {
        if chunk.len() < window {
            break;
        }
        let level = linear_to_db(rms(chunk)).max(SILENCE_FLOOR_DB);

        if let Some(prev) = prev_level {
            let jump = (level - prev).abs();
            if jump > worst_jump {
                worst_jump = jump;
                worst_pos = (i * WINDOW_MS) as f64 / 1000.0;
            }
        }
        prev_level = Some(level);
    }

    BoundaryScan {
        worst_jump_db: (worst_jump * 10.0).round() / 10.0,
        worst_position_sec: (worst_pos * 100.0).round() / 100.0,
        has_artifacts: worst_jump > BOUNDARY_JUMP_DB,
    }
}

/// Run the final gate over one mixed file.
pub fn scan_mix_file(
    path: &Path,
    mix: &MixConfig,
    qc_final: &QcFinalConfig,
) -> FinalMixResult {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let buffer = match AudioBuffer::load_wav(path) {
        Ok(buffer) => buffer,
        Err(e) => {
            return FinalMixResult {
                filename,
                duration_sec: 0.0,
                lufs: 0.0,
                true_peak: 0.0,
                clipped: false,
                passed: false,
                messages: vec![format!("Measurement error: {}", e)],
                longest_silence_sec: 0.0,
                worst_boundary_jump_db: 0.0,
            }
        }
    };

    let (lufs, true_peak) = match ffmpeg::measure_loudness(path) {
        Ok(stats) => (stats.input_i, stats.input_tp),
        Err(e) => {
            return FinalMixResult {
                filename,
                duration_sec: buffer.duration_sec(),
                lufs: 0.0,
                true_peak: 0.0,
                clipped: false,
                passed: false,
                messages: vec![format!("Measurement error: {}", e)],
                longest_silence_sec: 0.0,
                worst_boundary_jump_db: 0.0,
            }
        }
    };

    let mut messages = Vec::new();
    let mut passed = true;

    if (lufs - mix.target_lufs).abs() > FINAL_LUFS_TOLERANCE {
        passed = false;
        messages.push(format!(
            "LUFS {:.1} deviates from target {} by more than {}",
            lufs, mix.target_lufs, FINAL_LUFS_TOLERANCE
        ));
    }

    if true_peak > mix.true_peak_limit_dbtp + 0.1 {
        passed = false;
        messages.push(format!(
            "True peak {:.2} exceeds limit {}",
            true_peak, mix.true_peak_limit_dbtp
        ));
    }

    // Hard clipping at 0 dBFS, zero tolerance.
    let full_scale = (32767.0 / 32768.0) as f32;
    let clipped = buffer.samples.iter().any(|s| s.abs() >= full_scale);
    if clipped {
        passed = false;
        messages.push("Digital clipping detected (samples at 0 dBFS)".to_string());
    }

    let max_gap_sec = mix.gap_between_chapters_sec * 2.0;
    let silence = detect_silence_gaps(&buffer, qc_final.silence_threshold_dbfs);
    if silence.longest_gap_sec > max_gap_sec {
        passed = false;
        messages.push(format!(
            "Silence gap of {:.1}s exceeds max {:.1}s",
            silence.longest_gap_sec, max_gap_sec
        ));
    }

    // Boundary artifacts are reported, never failed on.
    let boundary = detect_boundary_artifacts(&buffer);
    if boundary.has_artifacts {
        messages.push(format!(
            "Possible boundary artifact at {:.1}s ({:.1} dB jump)",
            boundary.worst_position_sec, boundary.worst_jump_db
        ));
    }

    FinalMixResult {
        filename,
        duration_sec: buffer.duration_sec(),
        lufs,
        true_peak,
        clipped,
        passed,
        messages,
        longest_silence_sec: silence.longest_gap_sec,
        worst_boundary_jump_db: boundary.worst_jump_db,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_buffer(duration_ms: usize, amplitude: f32) -> AudioBuffer {
        let sr = 16_000usize;
        let frames = sr * duration_ms / 1000;
        let samples: Vec<f32> = (0..frames)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 220.0 / 16_000.0).sin() * amplitude)
            .collect();
        AudioBuffer::new(samples, sr as u32, 1)
    }

    #[test]
    fn continuous_tone_has_no_gaps() {
        let buffer = tone_buffer(3000, 0.4);
        let scan = detect_silence_gaps(&buffer, -40.0);
        assert_eq!(scan.gap_count, 0);
        assert_eq!(scan.longest_gap_sec, 0.0);
    }

    #[test]
    fn long_silence_is_detected() {
        // 1 s tone, 5 s silence, 1 s tone.
        let mut samples = tone_buffer(1000, 0.4).samples;
        samples.extend(vec![0.0f32; 16_000 * 5]);
        samples.extend(tone_buffer(1000, 0.4).samples);
        let buffer = AudioBuffer::new(samples, 16_000, 1);

        let scan = detect_silence_gaps(&buffer, -40.0);
        assert_eq!(scan.gap_count, 1);
        assert!((scan.longest_gap_sec - 5.0).abs() < 0.11, "{:?}", scan);
    }

    #[test]
    fn short_pauses_do_not_count() {
        // 300 ms pauses stay under the 500 ms gap floor.
        let mut samples = tone_buffer(500, 0.4).samples;
        samples.extend(vec![0.0f32; 16_000 * 3 / 10]);
        samples.extend(tone_buffer(500, 0.4).samples);
        let buffer = AudioBuffer::new(samples, 16_000, 1);

        let scan = detect_silence_gaps(&buffer, -40.0);
        assert_eq!(scan.gap_count, 0);
    }

    #[test]
    fn level_step_reads_as_boundary_artifact() {
        // 1 s at full level, then 1 s 30 dB down.
        let mut samples = tone_buffer(1000, 0.8).samples;
        samples.extend(tone_buffer(1000, 0.8 * 0.0316).samples);
        let buffer = AudioBuffer::new(samples, 16_000, 1);

        let scan = detect_boundary_artifacts(&buffer);
        assert!(scan.has_artifacts, "{:?}", scan);
        assert!(scan.worst_jump_db > 20.0);
    }

    #[test]
    fn steady_signal_has_no_artifacts() {
        let buffer = tone_buffer(2000, 0.5);
        let scan = detect_boundary_artifacts(&buffer);
        assert!(!scan.has_artifacts, "{:?}", scan);
    }

    #[test]
    fn report_passes_only_with_files_and_no_failures() {
        let mut report = FinalQcReport::new("BOOK", -16.0, -1.0);
        assert!(!report.passed());

        report.total_files = 2;
        report.passed_files = 2;
        assert!(report.passed());

        report.failed_files = 1;
        assert!(!report.passed());
    }

    #[test]
    fn unreadable_file_fails_scan() {
        let result = scan_mix_file(
            Path::new("/nonexistent/mix.wav"),
            &MixConfig::default(),
            &QcFinalConfig::default(),
        );
        assert!(!result.passed);
        assert!(result.messages[0].contains("Measurement error"));
    }
}
