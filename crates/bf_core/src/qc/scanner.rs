//! Per-chunk quality checks.
//!
//! Checks: SNR (windowed RMS with a noise-floor split), clipping,
//! duration sanity (when an expectation exists), and integrated-LUFS
//! deviation from the mix target. Each check reports pass / warn / fail
//! with its measured metrics; a chunk's aggregate is the worst check.

use std::path::Path;

use serde_json::json;

use crate::audio::{db_to_linear, ffmpeg, rms, AudioBuffer};
use crate::project::config::QcConfig;
use crate::qc::{CheckResult, ChunkQcResult};

/// SNR analysis frame length.
const SNR_FRAME_MS: f64 = 25.0;

/// SNR analysis hop.
const SNR_HOP_MS: f64 = 10.0;

/// Fraction of lowest-energy frames classified as noise.
const NOISE_PERCENTILE: f64 = 0.30;

/// SNR reported when the noise floor is exactly zero.
const SNR_NO_NOISE_DB: f64 = 60.0;

/// Full-scale alignment for 16-bit intermediates.
const I16_FULL_SCALE: f64 = 32767.0 / 32768.0;

/// Run all QC checks on a single chunk file.
pub fn scan_chunk(
    audio_path: &Path,
    chunk_id: &str,
    config: &QcConfig,
    expected_duration: Option<f64>,
    target_lufs: f64,
) -> ChunkQcResult {
    let mut result = ChunkQcResult::new(chunk_id, audio_path.display().to_string());

    if !audio_path.exists() {
        result
            .checks
            .insert("file_exists".to_string(), CheckResult::fail("File not found"));
        return result;
    }

    let buffer = match AudioBuffer::load_wav(audio_path) {
        Ok(buffer) => buffer,
        Err(e) => {
            result.checks.insert(
                "file_exists".to_string(),
                CheckResult::fail(format!("Unreadable audio: {}", e)),
            );
            return result;
        }
    };
    let mono = buffer.to_mono();

    result.checks.insert(
        "snr".to_string(),
        check_snr(&mono, buffer.sample_rate, config.snr_min_db),
    );
    result.checks.insert(
        "clipping".to_string(),
        check_clipping(&buffer.samples, config.clipping_threshold_dbfs),
    );

    if let Some(expected) = expected_duration {
        result.checks.insert(
            "duration".to_string(),
            check_duration(
                buffer.duration_sec(),
                expected,
                config.max_duration_deviation_percent,
            ),
        );
    }

    // Loudness measurement goes through ffmpeg; a measurement error is
    // a warning, not a verdict on the audio.
    let lufs_check = match ffmpeg::measure_lufs(audio_path) {
        Ok(lufs) => classify_lufs(lufs, target_lufs, config.lufs_deviation_max),
        Err(e) => CheckResult::warn(format!("LUFS check error: {}", e)),
    };
    result.checks.insert("lufs".to_string(), lufs_check);

    result
}

/// A QC entry standing in for a chunk that never produced audio.
pub fn generation_failure(chunk_id: &str, error: &str) -> ChunkQcResult {
    let mut result = ChunkQcResult::new(chunk_id, "");
    result.checks.insert(
        "generation".to_string(),
        CheckResult::fail(format!("Generation failed: {}", error)),
    );
    result
}

/// Estimate SNR from windowed RMS energies.
///
/// Frames are 25 ms with a 10 ms hop; the bottom 30% by energy is the
/// noise floor, the rest is speech. SNR = 20*log10(speech/noise), 60 dB
/// when the noise floor is exactly zero.
pub fn check_snr(mono: &[f32], sample_rate: u32, min_db: f64) -> CheckResult {
    let frame = (sample_rate as f64 * SNR_FRAME_MS / 1000.0) as usize;
    let hop = (sample_rate as f64 * SNR_HOP_MS / 1000.0) as usize;

    if frame == 0 || hop == 0 || mono.len() < frame {
        return CheckResult::warn("Audio too short for SNR").with_metric("snr_db", 0);
    }

    let mut energies: Vec<f64> = Vec::new();
    let mut start = 0;
    while start + frame <= mono.len() {
        let value = rms(&mono[start..start + frame]);
        if value > 0.0 {
            energies.push(value);
        }
        start += hop;
    }

    if energies.is_empty() {
        return CheckResult::warn("No energy detected").with_metric("snr_db", 0);
    }

    let mut sorted = energies.clone();
    sorted.sort_by(f64::total_cmp);
    let threshold = sorted[((sorted.len() as f64 * NOISE_PERCENTILE) as usize).min(sorted.len() - 1)];

    let noise: Vec<f64> = energies.iter().copied().filter(|e| *e <= threshold).collect();
    let speech: Vec<f64> = energies.iter().copied().filter(|e| *e > threshold).collect();

    if noise.is_empty() || speech.is_empty() {
        return CheckResult::warn("Cannot separate speech from noise").with_metric("snr_db", 0);
    }

    let noise_rms = noise.iter().sum::<f64>() / noise.len() as f64;
    let speech_rms = speech.iter().sum::<f64>() / speech.len() as f64;

    let snr = if noise_rms == 0.0 {
        SNR_NO_NOISE_DB
    } else {
        20.0 * (speech_rms / noise_rms).log10()
    };
    let rounded = (snr * 10.0).round() / 10.0;

    if snr >= min_db {
        CheckResult::pass().with_metric("snr_db", rounded)
    } else if snr >= min_db - 5.0 {
        CheckResult::warn("SNR slightly below target").with_metric("snr_db", rounded)
    } else {
        CheckResult::fail(format!("SNR {:.1} dB below minimum {} dB", snr, min_db))
            .with_metric("snr_db", rounded)
    }
}

/// Count samples at or above the clipping threshold.
///
/// Pass on zero, warn below 0.01% of samples, fail otherwise.
pub fn check_clipping(samples: &[f32], threshold_dbfs: f64) -> CheckResult {
    let threshold = (db_to_linear(threshold_dbfs) * I16_FULL_SCALE) as f32;
    let clipped = samples.iter().filter(|s| s.abs() >= threshold).count();
    let peak = samples.iter().fold(0.0f32, |a, s| a.max(s.abs()));
    let peak_dbfs = crate::audio::linear_to_db(peak as f64);
    let peak_rounded = (peak_dbfs * 100.0).round() / 100.0;

    if clipped == 0 {
        return CheckResult::pass().with_metric("peak_dbfs", peak_rounded);
    }

    let clip_pct = clipped as f64 / samples.len().max(1) as f64 * 100.0;
    let pct_rounded = (clip_pct * 10_000.0).round() / 10_000.0;

    if clip_pct < 0.01 {
        CheckResult::warn("Minor clipping detected")
            .with_metric("peak_dbfs", peak_rounded)
            .with_metric("clipped_percent", pct_rounded)
    } else {
        CheckResult::fail(format!("Clipping detected: {:.4}% of samples", clip_pct))
            .with_metric("peak_dbfs", peak_rounded)
            .with_metric("clipped_percent", pct_rounded)
    }
}

/// Compare actual duration against an expectation.
pub fn check_duration(actual_sec: f64, expected_sec: f64, max_deviation_pct: f64) -> CheckResult {
    if expected_sec <= 0.0 {
        return CheckResult::pass().with_metric("duration_sec", json!(round2(actual_sec)));
    }

    let deviation_pct = (actual_sec - expected_sec).abs() / expected_sec * 100.0;
    let metrics = |result: CheckResult| {
        result
            .with_metric("duration_sec", json!(round2(actual_sec)))
            .with_metric("expected_sec", json!(round2(expected_sec)))
            .with_metric("deviation_percent", json!(round1(deviation_pct)))
    };

    if deviation_pct <= max_deviation_pct {
        metrics(CheckResult::pass())
    } else if deviation_pct <= max_deviation_pct * 1.5 {
        metrics(CheckResult::warn("Duration slightly outside expected range"))
    } else {
        metrics(CheckResult::fail(format!(
            "Duration {:.1}s deviates {:.0}% from expected {:.1}s",
            actual_sec, deviation_pct, expected_sec
        )))
    }
}

/// Classify an integrated-LUFS measurement against the target.
pub fn classify_lufs(lufs: f64, target: f64, max_deviation: f64) -> CheckResult {
    let deviation = (lufs - target).abs();
    let metrics = |result: CheckResult| {
        result
            .with_metric("lufs", json!(round1(lufs)))
            .with_metric("target", json!(target))
            .with_metric("deviation", json!(round1(deviation)))
    };

    if deviation <= max_deviation {
        metrics(CheckResult::pass())
    } else if deviation <= max_deviation * 2.0 {
        metrics(CheckResult::warn("LUFS slightly outside target range"))
    } else {
        metrics(CheckResult::fail(format!(
            "LUFS {:.1} deviates {:.1} from target {}",
            lufs, deviation, target
        )))
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
