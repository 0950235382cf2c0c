//! Ambient bed generator.
//!
//! Synthesizes loopable, non-fatiguing background pads from oscillators,
//! colored noise, slow LFO modulation, and gentle single-pole filtering.
//! Output is mono f32, peak-normalized to 0.85. The RNG is seedable for
//! reproducible renders.

use std::f64::consts::PI;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::{AudioBuffer, AudioError};

/// Errors from pad generation.
#[derive(Error, Debug)]
pub enum ComposerError {
    #[error("Unknown mood preset '{0}'. Available: {1}")]
    UnknownPreset(String, String),

    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// Oscillator wave shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveShape {
    Sine,
    Triangle,
    Saw,
}

/// Noise spectrum color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseColor {
    White,
    Pink,
    Brown,
}

/// What the LFO modulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LfoTarget {
    Amplitude,
    Pitch,
}

/// Full parameter set for one ambient pad.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PadPreset {
    pub name: String,
    // Base tone
    pub base_freq: f64,
    pub base_shape: WaveShape,
    pub base_amplitude: f64,
    // Detuned partner oscillator
    pub detune_cents: f64,
    pub detune_amplitude: f64,
    // Sub oscillator
    pub sub_freq_ratio: f64,
    pub sub_amplitude: f64,
    // Noise layer
    pub noise_color: NoiseColor,
    pub noise_amplitude: f64,
    // Low-frequency modulator
    pub lfo_rate: f64,
    pub lfo_depth: f64,
    pub lfo_target: LfoTarget,
    // Single-pole filters
    pub lowpass_hz: f64,
    pub highpass_hz: f64,
    // Envelope
    pub fade_in_sec: f64,
    pub fade_out_sec: f64,
    // Output format
    pub sample_rate: u32,
}

impl Default for PadPreset {
    fn default() -> Self {
        Self {
            name: "pad".to_string(),
            base_freq: 110.0,
            base_shape: WaveShape::Sine,
            base_amplitude: 0.3,
            detune_cents: 7.0,
            detune_amplitude: 0.2,
            sub_freq_ratio: 0.5,
            sub_amplitude: 0.15,
            noise_color: NoiseColor::Pink,
            noise_amplitude: 0.05,
            lfo_rate: 0.08,
            lfo_depth: 0.3,
            lfo_target: LfoTarget::Amplitude,
            lowpass_hz: 2000.0,
            highpass_hz: 40.0,
            fade_in_sec: 3.0,
            fade_out_sec: 3.0,
            sample_rate: 44_100,
        }
    }
}

/// Mood preset names, in presentation order.
pub fn list_presets() -> Vec<&'static str> {
    vec![
        "contemplative",
        "tense",
        "wonder",
        "melancholy",
        "triumph",
        "silence",
    ]
}

/// Look up a mood preset by name.
pub fn get_preset(name: &str) -> Result<PadPreset, ComposerError> {
    let preset = match name {
        "contemplative" => PadPreset {
            name: "contemplative".to_string(),
            base_freq: 130.81, // C3
            base_shape: WaveShape::Sine,
            base_amplitude: 0.25,
            detune_cents: 5.0,
            detune_amplitude: 0.15,
            sub_amplitude: 0.1,
            noise_color: NoiseColor::Brown,
            noise_amplitude: 0.03,
            lfo_rate: 0.05,
            lfo_depth: 0.2,
            lowpass_hz: 1500.0,
            fade_in_sec: 4.0,
            fade_out_sec: 4.0,
            ..PadPreset::default()
        },
        "tense" => PadPreset {
            name: "tense".to_string(),
            base_freq: 116.54, // Bb2
            base_shape: WaveShape::Saw,
            base_amplitude: 0.2,
            detune_cents: 15.0,
            detune_amplitude: 0.18,
            sub_freq_ratio: 0.5,
            sub_amplitude: 0.2,
            noise_color: NoiseColor::Pink,
            noise_amplitude: 0.08,
            lfo_rate: 0.12,
            lfo_depth: 0.4,
            lowpass_hz: 1200.0,
            highpass_hz: 60.0,
            fade_in_sec: 2.0,
            fade_out_sec: 3.0,
            ..PadPreset::default()
        },
        "wonder" => PadPreset {
            name: "wonder".to_string(),
            base_freq: 196.0, // G3
            base_shape: WaveShape::Sine,
            base_amplitude: 0.25,
            detune_cents: 3.0,
            detune_amplitude: 0.2,
            sub_amplitude: 0.08,
            noise_color: NoiseColor::White,
            noise_amplitude: 0.02,
            lfo_rate: 0.06,
            lfo_depth: 0.25,
            lowpass_hz: 3000.0,
            fade_in_sec: 5.0,
            fade_out_sec: 5.0,
            ..PadPreset::default()
        },
        "melancholy" => PadPreset {
            name: "melancholy".to_string(),
            base_freq: 146.83, // D3
            base_shape: WaveShape::Triangle,
            base_amplitude: 0.22,
            detune_cents: 8.0,
            detune_amplitude: 0.15,
            sub_amplitude: 0.12,
            noise_color: NoiseColor::Brown,
            noise_amplitude: 0.04,
            lfo_rate: 0.04,
            lfo_depth: 0.35,
            lowpass_hz: 1800.0,
            fade_in_sec: 4.0,
            fade_out_sec: 5.0,
            ..PadPreset::default()
        },
        "triumph" => PadPreset {
            name: "triumph".to_string(),
            base_freq: 164.81, // E3
            base_shape: WaveShape::Saw,
            base_amplitude: 0.3,
            detune_cents: 5.0,
            detune_amplitude: 0.25,
            sub_freq_ratio: 0.5,
            sub_amplitude: 0.18,
            noise_color: NoiseColor::Pink,
            noise_amplitude: 0.03,
            lfo_rate: 0.07,
            lfo_depth: 0.2,
            lowpass_hz: 2500.0,
            highpass_hz: 50.0,
            fade_in_sec: 3.0,
            fade_out_sec: 4.0,
            ..PadPreset::default()
        },
        "silence" => PadPreset {
            name: "silence".to_string(),
            base_amplitude: 0.0,
            detune_amplitude: 0.0,
            sub_amplitude: 0.0,
            noise_amplitude: 0.0,
            ..PadPreset::default()
        },
        other => {
            return Err(ComposerError::UnknownPreset(
                other.to_string(),
                list_presets().join(", "),
            ))
        }
    };
    Ok(preset)
}

fn oscillator(freq: f64, n_samples: usize, sample_rate: u32, shape: WaveShape) -> Vec<f64> {
    let dt = 1.0 / sample_rate as f64;
    (0..n_samples)
        .map(|i| {
            let t = i as f64 * dt;
            match shape {
                WaveShape::Sine => (2.0 * PI * freq * t).sin(),
                WaveShape::Triangle => {
                    2.0 * (2.0 * (t * freq - (t * freq + 0.5).floor())).abs() - 1.0
                }
                WaveShape::Saw => 2.0 * (t * freq - (t * freq + 0.5).floor()),
            }
        })
        .collect()
}

fn cents_to_ratio(cents: f64) -> f64 {
    2f64.powf(cents / 1200.0)
}

fn white_noise(n_samples: usize, rng: &mut StdRng) -> Vec<f64> {
    (0..n_samples).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// Pink-ish noise: white noise through a short rolling average.
fn pink_noise(n_samples: usize, rng: &mut StdRng) -> Vec<f64> {
    const KERNEL: usize = 64;
    let white = white_noise(n_samples, rng);
    let mut out = vec![0.0; n_samples];
    let mut running = 0.0;
    for i in 0..n_samples {
        running += white[i];
        if i >= KERNEL {
            running -= white[i - KERNEL];
        }
        out[i] = running / KERNEL as f64;
    }
    normalize_unit(&mut out);
    out
}

/// Brown noise: cumulative sum of white noise with the DC ramp removed.
fn brown_noise(n_samples: usize, rng: &mut StdRng) -> Vec<f64> {
    let white = white_noise(n_samples, rng);
    let mut out = Vec::with_capacity(n_samples);
    let mut sum = 0.0;
    for w in white {
        sum += w;
        out.push(sum);
    }
    if n_samples > 1 {
        let first = out[0];
        let last = out[n_samples - 1];
        for (i, v) in out.iter_mut().enumerate() {
            let ramp = first + (last - first) * i as f64 / (n_samples - 1) as f64;
            *v -= ramp;
        }
    }
    normalize_unit(&mut out);
    out
}

fn generate_noise(n_samples: usize, color: NoiseColor, rng: &mut StdRng) -> Vec<f64> {
    match color {
        NoiseColor::White => {
            let mut w = white_noise(n_samples, rng);
            normalize_unit(&mut w);
            w
        }
        NoiseColor::Pink => pink_noise(n_samples, rng),
        NoiseColor::Brown => brown_noise(n_samples, rng),
    }
}

fn normalize_unit(signal: &mut [f64]) {
    let peak = signal.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
    if peak > 0.0 {
        for s in signal.iter_mut() {
            *s /= peak;
        }
    }
}

/// First-order IIR low-pass.
fn single_pole_lowpass(signal: &mut [f64], cutoff_hz: f64, sample_rate: u32) {
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let dt = 1.0 / sample_rate as f64;
    let alpha = dt / (rc + dt);

    let mut prev = 0.0;
    for s in signal.iter_mut() {
        prev += alpha * (*s - prev);
        *s = prev;
    }
}

/// First-order IIR high-pass.
fn single_pole_highpass(signal: &mut [f64], cutoff_hz: f64, sample_rate: u32) {
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let dt = 1.0 / sample_rate as f64;
    let alpha = rc / (rc + dt);

    let mut prev_in = signal.first().copied().unwrap_or(0.0);
    let mut prev_out = prev_in;
    for s in signal.iter_mut() {
        let x = *s;
        let y = alpha * (prev_out + x - prev_in);
        prev_in = x;
        prev_out = y;
        *s = y;
    }
}

fn apply_fade_envelope(signal: &mut [f64], sample_rate: u32, fade_in_sec: f64, fade_out_sec: f64) {
    let n = signal.len();
    let fade_in = ((fade_in_sec * sample_rate as f64) as usize).min(n);
    let fade_out = ((fade_out_sec * sample_rate as f64) as usize).min(n);

    for i in 0..fade_in {
        signal[i] *= i as f64 / fade_in as f64;
    }
    for i in 0..fade_out {
        let idx = n - fade_out + i;
        signal[idx] *= 1.0 - i as f64 / fade_out as f64;
    }
}

/// Generate an ambient pad.
///
/// Returns mono f32 samples at the preset's sample rate, peak-normalized
/// to 0.85. With the same seed the output is bit-identical.
pub fn generate_pad(preset: &PadPreset, duration_sec: f64, seed: Option<u64>) -> Vec<f32> {
    let sample_rate = preset.sample_rate;
    let n_samples = (sample_rate as f64 * duration_sec) as usize;
    let mut rng = StdRng::seed_from_u64(seed.unwrap_or(0));

    let mut mix = vec![0.0f64; n_samples];

    if preset.base_amplitude > 0.0 {
        let base = oscillator(preset.base_freq, n_samples, sample_rate, preset.base_shape);
        for (m, b) in mix.iter_mut().zip(base) {
            *m += b * preset.base_amplitude;
        }
    }

    if preset.detune_amplitude > 0.0 {
        let freq = preset.base_freq * cents_to_ratio(preset.detune_cents);
        let detuned = oscillator(freq, n_samples, sample_rate, preset.base_shape);
        for (m, d) in mix.iter_mut().zip(detuned) {
            *m += d * preset.detune_amplitude;
        }
    }

    if preset.sub_amplitude > 0.0 {
        let freq = preset.base_freq * preset.sub_freq_ratio;
        let sub = oscillator(freq, n_samples, sample_rate, WaveShape::Sine);
        for (m, s) in mix.iter_mut().zip(sub) {
            *m += s * preset.sub_amplitude;
        }
    }

    if preset.noise_amplitude > 0.0 {
        let noise = generate_noise(n_samples, preset.noise_color, &mut rng);
        for (m, n) in mix.iter_mut().zip(noise) {
            *m += n * preset.noise_amplitude;
        }
    }

    if preset.lfo_depth > 0.0 {
        // LFO in [1 - depth, 1]. Pitch modulation reduces to the same
        // slow amplitude shimmer at these depths.
        let lfo = oscillator(preset.lfo_rate, n_samples, sample_rate, WaveShape::Sine);
        for (m, l) in mix.iter_mut().zip(lfo) {
            let gain = 1.0 - preset.lfo_depth * 0.5 * (1.0 + l);
            match preset.lfo_target {
                LfoTarget::Amplitude | LfoTarget::Pitch => *m *= gain,
            }
        }
    }

    if preset.lowpass_hz < sample_rate as f64 / 2.0 {
        single_pole_lowpass(&mut mix, preset.lowpass_hz, sample_rate);
    }
    if preset.highpass_hz > 0.0 {
        single_pole_highpass(&mut mix, preset.highpass_hz, sample_rate);
    }

    apply_fade_envelope(&mut mix, sample_rate, preset.fade_in_sec, preset.fade_out_sec);

    // Leave headroom below full scale.
    let peak = mix.iter().fold(0.0f64, |acc, s| acc.max(s.abs()));
    if peak > 0.0 {
        let gain = 0.85 / peak;
        for s in mix.iter_mut() {
            *s *= gain;
        }
    }

    mix.into_iter().map(|s| s as f32).collect()
}

/// Generate a pad and write it as a mono WAV.
pub fn render_pad(
    preset: &PadPreset,
    duration_sec: f64,
    seed: Option<u64>,
    output: &Path,
) -> Result<(), ComposerError> {
    let samples = generate_pad(preset, duration_sec, seed);
    AudioBuffer::new(samples, preset.sample_rate, 1).save_wav(output)?;
    tracing::info!(
        "Rendered {} pad ({:.0}s) -> {}",
        preset.name,
        duration_sec,
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_resolve_by_name() {
        for name in list_presets() {
            let preset = get_preset(name).unwrap();
            assert_eq!(preset.name, name);
        }
        assert!(matches!(
            get_preset("spooky"),
            Err(ComposerError::UnknownPreset(_, _))
        ));
    }

    #[test]
    fn pad_is_normalized_with_headroom() {
        let preset = get_preset("contemplative").unwrap();
        let samples = generate_pad(&preset, 2.0, Some(7));

        assert_eq!(samples.len(), 88_200);
        let peak = samples.iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!(peak <= 0.851, "peak {}", peak);
        assert!(peak > 0.8, "peak {}", peak);
    }

    #[test]
    fn same_seed_is_reproducible() {
        let preset = get_preset("tense").unwrap();
        let a = generate_pad(&preset, 1.0, Some(42));
        let b = generate_pad(&preset, 1.0, Some(42));
        assert_eq!(a, b);

        let c = generate_pad(&preset, 1.0, Some(43));
        assert_ne!(a, c);
    }

    #[test]
    fn silence_preset_is_silent() {
        let preset = get_preset("silence").unwrap();
        let samples = generate_pad(&preset, 1.0, None);
        assert!(samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn fade_envelope_starts_and_ends_quiet() {
        let preset = get_preset("wonder").unwrap();
        let samples = generate_pad(&preset, 12.0, Some(1));
        let sr = preset.sample_rate as usize;

        // First and last 100 ms sit inside the 5 s fades.
        let head_peak = samples[..sr / 10].iter().fold(0.0f32, |a, s| a.max(s.abs()));
        let tail_peak = samples[samples.len() - sr / 10..]
            .iter()
            .fold(0.0f32, |a, s| a.max(s.abs()));
        assert!(head_peak < 0.1, "head {}", head_peak);
        assert!(tail_peak < 0.1, "tail {}", tail_peak);
    }

    #[test]
    fn brown_noise_has_no_dc_ramp() {
        let mut rng = StdRng::seed_from_u64(3);
        let noise = brown_noise(10_000, &mut rng);
        assert!((noise[0]).abs() < 1e-9);
        assert!((noise[9_999]).abs() < 1e-9);
        let peak = noise.iter().fold(0.0f64, |a, s| a.max(s.abs()));
        assert!((peak - 1.0).abs() < 1e-9);
    }

    #[test]
    fn lowpass_attenuates_high_frequencies() {
        let sr = 44_100;
        let mut high = oscillator(8000.0, sr as usize, sr, WaveShape::Sine);
        single_pole_lowpass(&mut high, 500.0, sr);
        let peak = high[sr as usize / 2..]
            .iter()
            .fold(0.0f64, |a, s| a.max(s.abs()));
        assert!(peak < 0.12, "peak {}", peak);
    }
}
