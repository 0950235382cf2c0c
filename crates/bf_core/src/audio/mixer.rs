//! Voice + ambient bed mixdown with VAD-driven ducking.
//!
//! The bed is loop-extended to cover the voice plus a 2 s tail, ducked
//! under detected speech via a millisecond-resolution gain envelope,
//! then the voice is overlaid at position zero and master gain applied.

use std::path::Path;

use thiserror::Error;

use crate::audio::vad::{detect_speech_spans, SpeechSpan};
use crate::audio::{db_to_linear, AudioBuffer, AudioError};
use crate::project::config::MixConfig;

/// Tail kept after the voice ends, in milliseconds.
const BED_TAIL_MS: usize = 2000;

/// Errors from the mixdown stage.
#[derive(Error, Debug)]
pub enum MixError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("Voice track is empty: {0}")]
    EmptyVoice(String),
}

/// Result type for mix operations.
pub type MixResult<T> = Result<T, MixError>;

/// Voice/bed mixer configured from the project's mix section.
pub struct Mixer {
    config: MixConfig,
}

impl Mixer {
    pub fn new(config: MixConfig) -> Self {
        Self { config }
    }

    /// Mix one chapter: voice plus optional bed to `output`.
    ///
    /// Without a bed the voice simply gets the master gain applied.
    pub fn mix_chapter(
        &self,
        voice_path: &Path,
        bed_path: Option<&Path>,
        output: &Path,
    ) -> MixResult<()> {
        let voice = AudioBuffer::load_wav(voice_path)?;
        if voice.frames() == 0 {
            return Err(MixError::EmptyVoice(voice_path.display().to_string()));
        }

        let master = self.config.master_volume.max(0.0001) as f32;

        let Some(bed_path) = bed_path.filter(|p| p.exists()) else {
            let mut out = voice;
            for s in out.samples.iter_mut() {
                *s *= master;
            }
            out.save_wav(output)?;
            tracing::debug!("Mixed (voice only) -> {}", output.display());
            return Ok(());
        };

        let bed = AudioBuffer::load_wav(bed_path)?;
        let target_ms = voice.duration_ms() as usize + BED_TAIL_MS;
        let mut bed = loop_to_length(&bed, target_ms);

        // Duck the bed wherever the voice speaks.
        let (spans, method) = detect_speech_spans(&voice, &self.config.ducking);
        tracing::debug!(
            "Ducking {} speech spans via {:?} for {}",
            spans.len(),
            method,
            voice_path.display()
        );

        let envelope = self.build_envelope(&spans, target_ms);
        apply_envelope(&mut bed, &envelope);

        // Overlay voice at position 0, broadcast to bed channels.
        let voice = voice.with_channels(bed.channels);
        let overlay_len = voice.samples.len().min(bed.samples.len());
        for i in 0..overlay_len {
            bed.samples[i] += voice.samples[i];
        }

        for s in bed.samples.iter_mut() {
            *s *= master;
        }

        bed.save_wav(output)?;
        tracing::debug!("Mixed (voice + bed) -> {}", output.display());
        Ok(())
    }

    /// Millisecond-resolution gain envelope over the bed duration.
    ///
    /// Starts at 1.0 everywhere; each speech span paints the attenuation
    /// over `[start - look_ahead, end + release]`, then a moving average
    /// of width `min(attack, release)` smooths the steps and short
    /// linear ramps restore the boundary values.
    fn build_envelope(&self, spans: &[SpeechSpan], total_ms: usize) -> Vec<f32> {
        let ducking = &self.config.ducking;
        let mut envelope = vec![1.0f32; total_ms];
        if total_ms == 0 {
            return envelope;
        }

        let attenuation = db_to_linear(ducking.attenuation_db) as f32;
        for span in spans {
            let start = span.start_ms.saturating_sub(ducking.look_ahead_ms as usize);
            let end = (span.end_ms + ducking.release_ms as usize).min(total_ms);
            for value in &mut envelope[start..end] {
                *value = attenuation;
            }
        }

        let window = ducking.attack_ms.min(ducking.release_ms) as usize;
        if window > 1 && !spans.is_empty() {
            envelope = moving_average(&envelope, window);

            // Pull the edges back to unity so the bed does not start or
            // end mid-duck from smoothing spill.
            let edge = window.min(100).min(total_ms);
            if edge > 1 {
                let head_target = envelope[edge - 1];
                for (i, value) in envelope[..edge].iter_mut().enumerate() {
                    let t = i as f32 / (edge - 1) as f32;
                    *value = 1.0 + (head_target - 1.0) * t;
                }
                let tail_target = envelope[total_ms - edge];
                for i in 0..edge {
                    let t = i as f32 / (edge - 1) as f32;
                    envelope[total_ms - edge + i] = tail_target + (1.0 - tail_target) * t;
                }
            }
        }

        envelope
    }
}

/// Centered moving average, same output length.
fn moving_average(values: &[f32], window: usize) -> Vec<f32> {
    let n = values.len();
    if n == 0 || window <= 1 {
        return values.to_vec();
    }
    let half = window / 2;

    let mut prefix = vec![0.0f64; n + 1];
    for (i, v) in values.iter().enumerate() {
        prefix[i + 1] = prefix[i] + *v as f64;
    }

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + window - half).min(n);
            ((prefix[hi] - prefix[lo]) / (hi - lo) as f64) as f32
        })
        .collect()
}

/// Loop-concatenate the bed until it covers `target_ms`, then trim.
fn loop_to_length(bed: &AudioBuffer, target_ms: usize) -> AudioBuffer {
    let ch = bed.channels.max(1) as usize;
    let target_frames = (bed.sample_rate as usize * target_ms) / 1000;
    let mut samples = Vec::with_capacity(target_frames * ch);

    if bed.samples.is_empty() {
        return AudioBuffer::new(vec![0.0; target_frames * ch], bed.sample_rate, bed.channels);
    }

    while samples.len() < target_frames * ch {
        let remaining = target_frames * ch - samples.len();
        let take = remaining.min(bed.samples.len());
        samples.extend_from_slice(&bed.samples[..take]);
    }

    AudioBuffer::new(samples, bed.sample_rate, bed.channels)
}

/// Resample the ms-granular envelope to the bed's sample rate by linear
/// interpolation, broadcast across channels, and multiply in place.
fn apply_envelope(bed: &mut AudioBuffer, envelope: &[f32]) {
    if envelope.is_empty() {
        return;
    }
    let ch = bed.channels.max(1) as usize;
    let frames = bed.frames();

    for frame in 0..frames {
        let pos = frame as f64 * envelope.len() as f64 / frames as f64;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = envelope[idx.min(envelope.len() - 1)];
        let b = envelope[(idx + 1).min(envelope.len() - 1)];
        let gain = a + (b - a) * frac;

        for c in 0..ch {
            bed.samples[frame * ch + c] *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::config::{DuckingConfig, DuckingMethod};
    use tempfile::tempdir;

    fn tone(duration_ms: usize, sample_rate: u32, amplitude: f32) -> AudioBuffer {
        let frames = sample_rate as usize * duration_ms / 1000;
        let samples: Vec<f32> = (0..frames)
            .map(|i| {
                (i as f32 * 2.0 * std::f32::consts::PI * 220.0 / sample_rate as f32).sin()
                    * amplitude
            })
            .collect();
        AudioBuffer::new(samples, sample_rate, 1)
    }

    fn mixer_with_energy_vad() -> Mixer {
        let mut config = MixConfig::default();
        config.ducking = DuckingConfig {
            method: DuckingMethod::Energy,
            look_ahead_ms: 100,
            attack_ms: 50,
            release_ms: 100,
            ..DuckingConfig::default()
        };
        Mixer::new(config)
    }

    #[test]
    fn voice_only_applies_master_gain() {
        let dir = tempdir().unwrap();
        let voice_path = dir.path().join("voice.wav");
        let out_path = dir.path().join("out.wav");
        tone(300, 16_000, 0.5).save_wav(&voice_path).unwrap();

        mixer_with_energy_vad()
            .mix_chapter(&voice_path, None, &out_path)
            .unwrap();

        let out = AudioBuffer::load_wav(&out_path).unwrap();
        // 0.5 * 0.9 master volume
        assert!((out.peak() - 0.45).abs() < 0.02, "peak {}", out.peak());
    }

    #[test]
    fn bed_is_extended_and_ducked_under_speech() {
        let dir = tempdir().unwrap();
        let voice_path = dir.path().join("voice.wav");
        let bed_path = dir.path().join("bed.wav");
        let out_path = dir.path().join("out.wav");

        // 2 s of continuous speech; short 500 ms bed forces looping.
        tone(2000, 16_000, 0.5).save_wav(&voice_path).unwrap();
        tone(500, 16_000, 0.3).save_wav(&bed_path).unwrap();

        mixer_with_energy_vad()
            .mix_chapter(&voice_path, Some(&bed_path), &out_path)
            .unwrap();

        let out = AudioBuffer::load_wav(&out_path).unwrap();
        // Voice (2 s) + 2 s tail.
        assert!((out.duration_ms() as i64 - 4000).abs() <= 2);

        // The mid-tail sits past speech + release; the bed there is back
        // to full level (~0.3 * 0.9). During speech the bed is ducked,
        // so the combined mid-speech level stays below voice + full bed.
        let sr = out.sample_rate as usize;
        let tail = &out.samples[sr * 3..sr * 3 + sr / 2];
        let tail_peak = tail.iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!(tail_peak > 0.2, "tail {}", tail_peak);

        let speech = &out.samples[sr / 2..sr];
        let speech_peak = speech.iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!(speech_peak < 0.62, "speech {}", speech_peak);
    }

    #[test]
    fn envelope_ducks_span_and_recovers() {
        let mixer = mixer_with_energy_vad();
        let spans = vec![SpeechSpan {
            start_ms: 1000,
            end_ms: 2000,
        }];
        let envelope = mixer.build_envelope(&spans, 4000);

        // Attenuation -12 dB ~= 0.25 inside the span.
        assert!((envelope[1500] - 0.2512).abs() < 0.01);
        // Unity well before the look-ahead and after release+smoothing.
        assert!((envelope[200] - 1.0).abs() < 1e-3);
        assert!((envelope[3500] - 1.0).abs() < 1e-3);
        // Edges are exactly unity.
        assert!((envelope[0] - 1.0).abs() < 1e-6);
        assert!((envelope[3999] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn envelope_without_speech_stays_at_unity() {
        let mixer = mixer_with_energy_vad();
        let envelope = mixer.build_envelope(&[], 1000);
        assert!(envelope.iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn loop_extension_covers_target() {
        let bed = tone(300, 16_000, 0.3);
        let extended = loop_to_length(&bed, 1000);
        assert_eq!(extended.frames(), 16_000);
    }
}
