//! Crossfade concatenation of chunk PCM files into a chapter track.
//!
//! Adjacent chunks overlap by `min(crossfade, len(left), len(right))`
//! frames with an equal-power fade; a leading silence block is
//! prepended. The output adopts the format of the first chunk; no
//! resampling happens here.

use std::f32::consts::FRAC_PI_2;
use std::path::Path;

use crate::audio::{AudioBuffer, AudioResult};

/// Stitch ordered chunk files into `output`.
///
/// Returns `Ok(false)` for an empty input list; a non-empty list never
/// produces a zero-sample output.
pub fn crossfade_stitch(
    chunk_paths: &[std::path::PathBuf],
    output: &Path,
    crossfade_ms: u32,
    leading_silence_ms: u32,
) -> AudioResult<bool> {
    if chunk_paths.is_empty() {
        return Ok(false);
    }

    let first = AudioBuffer::load_wav(&chunk_paths[0])?;
    let sample_rate = first.sample_rate;
    let channels = first.channels;
    let fade_frames = (sample_rate as u64 * crossfade_ms as u64 / 1000) as usize;

    let mut out = AudioBuffer::silence(leading_silence_ms, sample_rate, channels).samples;
    out.extend_from_slice(&first.samples);
    let mut prev_frames = first.frames();

    for path in &chunk_paths[1..] {
        let chunk = AudioBuffer::load_wav(path)?.with_channels(channels);
        let next_frames = chunk.frames();
        let overlap = fade_frames.min(prev_frames).min(next_frames);

        blend_overlap(&mut out, &chunk.samples, overlap, channels as usize);
        out.extend_from_slice(&chunk.samples[overlap * channels as usize..]);
        prev_frames = next_frames;
    }

    let stitched = AudioBuffer::new(out, sample_rate, channels);
    stitched.save_wav(output)?;

    tracing::debug!(
        "Stitched {} chunks -> {} ({} ms, crossfade {} ms)",
        chunk_paths.len(),
        output.display(),
        stitched.duration_ms(),
        crossfade_ms
    );
    Ok(true)
}

/// Equal-power blend of the incoming chunk head over the output tail.
///
/// The tail fades out on a cosine curve while the head fades in on a
/// sine curve, keeping summed power constant across the joint.
fn blend_overlap(out: &mut [f32], incoming: &[f32], overlap_frames: usize, channels: usize) {
    if overlap_frames == 0 {
        return;
    }

    let tail_start = out.len() - overlap_frames * channels;
    for frame in 0..overlap_frames {
        let t = (frame as f32 + 0.5) / overlap_frames as f32;
        let gain_out = (t * FRAC_PI_2).cos();
        let gain_in = (t * FRAC_PI_2).sin();

        for ch in 0..channels {
            let idx = frame * channels + ch;
            let existing = out[tail_start + idx];
            out[tail_start + idx] = existing * gain_out + incoming[idx] * gain_in;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_tone(path: &Path, duration_ms: u32, amplitude: f32) {
        let sample_rate = 24_000;
        let frames = (sample_rate * duration_ms / 1000) as usize;
        let samples: Vec<f32> = (0..frames)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 220.0 / 24_000.0).sin() * amplitude)
            .collect();
        AudioBuffer::new(samples, sample_rate, 1)
            .save_wav(path)
            .unwrap();
    }

    #[test]
    fn empty_input_returns_false() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.wav");
        assert!(!crossfade_stitch(&[], &out, 100, 0).unwrap());
        assert!(!out.exists());
    }

    #[test]
    fn output_duration_matches_overlap_arithmetic() {
        let dir = tempdir().unwrap();
        let paths: Vec<_> = (0..3)
            .map(|i| {
                let p = dir.path().join(format!("c{}.wav", i));
                write_tone(&p, 500, 0.4);
                p
            })
            .collect();
        let out = dir.path().join("out.wav");

        assert!(crossfade_stitch(&paths, &out, 100, 500).unwrap());

        // 500 + 3*500 - 2*100 = 1800 ms
        let stitched = AudioBuffer::load_wav(&out).unwrap();
        let ms = stitched.duration_ms() as i64;
        assert!((ms - 1800).abs() <= 1, "duration {} ms", ms);
    }

    #[test]
    fn fade_truncates_to_short_chunks() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        write_tone(&a, 50, 0.4);
        write_tone(&b, 400, 0.4);
        let out = dir.path().join("out.wav");

        // Requested 200 ms fade, left side only 50 ms long.
        assert!(crossfade_stitch(&[a, b], &out, 200, 0).unwrap());
        let stitched = AudioBuffer::load_wav(&out).unwrap();
        let ms = stitched.duration_ms() as i64;
        assert!((ms - 400).abs() <= 1, "duration {} ms", ms);
    }

    #[test]
    fn leading_silence_is_prepended() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.wav");
        write_tone(&a, 200, 0.4);
        let out = dir.path().join("out.wav");

        assert!(crossfade_stitch(&[a], &out, 100, 300).unwrap());
        let stitched = AudioBuffer::load_wav(&out).unwrap();

        // First 300 ms are silent.
        let silent_frames = (stitched.sample_rate as usize * 300 / 1000) - 10;
        assert!(stitched.samples[..silent_frames]
            .iter()
            .all(|s| s.abs() < 1e-3));
        let ms = stitched.duration_ms() as i64;
        assert!((ms - 500).abs() <= 1);
    }

    #[test]
    fn single_chunk_never_empty() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.wav");
        write_tone(&a, 10, 0.4);
        let out = dir.path().join("out.wav");

        assert!(crossfade_stitch(&[a], &out, 500, 0).unwrap());
        let stitched = AudioBuffer::load_wav(&out).unwrap();
        assert!(stitched.frames() > 0);
    }

    #[test]
    fn equal_power_blend_keeps_level() {
        // Crossfading two identical DC signals should not dip power to
        // zero anywhere in the overlap.
        let mut out = vec![0.5f32; 100];
        let incoming = vec![0.5f32; 100];
        blend_overlap(&mut out, &incoming, 100, 1);

        for &s in &out {
            assert!(s > 0.49, "level dipped to {}", s);
        }
    }
}
