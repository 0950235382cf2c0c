//! Voice-activity detection for ducking.
//!
//! Two detectors: a neural backend (behind the `neural-vad` feature,
//! loading a Silero-style ONNX model) and an energy detector that is
//! always available. When the neural backend cannot load, the method
//! silently downgrades to energy and a warning is logged once.

use std::sync::Once;

use crate::audio::{linear_to_db, rms, AudioBuffer};
use crate::project::config::{DuckingConfig, DuckingMethod};

/// A detected speech window, in milliseconds from the start of the
/// voice track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSpan {
    pub start_ms: usize,
    pub end_ms: usize,
}

/// Energy detector frame length.
const ENERGY_FRAME_MS: usize = 50;

/// Energy detector threshold.
const ENERGY_THRESHOLD_DBFS: f64 = -40.0;

static VAD_FALLBACK_WARNING: Once = Once::new();

/// Detect speech spans in a voice track using the configured method.
///
/// Returns the spans and the method that was actually used.
pub fn detect_speech_spans(
    voice: &AudioBuffer,
    config: &DuckingConfig,
) -> (Vec<SpeechSpan>, DuckingMethod) {
    match config.method {
        DuckingMethod::Energy => (energy_speech_spans(voice), DuckingMethod::Energy),
        DuckingMethod::Vad => match neural_speech_spans(voice, config.vad_threshold) {
            Ok(spans) => (spans, DuckingMethod::Vad),
            Err(reason) => {
                VAD_FALLBACK_WARNING.call_once(|| {
                    tracing::warn!(
                        "Neural VAD unavailable ({}); falling back to energy detection",
                        reason
                    );
                });
                (energy_speech_spans(voice), DuckingMethod::Energy)
            }
        },
    }
}

/// Frame-energy speech detection: 50 ms frames classified against a
/// -40 dBFS threshold, contiguous speech frames merged into spans.
pub fn energy_speech_spans(voice: &AudioBuffer) -> Vec<SpeechSpan> {
    let mono = voice.to_mono();
    let frame_samples = (voice.sample_rate as usize * ENERGY_FRAME_MS) / 1000;
    if frame_samples == 0 || mono.is_empty() {
        return Vec::new();
    }

    let total_ms = voice.duration_ms() as usize;
    let mut spans = Vec::new();
    let mut in_speech = false;
    let mut span_start = 0usize;

    let mut offset = 0usize;
    let mut t_ms = 0usize;
    while offset < mono.len() {
        let end = (offset + frame_samples).min(mono.len());
        let level = linear_to_db(rms(&mono[offset..end]));

        if level > ENERGY_THRESHOLD_DBFS {
            if !in_speech {
                in_speech = true;
                span_start = t_ms;
            }
        } else if in_speech {
            in_speech = false;
            spans.push(SpeechSpan {
                start_ms: span_start,
                end_ms: t_ms,
            });
        }

        offset = end;
        t_ms += ENERGY_FRAME_MS;
    }

    if in_speech {
        spans.push(SpeechSpan {
            start_ms: span_start,
            end_ms: total_ms,
        });
    }

    spans
}

/// Neural speech detection. Without the `neural-vad` feature this
/// always reports the backend as unavailable.
#[cfg(not(feature = "neural-vad"))]
fn neural_speech_spans(_voice: &AudioBuffer, _threshold: f64) -> Result<Vec<SpeechSpan>, String> {
    Err("built without the neural-vad feature".to_string())
}

#[cfg(feature = "neural-vad")]
fn neural_speech_spans(voice: &AudioBuffer, threshold: f64) -> Result<Vec<SpeechSpan>, String> {
    neural::speech_spans(voice, threshold as f32)
}

#[cfg(feature = "neural-vad")]
mod neural {
    //! Silero-style ONNX voice-activity detection.
    //!
    //! The model path comes from `BOOKFORGE_VAD_MODEL`. Input audio is
    //! resampled to 16 kHz and evaluated in 512-sample windows with the
    //! LSTM state carried across windows.

    use ndarray::{arr1, Array2};
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Tensor;

    use super::SpeechSpan;
    use crate::audio::AudioBuffer;

    const VAD_SAMPLE_RATE: usize = 16_000;
    const VAD_WINDOW: usize = 512;

    pub fn speech_spans(voice: &AudioBuffer, threshold: f32) -> Result<Vec<SpeechSpan>, String> {
        let model_path = std::env::var("BOOKFORGE_VAD_MODEL")
            .map_err(|_| "BOOKFORGE_VAD_MODEL is not set".to_string())?;

        let mut session = Session::builder()
            .map_err(|e| e.to_string())?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| e.to_string())?
            .with_intra_threads(1)
            .map_err(|e| e.to_string())?
            .commit_from_file(&model_path)
            .map_err(|e| e.to_string())?;

        let samples = resample_to_16k(&voice.to_mono(), voice.sample_rate as usize);
        let mut h_state: Array2<f32> = Array2::zeros((2, 64));
        let mut c_state: Array2<f32> = Array2::zeros((2, 64));

        let window_ms = VAD_WINDOW * 1000 / VAD_SAMPLE_RATE;
        let mut spans = Vec::new();
        let mut in_speech = false;
        let mut span_start = 0usize;

        for (i, window) in samples.chunks(VAD_WINDOW).enumerate() {
            if window.len() < VAD_WINDOW {
                break;
            }
            let t_ms = i * window_ms;

            let input = Array2::from_shape_vec((1, VAD_WINDOW), window.to_vec())
                .map_err(|e| e.to_string())?;
            let input_tensor = Tensor::from_array(input).map_err(|e| e.to_string())?;
            let sr_tensor =
                Tensor::from_array(arr1(&[VAD_SAMPLE_RATE as i64])).map_err(|e| e.to_string())?;
            let h_tensor = Tensor::from_array(h_state.clone()).map_err(|e| e.to_string())?;
            let c_tensor = Tensor::from_array(c_state.clone()).map_err(|e| e.to_string())?;

            let outputs = session
                .run(ort::inputs![
                    "input" => input_tensor,
                    "sr" => sr_tensor,
                    "h" => h_tensor,
                    "c" => c_tensor,
                ])
                .map_err(|e| e.to_string())?;

            let (_, probs) = outputs
                .get("output")
                .ok_or_else(|| "missing output tensor".to_string())?
                .try_extract_tensor::<f32>()
                .map_err(|e| e.to_string())?;
            let prob = probs.first().copied().unwrap_or(0.0);

            for (name, state) in [("hn", &mut h_state), ("cn", &mut c_state)] {
                if let Some(tensor) = outputs.get(name) {
                    let (shape, data) = tensor
                        .try_extract_tensor::<f32>()
                        .map_err(|e| e.to_string())?;
                    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
                    if dims.len() == 2 && data.len() == dims[0] * dims[1] {
                        let view = ndarray::ArrayView2::from_shape((dims[0], dims[1]), data)
                            .map_err(|e| e.to_string())?;
                        state.assign(&view);
                    }
                }
            }

            if prob >= threshold {
                if !in_speech {
                    in_speech = true;
                    span_start = t_ms;
                }
            } else if in_speech {
                in_speech = false;
                spans.push(SpeechSpan {
                    start_ms: span_start,
                    end_ms: t_ms,
                });
            }
        }

        if in_speech {
            spans.push(SpeechSpan {
                start_ms: span_start,
                end_ms: voice.duration_ms() as usize,
            });
        }

        Ok(spans)
    }

    fn resample_to_16k(samples: &[f32], source_rate: usize) -> Vec<f32> {
        if source_rate == VAD_SAMPLE_RATE || samples.is_empty() {
            return samples.to_vec();
        }
        let out_len = samples.len() * VAD_SAMPLE_RATE / source_rate;
        (0..out_len)
            .map(|i| {
                let pos = i as f64 * source_rate as f64 / VAD_SAMPLE_RATE as f64;
                let idx = pos as usize;
                let frac = (pos - idx as f64) as f32;
                let a = samples[idx.min(samples.len() - 1)];
                let b = samples[(idx + 1).min(samples.len() - 1)];
                a + (b - a) * frac
            })
            .collect()
    }
}
