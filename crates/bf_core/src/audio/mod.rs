//! PCM audio primitives and processing stages.
//!
//! All intermediates are little-endian WAV. In-memory audio is
//! interleaved `f32` in [-1, 1]; files are written as 16-bit PCM.

pub mod composer;
pub mod ffmpeg;
pub mod mixer;
pub mod stitch;
pub mod vad;

use std::io;
use std::path::Path;

use thiserror::Error;

/// Errors from PCM buffer operations.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("WAV error for {path}: {source}")]
    Wav {
        path: String,
        #[source]
        source: hound::Error,
    },

    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported sample format in {0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Invalid(String),
}

impl AudioError {
    fn wav(path: &Path, source: hound::Error) -> Self {
        Self::Wav {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Result type for PCM operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Interleaved PCM buffer.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Interleaved samples in [-1, 1].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    /// New buffer from interleaved samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
        }
    }

    /// Pure silence of the given duration, in this format.
    pub fn silence(duration_ms: u32, sample_rate: u32, channels: u16) -> Self {
        let frames = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
        Self::new(
            vec![0.0; frames * channels.max(1) as usize],
            sample_rate,
            channels,
        )
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }

    /// Duration in seconds.
    pub fn duration_sec(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Peak absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Mono view: channels averaged per frame.
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }
        let ch = self.channels as usize;
        self.samples
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    }

    /// Convert to a different channel count: downmix by averaging, or
    /// duplicate the mono signal across channels.
    pub fn with_channels(&self, channels: u16) -> AudioBuffer {
        let channels = channels.max(1);
        if channels == self.channels {
            return self.clone();
        }
        let mono = self.to_mono();
        let mut samples = Vec::with_capacity(mono.len() * channels as usize);
        for s in mono {
            for _ in 0..channels {
                samples.push(s);
            }
        }
        AudioBuffer::new(samples, self.sample_rate, channels)
    }

    /// Load a WAV file, converting integer or float samples to f32.
    pub fn load_wav(path: &Path) -> AudioResult<AudioBuffer> {
        let mut reader = hound::WavReader::open(path).map_err(|e| AudioError::wav(path, e))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| AudioError::wav(path, e))?,
            (hound::SampleFormat::Int, bits) if bits <= 32 => {
                let scale = (1i64 << (bits - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| AudioError::wav(path, e))?
            }
            _ => return Err(AudioError::UnsupportedFormat(path.display().to_string())),
        };

        Ok(AudioBuffer::new(
            samples,
            spec.sample_rate,
            spec.channels.max(1),
        ))
    }

    /// Write as 16-bit PCM WAV, clamping out-of-range samples.
    pub fn save_wav(&self, path: &Path) -> AudioResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AudioError::Io {
                operation: format!("creating {}", parent.display()),
                source: e,
            })?;
        }

        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer =
            hound::WavWriter::create(path, spec).map_err(|e| AudioError::wav(path, e))?;
        for &sample in &self.samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(value)
                .map_err(|e| AudioError::wav(path, e))?;
        }
        writer.finalize().map_err(|e| AudioError::wav(path, e))?;
        Ok(())
    }
}

/// Linear amplitude for a dBFS level.
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// dBFS level for a linear amplitude; floor at -120 dB for silence.
pub fn linear_to_db(linear: f64) -> f64 {
    if linear <= 0.0 {
        return -120.0;
    }
    20.0 * linear.log10()
}

/// RMS of a sample slice.
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}
