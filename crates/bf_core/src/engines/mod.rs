//! Pluggable TTS engine contract.
//!
//! Pipeline code calls engines only through [`TtsEngine`]; swapping an
//! engine requires zero changes to orchestration logic. Engines never
//! panic across this boundary - failures come back as a
//! [`GenerationResult`] with a classified error.

pub mod credentials;
pub mod edge;
pub mod gtts;
pub mod registry;
pub mod xtts;

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::project::config::Direction;

pub use credentials::CredentialStore;
pub use registry::EngineRegistry;

/// Classification of an engine failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    Authentication,
    RateLimited,
    InvalidInput,
    ResourceExhausted,
    Other,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineErrorKind::Authentication => "authentication",
            EngineErrorKind::RateLimited => "rate_limited",
            EngineErrorKind::InvalidInput => "invalid_input",
            EngineErrorKind::ResourceExhausted => "resource_exhausted",
            EngineErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Engine-tuned numeric parameters passed through the request.
#[derive(Debug, Clone)]
pub struct EngineParams {
    /// Wrap text in SSML when the engine supports it.
    pub ssml: bool,
    /// Cloning engine sampling temperature.
    pub temperature: f64,
    /// Cloning engine repetition penalty.
    pub repetition_penalty: f64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            ssml: true,
            temperature: 0.7,
            repetition_penalty: 5.0,
        }
    }
}

/// Input to a TTS engine: one chunk of text to one output file.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub text: String,
    /// Destination; on success a non-empty 16-bit PCM WAV exists here.
    pub output_path: PathBuf,
    pub voice: Option<String>,
    pub language: String,
    /// Reference audio for cloning engines.
    pub reference_audio: Option<PathBuf>,
    /// Performance direction, mapped to SSML by capable engines.
    pub direction: Option<Direction>,
    pub params: EngineParams,
}

/// Output from a TTS engine.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// True only when a non-empty WAV was written at the output path.
    pub success: bool,
    pub duration_sec: f64,
    pub sample_rate: u32,
    pub error_kind: Option<EngineErrorKind>,
    pub error: Option<String>,
}

impl GenerationResult {
    pub fn ok(duration_sec: f64, sample_rate: u32) -> Self {
        Self {
            success: true,
            duration_sec,
            sample_rate,
            error_kind: None,
            error: None,
        }
    }

    pub fn failed(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            duration_sec: 0.0,
            sample_rate: 0,
            error_kind: Some(kind),
            error: Some(message.into()),
        }
    }
}

/// One entry of an engine's voice catalog.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VoiceDescriptor {
    pub id: String,
    pub name: String,
    pub locale: String,
    pub gender: String,
}

/// Optional lifecycle capability for GPU-resident engines.
///
/// The generation orchestrator is the sole caller of these hooks.
pub trait VramManaged {
    /// Release cached GPU memory; the model stays loaded.
    fn release_vram(&self);
    /// Fully unload the model; the next request reloads it.
    fn unload_model(&self);
}

/// The engine contract.
pub trait TtsEngine: Send + Sync {
    /// Unique engine identifier ("edge", "gtts", "xtts").
    fn name(&self) -> &str;

    /// Whether this engine clones voices from reference audio.
    fn supports_cloning(&self) -> bool;

    /// Whether this engine interprets SSML markup.
    fn supports_ssml(&self) -> bool;

    /// Whether this engine requires (or strongly benefits from) a GPU.
    /// Non-GPU engines are treated as stateless across requests.
    fn requires_gpu(&self) -> bool;

    /// Synthesize one chunk to `request.output_path` as 16-bit PCM WAV.
    fn generate(&self, request: &GenerationRequest) -> GenerationResult;

    /// Catalog introspection, optionally filtered by language prefix.
    fn list_voices(&self, language: Option<&str>) -> Result<Vec<VoiceDescriptor>, String>;

    /// Readiness probe without consuming quota.
    fn test_connection(&self) -> bool;

    /// Narrow optional capability for GPU memory lifecycle.
    fn vram(&self) -> Option<&dyn VramManaged> {
        None
    }
}

impl std::fmt::Debug for dyn TtsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtsEngine").field("name", &self.name()).finish()
    }
}

/// Minimum-spacing rate limiter for network-backed engines.
///
/// `wait()` blocks until at least the configured interval has elapsed
/// since the previous request.
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval: Duration::from_millis(min_interval_ms),
            last: Mutex::new(None),
        }
    }

    /// Block until the spacing contract allows the next request.
    pub fn wait(&self) {
        let sleep_for = {
            let mut last = self.last.lock();
            let now = Instant::now();
            let sleep_for = match *last {
                Some(prev) => {
                    let elapsed = now.duration_since(prev);
                    self.min_interval.checked_sub(elapsed)
                }
                None => None,
            };
            *last = Some(now + sleep_for.unwrap_or_default());
            sleep_for
        };

        if let Some(d) = sleep_for {
            std::thread::sleep(d);
        }
    }
}
