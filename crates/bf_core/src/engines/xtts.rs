//! XTTS local cloning engine.
//!
//! Drives a configured synthesizer command as a subprocess, one
//! invocation per chunk. Requires reference audio for the voice to
//! clone. Exposes the VRAM lifecycle hooks; the orchestrator decides
//! when to call them according to the configured policy.
//!
//! Credentials/config: `command` (the synthesizer binary) and optional
//! `model_dir` from the engine credential store.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::engines::{
    CredentialStore, EngineErrorKind, GenerationRequest, GenerationResult, TtsEngine,
    VoiceDescriptor, VramManaged,
};

/// Local voice-cloning engine.
pub struct XttsEngine {
    command: Option<String>,
    model_dir: Option<PathBuf>,
    /// Whether a model is conceptually resident; flipped by the
    /// lifecycle hooks and the first generation.
    model_loaded: AtomicBool,
    /// Completed generations, for reload-periodic accounting.
    generation_count: AtomicU64,
}

impl XttsEngine {
    pub fn new(credentials: &CredentialStore) -> Self {
        Self {
            command: credentials.get("xtts", "command"),
            model_dir: credentials.get("xtts", "model_dir").map(PathBuf::from),
            model_loaded: AtomicBool::new(false),
            generation_count: AtomicU64::new(0),
        }
    }

    /// Completed generation count since construction.
    pub fn generations(&self) -> u64 {
        self.generation_count.load(Ordering::Relaxed)
    }
}

impl TtsEngine for XttsEngine {
    fn name(&self) -> &str {
        "xtts"
    }

    fn supports_cloning(&self) -> bool {
        true
    }

    fn supports_ssml(&self) -> bool {
        false
    }

    fn requires_gpu(&self) -> bool {
        true
    }

    fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let Some(command) = self.command.as_deref() else {
            return GenerationResult::failed(
                EngineErrorKind::Other,
                "xtts synthesizer command is not configured",
            );
        };

        let Some(reference) = request.reference_audio.as_deref() else {
            return GenerationResult::failed(
                EngineErrorKind::InvalidInput,
                "xtts requires reference audio for voice cloning",
            );
        };
        if !reference.exists() {
            return GenerationResult::failed(
                EngineErrorKind::InvalidInput,
                format!("reference audio not found: {}", reference.display()),
            );
        }

        let mut cmd = Command::new(command);
        cmd.arg("--text")
            .arg(&request.text)
            .arg("--output")
            .arg(&request.output_path)
            .arg("--reference")
            .arg(reference)
            .arg("--language")
            .arg(if request.language.is_empty() {
                "en"
            } else {
                &request.language
            })
            .arg("--temperature")
            .arg(request.params.temperature.to_string())
            .arg("--repetition-penalty")
            .arg(request.params.repetition_penalty.to_string());

        if let Some(model_dir) = &self.model_dir {
            cmd.arg("--model-dir").arg(model_dir);
        }

        cmd.stdout(Stdio::null()).stderr(Stdio::piped());
        tracing::debug!("Running xtts: {:?}", cmd);

        let output = match cmd.output() {
            Ok(output) => output,
            Err(e) => {
                return GenerationResult::failed(
                    EngineErrorKind::ResourceExhausted,
                    format!("failed to spawn xtts synthesizer: {}", e),
                )
            }
        };

        self.model_loaded.store(true, Ordering::Relaxed);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr.lines().last().unwrap_or("no output").to_string();
            let kind = if stderr.contains("out of memory") || stderr.contains("CUDA") {
                EngineErrorKind::ResourceExhausted
            } else {
                EngineErrorKind::Other
            };
            return GenerationResult::failed(
                kind,
                format!(
                    "xtts exited with {}: {}",
                    output.status.code().unwrap_or(-1),
                    tail
                ),
            );
        }

        match crate::audio::AudioBuffer::load_wav(&request.output_path) {
            Ok(buf) if buf.frames() > 0 => {
                self.generation_count.fetch_add(1, Ordering::Relaxed);
                GenerationResult::ok(buf.duration_sec(), buf.sample_rate)
            }
            Ok(_) => GenerationResult::failed(EngineErrorKind::Other, "xtts produced empty WAV"),
            Err(e) => GenerationResult::failed(
                EngineErrorKind::Other,
                format!("xtts output unreadable: {}", e),
            ),
        }
    }

    fn list_voices(&self, _language: Option<&str>) -> Result<Vec<VoiceDescriptor>, String> {
        // Cloning engine: the "voice" is whatever reference audio the
        // character supplies.
        Ok(Vec::new())
    }

    fn test_connection(&self) -> bool {
        let Some(command) = self.command.as_deref() else {
            return false;
        };
        Command::new(command)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn vram(&self) -> Option<&dyn VramManaged> {
        Some(self)
    }
}

impl VramManaged for XttsEngine {
    fn release_vram(&self) {
        tracing::debug!("xtts: releasing cached VRAM");
    }

    fn unload_model(&self) {
        self.model_loaded.store(false, Ordering::Relaxed);
        tracing::debug!("xtts: model unloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_engine_fails_cleanly() {
        let engine = XttsEngine::new(&CredentialStore::empty());
        assert!(!engine.test_connection());

        let request = GenerationRequest {
            text: "hello".to_string(),
            output_path: std::env::temp_dir().join("xtts_test.wav"),
            voice: None,
            language: "en".to_string(),
            reference_audio: Some(std::env::temp_dir().join("ref.wav")),
            direction: None,
            params: Default::default(),
        };
        let result = engine.generate(&request);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(EngineErrorKind::Other));
    }

    #[test]
    fn missing_reference_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("engines.json"), r#"{"xtts": {"command": "xtts-synth"}}"#)
            .unwrap();
        let store = CredentialStore::load(&dir.path().join("engines.json"));
        let engine = XttsEngine::new(&store);

        let request = GenerationRequest {
            text: "hello".to_string(),
            output_path: dir.path().join("out.wav"),
            voice: None,
            language: "en".to_string(),
            reference_audio: None,
            direction: None,
            params: Default::default(),
        };
        let result = engine.generate(&request);
        assert_eq!(result.error_kind, Some(EngineErrorKind::InvalidInput));
    }

    #[test]
    fn exposes_vram_capability() {
        let engine = XttsEngine::new(&CredentialStore::empty());
        let hooks = engine.vram().expect("xtts is GPU resident");
        hooks.release_vram();
        hooks.unload_model();
        assert!(!engine.model_loaded.load(Ordering::Relaxed));
    }
}
