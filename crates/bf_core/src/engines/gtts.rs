//! gTTS fallback engine.
//!
//! Plain-text HTTP synthesis returning MP3, decoded to WAV through the
//! ffmpeg driver. No SSML, no cloning, no credentials - this is the
//! last rung of the fallback chain.

use std::time::Duration;

use crate::audio::ffmpeg;
use crate::engines::{
    CredentialStore, EngineErrorKind, GenerationRequest, GenerationResult, RateLimiter, TtsEngine,
    VoiceDescriptor,
};

const DEFAULT_ENDPOINT: &str = "https://translate.google.com/translate_tts";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Free translate-TTS fallback.
pub struct GttsEngine {
    endpoint: String,
    limiter: RateLimiter,
    client: reqwest::blocking::Client,
}

impl GttsEngine {
    pub fn new(credentials: &CredentialStore, rate_limit_ms: u64) -> Self {
        let endpoint = credentials
            .get("gtts", "endpoint")
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            endpoint,
            limiter: RateLimiter::new(rate_limit_ms),
            client,
        }
    }

    fn fetch_mp3(&self, text: &str, language: &str) -> Result<Vec<u8>, GenerationResult> {
        self.limiter.wait();

        let language = if language.is_empty() { "en" } else { language };
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", language),
                ("q", text),
            ])
            .send()
            .map_err(|e| {
                GenerationResult::failed(EngineErrorKind::Other, format!("gtts request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let kind = if status.as_u16() == 429 {
                EngineErrorKind::RateLimited
            } else {
                EngineErrorKind::Other
            };
            return Err(GenerationResult::failed(
                kind,
                format!("gtts returned HTTP {}", status),
            ));
        }

        let bytes = response.bytes().map_err(|e| {
            GenerationResult::failed(
                EngineErrorKind::Other,
                format!("gtts response read failed: {}", e),
            )
        })?;

        if bytes.is_empty() {
            return Err(GenerationResult::failed(
                EngineErrorKind::Other,
                "gtts returned empty audio",
            ));
        }

        Ok(bytes.to_vec())
    }
}

impl TtsEngine for GttsEngine {
    fn name(&self) -> &str {
        "gtts"
    }

    fn supports_cloning(&self) -> bool {
        false
    }

    fn supports_ssml(&self) -> bool {
        false
    }

    fn requires_gpu(&self) -> bool {
        false
    }

    fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let mp3 = match self.fetch_mp3(&request.text, &request.language) {
            Ok(bytes) => bytes,
            Err(result) => return result,
        };

        // The service always returns MP3; decode to WAV for pipeline
        // consistency (all internal audio is WAV).
        let mp3_temp = request.output_path.with_extension("tmp.mp3");
        if let Err(e) = std::fs::write(&mp3_temp, &mp3) {
            return GenerationResult::failed(
                EngineErrorKind::Other,
                format!("failed to write {}: {}", mp3_temp.display(), e),
            );
        }

        let decode = ffmpeg::decode_to_wav(&mp3_temp, &request.output_path);
        let _ = std::fs::remove_file(&mp3_temp);
        if let Err(e) = decode {
            return GenerationResult::failed(
                EngineErrorKind::Other,
                format!("mp3 -> wav conversion failed: {}", e),
            );
        }

        match crate::audio::AudioBuffer::load_wav(&request.output_path) {
            Ok(buf) if buf.frames() > 0 => GenerationResult::ok(buf.duration_sec(), buf.sample_rate),
            Ok(_) => GenerationResult::failed(EngineErrorKind::Other, "gtts produced empty WAV"),
            Err(e) => GenerationResult::failed(
                EngineErrorKind::Other,
                format!("gtts output unreadable: {}", e),
            ),
        }
    }

    fn list_voices(&self, language: Option<&str>) -> Result<Vec<VoiceDescriptor>, String> {
        // One default voice per supported language; the service has no
        // catalog endpoint.
        let languages = ["ar", "en", "fr", "de", "es"];
        Ok(languages
            .iter()
            .filter(|l| language.map(|q| l.starts_with(q)).unwrap_or(true))
            .map(|l| VoiceDescriptor {
                id: format!("gtts-{}", l),
                name: format!("Translate voice ({})", l),
                locale: l.to_string(),
                gender: String::new(),
            })
            .collect())
    }

    fn test_connection(&self) -> bool {
        match self.fetch_mp3("ping", "en") {
            Ok(bytes) => !bytes.is_empty(),
            Err(_) => false,
        }
    }
}
