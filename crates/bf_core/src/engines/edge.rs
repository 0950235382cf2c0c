//! Edge neural-voice engine.
//!
//! Network adapter for a hosted speech-synthesis REST endpoint: SSML
//! request body, 16-bit 24 kHz mono RIFF response written straight to
//! the chunk path. Supports SSML direction mapping (pace -> rate,
//! energy -> volume, emotion -> pitch, plus inline break markers) and a
//! minimum-spacing rate limit.
//!
//! Credentials: `region` (or a full `endpoint`) and `api_key` from the
//! engine credential store.

use std::time::Duration;

use crate::engines::{
    CredentialStore, EngineErrorKind, GenerationRequest, GenerationResult, RateLimiter, TtsEngine,
    VoiceDescriptor,
};
use crate::project::config::Direction;

const DEFAULT_VOICE: &str = "ar-SA-HamedNeural";
const OUTPUT_FORMAT: &str = "riff-24khz-16bit-mono-pcm";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Hosted neural-voice engine.
pub struct EdgeEngine {
    endpoint: Option<String>,
    voices_endpoint: Option<String>,
    api_key: Option<String>,
    limiter: RateLimiter,
    client: reqwest::blocking::Client,
}

impl EdgeEngine {
    /// Build from the credential store and the configured request
    /// spacing. Missing credentials leave the engine listed but failing
    /// its connection test.
    pub fn new(credentials: &CredentialStore, rate_limit_ms: u64) -> Self {
        let endpoint = credentials.get("edge", "endpoint").or_else(|| {
            credentials
                .get("edge", "region")
                .map(|r| format!("https://{}.tts.speech.microsoft.com/cognitiveservices/v1", r))
        });
        let voices_endpoint = credentials.get("edge", "voices_endpoint").or_else(|| {
            credentials.get("edge", "region").map(|r| {
                format!(
                    "https://{}.tts.speech.microsoft.com/cognitiveservices/voices/list",
                    r
                )
            })
        });
        let api_key = credentials.get("edge", "api_key");

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            endpoint,
            voices_endpoint,
            api_key,
            limiter: RateLimiter::new(rate_limit_ms),
            client,
        }
    }

    fn auth(&self) -> Result<(&str, &str), GenerationResult> {
        match (self.endpoint.as_deref(), self.api_key.as_deref()) {
            (Some(endpoint), Some(key)) => Ok((endpoint, key)),
            _ => Err(GenerationResult::failed(
                EngineErrorKind::Authentication,
                "edge engine is not configured (set region/endpoint and api_key)",
            )),
        }
    }
}

impl TtsEngine for EdgeEngine {
    fn name(&self) -> &str {
        "edge"
    }

    fn supports_cloning(&self) -> bool {
        false
    }

    fn supports_ssml(&self) -> bool {
        true
    }

    fn requires_gpu(&self) -> bool {
        false
    }

    fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let (endpoint, api_key) = match self.auth() {
            Ok(pair) => pair,
            Err(result) => return result,
        };

        let voice = request.voice.as_deref().unwrap_or(DEFAULT_VOICE);
        let body = build_ssml(
            &request.text,
            voice,
            &request.language,
            request.direction.as_ref().filter(|_| request.params.ssml),
        );

        self.limiter.wait();

        let response = self
            .client
            .post(endpoint)
            .header("Ocp-Apim-Subscription-Key", api_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .body(body)
            .send();

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                return GenerationResult::failed(
                    EngineErrorKind::Other,
                    format!("edge request failed: {}", e),
                )
            }
        };

        let status = response.status();
        if !status.is_success() {
            let kind = classify_status(status.as_u16());
            return GenerationResult::failed(kind, format!("edge returned HTTP {}", status));
        }

        let bytes = match response.bytes() {
            Ok(b) => b,
            Err(e) => {
                return GenerationResult::failed(
                    EngineErrorKind::Other,
                    format!("edge response read failed: {}", e),
                )
            }
        };

        if bytes.is_empty() {
            return GenerationResult::failed(EngineErrorKind::Other, "edge returned empty audio");
        }

        if let Err(e) = std::fs::write(&request.output_path, &bytes) {
            return GenerationResult::failed(
                EngineErrorKind::Other,
                format!("failed to write {}: {}", request.output_path.display(), e),
            );
        }

        match crate::audio::AudioBuffer::load_wav(&request.output_path) {
            Ok(buf) => GenerationResult::ok(buf.duration_sec(), buf.sample_rate),
            Err(e) => {
                let _ = std::fs::remove_file(&request.output_path);
                GenerationResult::failed(
                    EngineErrorKind::InvalidInput,
                    format!("edge returned non-WAV audio: {}", e),
                )
            }
        }
    }

    fn list_voices(&self, language: Option<&str>) -> Result<Vec<VoiceDescriptor>, String> {
        let endpoint = self
            .voices_endpoint
            .as_deref()
            .ok_or_else(|| "edge engine is not configured".to_string())?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| "edge engine is not configured".to_string())?;

        let response = self
            .client
            .get(endpoint)
            .header("Ocp-Apim-Subscription-Key", api_key)
            .send()
            .map_err(|e| format!("voice list request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("voice list returned HTTP {}", response.status()));
        }

        #[derive(serde::Deserialize)]
        struct RawVoice {
            #[serde(rename = "ShortName")]
            short_name: String,
            #[serde(rename = "FriendlyName", default)]
            friendly_name: String,
            #[serde(rename = "Locale", default)]
            locale: String,
            #[serde(rename = "Gender", default)]
            gender: String,
        }

        let raw: Vec<RawVoice> = response
            .json()
            .map_err(|e| format!("voice list parse failed: {}", e))?;

        Ok(raw
            .into_iter()
            .filter(|v| language.map(|l| v.locale.starts_with(l)).unwrap_or(true))
            .map(|v| VoiceDescriptor {
                id: v.short_name,
                name: v.friendly_name,
                locale: v.locale,
                gender: v.gender,
            })
            .collect())
    }

    fn test_connection(&self) -> bool {
        match self.list_voices(None) {
            Ok(voices) => !voices.is_empty(),
            Err(_) => false,
        }
    }
}

fn classify_status(status: u16) -> EngineErrorKind {
    match status {
        401 | 403 => EngineErrorKind::Authentication,
        429 => EngineErrorKind::RateLimited,
        400 => EngineErrorKind::InvalidInput,
        503 => EngineErrorKind::ResourceExhausted,
        _ => EngineErrorKind::Other,
    }
}

/// Escape text for inclusion in SSML.
fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn pace_to_rate(pace: &str) -> Option<&'static str> {
    match pace.trim().to_lowercase().as_str() {
        "very slow" => Some("x-slow"),
        "slow" => Some("slow"),
        "moderate" => Some("medium"),
        "fast" => Some("fast"),
        "very fast" => Some("x-fast"),
        _ => None,
    }
}

fn energy_to_volume(energy: &str) -> Option<&'static str> {
    match energy.trim().to_lowercase().as_str() {
        "whisper" => Some("x-soft"),
        "quiet" | "quiet contemplation" => Some("soft"),
        "normal" => Some("medium"),
        "loud" => Some("loud"),
        "intense" => Some("x-loud"),
        _ => None,
    }
}

fn emotion_to_pitch(emotion: &str) -> Option<&'static str> {
    match emotion.trim().to_lowercase().as_str() {
        "wonder" => Some("+5%"),
        "sadness" => Some("-5%"),
        "tension" => Some("+10%"),
        "contemplation" => Some("-2%"),
        "triumph" => Some("+8%"),
        "melancholy" => Some("-8%"),
        "neutral" => Some("+0%"),
        "confrontation" => Some("+5%"),
        _ => None,
    }
}

/// Replace inline pause markers with SSML breaks.
fn process_inline_markers(text: &str) -> String {
    text.replace("...", "<break time=\"400ms\"/>")
        .replace('\u{2026}', "<break time=\"400ms\"/>")
        .replace('\u{2014}', "<break time=\"250ms\"/>")
        .replace('\u{2013}', "<break time=\"200ms\"/>")
        .replace("\n\n", "<break time=\"600ms\"/>")
}

/// Build the SSML request body; prosody attributes come from the
/// direction map, defaults are omitted.
fn build_ssml(text: &str, voice: &str, language: &str, direction: Option<&Direction>) -> String {
    let lang = if language.is_empty() { "en" } else { language };

    let body = match direction {
        Some(direction) => {
            let mut attrs: Vec<String> = Vec::new();
            if let Some(rate) = pace_to_rate(&direction.pace) {
                if rate != "medium" {
                    attrs.push(format!("rate=\"{}\"", rate));
                }
            }
            if let Some(volume) = energy_to_volume(&direction.energy) {
                if volume != "medium" {
                    attrs.push(format!("volume=\"{}\"", volume));
                }
            }
            if let Some(pitch) = emotion_to_pitch(&direction.emotion) {
                if pitch != "+0%" {
                    attrs.push(format!("pitch=\"{}\"", pitch));
                }
            }

            let processed = process_inline_markers(&escape_xml(text));
            if attrs.is_empty() {
                processed
            } else {
                format!("<prosody {}>{}</prosody>", attrs.join(" "), processed)
            }
        }
        None => escape_xml(text),
    };

    format!(
        "<speak version=\"1.0\" xml:lang=\"{}\"><voice name=\"{}\">{}</voice></speak>",
        lang, voice, body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_engine_fails_auth() {
        let engine = EdgeEngine::new(&CredentialStore::empty(), 0);
        let request = GenerationRequest {
            text: "hello".to_string(),
            output_path: std::env::temp_dir().join("edge_test.wav"),
            voice: None,
            language: "en".to_string(),
            reference_audio: None,
            direction: None,
            params: Default::default(),
        };

        let result = engine.generate(&request);
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(EngineErrorKind::Authentication));
        assert!(!engine.test_connection());
    }

    #[test]
    fn ssml_carries_voice_and_prosody() {
        let direction = Direction {
            pace: "slow".to_string(),
            energy: "quiet".to_string(),
            emotion: "melancholy".to_string(),
        };
        let ssml = build_ssml("text here", "ar-SA-HamedNeural", "ar", Some(&direction));

        assert!(ssml.contains("<voice name=\"ar-SA-HamedNeural\">"));
        assert!(ssml.contains("rate=\"slow\""));
        assert!(ssml.contains("volume=\"soft\""));
        assert!(ssml.contains("pitch=\"-8%\""));
        assert!(ssml.contains("xml:lang=\"ar\""));
    }

    #[test]
    fn neutral_direction_adds_no_prosody() {
        let direction = Direction {
            pace: "moderate".to_string(),
            energy: "normal".to_string(),
            emotion: "neutral".to_string(),
        };
        let ssml = build_ssml("text", "v", "en", Some(&direction));
        assert!(!ssml.contains("<prosody"));
    }

    #[test]
    fn inline_markers_become_breaks() {
        let ssml = build_ssml("wait... what\n\nnext", "v", "en", Some(&Direction::default()));
        assert!(ssml.contains("<break time=\"400ms\"/>"));
        assert!(ssml.contains("<break time=\"600ms\"/>"));
    }

    #[test]
    fn text_is_xml_escaped() {
        let ssml = build_ssml("a < b & c", "v", "en", None);
        assert!(ssml.contains("a &lt; b &amp; c"));
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(401), EngineErrorKind::Authentication);
        assert_eq!(classify_status(429), EngineErrorKind::RateLimited);
        assert_eq!(classify_status(400), EngineErrorKind::InvalidInput);
        assert_eq!(classify_status(503), EngineErrorKind::ResourceExhausted);
        assert_eq!(classify_status(500), EngineErrorKind::Other);
    }
}
