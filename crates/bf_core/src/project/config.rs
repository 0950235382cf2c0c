//! Typed `project.json` schema.
//!
//! The config is organized into sections that map to JSON objects. Every
//! field carries a serde default so older or partial documents merge with
//! defaults on load. Unknown keys are captured into flattened maps and
//! surfaced as warnings by the validation gate rather than silently
//! dropped.

use std::collections::BTreeMap;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration document for a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project identifier; matches the directory name.
    pub id: String,

    /// Schema version.
    #[serde(default = "default_version")]
    pub version: String,

    /// UTC creation timestamp (RFC 3339).
    #[serde(default)]
    pub created: String,

    /// Languages present in the project sources.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Ordered chapter list; the unit of scheduling and export.
    #[serde(default)]
    pub chapters: Vec<ChapterSpec>,

    /// Character id -> voice/engine assignment.
    #[serde(default)]
    pub characters: BTreeMap<String, CharacterSpec>,

    /// Generation (TTS) settings.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Per-chunk QC thresholds.
    #[serde(default)]
    pub qc: QcConfig,

    /// Mix and ducking settings.
    #[serde(default)]
    pub mix: MixConfig,

    /// Final-gate QC settings.
    #[serde(default)]
    pub qc_final: QcFinalConfig,

    /// Export formats and metadata.
    #[serde(default)]
    pub export: ExportConfig,

    /// Unrecognized top-level keys, reported by validation.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_languages() -> Vec<String> {
    vec!["ar".to_string(), "en".to_string()]
}

impl ProjectConfig {
    /// Build the default configuration for a newly created project.
    pub fn new(id: impl Into<String>) -> Self {
        let mut characters = BTreeMap::new();
        characters.insert(
            "narrator".to_string(),
            CharacterSpec {
                name: "Narrator".to_string(),
                engine: "edge".to_string(),
                voice: Some("ar-SA-HamedNeural".to_string()),
                reference_audio: None,
                dialect: Some("msa".to_string()),
                persona: Some("Default narrator".to_string()),
                unknown: BTreeMap::new(),
            },
        );

        Self {
            id: id.into(),
            version: default_version(),
            created: Utc::now().to_rfc3339(),
            languages: default_languages(),
            chapters: Vec::new(),
            characters,
            generation: GenerationConfig::default(),
            qc: QcConfig::default(),
            mix: MixConfig::default(),
            qc_final: QcFinalConfig::default(),
            export: ExportConfig::default(),
            unknown: BTreeMap::new(),
        }
    }

    /// Look up a chapter by id.
    pub fn chapter(&self, id: &str) -> Option<&ChapterSpec> {
        self.chapters.iter().find(|c| c.id == id)
    }
}

/// One chapter entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterSpec {
    /// Chapter identifier (filesystem-safe).
    pub id: String,

    /// Display title, used for M4B chapter markers.
    #[serde(default)]
    pub title: String,

    /// Language tag ("ar", "en", ...).
    #[serde(default)]
    pub language: String,

    /// Text source, relative to the project root.
    #[serde(default)]
    pub source: String,

    /// Speaking character for single-mode chapters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,

    /// Default character for multi-mode chapters (applies until a
    /// speaker tag switches, and again after each blank line).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_character: Option<String>,

    /// Single narrator vs tagged multi-speaker parsing.
    #[serde(default)]
    pub mode: ChapterMode,

    /// Performance direction mapped to SSML by capable engines.
    #[serde(default)]
    pub direction: Direction,
}

impl ChapterSpec {
    /// The character that speaks untagged text in this chapter.
    pub fn speaker(&self) -> &str {
        self.character
            .as_deref()
            .or(self.default_character.as_deref())
            .unwrap_or("narrator")
    }
}

/// Chapter parsing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterMode {
    #[default]
    Single,
    Multi,
}

/// Performance direction. Three known keys; values are free-form and
/// mapped to SSML prosody by engines that support it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Direction {
    #[serde(default)]
    pub pace: String,
    #[serde(default)]
    pub energy: String,
    #[serde(default)]
    pub emotion: String,
}

impl Direction {
    /// True when no direction key is set.
    pub fn is_empty(&self) -> bool {
        self.pace.is_empty() && self.energy.is_empty() && self.emotion.is_empty()
    }
}

/// A voice/engine assignment for one character.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterSpec {
    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Engine id ("edge", "gtts", "xtts", ...).
    pub engine: String,

    /// Voice id for catalog engines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Reference audio for cloning engines, relative to the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_audio: Option<String>,

    /// Dialect hint ("msa", "eg", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,

    /// Free-form persona description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,

    /// Unrecognized keys, reported by validation.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

/// Chunker policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Split at clause boundaries, merge small fragments.
    #[default]
    BreathGroup,
    /// Split at sentence boundaries only.
    Sentence,
    /// Hard split at the character cap.
    Fixed,
}

/// GPU memory policy for model-resident engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VramPolicy {
    /// Release cached VRAM after each chapter.
    #[default]
    EmptyCachePerChapter,
    /// Fully unload the model after each chapter.
    Conservative,
    /// Unload every N chapters, release otherwise.
    ReloadPeriodic,
}

/// Engine fallback scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackScope {
    /// Each chapter starts from the primary engine again.
    #[default]
    Chapter,
    /// A failed primary is dead for the rest of the run.
    Project,
}

/// Generation (TTS) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Per-chunk character cap.
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,

    /// Chunker policy.
    #[serde(default)]
    pub chunk_strategy: ChunkStrategy,

    /// Stitch overlap between adjacent chunks.
    #[serde(default = "default_crossfade_ms")]
    pub crossfade_ms: u32,

    /// Floor below which crossfades are flagged by validation.
    #[serde(default = "default_crossfade_min_ms")]
    pub crossfade_min_ms: u32,

    /// Per-engine crossfade overrides.
    #[serde(default)]
    pub crossfade_overrides: BTreeMap<String, u32>,

    /// Silence prepended to each stitched chapter.
    #[serde(default = "default_leading_silence_ms")]
    pub leading_silence_ms: u32,

    /// Retries per chunk before it counts as failed.
    #[serde(default = "default_max_retries")]
    pub max_retries_per_chunk: u32,

    /// Failed-chunk percentage above which the generate node fails.
    #[serde(default = "default_fail_threshold_pct")]
    pub fail_threshold_percent: f64,

    /// Minimum spacing between network engine requests.
    #[serde(default = "default_edge_rate_limit_ms")]
    pub edge_tts_rate_limit_ms: u64,

    /// Bounded fan-out for stateless engine requests within a chapter.
    #[serde(default = "default_edge_concurrency")]
    pub edge_tts_concurrency: usize,

    /// Wrap text in SSML when the engine supports it.
    #[serde(default = "default_true")]
    pub edge_tts_ssml: bool,

    /// Cloning engine sampling temperature.
    #[serde(default = "default_xtts_temperature")]
    pub xtts_temperature: f64,

    /// Cloning engine repetition penalty.
    #[serde(default = "default_xtts_repetition_penalty")]
    pub xtts_repetition_penalty: f64,

    /// GPU memory policy.
    #[serde(default)]
    pub xtts_vram_management: VramPolicy,

    /// Reload interval for the periodic policy.
    #[serde(default = "default_xtts_reload_every_n")]
    pub xtts_reload_every_n: u32,

    /// Whether a failed primary engine stays dead for the whole run.
    #[serde(default)]
    pub fallback_scope: FallbackScope,

    /// Engines tried after the primary, in order.
    #[serde(default = "default_fallback_chain")]
    pub fallback_chain: Vec<String>,
}

fn default_chunk_max_chars() -> usize {
    200
}

fn default_crossfade_ms() -> u32 {
    120
}

fn default_crossfade_min_ms() -> u32 {
    50
}

fn default_leading_silence_ms() -> u32 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_fail_threshold_pct() -> f64 {
    5.0
}

fn default_edge_rate_limit_ms() -> u64 {
    200
}

fn default_edge_concurrency() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_xtts_temperature() -> f64 {
    0.7
}

fn default_xtts_repetition_penalty() -> f64 {
    5.0
}

fn default_xtts_reload_every_n() -> u32 {
    10
}

fn default_fallback_chain() -> Vec<String> {
    vec!["edge".to_string(), "gtts".to_string()]
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            chunk_max_chars: default_chunk_max_chars(),
            chunk_strategy: ChunkStrategy::default(),
            crossfade_ms: default_crossfade_ms(),
            crossfade_min_ms: default_crossfade_min_ms(),
            crossfade_overrides: BTreeMap::new(),
            leading_silence_ms: default_leading_silence_ms(),
            max_retries_per_chunk: default_max_retries(),
            fail_threshold_percent: default_fail_threshold_pct(),
            edge_tts_rate_limit_ms: default_edge_rate_limit_ms(),
            edge_tts_concurrency: default_edge_concurrency(),
            edge_tts_ssml: true,
            xtts_temperature: default_xtts_temperature(),
            xtts_repetition_penalty: default_xtts_repetition_penalty(),
            xtts_vram_management: VramPolicy::default(),
            xtts_reload_every_n: default_xtts_reload_every_n(),
            fallback_scope: FallbackScope::default(),
            fallback_chain: default_fallback_chain(),
        }
    }
}

impl GenerationConfig {
    /// Crossfade for a given engine, honoring per-engine overrides.
    pub fn crossfade_for(&self, engine: &str) -> u32 {
        self.crossfade_overrides
            .get(engine)
            .copied()
            .unwrap_or(self.crossfade_ms)
    }
}

/// Per-chunk QC thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcConfig {
    /// Minimum acceptable SNR.
    #[serde(default = "default_snr_min_db")]
    pub snr_min_db: f64,

    /// Allowed deviation from expected chunk duration.
    #[serde(default = "default_max_duration_deviation_pct")]
    pub max_duration_deviation_percent: f64,

    /// Sample magnitude (dBFS) above which samples count as clipped.
    #[serde(default = "default_clipping_threshold_dbfs")]
    pub clipping_threshold_dbfs: f64,

    /// Allowed integrated-LUFS deviation from the mix target.
    #[serde(default = "default_lufs_deviation_max")]
    pub lufs_deviation_max: f64,
}

fn default_snr_min_db() -> f64 {
    20.0
}

fn default_max_duration_deviation_pct() -> f64 {
    30.0
}

fn default_clipping_threshold_dbfs() -> f64 {
    -0.5
}

fn default_lufs_deviation_max() -> f64 {
    3.0
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            snr_min_db: default_snr_min_db(),
            max_duration_deviation_percent: default_max_duration_deviation_pct(),
            clipping_threshold_dbfs: default_clipping_threshold_dbfs(),
            lufs_deviation_max: default_lufs_deviation_max(),
        }
    }
}

/// Ducking detector selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuckingMethod {
    /// Neural voice-activity detection (energy fallback when unavailable).
    #[default]
    Vad,
    /// Frame-energy detection.
    Energy,
}

/// Ducking shape for the bed track under voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuckingConfig {
    #[serde(default)]
    pub method: DuckingMethod,

    /// Speech probability threshold for the neural detector.
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f64,

    /// Duck this far before detected speech starts.
    #[serde(default = "default_duck_look_ahead_ms")]
    pub look_ahead_ms: u32,

    /// Smoothing window lower bound (with release).
    #[serde(default = "default_duck_attack_ms")]
    pub attack_ms: u32,

    /// Hold after speech ends.
    #[serde(default = "default_duck_release_ms")]
    pub release_ms: u32,

    /// Bed attenuation while speech is present.
    #[serde(default = "default_duck_attenuation_db")]
    pub attenuation_db: f64,
}

fn default_vad_threshold() -> f64 {
    0.5
}

fn default_duck_look_ahead_ms() -> u32 {
    200
}

fn default_duck_attack_ms() -> u32 {
    100
}

fn default_duck_release_ms() -> u32 {
    500
}

fn default_duck_attenuation_db() -> f64 {
    -12.0
}

impl Default for DuckingConfig {
    fn default() -> Self {
        Self {
            method: DuckingMethod::default(),
            vad_threshold: default_vad_threshold(),
            look_ahead_ms: default_duck_look_ahead_ms(),
            attack_ms: default_duck_attack_ms(),
            release_ms: default_duck_release_ms(),
            attenuation_db: default_duck_attenuation_db(),
        }
    }
}

/// Mix and loudness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixConfig {
    /// Master gain, linear.
    #[serde(default = "default_master_volume")]
    pub master_volume: f64,

    /// Integrated loudness target.
    #[serde(default = "default_target_lufs")]
    pub target_lufs: f64,

    /// True-peak ceiling.
    #[serde(default = "default_true_peak_limit")]
    pub true_peak_limit_dbtp: f64,

    /// Intended silence between chapters; the final gate flags gaps
    /// longer than twice this.
    #[serde(default = "default_chapter_gap_sec")]
    pub gap_between_chapters_sec: f64,

    /// Bed ducking shape.
    #[serde(default)]
    pub ducking: DuckingConfig,
}

fn default_master_volume() -> f64 {
    0.9
}

fn default_target_lufs() -> f64 {
    -16.0
}

fn default_true_peak_limit() -> f64 {
    -1.0
}

fn default_chapter_gap_sec() -> f64 {
    2.0
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            master_volume: default_master_volume(),
            target_lufs: default_target_lufs(),
            true_peak_limit_dbtp: default_true_peak_limit(),
            gap_between_chapters_sec: default_chapter_gap_sec(),
            ducking: DuckingConfig::default(),
        }
    }
}

/// Final-gate QC settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcFinalConfig {
    /// Windows below this dBFS level count as silence for gap detection.
    #[serde(default = "default_silence_threshold_dbfs")]
    pub silence_threshold_dbfs: f64,
}

fn default_silence_threshold_dbfs() -> f64 {
    -40.0
}

impl Default for QcFinalConfig {
    fn default() -> Self {
        Self {
            silence_threshold_dbfs: default_silence_threshold_dbfs(),
        }
    }
}

/// Delivery format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Mp3,
    M4b,
    Wav,
}

/// Export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Formats to produce.
    #[serde(default = "default_formats")]
    pub formats: Vec<ExportFormat>,

    /// MP3 bitrate in kbps.
    #[serde(default = "default_mp3_bitrate")]
    pub mp3_bitrate: u32,

    /// AAC bitrate for the M4B audio stream, in kbps.
    #[serde(default = "default_m4b_aac_bitrate")]
    pub m4b_aac_bitrate: u32,

    /// Attach cover art to the M4B when present.
    #[serde(default = "default_true_export")]
    pub include_cover_art: bool,

    /// Cover art path, relative to the project root.
    #[serde(default = "default_cover_art", skip_serializing_if = "Option::is_none")]
    pub cover_art: Option<String>,

    /// Global tags embedded in deliverables and recorded in the manifest.
    #[serde(default)]
    pub metadata: ExportMetadata,
}

fn default_formats() -> Vec<ExportFormat> {
    vec![ExportFormat::Mp3, ExportFormat::M4b]
}

fn default_mp3_bitrate() -> u32 {
    192
}

fn default_m4b_aac_bitrate() -> u32 {
    128
}

fn default_true_export() -> bool {
    true
}

fn default_cover_art() -> Option<String> {
    Some("00_CONFIG/cover.jpg".to_string())
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            formats: default_formats(),
            mp3_bitrate: default_mp3_bitrate(),
            m4b_aac_bitrate: default_m4b_aac_bitrate(),
            include_cover_art: true,
            cover_art: default_cover_art(),
            metadata: ExportMetadata::default(),
        }
    }
}

/// Global export metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub narrator: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default = "default_year")]
    pub year: i32,
    #[serde(default)]
    pub description: String,
}

fn default_year() -> i32 {
    Utc::now().year()
}

impl Default for ExportMetadata {
    fn default() -> Self {
        Self {
            author: String::new(),
            narrator: String::new(),
            publisher: String::new(),
            year: default_year(),
            description: String::new(),
        }
    }
}
