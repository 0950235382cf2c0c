//! Validation node - the hard gate before generation.
//!
//! Verifies everything generation needs: chapter sources on disk and
//! non-empty, characters defined with voices or reference audio,
//! chapter -> character references resolvable, speaker tags known,
//! sane generation settings, loudness targets present, and ffmpeg on
//! PATH. Unknown config keys are surfaced as warnings.

use serde_json::json;

use crate::audio::ffmpeg;
use crate::nodes::NodeResult;
use crate::pipeline::node::{Node, NodeStatus};
use crate::pipeline::state::Tracker;
use crate::project::config::{ChapterMode, ProjectConfig};
use crate::project::store::ProjectStore;
use crate::text::segmenter::validate_speaker_tags;

/// Engines that clone from reference audio.
const CLONING_ENGINES: &[&str] = &["xtts"];

/// Engines with a fixed voice catalog.
const CATALOG_ENGINES: &[&str] = &["edge", "gtts"];

/// Collected validation results.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub passed: Vec<String>,
    pub warnings: Vec<String>,
    pub failures: Vec<String>,
}

impl ValidationReport {
    pub fn pass(&mut self, message: impl Into<String>) {
        self.passed.push(message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.failures.push(message.into());
    }

    /// The gate passes only with zero failures.
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run the validation gate and record its status.
pub fn run(store: &ProjectStore, project_id: &str) -> NodeResult<ValidationReport> {
    let mut report = ValidationReport::default();
    let project_path = store.resolve(project_id)?;

    let config = match store.load_config(project_id) {
        Ok(config) => config,
        Err(e) => {
            report.fail(format!("Cannot load project.json: {}", e));
            record(store, project_id, &report)?;
            return Ok(report);
        }
    };

    check_unknown_keys(&config, &mut report);
    check_text_files(&config, &project_path, &mut report);
    check_characters(&config, &project_path, &mut report);
    check_speaker_tags(&config, &project_path, &mut report);
    check_generation_config(&config, &mut report);
    check_mix_config(&config, &mut report);

    if ffmpeg::ffmpeg_available() {
        report.pass("ffmpeg found on PATH");
    } else {
        report.fail("ffmpeg not found on PATH (required for audio processing and export)");
    }

    record(store, project_id, &report)?;
    Ok(report)
}

fn record(store: &ProjectStore, project_id: &str, report: &ValidationReport) -> NodeResult<()> {
    let status = if report.ok() {
        NodeStatus::Complete
    } else {
        NodeStatus::Failed
    };
    Tracker::new(store, project_id).update_node_status(
        Node::Validate,
        status,
        &[
            ("passed", json!(report.passed.len())),
            ("warnings", json!(report.warnings.len())),
            ("failures", json!(report.failures.clone())),
        ],
    )?;
    Ok(())
}

/// Unknown keys reject-with-warning rather than silently passing.
fn check_unknown_keys(config: &ProjectConfig, report: &mut ValidationReport) {
    for key in config.unknown.keys() {
        report.warn(format!("Unknown top-level config key '{}'", key));
    }
    for (char_id, character) in &config.characters {
        for key in character.unknown.keys() {
            report.warn(format!(
                "Character '{}': unknown config key '{}'",
                char_id, key
            ));
        }
    }
}

fn check_text_files(
    config: &ProjectConfig,
    project_path: &std::path::Path,
    report: &mut ValidationReport,
) {
    if config.chapters.is_empty() {
        report.fail("No chapters defined in project.json");
        return;
    }

    for chapter in &config.chapters {
        if chapter.source.is_empty() {
            report.fail(format!("Chapter '{}': no source file specified", chapter.id));
            continue;
        }

        let source = project_path.join(&chapter.source);
        if !source.exists() {
            report.fail(format!(
                "Chapter '{}': source file not found: {}",
                chapter.id, chapter.source
            ));
            continue;
        }

        match std::fs::read_to_string(&source) {
            Ok(content) if content.trim().is_empty() => {
                report.fail(format!(
                    "Chapter '{}': source file is empty: {}",
                    chapter.id, chapter.source
                ));
            }
            Ok(content) => {
                report.pass(format!(
                    "Chapter '{}': text file OK ({} chars)",
                    chapter.id,
                    content.trim().chars().count()
                ));
                if chapter.language.is_empty() {
                    report.warn(format!("Chapter '{}': no language tag specified", chapter.id));
                }
            }
            Err(e) => {
                report.fail(format!(
                    "Chapter '{}': source file unreadable: {}",
                    chapter.id, e
                ));
            }
        }
    }
}

fn check_characters(
    config: &ProjectConfig,
    project_path: &std::path::Path,
    report: &mut ValidationReport,
) {
    if config.characters.is_empty() {
        report.fail("No characters defined in project.json");
        return;
    }

    for (char_id, character) in &config.characters {
        if character.engine.is_empty() {
            report.fail(format!("Character '{}': no engine specified", char_id));
            continue;
        }

        if CLONING_ENGINES.contains(&character.engine.as_str()) {
            match &character.reference_audio {
                None => report.fail(format!(
                    "Character '{}': engine '{}' requires reference_audio",
                    char_id, character.engine
                )),
                Some(reference) => {
                    if project_path.join(reference).exists() {
                        report.pass(format!(
                            "Character '{}': {} with reference '{}'",
                            char_id, character.engine, reference
                        ));
                    } else {
                        report.fail(format!(
                            "Character '{}': reference audio not found: {}",
                            char_id, reference
                        ));
                    }
                }
            }
        } else if CATALOG_ENGINES.contains(&character.engine.as_str()) {
            match &character.voice {
                None => report.fail(format!(
                    "Character '{}': engine '{}' requires a voice id",
                    char_id, character.engine
                )),
                Some(voice) => report.pass(format!(
                    "Character '{}': voice '{}' on engine '{}'",
                    char_id, voice, character.engine
                )),
            }
        } else {
            report.warn(format!(
                "Character '{}': unknown engine '{}'",
                char_id, character.engine
            ));
        }
    }

    // Chapter -> character references.
    for chapter in &config.chapters {
        match chapter.mode {
            ChapterMode::Single => {
                if let Some(character) = &chapter.character {
                    if !config.characters.contains_key(character) {
                        report.fail(format!(
                            "Chapter '{}': references unknown character '{}'",
                            chapter.id, character
                        ));
                    }
                }
            }
            ChapterMode::Multi => {
                if let Some(default) = &chapter.default_character {
                    if !config.characters.contains_key(default) {
                        report.fail(format!(
                            "Chapter '{}': default_character '{}' not found",
                            chapter.id, default
                        ));
                    }
                }
            }
        }
    }
}

/// Audit `[speaker]` tags in multi-mode sources against the character
/// set.
fn check_speaker_tags(
    config: &ProjectConfig,
    project_path: &std::path::Path,
    report: &mut ValidationReport,
) {
    let known: Vec<&str> = config.characters.keys().map(|k| k.as_str()).collect();

    for chapter in &config.chapters {
        if chapter.mode != ChapterMode::Multi {
            continue;
        }
        let source = project_path.join(&chapter.source);
        let Ok(text) = std::fs::read_to_string(&source) else {
            continue; // Already reported by the text-file check.
        };
        for warning in validate_speaker_tags(&text, &known) {
            report.warn(format!("Chapter '{}': {}", chapter.id, warning));
        }
    }
}

fn check_generation_config(config: &ProjectConfig, report: &mut ValidationReport) {
    let gen = &config.generation;

    if gen.chunk_max_chars < 50 {
        report.warn(format!(
            "chunk_max_chars={} is very small (recommended minimum: 50)",
            gen.chunk_max_chars
        ));
    } else if gen.chunk_max_chars > 500 {
        report.warn(format!(
            "chunk_max_chars={} is large and may degrade cloning quality",
            gen.chunk_max_chars
        ));
    }

    if gen.crossfade_ms < gen.crossfade_min_ms {
        report.warn(format!(
            "crossfade_ms={} is below crossfade_min_ms={}; boundaries may be audible",
            gen.crossfade_ms, gen.crossfade_min_ms
        ));
    }

    for engine in &gen.fallback_chain {
        if engine.is_empty() {
            report.warn("fallback_chain contains an empty engine name".to_string());
        }
    }

    report.pass("Generation config present");
}

fn check_mix_config(config: &ProjectConfig, report: &mut ValidationReport) {
    report.pass(format!("LUFS target: {}", config.mix.target_lufs));
    if config.mix.master_volume <= 0.0 || config.mix.master_volume > 1.5 {
        report.warn(format!(
            "master_volume={} is outside the expected range (0, 1.5]",
            config.mix.master_volume
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::config::{ChapterSpec, CharacterSpec, Direction};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn project_with_chapter(text: &str) -> (tempfile::TempDir, ProjectStore) {
        let root = tempdir().unwrap();
        let store = ProjectStore::new(root.path());
        let path = store.create("BOOK").unwrap();

        std::fs::write(path.join("01_TEXT/chapters/ch01.txt"), text).unwrap();
        let mut config = store.load_config("BOOK").unwrap();
        config.chapters.push(ChapterSpec {
            id: "ch01".to_string(),
            title: "Chapter One".to_string(),
            language: "en".to_string(),
            source: "01_TEXT/chapters/ch01.txt".to_string(),
            character: Some("narrator".to_string()),
            default_character: None,
            mode: ChapterMode::Single,
            direction: Direction::default(),
        });
        store.save_config("BOOK", &config).unwrap();
        (root, store)
    }

    #[test]
    fn healthy_project_collects_passes() {
        let (_root, store) = project_with_chapter("Some chapter text.");
        let report = run(&store, "BOOK").unwrap();

        // ffmpeg availability varies by machine; everything else passes.
        let non_ffmpeg: Vec<&String> = report
            .failures
            .iter()
            .filter(|f| !f.contains("ffmpeg"))
            .collect();
        assert!(non_ffmpeg.is_empty(), "{:?}", non_ffmpeg);
        assert!(report.passed.iter().any(|p| p.contains("ch01")));
    }

    #[test]
    fn empty_source_fails() {
        let (_root, store) = project_with_chapter("   ");
        let report = run(&store, "BOOK").unwrap();
        assert!(report.failures.iter().any(|f| f.contains("empty")));
        assert!(!report.ok());
    }

    #[test]
    fn missing_source_fails() {
        let (_root, store) = project_with_chapter("text");
        let mut config = store.load_config("BOOK").unwrap();
        config.chapters[0].source = "01_TEXT/chapters/ghost.txt".to_string();
        store.save_config("BOOK", &config).unwrap();

        let report = run(&store, "BOOK").unwrap();
        assert!(report.failures.iter().any(|f| f.contains("not found")));
    }

    #[test]
    fn no_chapters_fails() {
        let root = tempdir().unwrap();
        let store = ProjectStore::new(root.path());
        store.create("BOOK").unwrap();

        let report = run(&store, "BOOK").unwrap();
        assert!(report.failures.iter().any(|f| f.contains("No chapters")));
    }

    #[test]
    fn unknown_character_reference_fails() {
        let (_root, store) = project_with_chapter("text");
        let mut config = store.load_config("BOOK").unwrap();
        config.chapters[0].character = Some("ghost".to_string());
        store.save_config("BOOK", &config).unwrap();

        let report = run(&store, "BOOK").unwrap();
        assert!(report
            .failures
            .iter()
            .any(|f| f.contains("unknown character 'ghost'")));
    }

    #[test]
    fn cloning_engine_requires_reference() {
        let (_root, store) = project_with_chapter("text");
        let mut config = store.load_config("BOOK").unwrap();
        config.characters.insert(
            "clone".to_string(),
            CharacterSpec {
                name: "Clone".to_string(),
                engine: "xtts".to_string(),
                voice: None,
                reference_audio: None,
                dialect: None,
                persona: None,
                unknown: BTreeMap::new(),
            },
        );
        store.save_config("BOOK", &config).unwrap();

        let report = run(&store, "BOOK").unwrap();
        assert!(report
            .failures
            .iter()
            .any(|f| f.contains("requires reference_audio")));
    }

    #[test]
    fn catalog_engine_requires_voice() {
        let (_root, store) = project_with_chapter("text");
        let mut config = store.load_config("BOOK").unwrap();
        config.characters.get_mut("narrator").unwrap().voice = None;
        store.save_config("BOOK", &config).unwrap();

        let report = run(&store, "BOOK").unwrap();
        assert!(report.failures.iter().any(|f| f.contains("requires a voice")));
    }

    #[test]
    fn unknown_speaker_tags_warn() {
        let (_root, store) = project_with_chapter("[ghost] who goes there\n\nnarration");
        let mut config = store.load_config("BOOK").unwrap();
        config.chapters[0].mode = ChapterMode::Multi;
        config.chapters[0].character = None;
        config.chapters[0].default_character = Some("narrator".to_string());
        store.save_config("BOOK", &config).unwrap();

        let report = run(&store, "BOOK").unwrap();
        assert!(report.warnings.iter().any(|w| w.contains("ghost")));
    }

    #[test]
    fn gate_status_is_recorded() {
        let (_root, store) = project_with_chapter("text");
        let report = run(&store, "BOOK").unwrap();

        let state = store.load_state("BOOK").unwrap();
        let expected = if report.ok() {
            NodeStatus::Complete
        } else {
            NodeStatus::Failed
        };
        assert_eq!(state.status(Node::Validate), expected);
    }

    #[test]
    fn unknown_config_keys_warn() {
        let (_root, store) = project_with_chapter("text");
        let path = store.resolve("BOOK").unwrap().join("project.json");
        let mut doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        doc["mystery_section"] = serde_json::json!({"a": 1});
        std::fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();

        let report = run(&store, "BOOK").unwrap();
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("mystery_section")));
    }
}
