//! Ingest node - import chapter text sources into the project.
//!
//! Copies `*.txt` files into `01_TEXT/chapters/`, detects the language
//! per file, derives chapter ids from filenames, and appends new
//! chapter entries to the project config. Files whose derived id
//! already exists are skipped.

use std::path::Path;

use serde_json::json;

use crate::nodes::{NodeError, NodeResult};
use crate::pipeline::node::{Node, NodeStatus};
use crate::pipeline::state::Tracker;
use crate::project::config::{ChapterMode, ChapterSpec, Direction};
use crate::project::layout;
use crate::project::store::ProjectStore;

/// What happened to one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    Ingested,
    Skipped,
}

/// Per-file ingestion record.
#[derive(Debug, Clone)]
pub struct IngestRecord {
    pub file: String,
    pub chapter_id: String,
    pub status: IngestStatus,
    pub language: String,
    pub characters: usize,
}

/// Ingestion summary.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub total_files: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub details: Vec<IngestRecord>,
}

/// Strip path components and filesystem-hostile characters from a
/// source filename.
fn sanitize_filename(raw: &str) -> NodeResult<String> {
    let base = Path::new(raw)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .filter(|c| !c.is_control())
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();

    if cleaned.is_empty() {
        return Err(NodeError::invalid(format!(
            "Filename '{}' is empty after sanitization",
            raw
        )));
    }
    Ok(cleaned)
}

/// Heuristic script detection: a text is Arabic when Arabic-block
/// characters dominate its alphabetic content.
pub fn is_arabic(text: &str) -> bool {
    let mut arabic = 0usize;
    let mut alphabetic = 0usize;
    for c in text.chars() {
        if c.is_alphabetic() {
            alphabetic += 1;
            if ('\u{0600}'..='\u{06FF}').contains(&c) || ('\u{0750}'..='\u{077F}').contains(&c) {
                arabic += 1;
            }
        }
    }
    alphabetic > 0 && arabic * 2 > alphabetic
}

/// Import text files from `source_dir` into the project.
pub fn run(
    store: &ProjectStore,
    project_id: &str,
    source_dir: &Path,
    language: Option<&str>,
) -> NodeResult<IngestOutcome> {
    let project_path = store.resolve(project_id)?;
    let chapters_dir = layout::chapters_dir(&project_path);
    std::fs::create_dir_all(&chapters_dir)
        .map_err(|e| NodeError::io(format!("creating {}", chapters_dir.display()), e))?;

    if !source_dir.exists() {
        return Err(NodeError::invalid(format!(
            "Source directory not found: {}",
            source_dir.display()
        )));
    }

    let mut txt_files: Vec<_> = std::fs::read_dir(source_dir)
        .map_err(|e| NodeError::io(format!("reading {}", source_dir.display()), e))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|e| e.eq_ignore_ascii_case("txt"))
                    .unwrap_or(false)
        })
        .collect();
    txt_files.sort();

    if txt_files.is_empty() {
        return Err(NodeError::invalid(format!(
            "No .txt files found in {}",
            source_dir.display()
        )));
    }

    let mut config = store.load_config(project_id)?;
    let existing: std::collections::BTreeSet<String> =
        config.chapters.iter().map(|c| c.id.clone()).collect();

    let mut details = Vec::new();
    let mut new_chapters = Vec::new();

    for src in &txt_files {
        let safe_name = sanitize_filename(&src.file_name().unwrap_or_default().to_string_lossy())?;
        let dst = chapters_dir.join(&safe_name);

        std::fs::copy(src, &dst)
            .map_err(|e| NodeError::io(format!("copying to {}", dst.display()), e))?;

        let content = std::fs::read_to_string(&dst)
            .map_err(|e| NodeError::io(format!("reading {}", dst.display()), e))?;
        let content = content.trim();

        let detected = match language {
            Some(lang) => lang.to_string(),
            None => {
                if is_arabic(content) {
                    "ar".to_string()
                } else {
                    "en".to_string()
                }
            }
        };

        let chapter_id = safe_name
            .trim_end_matches(".txt")
            .replace(' ', "_")
            .to_lowercase();

        if existing.contains(&chapter_id) {
            details.push(IngestRecord {
                file: safe_name,
                chapter_id,
                status: IngestStatus::Skipped,
                language: detected,
                characters: content.chars().count(),
            });
            continue;
        }

        let title = chapter_id
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");

        new_chapters.push(ChapterSpec {
            id: chapter_id.clone(),
            title,
            language: detected.clone(),
            source: format!("01_TEXT/chapters/{}", safe_name),
            character: Some("narrator".to_string()),
            default_character: None,
            mode: ChapterMode::Single,
            direction: Direction {
                pace: "moderate".to_string(),
                energy: "normal".to_string(),
                emotion: "neutral".to_string(),
            },
        });

        details.push(IngestRecord {
            file: safe_name,
            chapter_id,
            status: IngestStatus::Ingested,
            language: detected,
            characters: content.chars().count(),
        });
    }

    if !new_chapters.is_empty() {
        config.chapters.extend(new_chapters);
        store.save_config(project_id, &config)?;
    }

    let ingested = details
        .iter()
        .filter(|r| r.status == IngestStatus::Ingested)
        .count();
    let skipped = details.len() - ingested;

    Tracker::new(store, project_id).update_node_status(
        Node::Ingest,
        NodeStatus::Complete,
        &[
            ("files_ingested", json!(ingested)),
            ("files_skipped", json!(skipped)),
        ],
    )?;

    Ok(IngestOutcome {
        total_files: txt_files.len(),
        ingested,
        skipped,
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, ProjectStore, tempfile::TempDir) {
        let root = tempdir().unwrap();
        let store = ProjectStore::new(root.path());
        store.create("BOOK").unwrap();
        let source = tempdir().unwrap();
        (root, store, source)
    }

    #[test]
    fn ingests_text_files_as_chapters() {
        let (_root, store, source) = setup();
        std::fs::write(source.path().join("Ch01 Intro.txt"), "Hello there.").unwrap();
        std::fs::write(source.path().join("ch02.txt"), "Second chapter.").unwrap();

        let outcome = run(&store, "BOOK", source.path(), None).unwrap();
        assert_eq!(outcome.ingested, 2);
        assert_eq!(outcome.skipped, 0);

        let config = store.load_config("BOOK").unwrap();
        assert_eq!(config.chapters.len(), 2);
        assert_eq!(config.chapters[0].id, "ch01_intro");
        assert_eq!(config.chapters[0].title, "Ch01 Intro");
        assert_eq!(config.chapters[0].language, "en");
        assert_eq!(config.chapters[0].mode, ChapterMode::Single);

        let copied = store
            .resolve("BOOK")
            .unwrap()
            .join("01_TEXT/chapters/Ch01 Intro.txt");
        assert!(copied.exists());
    }

    #[test]
    fn arabic_sources_are_detected() {
        let (_root, store, source) = setup();
        std::fs::write(
            source.path().join("fasl.txt"),
            "\u{642}\u{627}\u{644} \u{627}\u{644}\u{631}\u{627}\u{648}\u{64a} \u{643}\u{644}\u{627}\u{645}\u{627} \u{637}\u{648}\u{64a}\u{644}\u{627}.",
        )
        .unwrap();

        let outcome = run(&store, "BOOK", source.path(), None).unwrap();
        assert_eq!(outcome.details[0].language, "ar");
    }

    #[test]
    fn language_override_wins() {
        let (_root, store, source) = setup();
        std::fs::write(source.path().join("a.txt"), "plain english").unwrap();

        let outcome = run(&store, "BOOK", source.path(), Some("ar")).unwrap();
        assert_eq!(outcome.details[0].language, "ar");
    }

    #[test]
    fn duplicate_ids_are_skipped() {
        let (_root, store, source) = setup();
        std::fs::write(source.path().join("ch01.txt"), "text").unwrap();

        run(&store, "BOOK", source.path(), None).unwrap();
        let outcome = run(&store, "BOOK", source.path(), None).unwrap();

        assert_eq!(outcome.ingested, 0);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(store.load_config("BOOK").unwrap().chapters.len(), 1);
    }

    #[test]
    fn missing_source_dir_fails() {
        let (_root, store, _source) = setup();
        let err = run(&store, "BOOK", Path::new("/nonexistent"), None).unwrap_err();
        assert!(matches!(err, NodeError::Invalid(_)));
    }

    #[test]
    fn ingest_marks_node_complete() {
        let (_root, store, source) = setup();
        std::fs::write(source.path().join("ch01.txt"), "text").unwrap();
        run(&store, "BOOK", source.path(), None).unwrap();

        let state = store.load_state("BOOK").unwrap();
        assert_eq!(state.status(Node::Ingest), NodeStatus::Complete);
    }

    #[test]
    fn arabic_detection_heuristic() {
        assert!(is_arabic("\u{645}\u{631}\u{62d}\u{628}\u{627} \u{628}\u{643}"));
        assert!(!is_arabic("hello world"));
        assert!(!is_arabic("123 456"));
    }
}
