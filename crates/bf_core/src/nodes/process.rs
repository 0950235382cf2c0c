//! Process node - normalize and trim stitched chapters.
//!
//! Iterates the stitched chapter WAVs in `03_GENERATED/raw/`, applies
//! two-pass loudness normalization followed by silence trimming, and
//! writes the results to `03_GENERATED/processed/`. Already-processed
//! chapters are skipped so the node is cheap to resume.

use serde_json::json;

use crate::audio::ffmpeg;
use crate::nodes::{NodeError, NodeResult};
use crate::pipeline::node::{Node, NodeStatus};
use crate::pipeline::state::Tracker;
use crate::project::layout;
use crate::project::store::ProjectStore;

/// Trim parameters for chapter boundaries.
const TRIM_THRESHOLD_DB: f64 = -40.0;
const TRIM_MIN_SILENCE_MS: u32 = 100;

/// Processing summary.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub total_files: usize,
    pub processed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Run the processing node over all stitched chapters.
pub fn run(store: &ProjectStore, project_id: &str) -> NodeResult<ProcessOutcome> {
    let project_path = store.resolve(project_id)?;
    let config = store.load_config(project_id)?;
    let raw_dir = layout::raw_dir(&project_path);
    let processed_dir = layout::processed_dir(&project_path);
    let tracker = Tracker::new(store, project_id);

    std::fs::create_dir_all(&processed_dir)
        .map_err(|e| NodeError::io(format!("creating {}", processed_dir.display()), e))?;

    // Stitched chapters only - chunk files stay raw.
    let chapter_files: Vec<_> = config
        .chapters
        .iter()
        .map(|ch| raw_dir.join(format!("{}.wav", ch.id)))
        .filter(|p| p.exists())
        .collect();

    if chapter_files.is_empty() {
        tracker.update_node_status(
            Node::Process,
            NodeStatus::Failed,
            &[("error", json!("No stitched chapters found"))],
        )?;
        return Err(NodeError::invalid(
            "No stitched chapters found; run generate first",
        ));
    }

    tracker.update_node_status(Node::Process, NodeStatus::Running, &[])?;

    let mut processed = 0usize;
    let mut failed = 0usize;
    let mut errors: Vec<String> = Vec::new();

    for input in &chapter_files {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let output = processed_dir.join(&name);

        if output.exists() {
            processed += 1;
            continue;
        }

        let temp = output.with_extension("norm.tmp.wav");
        let result = ffmpeg::normalize_lufs(
            input,
            &temp,
            config.mix.target_lufs,
            config.mix.true_peak_limit_dbtp,
        )
        .and_then(|_| ffmpeg::trim_silence(&temp, &output, TRIM_THRESHOLD_DB, TRIM_MIN_SILENCE_MS));
        let _ = std::fs::remove_file(&temp);

        match result {
            Ok(()) => {
                processed += 1;
                tracing::info!("Processed {}", name);
            }
            Err(e) => {
                failed += 1;
                errors.push(format!("{}: {}", name, e));
                tracing::error!("Processing failed for {}: {}", name, e);
            }
        }
    }

    let status = if failed == 0 {
        NodeStatus::Complete
    } else if processed > 0 {
        NodeStatus::Partial
    } else {
        NodeStatus::Failed
    };

    tracker.update_node_status(
        Node::Process,
        status,
        &[
            ("processed", json!(processed)),
            ("failed", json!(failed)),
            ("errors", json!(errors.clone())),
        ],
    )?;

    Ok(ProcessOutcome {
        total_files: chapter_files.len(),
        processed,
        failed,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::project::config::{ChapterMode, ChapterSpec, Direction};
    use tempfile::tempdir;

    fn setup_with_chapter() -> (tempfile::TempDir, ProjectStore) {
        let root = tempdir().unwrap();
        let store = ProjectStore::new(root.path());
        store.create("BOOK").unwrap();

        let mut config = store.load_config("BOOK").unwrap();
        config.chapters.push(ChapterSpec {
            id: "ch01".to_string(),
            title: "One".to_string(),
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
    fn missing_stitched_audio_fails_the_node() {
        let (_root, store) = setup_with_chapter();
        let err = run(&store, "BOOK").unwrap_err();
        assert!(matches!(err, NodeError::Invalid(_)));

        let state = store.load_state("BOOK").unwrap();
        assert_eq!(state.status(Node::Process), NodeStatus::Failed);
    }

    #[test]
    fn already_processed_chapters_are_skipped() {
        let (_root, store) = setup_with_chapter();
        let path = store.resolve("BOOK").unwrap();

        // A stitched chapter and an already-processed copy of it.
        let tone: Vec<f32> = (0..16_000)
            .map(|i| (i as f32 * 0.1).sin() * 0.3)
            .collect();
        AudioBuffer::new(tone.clone(), 16_000, 1)
            .save_wav(&layout::raw_dir(&path).join("ch01.wav"))
            .unwrap();
        AudioBuffer::new(tone, 16_000, 1)
            .save_wav(&layout::processed_dir(&path).join("ch01.wav"))
            .unwrap();

        let outcome = run(&store, "BOOK").unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.failed, 0);

        let state = store.load_state("BOOK").unwrap();
        assert_eq!(state.status(Node::Process), NodeStatus::Complete);
    }
}
