//! QC scan node - re-scan generated chunks per chapter.
//!
//! An auto gate: it never blocks downstream nodes, but its fail rate is
//! the signal behind the generate node's failure threshold. Reports are
//! persisted next to the generated audio.

use serde_json::json;

use crate::nodes::{NodeError, NodeResult};
use crate::pipeline::node::{Node, NodeStatus};
use crate::pipeline::state::Tracker;
use crate::project::layout;
use crate::project::store::ProjectStore;
use crate::qc::scanner::scan_chunk;
use crate::qc::QcReport;

/// Summary of a QC scan run.
#[derive(Debug, Clone)]
pub struct QcScanOutcome {
    pub reports: Vec<QcReport>,
    pub total_chunks: usize,
    pub failed_chunks: usize,
    pub fail_rate_percent: f64,
}

/// Scan every chapter's chunk files and persist per-chapter reports.
pub fn run(store: &ProjectStore, project_id: &str) -> NodeResult<QcScanOutcome> {
    let project_path = store.resolve(project_id)?;
    let config = store.load_config(project_id)?;
    let raw_dir = layout::raw_dir(&project_path);
    let tracker = Tracker::new(store, project_id);

    if config.chapters.is_empty() {
        return Err(NodeError::invalid("No chapters defined"));
    }

    let mut reports = Vec::new();
    let mut total_chunks = 0usize;
    let mut failed_chunks = 0usize;

    for chapter in &config.chapters {
        let mut chunk_files: Vec<_> = match std::fs::read_dir(&raw_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| {
                    let name = p
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    name.starts_with(&format!("{}_", chapter.id)) && name.ends_with(".wav")
                })
                .collect(),
            Err(e) => {
                return Err(NodeError::io(format!("reading {}", raw_dir.display()), e));
            }
        };
        chunk_files.sort();

        let mut report = QcReport::new(project_id, &chapter.id);
        for chunk_path in &chunk_files {
            let chunk_id = chunk_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            report.chunks.push(scan_chunk(
                chunk_path,
                &chunk_id,
                &config.qc,
                None,
                config.mix.target_lufs,
            ));
        }

        total_chunks += report.chunks.len();
        failed_chunks += report.fail_count();

        if !report.chunks.is_empty() {
            report
                .save(&layout::generated_dir(&project_path))
                .map_err(|e| NodeError::io("saving QC report".to_string(), e))?;
        }
        reports.push(report);
    }

    let fail_rate = failed_chunks as f64 / total_chunks.max(1) as f64 * 100.0;
    let status = if total_chunks == 0 {
        NodeStatus::Skipped
    } else if failed_chunks == 0 {
        NodeStatus::Complete
    } else {
        NodeStatus::Partial
    };

    tracker.update_node_status(
        Node::QcScan,
        status,
        &[
            ("chunks_scanned", json!(total_chunks)),
            ("failed", json!(failed_chunks)),
            ("fail_rate_percent", json!((fail_rate * 100.0).round() / 100.0)),
        ],
    )?;

    Ok(QcScanOutcome {
        reports,
        total_chunks,
        failed_chunks,
        fail_rate_percent: fail_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::project::config::{ChapterMode, ChapterSpec, Direction};
    use tempfile::tempdir;

    fn speech_like_wav(path: &std::path::Path) {
        let sr = 16_000usize;
        let mut samples = Vec::new();
        for _ in 0..3 {
            for i in 0..sr / 5 {
                samples.push((i as f32 * 2.0 * std::f32::consts::PI * 220.0 / 16_000.0).sin() * 0.2);
            }
            for i in 0..sr / 10 {
                samples.push(if i % 2 == 0 { 0.001 } else { -0.001 });
            }
        }
        AudioBuffer::new(samples, sr as u32, 1).save_wav(path).unwrap();
    }

    fn setup() -> (tempfile::TempDir, ProjectStore) {
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
        config.qc.snr_min_db = 5.0;
        config.qc.lufs_deviation_max = 40.0;
        store.save_config("BOOK", &config).unwrap();
        (root, store)
    }

    #[test]
    fn scans_chunk_files_per_chapter() {
        let (_root, store) = setup();
        let raw = layout::raw_dir(&store.resolve("BOOK").unwrap());
        speech_like_wav(&raw.join("ch01_000.wav"));
        speech_like_wav(&raw.join("ch01_001.wav"));
        // Stitched chapter output must not be scanned as a chunk.
        speech_like_wav(&raw.join("ch01.wav"));

        let outcome = run(&store, "BOOK").unwrap();
        assert_eq!(outcome.total_chunks, 2);
        assert_eq!(outcome.failed_chunks, 0);

        let state = store.load_state("BOOK").unwrap();
        assert_eq!(state.status(Node::QcScan), NodeStatus::Complete);
    }

    #[test]
    fn no_chunks_marks_skipped() {
        let (_root, store) = setup();
        let outcome = run(&store, "BOOK").unwrap();
        assert_eq!(outcome.total_chunks, 0);

        let state = store.load_state("BOOK").unwrap();
        assert_eq!(state.status(Node::QcScan), NodeStatus::Skipped);
    }
}
