//! Export node - produce deliverables and the integrity manifest.
//!
//! Transcodes mixed chapters to the configured formats (per-chapter MP3
//! and/or WAV under `07_EXPORT/chapters/`, a single M4B audiobook under
//! `07_EXPORT/audiobook/`), then hashes everything under `07_EXPORT/`
//! into `manifest.json`.

use std::collections::BTreeMap;

use serde_json::json;

use crate::export::{export_mp3, export_wav, m4b, manifest, wav_files_in_natural_order};
use crate::nodes::{NodeError, NodeResult};
use crate::pipeline::node::{Node, NodeStatus};
use crate::pipeline::state::Tracker;
use crate::project::config::ExportFormat;
use crate::project::layout;
use crate::project::store::ProjectStore;

/// Export summary.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub exported: usize,
    pub failed: usize,
    pub manifest_path: Option<std::path::PathBuf>,
}

/// Run the export node.
pub fn run(store: &ProjectStore, project_id: &str) -> NodeResult<ExportOutcome> {
    let project_path = store.resolve(project_id)?;
    let config = store.load_config(project_id)?;
    let tracker = Tracker::new(store, project_id);

    let mix_dir = layout::mix_dir(&project_path);
    let mixed_files = wav_files_in_natural_order(&mix_dir)?;
    if mixed_files.is_empty() {
        tracker.update_node_status(
            Node::Export,
            NodeStatus::Failed,
            &[("error", json!("No mixed files to export"))],
        )?;
        return Err(NodeError::invalid("No mixed files to export; run mix first"));
    }

    tracker.update_node_status(Node::Export, NodeStatus::Running, &[])?;

    let chapters_dir = layout::export_chapters_dir(&project_path);
    let audiobook_dir = layout::export_audiobook_dir(&project_path);
    let mut exported = 0usize;
    let mut failed = 0usize;
    let mut errors: Vec<String> = Vec::new();

    for format in &config.export.formats {
        match format {
            ExportFormat::Mp3 => {
                for input in &mixed_files {
                    let stem = input
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let output = chapters_dir.join(format!("{}.mp3", stem));
                    match export_mp3(input, &output, config.export.mp3_bitrate) {
                        Ok(()) => exported += 1,
                        Err(e) => {
                            failed += 1;
                            errors.push(format!("{}.mp3: {}", stem, e));
                        }
                    }
                }
            }
            ExportFormat::Wav => {
                for input in &mixed_files {
                    let name = input
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let output = chapters_dir.join(&name);
                    match export_wav(input, &output) {
                        Ok(()) => exported += 1,
                        Err(e) => {
                            failed += 1;
                            errors.push(format!("{}: {}", name, e));
                        }
                    }
                }
            }
            ExportFormat::M4b => {
                let titles: BTreeMap<String, String> = config
                    .chapters
                    .iter()
                    .map(|ch| (ch.id.clone(), ch.title.clone()))
                    .collect();

                let cover = config
                    .export
                    .cover_art
                    .as_ref()
                    .filter(|_| config.export.include_cover_art)
                    .map(|rel| project_path.join(rel));

                let book_title = titlecase_id(&config.id);
                let output = audiobook_dir.join(format!("{}.m4b", config.id));

                match m4b::export_m4b(
                    &mixed_files,
                    &titles,
                    &book_title,
                    &config.export.metadata,
                    cover.as_deref(),
                    config.export.m4b_aac_bitrate,
                    &layout::export_dir(&project_path),
                    &output,
                ) {
                    Ok(()) => exported += 1,
                    Err(e) => {
                        failed += 1;
                        errors.push(format!("{}.m4b: {}", config.id, e));
                    }
                }
            }
        }
    }

    // The manifest covers whatever made it to disk, even on partial
    // failure - the delivery contract describes reality.
    let manifest_path = match manifest::generate_manifest(
        &layout::export_dir(&project_path),
        project_id,
        json!({
            "author": config.export.metadata.author,
            "narrator": config.export.metadata.narrator,
            "publisher": config.export.metadata.publisher,
            "year": config.export.metadata.year,
            "description": config.export.metadata.description,
        }),
    ) {
        Ok(path) => Some(path),
        Err(e) => {
            failed += 1;
            errors.push(format!("manifest: {}", e));
            None
        }
    };

    let status = if failed == 0 {
        NodeStatus::Complete
    } else if exported > 0 {
        NodeStatus::Partial
    } else {
        NodeStatus::Failed
    };
    tracker.update_node_status(
        Node::Export,
        status,
        &[
            ("exported", json!(exported)),
            ("failed", json!(failed)),
            ("errors", json!(errors)),
        ],
    )?;

    Ok(ExportOutcome {
        exported,
        failed,
        manifest_path,
    })
}

/// Book title fallback from the project id.
fn titlecase_id(id: &str) -> String {
    id.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titlecase_from_project_id() {
        assert_eq!(titlecase_id("MY_GREAT_BOOK"), "My Great Book");
        assert_eq!(titlecase_id("book"), "Book");
    }

    #[test]
    fn export_without_mixes_fails() {
        let root = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(root.path());
        store.create("BOOK").unwrap();

        let err = run(&store, "BOOK").unwrap_err();
        assert!(matches!(err, NodeError::Invalid(_)));

        let state = store.load_state("BOOK").unwrap();
        assert_eq!(state.status(Node::Export), NodeStatus::Failed);
    }
}
