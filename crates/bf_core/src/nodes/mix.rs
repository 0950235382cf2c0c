//! Mix node - combine processed chapters with the ambient bed.
//!
//! Prefers processed chapters, falling back to raw stitched audio with
//! a warning. The bed is an explicitly named file under
//! `05_MUSIC/generated/` or the newest generated bed; without one the
//! chapters are mixed voice-only.

use std::path::PathBuf;

use serde_json::json;

use crate::audio::mixer::Mixer;
use crate::nodes::{compose::newest_wav, NodeError, NodeResult};
use crate::pipeline::node::{Node, NodeStatus};
use crate::pipeline::state::Tracker;
use crate::project::layout;
use crate::project::store::ProjectStore;

/// Mix summary.
#[derive(Debug, Clone)]
pub struct MixOutcome {
    pub total_chapters: usize,
    pub mixed: usize,
    pub failed: usize,
    pub bed: Option<PathBuf>,
}

/// Run the mix node over all chapters.
pub fn run(store: &ProjectStore, project_id: &str, bed_file: Option<&str>) -> NodeResult<MixOutcome> {
    let project_path = store.resolve(project_id)?;
    let config = store.load_config(project_id)?;
    let tracker = Tracker::new(store, project_id);

    let mix_dir = layout::mix_dir(&project_path);
    std::fs::create_dir_all(&mix_dir)
        .map_err(|e| NodeError::io(format!("creating {}", mix_dir.display()), e))?;

    // Voice sources: processed chapters, else raw with a warning.
    let processed_dir = layout::processed_dir(&project_path);
    let raw_dir = layout::raw_dir(&project_path);
    let mut chapter_files: Vec<PathBuf> = config
        .chapters
        .iter()
        .map(|ch| processed_dir.join(format!("{}.wav", ch.id)))
        .filter(|p| p.exists())
        .collect();
    if chapter_files.is_empty() {
        chapter_files = config
            .chapters
            .iter()
            .map(|ch| raw_dir.join(format!("{}.wav", ch.id)))
            .filter(|p| p.exists())
            .collect();
        if !chapter_files.is_empty() {
            tracing::warn!(
                "[{}] mixing RAW chapter audio (process step skipped?)",
                project_id
            );
        }
    }

    if chapter_files.is_empty() {
        tracker.update_node_status(
            Node::Mix,
            NodeStatus::Failed,
            &[("error", json!("No chapter audio found to mix"))],
        )?;
        return Err(NodeError::invalid("No chapter audio found to mix"));
    }

    // Bed selection.
    let music_dir = layout::music_dir(&project_path);
    let bed = match bed_file {
        Some(name) => {
            let path = music_dir.join(name);
            if path.exists() {
                Some(path)
            } else {
                tracing::warn!("[{}] bed file not found: {}", project_id, name);
                None
            }
        }
        None => newest_wav(&music_dir),
    };
    match &bed {
        Some(bed) => tracing::info!("[{}] using bed {}", project_id, bed.display()),
        None => tracing::info!("[{}] no bed found; mixing voice only", project_id),
    }

    tracker.update_node_status(Node::Mix, NodeStatus::Running, &[])?;

    let mixer = Mixer::new(config.mix.clone());
    let mut mixed = 0usize;
    let mut failed = 0usize;

    for voice in &chapter_files {
        let name = voice
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let output = mix_dir.join(&name);

        match mixer.mix_chapter(voice, bed.as_deref(), &output) {
            Ok(()) => mixed += 1,
            Err(e) => {
                failed += 1;
                tracing::error!("[{}] mix failed for {}: {}", project_id, name, e);
            }
        }
    }

    let status = if failed == 0 {
        NodeStatus::Complete
    } else if mixed > 0 {
        NodeStatus::Partial
    } else {
        NodeStatus::Failed
    };
    tracker.update_node_status(
        Node::Mix,
        status,
        &[("mixed", json!(mixed)), ("failed", json!(failed))],
    )?;

    Ok(MixOutcome {
        total_chapters: chapter_files.len(),
        mixed,
        failed,
        bed,
    })
}
