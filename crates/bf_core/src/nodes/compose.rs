//! Compose node - render an ambient bed for the project.
//!
//! Pads are written to `05_MUSIC/generated/` and nowhere else. Inside a
//! full pipeline run an existing bed is reused; the CLI exposes mood,
//! duration, and seed for explicit renders.

use serde_json::json;

use crate::audio::composer::{get_preset, render_pad};
use crate::nodes::{NodeError, NodeResult};
use crate::pipeline::node::{Node, NodeStatus};
use crate::pipeline::state::Tracker;
use crate::project::layout;
use crate::project::store::ProjectStore;

/// Default bed for unattended runs.
pub const DEFAULT_MOOD: &str = "contemplative";

/// Default bed length; the mixer loop-extends to cover each chapter.
pub const DEFAULT_DURATION_SEC: f64 = 60.0;

/// Compose summary.
#[derive(Debug, Clone)]
pub struct ComposeOutcome {
    pub mood: String,
    pub duration_sec: f64,
    pub output: std::path::PathBuf,
    pub reused: bool,
}

/// Render a bed (or reuse an existing one when `reuse_existing`).
pub fn run(
    store: &ProjectStore,
    project_id: &str,
    mood: &str,
    duration_sec: f64,
    seed: Option<u64>,
    reuse_existing: bool,
) -> NodeResult<ComposeOutcome> {
    let project_path = store.resolve(project_id)?;
    let music_dir = layout::music_dir(&project_path);
    let tracker = Tracker::new(store, project_id);

    std::fs::create_dir_all(&music_dir)
        .map_err(|e| NodeError::io(format!("creating {}", music_dir.display()), e))?;

    if reuse_existing {
        if let Some(existing) = newest_wav(&music_dir) {
            tracker.update_node_status(
                Node::Compose,
                NodeStatus::Complete,
                &[("reused", json!(existing.display().to_string()))],
            )?;
            return Ok(ComposeOutcome {
                mood: mood.to_string(),
                duration_sec,
                output: existing,
                reused: true,
            });
        }
    }

    let preset = get_preset(mood)?;
    let output = music_dir.join(format!("{}_{:.0}s.wav", mood, duration_sec));
    render_pad(&preset, duration_sec, seed, &output)?;

    tracker.update_node_status(
        Node::Compose,
        NodeStatus::Complete,
        &[
            ("mood", json!(mood)),
            ("duration_sec", json!(duration_sec)),
            ("output", json!(output.display().to_string())),
        ],
    )?;

    Ok(ComposeOutcome {
        mood: mood.to_string(),
        duration_sec,
        output,
        reused: false,
    })
}

/// Most recently modified WAV in a directory.
pub fn newest_wav(dir: &std::path::Path) -> Option<std::path::PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|x| x.eq_ignore_ascii_case("wav"))
                .unwrap_or(false)
        })
        .max_by_key(|e| {
            e.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH)
        })
        .map(|e| e.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn renders_bed_into_music_dir() {
        let root = tempdir().unwrap();
        let store = ProjectStore::new(root.path());
        store.create("BOOK").unwrap();

        let outcome = run(&store, "BOOK", "tense", 2.0, Some(11), false).unwrap();
        assert!(outcome.output.exists());
        assert!(outcome
            .output
            .starts_with(layout::music_dir(&store.resolve("BOOK").unwrap())));
        assert!(!outcome.reused);

        let state = store.load_state("BOOK").unwrap();
        assert_eq!(state.status(Node::Compose), NodeStatus::Complete);
    }

    #[test]
    fn reuse_picks_existing_bed() {
        let root = tempdir().unwrap();
        let store = ProjectStore::new(root.path());
        store.create("BOOK").unwrap();

        let first = run(&store, "BOOK", "wonder", 1.0, Some(1), false).unwrap();
        let second = run(&store, "BOOK", "tense", 1.0, Some(1), true).unwrap();

        assert!(second.reused);
        assert_eq!(second.output, first.output);
    }

    #[test]
    fn unknown_mood_is_rejected() {
        let root = tempdir().unwrap();
        let store = ProjectStore::new(root.path());
        store.create("BOOK").unwrap();

        let err = run(&store, "BOOK", "spooky", 1.0, None, false).unwrap_err();
        assert!(matches!(err, NodeError::Composer(_)));
    }
}
