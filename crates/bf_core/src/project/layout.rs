//! Fixed on-disk layout of a project directory.
//!
//! Every project owns the same folder set; the directory structure is
//! created once and never changes shape afterwards.

use std::path::{Path, PathBuf};

/// Relative directories created for every new project.
pub const PROJECT_DIRS: &[&str] = &[
    "00_CONFIG",
    "01_TEXT/chapters",
    "02_VOICES/references",
    "03_GENERATED/raw",
    "03_GENERATED/processed",
    "03_GENERATED/compare",
    "04_SFX/procedural",
    "04_SFX/samples",
    "05_MUSIC/generated",
    "05_MUSIC/imported",
    "06_MIX/sessions",
    "06_MIX/renders",
    "07_EXPORT/audiobook",
    "07_EXPORT/chapters",
];

/// Config file name inside the project root.
pub const PROJECT_FILE: &str = "project.json";

/// Pipeline state file name inside the project root.
pub const STATUS_FILE: &str = "pipeline-status.json";

/// Engine credential store, relative to the project root. Gitignored.
pub const ENGINES_FILE: &str = "00_CONFIG/engines.json";

/// Chapter text sources.
pub fn chapters_dir(project: &Path) -> PathBuf {
    project.join("01_TEXT").join("chapters")
}

/// Raw chunk and stitched-chapter WAVs.
pub fn raw_dir(project: &Path) -> PathBuf {
    project.join("03_GENERATED").join("raw")
}

/// Trimmed and normalized chapter WAVs.
pub fn processed_dir(project: &Path) -> PathBuf {
    project.join("03_GENERATED").join("processed")
}

/// QC reports live next to the generated audio.
pub fn generated_dir(project: &Path) -> PathBuf {
    project.join("03_GENERATED")
}

/// Procedurally generated ambient beds. The composer writes here and
/// nowhere else.
pub fn music_dir(project: &Path) -> PathBuf {
    project.join("05_MUSIC").join("generated")
}

/// Final voice+bed mixdowns.
pub fn mix_dir(project: &Path) -> PathBuf {
    project.join("06_MIX").join("renders")
}

/// Export root; the manifest is written here.
pub fn export_dir(project: &Path) -> PathBuf {
    project.join("07_EXPORT")
}

/// Per-chapter MP3/WAV deliverables.
pub fn export_chapters_dir(project: &Path) -> PathBuf {
    project.join("07_EXPORT").join("chapters")
}

/// Single-file audiobook deliverables (M4B).
pub fn export_audiobook_dir(project: &Path) -> PathBuf {
    project.join("07_EXPORT").join("audiobook")
}

/// Auto-generated `.gitignore` content for a new project.
///
/// Keeps credentials and bulk audio out of version control while
/// preserving the directory skeleton via `.gitkeep` markers.
pub fn gitignore_content() -> &'static str {
    "\
# BookForge - auto-generated .gitignore

# API keys - never commit
00_CONFIG/engines.json

# Generated audio (large files)
03_GENERATED/**/*.wav
03_GENERATED/**/*.mp3
04_SFX/procedural/**/*.wav
05_MUSIC/generated/**/*.wav
06_MIX/renders/**/*.wav

# Exports
07_EXPORT/**/*.mp3
07_EXPORT/**/*.m4b
07_EXPORT/**/*.wav
07_EXPORT/**/*.flac

# Keep directory structure
!**/.gitkeep
"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_contains_all_stages() {
        assert!(PROJECT_DIRS.contains(&"01_TEXT/chapters"));
        assert!(PROJECT_DIRS.contains(&"03_GENERATED/raw"));
        assert!(PROJECT_DIRS.contains(&"06_MIX/renders"));
        assert!(PROJECT_DIRS.contains(&"07_EXPORT/audiobook"));
    }

    #[test]
    fn dir_helpers_stay_inside_project() {
        let root = Path::new("/tmp/proj");
        for dir in [
            chapters_dir(root),
            raw_dir(root),
            processed_dir(root),
            music_dir(root),
            mix_dir(root),
            export_dir(root),
        ] {
            assert!(dir.starts_with(root));
        }
    }

    #[test]
    fn gitignore_protects_credentials() {
        assert!(gitignore_content().contains("00_CONFIG/engines.json"));
    }
}
