//! Project CRUD - create, list, load, resolve.
//!
//! Key properties:
//! - Project ids are sanitized to a filesystem-safe character set
//! - Path resolution rejects traversal out of the projects root
//! - All document writes are atomic (temp file, then rename)

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::pipeline::state::PipelineState;
use crate::project::config::ProjectConfig;
use crate::project::layout;

/// Errors from project store operations.
#[derive(Error, Debug)]
pub enum ProjectError {
    /// Sanitization produced an empty or illegal id.
    #[error("Invalid project id '{0}': no valid characters after sanitization")]
    InvalidId(String),

    /// Target directory already exists.
    #[error("Project already exists: {0}")]
    AlreadyExists(String),

    /// Project directory or document missing.
    #[error("Project not found: {0}")]
    NotFound(String),

    /// Resolved path escapes the projects root.
    #[error("Path traversal detected for project id '{0}'")]
    Traversal(String),

    /// File I/O error with operation context.
    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },

    /// Malformed JSON document.
    #[error("Failed to parse {what}: {source}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ProjectError {
    fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    fn json(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            what: what.into(),
            source,
        }
    }
}

/// Result type for project store operations.
pub type ProjectResult<T> = Result<T, ProjectError>;

/// Sanitize a raw project id to the filesystem-safe character set.
///
/// Trims, replaces spaces with underscores, uppercases, and strips
/// everything outside `[A-Za-z0-9_-]`. An empty result is an error.
pub fn sanitize_project_id(raw: &str) -> ProjectResult<String> {
    let cleaned: String = raw
        .trim()
        .replace(' ', "_")
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    if cleaned.is_empty() {
        return Err(ProjectError::InvalidId(raw.to_string()));
    }

    Ok(cleaned)
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Summary row for `list()`.
#[derive(Debug, Clone)]
pub struct ProjectSummary {
    pub id: String,
    pub created: String,
    pub languages: Vec<String>,
    pub chapter_count: usize,
    /// Furthest pipeline node with progress, or "new".
    pub current_node: String,
}

/// On-disk store of all projects under a single root directory.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    /// Create a store rooted at the given directory. The directory is
    /// created lazily on first `create()`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The projects root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve and validate a project directory path.
    ///
    /// The id must already be in the sanitized character set. When the
    /// directory exists, the canonicalized path must remain strictly
    /// under the canonicalized root (rejects symlink and `..` escapes).
    pub fn resolve(&self, id: &str) -> ProjectResult<PathBuf> {
        if !is_valid_id(id) {
            return Err(ProjectError::InvalidId(id.to_string()));
        }

        let path = self.root.join(id);

        if path.exists() {
            let resolved = path
                .canonicalize()
                .map_err(|e| ProjectError::io(format!("resolving {}", path.display()), e))?;
            let root = self
                .root
                .canonicalize()
                .map_err(|e| ProjectError::io(format!("resolving {}", self.root.display()), e))?;

            if !resolved.starts_with(&root) || resolved == root {
                return Err(ProjectError::Traversal(id.to_string()));
            }
        }

        Ok(path)
    }

    /// Check whether a project directory and its config exist.
    pub fn exists(&self, id: &str) -> bool {
        match self.resolve(id) {
            Ok(path) => path.join(layout::PROJECT_FILE).exists(),
            Err(_) => false,
        }
    }

    /// Create a new project: directory structure, default config,
    /// initial pipeline state, and a protective `.gitignore`.
    ///
    /// Returns the project directory path.
    pub fn create(&self, raw_id: &str) -> ProjectResult<PathBuf> {
        let id = sanitize_project_id(raw_id)?;
        let path = self.resolve(&id)?;

        if path.exists() {
            return Err(ProjectError::AlreadyExists(id));
        }

        for dir in layout::PROJECT_DIRS {
            let dir_path = path.join(dir);
            fs::create_dir_all(&dir_path)
                .map_err(|e| ProjectError::io(format!("creating {}", dir_path.display()), e))?;
            let keep = dir_path.join(".gitkeep");
            fs::write(&keep, b"")
                .map_err(|e| ProjectError::io(format!("creating {}", keep.display()), e))?;
        }

        self.save_config(&id, &ProjectConfig::new(&id))?;
        self.save_state(&id, &PipelineState::initial(&id))?;

        let gitignore = path.join(".gitignore");
        fs::write(&gitignore, layout::gitignore_content())
            .map_err(|e| ProjectError::io(format!("writing {}", gitignore.display()), e))?;

        tracing::info!("Created project '{}' at {}", id, path.display());
        Ok(path)
    }

    /// List all projects under the root, sorted by id.
    ///
    /// Unreadable entries are reported with a "error" node marker rather
    /// than aborting the listing.
    pub fn list(&self) -> ProjectResult<Vec<ProjectSummary>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        let entries = fs::read_dir(&self.root)
            .map_err(|e| ProjectError::io(format!("reading {}", self.root.display()), e))?;

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir() && p.join(layout::PROJECT_FILE).exists())
            .collect();
        dirs.sort();

        for dir in dirs {
            let id = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            match (self.load_config(&id), self.load_state(&id)) {
                (Ok(cfg), Ok(state)) => summaries.push(ProjectSummary {
                    id: cfg.id,
                    created: cfg.created,
                    languages: cfg.languages,
                    chapter_count: cfg.chapters.len(),
                    current_node: state.current_node(),
                }),
                _ => summaries.push(ProjectSummary {
                    id,
                    created: "unknown".to_string(),
                    languages: Vec::new(),
                    chapter_count: 0,
                    current_node: "error".to_string(),
                }),
            }
        }

        Ok(summaries)
    }

    /// Load `project.json`.
    pub fn load_config(&self, id: &str) -> ProjectResult<ProjectConfig> {
        let path = self.resolve(id)?.join(layout::PROJECT_FILE);
        if !path.exists() {
            return Err(ProjectError::NotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| ProjectError::io(format!("reading {}", path.display()), e))?;
        serde_json::from_str(&content).map_err(|e| ProjectError::json("project.json", e))
    }

    /// Write `project.json` atomically.
    pub fn save_config(&self, id: &str, cfg: &ProjectConfig) -> ProjectResult<()> {
        let path = self.resolve(id)?.join(layout::PROJECT_FILE);
        self.write_json(&path, cfg)
    }

    /// Load `pipeline-status.json`, merging older shapes with defaults.
    pub fn load_state(&self, id: &str) -> ProjectResult<PipelineState> {
        let path = self.resolve(id)?.join(layout::STATUS_FILE);
        if !path.exists() {
            return Err(ProjectError::NotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| ProjectError::io(format!("reading {}", path.display()), e))?;
        serde_json::from_str(&content).map_err(|e| ProjectError::json("pipeline-status.json", e))
    }

    /// Write `pipeline-status.json` atomically.
    ///
    /// This is the only non-idempotent side effect of the pipeline
    /// engine; the atomic replace must survive process kills.
    pub fn save_state(&self, id: &str, state: &PipelineState) -> ProjectResult<()> {
        let path = self.resolve(id)?.join(layout::STATUS_FILE);
        self.write_json(&path, state)
    }

    /// Serialize a document as pretty JSON and replace the target file
    /// atomically (temp file in the same directory, then rename).
    fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> ProjectResult<()> {
        let mut content = serde_json::to_string_pretty(value)
            .map_err(|e| ProjectError::json(path.display().to_string(), e))?;
        content.push('\n');

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ProjectError::io(format!("creating {}", parent.display()), e))?;
        }

        let temp_path = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&temp_path)
                .map_err(|e| ProjectError::io(format!("creating {}", temp_path.display()), e))?;
            file.write_all(content.as_bytes())
                .map_err(|e| ProjectError::io(format!("writing {}", temp_path.display()), e))?;
            file.sync_all()
                .map_err(|e| ProjectError::io(format!("syncing {}", temp_path.display()), e))?;
        }

        fs::rename(&temp_path, path)
            .map_err(|e| ProjectError::io(format!("renaming to {}", path.display()), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_normalizes_ids() {
        assert_eq!(sanitize_project_id("my book").unwrap(), "MY_BOOK");
        assert_eq!(sanitize_project_id("  Ab-c_9 ").unwrap(), "AB-C_9");
        assert_eq!(sanitize_project_id("a/b\\c").unwrap(), "ABC");
    }

    #[test]
    fn sanitize_rejects_empty_results() {
        assert!(matches!(
            sanitize_project_id("///"),
            Err(ProjectError::InvalidId(_))
        ));
        assert!(matches!(
            sanitize_project_id("   "),
            Err(ProjectError::InvalidId(_))
        ));
    }

    #[test]
    fn create_builds_full_layout() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());

        let path = store.create("my book").unwrap();

        assert!(path.join(layout::PROJECT_FILE).exists());
        assert!(path.join(layout::STATUS_FILE).exists());
        assert!(path.join(".gitignore").exists());
        for d in layout::PROJECT_DIRS {
            assert!(path.join(d).is_dir(), "missing {}", d);
            assert!(path.join(d).join(".gitkeep").exists());
        }
    }

    #[test]
    fn create_rejects_duplicates() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());

        store.create("BOOK").unwrap();
        assert!(matches!(
            store.create("BOOK"),
            Err(ProjectError::AlreadyExists(_))
        ));
    }

    #[test]
    fn resolve_rejects_traversal_ids() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());

        assert!(matches!(
            store.resolve("../escape"),
            Err(ProjectError::InvalidId(_))
        ));
        assert!(matches!(store.resolve(""), Err(ProjectError::InvalidId(_))));
        assert!(matches!(
            store.resolve("a/b"),
            Err(ProjectError::InvalidId(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn resolve_rejects_symlink_escape() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());

        std::os::unix::fs::symlink(outside.path(), dir.path().join("SNEAKY")).unwrap();
        assert!(matches!(
            store.resolve("SNEAKY"),
            Err(ProjectError::Traversal(_))
        ));
    }

    #[test]
    fn config_round_trip() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        store.create("BOOK").unwrap();

        let mut cfg = store.load_config("BOOK").unwrap();
        cfg.languages = vec!["en".to_string()];
        store.save_config("BOOK", &cfg).unwrap();

        let reloaded = store.load_config("BOOK").unwrap();
        assert_eq!(reloaded.languages, vec!["en"]);
    }

    #[test]
    fn list_reports_created_projects() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        store.create("ALPHA").unwrap();
        store.create("BETA").unwrap();

        let projects = store.list().unwrap();
        let ids: Vec<&str> = projects.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["ALPHA", "BETA"]);
        assert!(projects.iter().all(|p| p.current_node == "new"));
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let path = store.create("BOOK").unwrap();

        assert!(!path.join("project.json.tmp").exists());
        assert!(!path.join("pipeline-status.json.tmp").exists());
    }
}
