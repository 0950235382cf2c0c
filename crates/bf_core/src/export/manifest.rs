//! Export manifest - the integrity contract for a finished delivery.
//!
//! After export, every file under the export root (except the manifest
//! itself) is hashed with SHA-256 and recorded with its size and
//! POSIX-relative path. Keys serialize in stable sorted order.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::export::{ExportError, ExportResult};

/// One exported file entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// POSIX-separated path relative to the export root.
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// The manifest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub project_id: String,
    /// UTC generation timestamp (RFC 3339).
    pub generated_at: String,
    pub total_files: usize,
    pub metadata: serde_json::Value,
    pub files: Vec<ManifestEntry>,
}

/// File name of the manifest at the export root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// SHA-256 of a file, streamed in 8 KiB blocks.
pub fn sha256_file(path: &Path) -> ExportResult<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| ExportError::io(format!("opening {}", path.display()), e))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| ExportError::io(format!("reading {}", path.display()), e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Walk the export directory recursively, collecting files in sorted
/// order. The manifest itself is excluded.
fn collect_files(root: &Path) -> ExportResult<Vec<PathBuf>> {
    fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        for entry in entries {
            if entry.is_dir() {
                walk(&entry, out)?;
            } else if entry.is_file() {
                out.push(entry);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(root, &mut files)
        .map_err(|e| ExportError::io(format!("walking {}", root.display()), e))?;
    files.retain(|p| {
        !(p.file_name().map(|n| n == MANIFEST_FILE).unwrap_or(false)
            && p.parent() == Some(root))
    });
    // Skip directory-keeping markers.
    files.retain(|p| p.file_name().map(|n| n != ".gitkeep").unwrap_or(true));
    Ok(files)
}

/// Generate `manifest.json` at the export root.
pub fn generate_manifest(
    export_dir: &Path,
    project_id: &str,
    metadata: serde_json::Value,
) -> ExportResult<PathBuf> {
    let mut entries = Vec::new();
    for file in collect_files(export_dir)? {
        let relative = file
            .strip_prefix(export_dir)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");

        let size_bytes = std::fs::metadata(&file)
            .map_err(|e| ExportError::io(format!("stat {}", file.display()), e))?
            .len();

        entries.push(ManifestEntry {
            path: relative,
            size_bytes,
            sha256: sha256_file(&file)?,
        });
    }

    let manifest = ExportManifest {
        project_id: project_id.to_string(),
        generated_at: Utc::now().to_rfc3339(),
        total_files: entries.len(),
        metadata,
        files: entries,
    };

    let manifest_path = export_dir.join(MANIFEST_FILE);
    let mut content = serde_json::to_string_pretty(&manifest)
        .map_err(|e| ExportError::io("serializing manifest".to_string(), std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    content.push('\n');
    std::fs::write(&manifest_path, content)
        .map_err(|e| ExportError::io(format!("writing {}", manifest_path.display()), e))?;

    tracing::info!(
        "Manifest: {} files -> {}",
        manifest.total_files,
        manifest_path.display()
    );
    Ok(manifest_path)
}
