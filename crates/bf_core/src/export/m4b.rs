//! M4B audiobook assembly.
//!
//! Builds an ffmpeg concat list over mixed chapter files in natural
//! order, an ffmetadata document with global tags and per-chapter
//! `[CHAPTER]` blocks (`TIMEBASE=1/1000`, integer millisecond offsets
//! from cumulative durations), then encodes a single AAC stream into an
//! MP4 container with the `.m4b` extension. Cover art, when present,
//! rides along as an attached picture.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::audio::ffmpeg;
use crate::export::{ExportError, ExportResult};
use crate::project::config::ExportMetadata;

/// One chapter marker on the audiobook timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterMark {
    pub title: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Compute chapter marks from file durations, in list order.
pub fn chapter_marks(
    files: &[PathBuf],
    titles: &BTreeMap<String, String>,
) -> ExportResult<Vec<ChapterMark>> {
    let mut marks = Vec::with_capacity(files.len());
    let mut cursor_ms = 0u64;

    for file in files {
        let duration_ms = (ffmpeg::get_duration(file)? * 1000.0) as u64;
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let title = titles
            .get(&stem)
            .cloned()
            .unwrap_or_else(|| titlecase_from_stem(&stem));

        marks.push(ChapterMark {
            title,
            start_ms: cursor_ms,
            end_ms: cursor_ms + duration_ms,
        });
        cursor_ms += duration_ms;
    }

    Ok(marks)
}

/// Fallback chapter title from a file stem: underscores to spaces,
/// words capitalized.
fn titlecase_from_stem(stem: &str) -> String {
    stem.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render the ffmpeg concat list. Paths are absolute with forward
/// slashes; single quotes are escaped for the concat demuxer.
pub fn build_concat_list(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|f| {
            let path = f.display().to_string().replace('\\', "/").replace('\'', "'\\''");
            format!("file '{}'", path)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the ffmetadata document: global tags, then one `[CHAPTER]`
/// block per mark.
pub fn build_ffmetadata(title: &str, meta: &ExportMetadata, marks: &[ChapterMark]) -> String {
    let mut lines = vec![";FFMETADATA1".to_string()];

    if !title.is_empty() {
        lines.push(format!("title={}", title));
    }
    if !meta.author.is_empty() {
        lines.push(format!("artist={}", meta.author));
        lines.push(format!("album_artist={}", meta.author));
    }
    if meta.year != 0 {
        lines.push(format!("date={}", meta.year));
    }
    if !meta.narrator.is_empty() {
        lines.push(format!("performer={}", meta.narrator));
    }
    lines.push(String::new());

    for mark in marks {
        lines.push("[CHAPTER]".to_string());
        lines.push("TIMEBASE=1/1000".to_string());
        lines.push(format!("START={}", mark.start_ms));
        lines.push(format!("END={}", mark.end_ms));
        lines.push(format!("title={}", mark.title));
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Assemble the M4B from mixed chapter files.
///
/// `work_dir` receives the temporary concat list and metadata document;
/// both are removed after encoding.
#[allow(clippy::too_many_arguments)]
pub fn export_m4b(
    files: &[PathBuf],
    titles: &BTreeMap<String, String>,
    book_title: &str,
    meta: &ExportMetadata,
    cover: Option<&Path>,
    aac_bitrate_kbps: u32,
    work_dir: &Path,
    output: &Path,
) -> ExportResult<()> {
    if files.is_empty() {
        return Err(ExportError::NoInput(work_dir.display().to_string()));
    }

    std::fs::create_dir_all(work_dir)
        .map_err(|e| ExportError::io(format!("creating {}", work_dir.display()), e))?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ExportError::io(format!("creating {}", parent.display()), e))?;
    }

    let marks = chapter_marks(files, titles)?;

    let concat_path = work_dir.join("concat_list.txt");
    std::fs::write(&concat_path, build_concat_list(files))
        .map_err(|e| ExportError::io(format!("writing {}", concat_path.display()), e))?;

    let metadata_path = work_dir.join("metadata.txt");
    std::fs::write(&metadata_path, build_ffmetadata(book_title, meta, &marks))
        .map_err(|e| ExportError::io(format!("writing {}", metadata_path.display()), e))?;

    let cover = cover.filter(|c| c.exists());
    let encode = ffmpeg::encode_m4b_with_chapters(
        &concat_path,
        &metadata_path,
        cover,
        output,
        aac_bitrate_kbps,
    );

    let _ = std::fs::remove_file(&concat_path);
    let _ = std::fs::remove_file(&metadata_path);
    encode?;

    tracing::info!(
        "Exported M4B with {} chapters -> {}",
        marks.len(),
        output.display()
    );
    Ok(())
}
