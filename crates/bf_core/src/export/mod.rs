//! Delivery exporters - per-chapter MP3/WAV, single-file M4B, and the
//! integrity manifest.

pub mod m4b;
pub mod manifest;

use std::cmp::Ordering;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::audio::ffmpeg::{self, AudioToolError};

/// Errors from export operations.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No input files found in {0}")]
    NoInput(String),

    #[error(transparent)]
    Tool(#[from] AudioToolError),

    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },
}

impl ExportError {
    pub(crate) fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Transcode one chapter to MP3 at the configured bitrate.
pub fn export_mp3(input: &Path, output: &Path, bitrate_kbps: u32) -> ExportResult<()> {
    ffmpeg::encode_mp3(input, output, bitrate_kbps)?;
    tracing::info!("Exported {} -> {}", input.display(), output.display());
    Ok(())
}

/// Copy a chapter as WAV (straight file copy; intermediates are
/// already 16-bit PCM WAV).
pub fn export_wav(input: &Path, output: &Path) -> ExportResult<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ExportError::io(format!("creating {}", parent.display()), e))?;
    }
    std::fs::copy(input, output)
        .map_err(|e| ExportError::io(format!("copying to {}", output.display()), e))?;
    Ok(())
}

/// Digit-aware filename ordering: `ch2` sorts before `ch10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars().peekable();
    let mut b_chars = b.chars().peekable();

    loop {
        match (a_chars.peek().copied(), b_chars.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ac), Some(bc)) => {
                if ac.is_ascii_digit() && bc.is_ascii_digit() {
                    let mut a_num = String::new();
                    while let Some(c) = a_chars.peek().copied().filter(|c| c.is_ascii_digit()) {
                        a_num.push(c);
                        a_chars.next();
                    }
                    let mut b_num = String::new();
                    while let Some(c) = b_chars.peek().copied().filter(|c| c.is_ascii_digit()) {
                        b_num.push(c);
                        b_chars.next();
                    }
                    let a_value: u64 = a_num.parse().unwrap_or(0);
                    let b_value: u64 = b_num.parse().unwrap_or(0);
                    match a_value.cmp(&b_value) {
                        Ordering::Equal => {}
                        other => return other,
                    }
                } else {
                    match ac.cmp(&bc) {
                        Ordering::Equal => {
                            a_chars.next();
                            b_chars.next();
                        }
                        other => return other,
                    }
                }
            }
        }
    }
}

/// Collect `*.wav` files in a directory in natural order.
pub fn wav_files_in_natural_order(dir: &Path) -> ExportResult<Vec<std::path::PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| ExportError::io(format!("reading {}", dir.display()), e))?;

    let mut files: Vec<std::path::PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|e| e.eq_ignore_ascii_case("wav"))
                    .unwrap_or(false)
        })
        .collect();

    files.sort_by(|a, b| {
        let a_name = a.file_name().map(|n| n.to_string_lossy().to_string());
        let b_name = b.file_name().map(|n| n.to_string_lossy().to_string());
        natural_cmp(
            a_name.as_deref().unwrap_or(""),
            b_name.as_deref().unwrap_or(""),
        )
    });
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn natural_order_sorts_digits_numerically() {
        let mut names = vec!["ch10.wav", "ch2.wav", "ch1.wav", "ch21.wav"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["ch1.wav", "ch2.wav", "ch10.wav", "ch21.wav"]);
    }

    #[test]
    fn natural_order_falls_back_to_lexical() {
        let mut names = vec!["beta.wav", "alpha.wav"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["alpha.wav", "beta.wav"]);
    }

    #[test]
    fn wav_listing_ignores_other_extensions() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("ch1.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("ch10.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("ch2.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = wav_files_in_natural_order(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["ch1.wav", "ch2.wav", "ch10.wav"]);
    }
}
