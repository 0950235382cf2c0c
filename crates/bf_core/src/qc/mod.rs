//! Quality control - per-chunk scanning and the final mix gate.

pub mod finalgate;
pub mod scanner;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    #[default]
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
        }
    }
}

/// One named check with status, optional message, and metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Measured values (snr_db, peak_dbfs, lufs, ...).
    #[serde(flatten)]
    pub metrics: BTreeMap<String, Value>,
}

impl CheckResult {
    pub fn pass() -> Self {
        Self::default()
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Warn,
            message: Some(message.into()),
            metrics: BTreeMap::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Fail,
            message: Some(message.into()),
            metrics: BTreeMap::new(),
        }
    }

    /// Attach a metric value.
    pub fn with_metric(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.to_string(), value.into());
        self
    }
}

/// QC result for one audio chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkQcResult {
    pub chunk_id: String,
    pub file: String,
    pub checks: BTreeMap<String, CheckResult>,
}

impl ChunkQcResult {
    pub fn new(chunk_id: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            file: file.into(),
            checks: BTreeMap::new(),
        }
    }

    /// Aggregate status: the worst of all checks.
    pub fn status(&self) -> CheckStatus {
        self.checks
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(CheckStatus::Pass)
    }

    /// Short summary of the failing checks.
    pub fn failure_summary(&self) -> String {
        let failures: Vec<String> = self
            .checks
            .iter()
            .filter(|(_, c)| c.status == CheckStatus::Fail)
            .map(|(name, c)| {
                format!("{}: {}", name, c.message.as_deref().unwrap_or("failed"))
            })
            .collect();
        if failures.is_empty() {
            "unknown QC failure".to_string()
        } else {
            failures.join("; ")
        }
    }
}

/// Full QC report for one chapter's generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcReport {
    pub project_id: String,
    pub chapter_id: String,
    pub chunks: Vec<ChunkQcResult>,
}

impl QcReport {
    pub fn new(project_id: impl Into<String>, chapter_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            chapter_id: chapter_id.into(),
            chunks: Vec::new(),
        }
    }

    pub fn pass_count(&self) -> usize {
        self.count(CheckStatus::Pass)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.chunks.iter().filter(|c| c.status() == status).count()
    }

    /// Failed chunks as a percentage of all chunks.
    pub fn fail_rate(&self) -> f64 {
        if self.chunks.is_empty() {
            return 0.0;
        }
        self.fail_count() as f64 / self.chunks.len() as f64 * 100.0
    }

    /// Persist as `qc_report_<chapter>.json` under the given directory.
    pub fn save(&self, dir: &Path) -> std::io::Result<std::path::PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("qc_report_{}.json", self.chapter_id));

        let document = serde_json::json!({
            "project_id": self.project_id,
            "chapter_id": self.chapter_id,
            "total_chunks": self.chunks.len(),
            "passed": self.pass_count(),
            "warnings": self.warn_count(),
            "failures": self.fail_count(),
            "fail_rate_percent": (self.fail_rate() * 100.0).round() / 100.0,
            "chunks": self.chunks.iter().map(|c| {
                serde_json::json!({
                    "chunk_id": c.chunk_id,
                    "file": c.file,
                    "status": c.status().as_str(),
                    "checks": c.checks,
                })
            }).collect::<Vec<_>>(),
        });

        let mut content = serde_json::to_string_pretty(&document)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        content.push('\n');
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn aggregate_is_worst_of_checks() {
        let mut result = ChunkQcResult::new("c0", "c0.wav");
        result.checks.insert("snr".to_string(), CheckResult::pass());
        assert_eq!(result.status(), CheckStatus::Pass);

        result
            .checks
            .insert("lufs".to_string(), CheckResult::warn("slightly off"));
        assert_eq!(result.status(), CheckStatus::Warn);

        result
            .checks
            .insert("clipping".to_string(), CheckResult::fail("clipped"));
        assert_eq!(result.status(), CheckStatus::Fail);
    }

    #[test]
    fn empty_checks_pass() {
        let result = ChunkQcResult::new("c0", "c0.wav");
        assert_eq!(result.status(), CheckStatus::Pass);
    }

    #[test]
    fn report_counts_and_fail_rate() {
        let mut report = QcReport::new("BOOK", "ch01");

        let mut ok = ChunkQcResult::new("c0", "c0.wav");
        ok.checks.insert("snr".to_string(), CheckResult::pass());
        let mut warned = ChunkQcResult::new("c1", "c1.wav");
        warned
            .checks
            .insert("snr".to_string(), CheckResult::warn("low"));
        let mut failed = ChunkQcResult::new("c2", "c2.wav");
        failed
            .checks
            .insert("snr".to_string(), CheckResult::fail("bad"));

        report.chunks.extend([ok, warned, failed, ChunkQcResult::new("c3", "c3.wav")]);

        assert_eq!(report.pass_count(), 2);
        assert_eq!(report.warn_count(), 1);
        assert_eq!(report.fail_count(), 1);
        assert!((report.fail_rate() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn report_saves_summary_json() {
        let dir = tempdir().unwrap();
        let mut report = QcReport::new("BOOK", "ch01");
        let mut failed = ChunkQcResult::new("c0", "c0.wav");
        failed
            .checks
            .insert("generation".to_string(), CheckResult::fail("engine error"));
        report.chunks.push(failed);

        let path = report.save(dir.path()).unwrap();
        assert!(path.ends_with("qc_report_ch01.json"));

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["total_chunks"], 1);
        assert_eq!(doc["failures"], 1);
        assert_eq!(doc["chunks"][0]["status"], "fail");
    }

    #[test]
    fn failure_summary_names_checks() {
        let mut result = ChunkQcResult::new("c0", "c0.wav");
        result
            .checks
            .insert("snr".to_string(), CheckResult::fail("SNR 3 dB below minimum"));
        assert!(result.failure_summary().contains("snr:"));
    }
}
