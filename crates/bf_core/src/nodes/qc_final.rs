//! QC-final node - the hard gate before export.
//!
//! Scans every mixed render against the broadcast loudness contract
//! and persists `06_MIX/qc_final_report.json`. The gate is `complete`
//! only when every file passes.

use serde_json::json;

use crate::export::wav_files_in_natural_order;
use crate::nodes::{NodeError, NodeResult};
use crate::pipeline::node::{Node, NodeStatus};
use crate::pipeline::state::Tracker;
use crate::project::layout;
use crate::project::store::ProjectStore;
use crate::qc::finalgate::{scan_mix_file, FinalQcReport};

/// Run the final gate over all mixed renders.
pub fn run(store: &ProjectStore, project_id: &str) -> NodeResult<FinalQcReport> {
    let project_path = store.resolve(project_id)?;
    let config = store.load_config(project_id)?;
    let tracker = Tracker::new(store, project_id);

    let mix_dir = layout::mix_dir(&project_path);
    let mut report = FinalQcReport::new(
        project_id,
        config.mix.target_lufs,
        config.mix.true_peak_limit_dbtp,
    );

    if !mix_dir.exists() {
        tracker.update_node_status(
            Node::QcFinal,
            NodeStatus::Failed,
            &[("error", json!("No mix directory found"))],
        )?;
        return Err(NodeError::invalid("No mix directory found; run mix first"));
    }

    let files = wav_files_in_natural_order(&mix_dir)?;
    report.total_files = files.len();

    if files.is_empty() {
        tracker.update_node_status(
            Node::QcFinal,
            NodeStatus::Failed,
            &[("error", json!("No mixed files found"))],
        )?;
        return Err(NodeError::invalid("No mixed files found; run mix first"));
    }

    tracker.update_node_status(Node::QcFinal, NodeStatus::Running, &[])?;

    for file in &files {
        let result = scan_mix_file(file, &config.mix, &config.qc_final);
        if result.passed {
            report.passed_files += 1;
        } else {
            report.failed_files += 1;
        }
        report.results.push(result);
    }

    let report_path = project_path.join("06_MIX").join("qc_final_report.json");
    report
        .save(&report_path)
        .map_err(|e| NodeError::io(format!("writing {}", report_path.display()), e))?;

    if report.passed() {
        tracker.update_node_status(Node::QcFinal, NodeStatus::Complete, &[])?;
    } else {
        tracker.update_node_status(
            Node::QcFinal,
            NodeStatus::Failed,
            &[
                ("failed_count", json!(report.failed_files)),
                ("total_count", json!(report.total_files)),
            ],
        )?;
    }

    Ok(report)
}
