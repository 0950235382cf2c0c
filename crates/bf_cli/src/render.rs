//! Terminal rendering for status tables and reports.
//!
//! Color-coded markers per node status; plain text otherwise. Rendering
//! style is not contractual - only the information is.

use bf_core::nodes::generate::GenerateOutcome;
use bf_core::nodes::validate::ValidationReport;
use bf_core::pipeline::node::{NodeStatus, PIPELINE_NODES};
use bf_core::pipeline::state::PipelineState;
use bf_core::project::config::ProjectConfig;
use bf_core::project::store::ProjectSummary;
use bf_core::qc::finalgate::FinalQcReport;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

pub const MARK_OK: &str = "\x1b[32m\u{2713}\x1b[0m";
pub const MARK_WARN: &str = "\x1b[33m\u{26a0}\x1b[0m";
pub const MARK_FAIL: &str = "\x1b[31m\u{2717}\x1b[0m";

/// Colored single-character marker for a node status.
pub fn status_mark(status: NodeStatus) -> String {
    match status {
        NodeStatus::Pending => format!("{}\u{25cb}{}", DIM, RESET),
        NodeStatus::Running => format!("{}\u{25b6}{}", CYAN, RESET),
        NodeStatus::Complete => format!("{}\u{2713}{}", GREEN, RESET),
        NodeStatus::Partial => format!("{}\u{25d0}{}", YELLOW, RESET),
        NodeStatus::Failed => format!("{}\u{2717}{}", RED, RESET),
        NodeStatus::Skipped => format!("{}\u{2500}{}", DIM, RESET),
    }
}

/// Render the pipeline node table plus the generate chapter sub-map.
pub fn print_status(config: &ProjectConfig, state: &PipelineState) {
    println!("Project: {} ({} chapters)", config.id, config.chapters.len());
    println!();

    for node in PIPELINE_NODES {
        let entry = state.node(*node);
        let gate = if node.is_hard_gate() { " [gate]" } else { "" };
        let timestamp = entry
            .timestamp
            .as_deref()
            .map(|t| format!("  {}{}{}", DIM, t, RESET))
            .unwrap_or_default();
        println!(
            "  {} {:10} {:8}{}{}",
            status_mark(entry.status),
            node.as_str(),
            entry.status.as_str(),
            gate,
            timestamp
        );

        if let Some(chapters) = &entry.chapters {
            for (chapter_id, chapter) in chapters {
                let counts = match (chapter.chunks, chapter.failed_chunks) {
                    (Some(total), Some(failed)) => {
                        format!(" ({}/{} chunks ok)", total.saturating_sub(failed), total)
                    }
                    _ => String::new(),
                };
                println!(
                    "      {} {:12} {}{}",
                    status_mark(chapter.status),
                    chapter_id,
                    chapter.engine_used.as_deref().unwrap_or("-"),
                    counts
                );
            }
        }
    }

    let (can_export, blocking) = state.can_proceed_to(bf_core::pipeline::node::Node::Export);
    if !can_export {
        println!();
        println!("{} Blocked by gate: {}", MARK_WARN, blocking);
    }
}

/// Render the `list` table.
pub fn print_project_table(projects: &[ProjectSummary]) {
    println!(
        "{:20} {:10} {:10} {:8} {}",
        "ID", "NODE", "LANGS", "CHAPTERS", "CREATED"
    );
    for project in projects {
        println!(
            "{:20} {:10} {:10} {:8} {}",
            project.id,
            project.current_node,
            project.languages.join(","),
            project.chapter_count,
            project.created
        );
    }
}

/// Render a validation report.
pub fn print_validation(report: &ValidationReport) {
    for message in &report.passed {
        println!("  {} {}", MARK_OK, message);
    }
    for message in &report.warnings {
        println!("  {} {}", MARK_WARN, message);
    }
    for message in &report.failures {
        println!("  {} {}", MARK_FAIL, message);
    }
    println!();
    println!(
        "{} {} passed, {} warning(s), {} failure(s)",
        if report.ok() { MARK_OK } else { MARK_FAIL },
        report.passed.len(),
        report.warnings.len(),
        report.failures.len()
    );
}

/// Render a generation outcome.
pub fn print_generate(outcome: &GenerateOutcome) {
    for chapter in &outcome.chapters {
        let detail = match &chapter.output {
            Some(output) => format!("-> {}", output.display()),
            None => chapter.error.clone().unwrap_or_default(),
        };
        println!(
            "  {} {:12} {} ({} chunks, {} failed, crossfade {} ms) {}",
            status_mark(chapter.status),
            chapter.chapter_id,
            chapter.engine_used,
            chapter.total_chunks,
            chapter.failed_chunks,
            chapter.crossfade_ms,
            detail
        );
    }
    println!(
        "{} {} chunk(s), {} failed ({:.1}%)",
        status_mark(outcome.node_status),
        outcome.total_chunks,
        outcome.failed_chunks,
        outcome.fail_rate_percent
    );
}

/// Render the final QC report.
pub fn print_final_qc(report: &FinalQcReport) {
    for result in &report.results {
        let mark = if result.passed { MARK_OK } else { MARK_FAIL };
        println!(
            "  {} {:16} {:6.1} LUFS  {:5.2} dBTP  {:6.1}s",
            mark, result.filename, result.lufs, result.true_peak, result.duration_sec
        );
        for message in &result.messages {
            println!("      {}", message);
        }
    }
    println!(
        "{} {}/{} file(s) passed (target {} LUFS, ceiling {} dBTP)",
        if report.passed() { MARK_OK } else { MARK_FAIL },
        report.passed_files,
        report.total_files,
        report.target_lufs,
        report.true_peak_limit
    );
}
