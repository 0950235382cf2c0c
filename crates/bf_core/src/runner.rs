//! Pipeline runner - execute nodes in order with gate enforcement.
//!
//! `run --from <node>` resolves the starting point (explicit or the
//! first unsettled node), then walks the remaining nodes. Before each
//! node the hard gates are checked; a failed hard gate stops the run
//! with the gate's name. Cancellation is honored at node boundaries and
//! inside generation at chunk boundaries.

use thiserror::Error;

use crate::engines::EngineRegistry;
use crate::nodes::generate::GenerateOptions;
use crate::nodes::{self, CancelHandle, NodeError};
use crate::pipeline::node::{Node, NodeStatus};
use crate::pipeline::state::{nodes_in_range, StateError, Tracker};
use crate::project::layout;
use crate::project::store::{ProjectError, ProjectStore};

/// Errors from a pipeline run.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// A hard gate preceding the requested node has not passed.
    #[error("Cannot run '{node}': hard gate '{gate}' has not passed")]
    GateBlocked { node: Node, gate: String },

    /// A gate node executed and failed; downstream work is pointless.
    #[error("Node '{node}' failed: {reason}")]
    NodeFailed { node: Node, reason: String },

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Project(#[from] ProjectError),
}

/// Options for a pipeline run.
pub struct RunOptions {
    /// Force one engine for generation.
    pub engine_override: Option<String>,
    /// Named bed file for the mix node.
    pub bed_file: Option<String>,
    /// Engine registry; built from project credentials when absent.
    pub registry: Option<EngineRegistry>,
    /// Cooperative cancellation.
    pub cancel: CancelHandle,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            engine_override: None,
            bed_file: None,
            registry: None,
            cancel: CancelHandle::new(),
        }
    }
}

/// Report of an executed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Nodes executed with their resulting status.
    pub executed: Vec<(Node, NodeStatus)>,
    /// Node the run stopped at, when it did not reach the end.
    pub stopped_at: Option<Node>,
}

/// Execute the pipeline from a node (explicit or resumed) to the end.
pub fn run_from(
    store: &ProjectStore,
    project_id: &str,
    from: Option<&str>,
    mut options: RunOptions,
) -> Result<RunReport, RunnerError> {
    let tracker = Tracker::new(store, project_id);
    let start = tracker.resume_point(from)?;
    let nodes = nodes_in_range(start, None);

    let project_path = store.resolve(project_id)?;
    let registry = match options.registry.take() {
        Some(registry) => registry,
        None => {
            let config = store.load_config(project_id)?;
            EngineRegistry::with_defaults(&project_path, config.generation.edge_tts_rate_limit_ms)
        }
    };

    let mut report = RunReport {
        executed: Vec::new(),
        stopped_at: None,
    };

    for node in nodes {
        if options.cancel.is_cancelled() {
            report.stopped_at = Some(node);
            break;
        }

        let (ok, gate) = tracker.can_proceed_to(node)?;
        if !ok {
            return Err(RunnerError::GateBlocked { node, gate });
        }

        tracing::info!("[{}] running node {}", project_id, node);
        let status = execute_node(store, project_id, node, &registry, &options)?;
        report.executed.push((node, status));

        // A failed hard gate ends the run; so does a failed node.
        if status == NodeStatus::Failed {
            return Err(RunnerError::NodeFailed {
                node,
                reason: "see pipeline status for details".to_string(),
            });
        }
    }

    Ok(report)
}

fn execute_node(
    store: &ProjectStore,
    project_id: &str,
    node: Node,
    registry: &EngineRegistry,
    options: &RunOptions,
) -> Result<NodeStatus, RunnerError> {
    let tracker = Tracker::new(store, project_id);

    match node {
        Node::Bootstrap => {
            // Re-assert the directory layout; create() made it once,
            // this heals a partially deleted tree.
            let project_path = store.resolve(project_id)?;
            for dir in layout::PROJECT_DIRS {
                std::fs::create_dir_all(project_path.join(dir))
                    .map_err(|e| NodeError::io(format!("creating {}", dir), e))?;
            }
            tracker.update_node_status(Node::Bootstrap, NodeStatus::Complete, &[])?;
            Ok(NodeStatus::Complete)
        }

        Node::Ingest => {
            // Inside a run, ingest only verifies that chapters exist;
            // importing new sources is an explicit CLI action.
            let config = store.load_config(project_id)?;
            if config.chapters.is_empty() {
                return Err(NodeError::invalid(
                    "No chapters in project.json; run `ingest --source <dir>` first",
                )
                .into());
            }
            tracker.update_node_status(Node::Ingest, NodeStatus::Skipped, &[])?;
            Ok(NodeStatus::Skipped)
        }

        Node::Validate => {
            let report = nodes::validate::run(store, project_id)?;
            if report.ok() {
                Ok(NodeStatus::Complete)
            } else {
                Ok(NodeStatus::Failed)
            }
        }

        Node::Generate => {
            let generate_options = GenerateOptions {
                engine_override: options.engine_override.clone(),
                chapters: None,
                resume: true,
            };
            let outcome = nodes::generate::run(
                store,
                project_id,
                registry,
                &generate_options,
                &options.cancel,
            )?;
            Ok(outcome.node_status)
        }

        Node::QcScan => {
            // Advisory: scan failures never stop the run.
            let outcome = nodes::qc_scan::run(store, project_id)?;
            Ok(if outcome.failed_chunks == 0 {
                NodeStatus::Complete
            } else {
                NodeStatus::Partial
            })
        }

        Node::Process => {
            let outcome = nodes::process::run(store, project_id)?;
            Ok(if outcome.failed == 0 {
                NodeStatus::Complete
            } else {
                NodeStatus::Partial
            })
        }

        Node::Compose => {
            nodes::compose::run(
                store,
                project_id,
                nodes::compose::DEFAULT_MOOD,
                nodes::compose::DEFAULT_DURATION_SEC,
                None,
                true,
            )?;
            Ok(NodeStatus::Complete)
        }

        Node::Mix => {
            let outcome = nodes::mix::run(store, project_id, options.bed_file.as_deref())?;
            Ok(if outcome.failed == 0 {
                NodeStatus::Complete
            } else {
                NodeStatus::Partial
            })
        }

        Node::QcFinal => {
            let report = nodes::qc_final::run(store, project_id)?;
            Ok(if report.passed() {
                NodeStatus::Complete
            } else {
                NodeStatus::Failed
            })
        }

        Node::Export => {
            let outcome = nodes::export::run(store, project_id)?;
            Ok(if outcome.failed == 0 {
                NodeStatus::Complete
            } else {
                NodeStatus::Partial
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, ProjectStore) {
        let root = tempdir().unwrap();
        let store = ProjectStore::new(root.path());
        store.create("BOOK").unwrap();
        (root, store)
    }

    #[test]
    fn run_is_blocked_by_unpassed_hard_gate() {
        let (_root, store) = setup();

        let err = run_from(&store, "BOOK", Some("generate"), RunOptions::default()).unwrap_err();
        match err {
            RunnerError::GateBlocked { node, gate } => {
                assert_eq!(node, Node::Generate);
                assert_eq!(gate, "validate");
            }
            other => panic!("expected GateBlocked, got {}", other),
        }
    }

    #[test]
    fn export_requires_both_gates() {
        let (_root, store) = setup();
        let tracker = Tracker::new(&store, "BOOK");
        tracker
            .update_node_status(Node::Validate, NodeStatus::Complete, &[])
            .unwrap();

        let err = run_from(&store, "BOOK", Some("export"), RunOptions::default()).unwrap_err();
        match err {
            RunnerError::GateBlocked { gate, .. } => assert_eq!(gate, "qc_final"),
            other => panic!("expected GateBlocked, got {}", other),
        }
    }

    #[test]
    fn unknown_from_node_is_rejected() {
        let (_root, store) = setup();
        let err = run_from(&store, "BOOK", Some("warp"), RunOptions::default()).unwrap_err();
        assert!(matches!(err, RunnerError::State(StateError::UnknownNode(_))));
    }

    #[test]
    fn fresh_run_stops_at_ingest_without_chapters() {
        let (_root, store) = setup();

        let err = run_from(&store, "BOOK", None, RunOptions::default()).unwrap_err();
        assert!(matches!(err, RunnerError::Node(NodeError::Invalid(_))));

        // Bootstrap ran and was recorded before the stop.
        let state = store.load_state("BOOK").unwrap();
        assert_eq!(state.status(Node::Bootstrap), NodeStatus::Complete);
    }

    #[test]
    fn cancellation_stops_before_the_next_node() {
        let (_root, store) = setup();
        let options = RunOptions::default();
        options.cancel.cancel();

        let report = run_from(&store, "BOOK", None, options).unwrap();
        assert!(report.executed.is_empty());
        assert_eq!(report.stopped_at, Some(Node::Bootstrap));
    }
}
