//! Persisted pipeline status document and the tracker API that owns it.
//!
//! The tracker is the only writer of `pipeline-status.json`; every
//! mutation loads the document, applies the change, and atomically
//! replaces the file through the project store. External readers are
//! best-effort and must tolerate older shapes (all fields default).

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::pipeline::node::{Node, NodeStatus, PIPELINE_NODES};
use crate::project::store::{ProjectError, ProjectStore};

/// Errors from state machine operations.
#[derive(Error, Debug)]
pub enum StateError {
    /// Node name not in the pipeline.
    #[error("Unknown pipeline node '{0}'")]
    UnknownNode(String),

    /// Underlying store failure.
    #[error(transparent)]
    Project(#[from] ProjectError),
}

/// Result type for state machine operations.
pub type StateResult<T> = Result<T, StateError>;

/// Per-chapter generation state (chunk-granular resumability).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterState {
    #[serde(default)]
    pub status: NodeStatus,

    /// Total chunks attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<u32>,

    /// Chunks still failed after retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_chunks: Option<u32>,

    /// Engine that produced the final audio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_used: Option<String>,

    /// Crossfade applied when stitching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crossfade_ms: Option<u32>,

    /// Stitched output path, when stitching succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Free-form extra fields (errors, fallback notes).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Per-node state entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeState {
    #[serde(default)]
    pub status: NodeStatus,

    /// UTC timestamp of the last status write (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Chapter sub-map; present on the generate node once chapter
    /// tracking has started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapters: Option<BTreeMap<String, ChapterState>>,

    /// Free-form extra fields recorded alongside status writes.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The full `pipeline-status.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    #[serde(default)]
    pub project_id: String,

    #[serde(default)]
    pub nodes: BTreeMap<String, NodeState>,
}

impl PipelineState {
    /// Fresh document with every node `pending`.
    pub fn initial(project_id: impl Into<String>) -> Self {
        let mut nodes = BTreeMap::new();
        for node in PIPELINE_NODES {
            nodes.insert(node.as_str().to_string(), NodeState::default());
        }
        Self {
            project_id: project_id.into(),
            nodes,
        }
    }

    /// State entry for a node; absent entries read as `pending`.
    pub fn node(&self, node: Node) -> NodeState {
        self.nodes.get(node.as_str()).cloned().unwrap_or_default()
    }

    /// Status of a node; absent entries read as `pending`.
    pub fn status(&self, node: Node) -> NodeStatus {
        self.nodes
            .get(node.as_str())
            .map(|n| n.status)
            .unwrap_or_default()
    }

    /// First node whose status is neither `complete` nor `skipped`;
    /// the last node when everything is settled.
    pub fn resume_point(&self) -> Node {
        for node in PIPELINE_NODES {
            if !self.status(*node).is_settled() {
                return *node;
            }
        }
        PIPELINE_NODES[PIPELINE_NODES.len() - 1]
    }

    /// Check whether execution may proceed to `target`: every hard gate
    /// before it must be `complete`. Returns the first blocking gate
    /// name on refusal.
    pub fn can_proceed_to(&self, target: Node) -> (bool, String) {
        for node in &PIPELINE_NODES[..target.index()] {
            if node.is_hard_gate() && self.status(*node) != NodeStatus::Complete {
                return (false, node.as_str().to_string());
            }
        }
        (true, "OK".to_string())
    }

    /// Furthest node with progress, for listing summaries. "new" when
    /// nothing has run yet.
    pub fn current_node(&self) -> String {
        for node in PIPELINE_NODES.iter().rev() {
            if matches!(self.status(*node), NodeStatus::Complete | NodeStatus::Partial) {
                return node.as_str().to_string();
            }
        }
        "new".to_string()
    }

    /// Chapter ids in the generate sub-map whose status is not complete.
    pub fn incomplete_chapters(&self) -> Vec<String> {
        let Some(gen) = self.nodes.get(Node::Generate.as_str()) else {
            return Vec::new();
        };
        let Some(chapters) = &gen.chapters else {
            return Vec::new();
        };
        chapters
            .iter()
            .filter(|(_, ch)| ch.status != NodeStatus::Complete)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Ordered node slice from `from` to `to` (inclusive); to the end when
/// `to` is absent.
pub fn nodes_in_range(from: Node, to: Option<Node>) -> Vec<Node> {
    let start = from.index();
    let end = to.map(|n| n.index() + 1).unwrap_or(PIPELINE_NODES.len());
    if start >= end {
        return vec![from];
    }
    PIPELINE_NODES[start..end].to_vec()
}

/// Mutation API over the persisted state document. Sole owner of
/// `pipeline-status.json` writes.
pub struct Tracker<'a> {
    store: &'a ProjectStore,
    project_id: &'a str,
}

impl<'a> Tracker<'a> {
    pub fn new(store: &'a ProjectStore, project_id: &'a str) -> Self {
        Self { store, project_id }
    }

    /// Load the current document.
    pub fn load(&self) -> StateResult<PipelineState> {
        Ok(self.store.load_state(self.project_id)?)
    }

    /// Status entry for a single node.
    pub fn node_status(&self, node: Node) -> StateResult<NodeState> {
        Ok(self.load()?.node(node))
    }

    /// Update a node's status with a UTC timestamp and extra fields,
    /// replacing the document atomically.
    pub fn update_node_status(
        &self,
        node: Node,
        status: NodeStatus,
        extra: &[(&str, Value)],
    ) -> StateResult<()> {
        let mut state = self.load()?;
        let entry = state.nodes.entry(node.as_str().to_string()).or_default();
        let old = entry.status;
        entry.status = status;
        entry.timestamp = Some(Utc::now().to_rfc3339());
        for (key, value) in extra {
            entry.extra.insert((*key).to_string(), value.clone());
        }
        self.store.save_state(self.project_id, &state)?;

        tracing::info!(
            "[{}] node {} status: {} -> {}",
            self.project_id,
            node,
            old,
            status
        );
        if status == NodeStatus::Failed {
            let error = state
                .node(node)
                .extra
                .get("error")
                .cloned()
                .unwrap_or(Value::Null);
            tracing::error!("[{}] node {} failed: {}", self.project_id, node, error);
        }
        Ok(())
    }

    /// Update generation status for one chapter.
    ///
    /// Lazily creates the chapter sub-map; its presence forces the
    /// generate node to `partial` until the node status is set
    /// explicitly afterwards.
    pub fn update_chapter_status(
        &self,
        chapter_id: &str,
        status: NodeStatus,
        chapter: ChapterState,
    ) -> StateResult<()> {
        let mut state = self.load()?;
        let entry = state
            .nodes
            .entry(Node::Generate.as_str().to_string())
            .or_default();

        let chapters = entry.chapters.get_or_insert_with(BTreeMap::new);
        let mut chapter = chapter;
        chapter.status = status;
        chapters.insert(chapter_id.to_string(), chapter);

        entry.status = NodeStatus::Partial;
        entry.timestamp = Some(Utc::now().to_rfc3339());

        self.store.save_state(self.project_id, &state)?;
        tracing::debug!(
            "[{}] chapter {} status: {}",
            self.project_id,
            chapter_id,
            status
        );
        Ok(())
    }

    /// Determine the node to resume from. An explicit name is validated
    /// and returned verbatim; otherwise the first unsettled node.
    pub fn resume_point(&self, from: Option<&str>) -> StateResult<Node> {
        if let Some(name) = from {
            return Node::parse(name).ok_or_else(|| StateError::UnknownNode(name.to_string()));
        }
        Ok(self.load()?.resume_point())
    }

    /// Gate check for a target node.
    pub fn can_proceed_to(&self, target: Node) -> StateResult<(bool, String)> {
        Ok(self.load()?.can_proceed_to(target))
    }
}
