//! Pipeline node identity and ordering.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The pipeline nodes, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Bootstrap,
    Ingest,
    Validate,
    Generate,
    QcScan,
    Process,
    Compose,
    Mix,
    QcFinal,
    Export,
}

/// All nodes in execution order.
pub const PIPELINE_NODES: &[Node] = &[
    Node::Bootstrap,
    Node::Ingest,
    Node::Validate,
    Node::Generate,
    Node::QcScan,
    Node::Process,
    Node::Compose,
    Node::Mix,
    Node::QcFinal,
    Node::Export,
];

impl Node {
    /// Stable string form used in the status document and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Bootstrap => "bootstrap",
            Node::Ingest => "ingest",
            Node::Validate => "validate",
            Node::Generate => "generate",
            Node::QcScan => "qc_scan",
            Node::Process => "process",
            Node::Compose => "compose",
            Node::Mix => "mix",
            Node::QcFinal => "qc_final",
            Node::Export => "export",
        }
    }

    /// Parse a node name. Returns `None` for unknown names.
    pub fn parse(name: &str) -> Option<Node> {
        PIPELINE_NODES.iter().copied().find(|n| n.as_str() == name)
    }

    /// Position in the pipeline order.
    pub fn index(&self) -> usize {
        PIPELINE_NODES
            .iter()
            .position(|n| n == self)
            .unwrap_or_default()
    }

    /// Hard gates block all downstream nodes until `complete`.
    pub fn is_hard_gate(&self) -> bool {
        matches!(self, Node::Validate | Node::QcFinal)
    }

    /// Auto gates are advisory only.
    pub fn is_auto_gate(&self) -> bool {
        matches!(self, Node::QcScan)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a node (or a chapter within the generate node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Partial,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Complete => "complete",
            NodeStatus::Partial => "partial",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        }
    }

    /// Terminal states that do not require a re-run on resume.
    pub fn is_settled(&self) -> bool {
        matches!(self, NodeStatus::Complete | NodeStatus::Skipped)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_are_ordered() {
        assert_eq!(PIPELINE_NODES.len(), 10);
        assert_eq!(PIPELINE_NODES[0], Node::Bootstrap);
        assert_eq!(PIPELINE_NODES[9], Node::Export);
        assert!(Node::Validate.index() < Node::Generate.index());
        assert!(Node::Mix.index() < Node::QcFinal.index());
    }

    #[test]
    fn parse_round_trips() {
        for node in PIPELINE_NODES {
            assert_eq!(Node::parse(node.as_str()), Some(*node));
        }
        assert_eq!(Node::parse("mixdown"), None);
    }

    #[test]
    fn gate_classes() {
        assert!(Node::Validate.is_hard_gate());
        assert!(Node::QcFinal.is_hard_gate());
        assert!(Node::QcScan.is_auto_gate());
        assert!(!Node::Generate.is_hard_gate());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&NodeStatus::Partial).unwrap(),
            "\"partial\""
        );
        let s: NodeStatus = serde_json::from_str("\"complete\"").unwrap();
        assert!(s.is_settled());
    }
}
