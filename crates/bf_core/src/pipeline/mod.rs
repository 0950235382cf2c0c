//! Pipeline state machine - node ordering, gates, and the persisted
//! status document.
//!
//! Nodes run in a fixed order. Two gate classes control progress:
//! hard gates (`validate`, `qc_final`) block every downstream node until
//! they are `complete`; the auto gate (`qc_scan`) is advisory and feeds
//! the generate node's failure threshold instead.

pub mod node;
pub mod state;

pub use node::{Node, NodeStatus};
pub use state::{
    nodes_in_range, ChapterState, NodeState, PipelineState, StateError, StateResult, Tracker,
};
