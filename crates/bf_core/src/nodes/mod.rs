//! Pipeline node implementations.
//!
//! Each node module exposes a `run` entry point that performs the
//! node's work against the project store and records its status
//! transitions through the state tracker.

pub mod compose;
pub mod export;
pub mod generate;
pub mod ingest;
pub mod mix;
pub mod process;
pub mod qc_final;
pub mod qc_scan;
pub mod validate;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::audio::composer::ComposerError;
use crate::audio::ffmpeg::AudioToolError;
use crate::audio::mixer::MixError;
use crate::audio::AudioError;
use crate::engines::registry::RegistryError;
use crate::export::ExportError;
use crate::pipeline::state::StateError;
use crate::project::store::ProjectError;

/// Errors from node execution.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Tool(#[from] AudioToolError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Mix(#[from] MixError),

    #[error(transparent)]
    Composer(#[from] ComposerError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("I/O error in {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

impl NodeError {
    pub(crate) fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Result type for node execution.
pub type NodeResult<T> = Result<T, NodeError>;

/// Handle for cancelling long-running nodes.
///
/// Cancellation is cooperative: the generation orchestrator checks the
/// flag at chunk boundaries, treats the in-flight chunk as a terminal
/// failure, and leaves the chapter `partial`.
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
