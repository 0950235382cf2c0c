//! Project bundle management.
//!
//! A project is a directory under the projects root containing
//! `project.json` (the single source of truth for generation intent),
//! `pipeline-status.json` (execution state), and the fixed
//! `00_CONFIG` through `07_EXPORT` folder structure.

pub mod config;
pub mod layout;
pub mod store;

pub use config::{
    ChapterMode, ChapterSpec, CharacterSpec, ChunkStrategy, Direction, DuckingConfig,
    DuckingMethod, ExportConfig, ExportFormat, ExportMetadata, FallbackScope, GenerationConfig,
    MixConfig, ProjectConfig, QcConfig, QcFinalConfig, VramPolicy,
};
pub use store::{sanitize_project_id, ProjectError, ProjectResult, ProjectStore, ProjectSummary};
