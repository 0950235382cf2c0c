//! End-to-end pipeline flow over a real on-disk project.
//!
//! Covers the ffmpeg-free path: create -> ingest -> generate (with an
//! in-test engine) -> qc scan -> compose -> mix, plus gate enforcement
//! and resume behavior along the way.

use std::path::Path;
use std::sync::Arc;

use bf_core::audio::AudioBuffer;
use bf_core::engines::{
    EngineRegistry, GenerationRequest, GenerationResult, TtsEngine, VoiceDescriptor,
};
use bf_core::nodes::generate::GenerateOptions;
use bf_core::nodes::{self, CancelHandle};
use bf_core::pipeline::node::{Node, NodeStatus};
use bf_core::pipeline::state::Tracker;
use bf_core::project::layout;
use bf_core::project::store::ProjectStore;
use bf_core::runner::{run_from, RunOptions, RunnerError};

/// Test engine: tone bursts over a near-silent floor, so chunk QC sees
/// a clean speech/noise split.
struct BurstEngine;

impl BurstEngine {
    fn write(path: &Path) {
        let sr = 24_000usize;
        let mut samples = Vec::new();
        for _ in 0..2 {
            for i in 0..sr / 5 {
                samples.push((i as f32 * 2.0 * std::f32::consts::PI * 220.0 / 24_000.0).sin() * 0.2);
            }
            for i in 0..sr / 10 {
                samples.push(if i % 2 == 0 { 0.001 } else { -0.001 });
            }
        }
        AudioBuffer::new(samples, sr as u32, 1).save_wav(path).unwrap();
    }
}

impl TtsEngine for BurstEngine {
    fn name(&self) -> &str {
        "burst"
    }
    fn supports_cloning(&self) -> bool {
        false
    }
    fn supports_ssml(&self) -> bool {
        false
    }
    fn requires_gpu(&self) -> bool {
        false
    }
    fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        Self::write(&request.output_path);
        GenerationResult::ok(0.6, 24_000)
    }
    fn list_voices(&self, _language: Option<&str>) -> Result<Vec<VoiceDescriptor>, String> {
        Ok(Vec::new())
    }
    fn test_connection(&self) -> bool {
        true
    }
}

fn test_registry() -> EngineRegistry {
    let mut registry = EngineRegistry::new();
    registry.register("burst", || Arc::new(BurstEngine) as Arc<dyn TtsEngine>);
    registry
}

fn relaxed_qc(store: &ProjectStore) {
    let mut config = store.load_config("NOVEL").unwrap();
    config.qc.snr_min_db = 5.0;
    config.qc.lufs_deviation_max = 40.0;
    config.generation.fallback_chain = vec![];
    config
        .characters
        .get_mut("narrator")
        .unwrap()
        .engine = "burst".to_string();
    store.save_config("NOVEL", &config).unwrap();
}

#[test]
fn full_flow_from_text_to_mixdown() {
    let root = tempfile::tempdir().unwrap();
    let sources = tempfile::tempdir().unwrap();
    let store = ProjectStore::new(root.path());

    // Create + ingest.
    store.create("novel").unwrap();
    std::fs::write(
        sources.path().join("ch01.txt"),
        "First sentence of the story. A second one follows, with a clause.",
    )
    .unwrap();
    std::fs::write(sources.path().join("ch02.txt"), "The second chapter speaks.").unwrap();

    let ingest = nodes::ingest::run(&store, "NOVEL", sources.path(), None).unwrap();
    assert_eq!(ingest.ingested, 2);
    relaxed_qc(&store);

    // Generation is blocked until the validate gate passes.
    let tracker = Tracker::new(&store, "NOVEL");
    let (ok, gate) = tracker.can_proceed_to(Node::Generate).unwrap();
    assert!(!ok);
    assert_eq!(gate, "validate");
    tracker
        .update_node_status(Node::Validate, NodeStatus::Complete, &[])
        .unwrap();
    let (ok, _) = tracker.can_proceed_to(Node::Generate).unwrap();
    assert!(ok);

    // Generate both chapters with the in-test engine.
    let registry = test_registry();
    let outcome = nodes::generate::run(
        &store,
        "NOVEL",
        &registry,
        &GenerateOptions::default(),
        &CancelHandle::new(),
    )
    .unwrap();
    assert_eq!(outcome.node_status, NodeStatus::Complete);
    assert_eq!(outcome.failed_chunks, 0);

    let project_path = store.resolve("NOVEL").unwrap();
    let raw = layout::raw_dir(&project_path);
    assert!(raw.join("ch01.wav").exists());
    assert!(raw.join("ch02.wav").exists());
    assert!(raw.join("ch01_000.wav").exists());

    // Advisory chunk scan passes and records its rate.
    let scan = nodes::qc_scan::run(&store, "NOVEL").unwrap();
    assert_eq!(scan.failed_chunks, 0);
    assert!(scan.total_chunks >= 2);

    // Compose a bed and mix (raw fallback - process needs ffmpeg).
    nodes::compose::run(&store, "NOVEL", "contemplative", 2.0, Some(9), false).unwrap();
    let mix = nodes::mix::run(&store, "NOVEL", None).unwrap();
    assert_eq!(mix.mixed, 2);
    assert!(mix.bed.is_some());
    assert!(layout::mix_dir(&project_path).join("ch01.wav").exists());

    // Resume point reflects progress: everything through mix settled or
    // partial; the next hard gate is where we resume.
    let state = store.load_state("NOVEL").unwrap();
    assert_eq!(state.status(Node::Generate), NodeStatus::Complete);
    assert_eq!(state.status(Node::Mix), NodeStatus::Complete);
    assert_eq!(state.resume_point(), Node::QcFinal);
}

#[test]
fn generate_resume_skips_complete_chapters() {
    let root = tempfile::tempdir().unwrap();
    let sources = tempfile::tempdir().unwrap();
    let store = ProjectStore::new(root.path());

    store.create("novel").unwrap();
    std::fs::write(sources.path().join("ch01.txt"), "Only chapter text.").unwrap();
    nodes::ingest::run(&store, "NOVEL", sources.path(), None).unwrap();
    relaxed_qc(&store);

    let registry = test_registry();
    let first = nodes::generate::run(
        &store,
        "NOVEL",
        &registry,
        &GenerateOptions::default(),
        &CancelHandle::new(),
    )
    .unwrap();
    assert_eq!(first.node_status, NodeStatus::Complete);

    // With resume, nothing is left to do.
    let resume = nodes::generate::run(
        &store,
        "NOVEL",
        &registry,
        &GenerateOptions {
            resume: true,
            ..Default::default()
        },
        &CancelHandle::new(),
    );
    assert!(resume.is_err(), "all chapters complete, nothing to generate");
}

#[test]
fn runner_enforces_gates_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let store = ProjectStore::new(root.path());
    store.create("novel").unwrap();

    let err = run_from(&store, "NOVEL", Some("export"), RunOptions::default()).unwrap_err();
    match err {
        RunnerError::GateBlocked { gate, .. } => assert_eq!(gate, "validate"),
        other => panic!("expected GateBlocked, got {}", other),
    }
}
