//! Generation node - per-chapter TTS orchestration.
//!
//! For each chapter: resolve the engine attempt list (primary plus
//! fallback chain), parse segments, chunk them, synthesize every chunk
//! with retries and chunk QC, stitch the survivors with crossfade, and
//! record chunk-granular state. Stateless engines synthesize a
//! chapter's chunks in bounded parallel waves; order is restored by
//! chunk index before stitching. GPU engines get their VRAM lifecycle
//! calls after each chapter according to the configured policy.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;

use crate::audio::stitch::crossfade_stitch;
use crate::engines::{
    EngineParams, EngineRegistry, GenerationRequest, TtsEngine,
};
use crate::nodes::{CancelHandle, NodeError, NodeResult};
use crate::pipeline::node::{Node, NodeStatus};
use crate::pipeline::state::{ChapterState, Tracker};
use crate::project::config::{
    ChapterSpec, FallbackScope, ProjectConfig, QcConfig, VramPolicy,
};
use crate::project::layout;
use crate::project::store::ProjectStore;
use crate::qc::scanner::{generation_failure, scan_chunk};
use crate::qc::{CheckStatus, ChunkQcResult, QcReport};
use crate::text::chunker::chunk_text;
use crate::text::segmenter::parse_chapter_segments;

/// Options for a generation run.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Force one engine for every segment.
    pub engine_override: Option<String>,
    /// Restrict to specific chapter ids.
    pub chapters: Option<Vec<String>>,
    /// Skip chapters already complete in the pipeline state.
    pub resume: bool,
}

/// Result for one chapter.
#[derive(Debug, Clone)]
pub struct ChapterOutcome {
    pub chapter_id: String,
    pub status: NodeStatus,
    pub total_chunks: usize,
    pub failed_chunks: usize,
    pub engine_used: String,
    pub crossfade_ms: u32,
    pub output: Option<PathBuf>,
    pub qc_fail_rate: f64,
    pub error: Option<String>,
}

/// Result for the whole node.
#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub chapters: Vec<ChapterOutcome>,
    pub total_chunks: usize,
    pub failed_chunks: usize,
    pub fail_rate_percent: f64,
    pub node_status: NodeStatus,
}

/// One synthesis task: a chunk of one segment bound to its engine.
struct ChunkJob {
    chunk_index: usize,
    chunk_id: String,
    text: String,
    output_path: PathBuf,
    voice: Option<String>,
    language: String,
    reference_audio: Option<PathBuf>,
    direction: Option<crate::project::config::Direction>,
    use_ssml: bool,
    engine: Arc<dyn TtsEngine>,
}

/// Outcome of one chunk after retries.
struct ChunkResult {
    chunk_index: usize,
    path: Option<PathBuf>,
    qc: ChunkQcResult,
    failed: bool,
}

/// Run the generation node.
pub fn run(
    store: &ProjectStore,
    project_id: &str,
    registry: &EngineRegistry,
    options: &GenerateOptions,
    cancel: &CancelHandle,
) -> NodeResult<GenerateOutcome> {
    let project_path = store.resolve(project_id)?;
    let config = store.load_config(project_id)?;
    let tracker = Tracker::new(store, project_id);

    let state = store.load_state(project_id)?;
    let selected: Vec<&ChapterSpec> = config
        .chapters
        .iter()
        .filter(|ch| {
            options
                .chapters
                .as_ref()
                .map(|ids| ids.iter().any(|id| *id == ch.id))
                .unwrap_or(true)
        })
        .filter(|ch| {
            if !options.resume {
                return true;
            }
            // Resume: skip chapters already complete.
            state
                .node(Node::Generate)
                .chapters
                .as_ref()
                .and_then(|m| m.get(&ch.id))
                .map(|c| c.status != NodeStatus::Complete)
                .unwrap_or(true)
        })
        .collect();

    if selected.is_empty() {
        return Err(NodeError::invalid("No chapters to generate"));
    }

    tracker.update_node_status(
        Node::Generate,
        NodeStatus::Running,
        &[(
            "engine",
            json!(options
                .engine_override
                .clone()
                .unwrap_or_else(|| "per-character".to_string())),
        )],
    )?;

    let raw_dir = layout::raw_dir(&project_path);
    std::fs::create_dir_all(&raw_dir)
        .map_err(|e| NodeError::io(format!("creating {}", raw_dir.display()), e))?;

    let gen = &config.generation;
    let mut outcomes: Vec<ChapterOutcome> = Vec::new();
    let mut total_chunks = 0usize;
    let mut total_failed = 0usize;
    let mut primary_dead_for_project = false;

    for (chapter_number, chapter) in selected.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }

        let speaker = chapter.speaker();
        let primary_engine = options
            .engine_override
            .clone()
            .or_else(|| config.characters.get(speaker).map(|c| c.engine.clone()))
            .unwrap_or_else(|| "edge".to_string());

        // Engine attempt list: primary first, then the fallback chain.
        // With project scope a dead primary is skipped outright.
        let mut attempts: Vec<String> =
            if primary_dead_for_project && gen.fallback_scope == FallbackScope::Project {
                let chain: Vec<String> = gen
                    .fallback_chain
                    .iter()
                    .filter(|e| **e != primary_engine)
                    .cloned()
                    .collect();
                if chain.is_empty() {
                    vec![primary_engine.clone()]
                } else {
                    chain
                }
            } else {
                let mut list = vec![primary_engine.clone()];
                list.extend(
                    gen.fallback_chain
                        .iter()
                        .filter(|e| **e != primary_engine)
                        .cloned(),
                );
                list
            };
        attempts.dedup();

        let mut chapter_outcome: Option<ChapterOutcome> = None;

        for (attempt_idx, attempt_engine) in attempts.iter().enumerate() {
            let outcome = generate_chapter(
                store,
                project_id,
                &project_path,
                &config,
                chapter,
                registry,
                attempt_engine,
                &primary_engine,
                options,
                &raw_dir,
                chapter_number,
                cancel,
            )?;

            if outcome.status == NodeStatus::Complete || cancel.is_cancelled() {
                if attempt_engine != &primary_engine && outcome.status == NodeStatus::Complete {
                    tracing::warn!(
                        "[{}] {}: fell back from {} to {}",
                        project_id,
                        chapter.id,
                        primary_engine,
                        attempt_engine
                    );
                    if gen.fallback_scope == FallbackScope::Project {
                        primary_dead_for_project = true;
                        tracing::warn!(
                            "[{}] project-scope fallback: {} is dead for remaining chapters",
                            project_id,
                            primary_engine
                        );
                    }
                }
                chapter_outcome = Some(outcome);
                break;
            }

            // Clean partial output before trying the next engine; the
            // last attempt's partial artifacts are kept.
            if attempt_idx + 1 < attempts.len() {
                cleanup_chapter_chunks(&chapter.id, &raw_dir);
                tracing::warn!(
                    "[{}] {}: {} failed ({}), trying next engine",
                    project_id,
                    chapter.id,
                    attempt_engine,
                    outcome.error.as_deref().unwrap_or("unknown")
                );
            }
            if attempt_engine == &primary_engine && gen.fallback_scope == FallbackScope::Project {
                primary_dead_for_project = true;
            }
            chapter_outcome = Some(outcome);
        }

        let outcome = chapter_outcome.unwrap_or_else(|| ChapterOutcome {
            chapter_id: chapter.id.clone(),
            status: NodeStatus::Failed,
            total_chunks: 0,
            failed_chunks: 0,
            engine_used: primary_engine.clone(),
            crossfade_ms: gen.crossfade_for(&primary_engine),
            output: None,
            qc_fail_rate: 0.0,
            error: Some("No engines available".to_string()),
        });

        total_chunks += outcome.total_chunks;
        total_failed += outcome.failed_chunks;
        outcomes.push(outcome);
    }

    let fail_rate = total_failed as f64 / total_chunks.max(1) as f64 * 100.0;

    let node_status = if cancel.is_cancelled() {
        tracker.update_node_status(Node::Generate, NodeStatus::Partial, &[("cancelled", json!(true))])?;
        NodeStatus::Partial
    } else if fail_rate > gen.fail_threshold_percent {
        let message = format!(
            "Fail rate {:.1}% exceeds threshold {}%",
            fail_rate, gen.fail_threshold_percent
        );
        tracker.update_node_status(Node::Generate, NodeStatus::Failed, &[("error", json!(message))])?;
        NodeStatus::Failed
    } else if outcomes.iter().all(|o| o.status == NodeStatus::Complete) {
        tracker.update_node_status(Node::Generate, NodeStatus::Complete, &[])?;
        NodeStatus::Complete
    } else {
        tracker.update_node_status(Node::Generate, NodeStatus::Partial, &[])?;
        NodeStatus::Partial
    };

    Ok(GenerateOutcome {
        chapters: outcomes,
        total_chunks,
        failed_chunks: total_failed,
        fail_rate_percent: (fail_rate * 100.0).round() / 100.0,
        node_status,
    })
}

/// Remove chunk and stitched files for a chapter before a retry with a
/// different engine.
fn cleanup_chapter_chunks(chapter_id: &str, raw_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(raw_dir) else {
        return;
    };
    let prefix = format!("{}_", chapter_id);
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&prefix) && name.ends_with(".wav") {
            let _ = std::fs::remove_file(entry.path());
        }
    }
    let _ = std::fs::remove_file(raw_dir.join(format!("{}.wav", chapter_id)));
}

/// Generate one chapter with one chapter-level engine choice.
#[allow(clippy::too_many_arguments)]
fn generate_chapter(
    store: &ProjectStore,
    project_id: &str,
    project_path: &Path,
    config: &ProjectConfig,
    chapter: &ChapterSpec,
    registry: &EngineRegistry,
    attempt_engine: &str,
    primary_engine: &str,
    options: &GenerateOptions,
    raw_dir: &Path,
    chapter_number: usize,
    cancel: &CancelHandle,
) -> NodeResult<ChapterOutcome> {
    let tracker = Tracker::new(store, project_id);
    let gen = &config.generation;
    let crossfade_ms = gen.crossfade_for(attempt_engine);

    let fail_outcome = |error: String| ChapterOutcome {
        chapter_id: chapter.id.clone(),
        status: NodeStatus::Failed,
        total_chunks: 0,
        failed_chunks: 0,
        engine_used: attempt_engine.to_string(),
        crossfade_ms,
        output: None,
        qc_fail_rate: 0.0,
        error: Some(error),
    };

    // Load source text.
    let source_path = project_path.join(&chapter.source);
    let text = match std::fs::read_to_string(&source_path) {
        Ok(text) => text,
        Err(_) => {
            let error = format!("Source file not found: {}", chapter.source);
            tracker.update_chapter_status(
                &chapter.id,
                NodeStatus::Failed,
                chapter_error_state(attempt_engine, &error),
            )?;
            return Ok(fail_outcome(error));
        }
    };

    let segments = parse_chapter_segments(text.trim(), chapter.mode, chapter.speaker());

    // Build every chunk job up front, selecting the engine per segment.
    let mut jobs: Vec<ChunkJob> = Vec::new();
    let mut chunk_index = 0usize;

    for segment in &segments {
        let seg_character = config
            .characters
            .get(&segment.character)
            .or_else(|| config.characters.get(chapter.speaker()));

        // The global override wins; a fallback attempt binds the whole
        // chapter to the fallback engine; otherwise each segment speaks
        // through its own character's engine.
        let engine_name = if let Some(forced) = &options.engine_override {
            forced.clone()
        } else if attempt_engine != primary_engine {
            attempt_engine.to_string()
        } else {
            seg_character
                .map(|c| c.engine.clone())
                .unwrap_or_else(|| attempt_engine.to_string())
        };

        let engine = match registry.get(&engine_name) {
            Ok(engine) => engine,
            Err(e) => {
                let error = format!("Engine not available: {}", e);
                tracker.update_chapter_status(
                    &chapter.id,
                    NodeStatus::Failed,
                    chapter_error_state(attempt_engine, &error),
                )?;
                return Ok(fail_outcome(error));
            }
        };

        let use_ssml = gen.edge_tts_ssml && engine.supports_ssml();
        let voice = seg_character.and_then(|c| c.voice.clone());
        let reference_audio = seg_character
            .and_then(|c| c.reference_audio.as_ref())
            .map(|r| project_path.join(r));

        for chunk in chunk_text(&segment.text, gen.chunk_max_chars, gen.chunk_strategy) {
            let chunk_id = format!("{}_{:03}", chapter.id, chunk_index);
            jobs.push(ChunkJob {
                chunk_index,
                chunk_id: chunk_id.clone(),
                text: chunk,
                output_path: raw_dir.join(format!("{}.wav", chunk_id)),
                voice: voice.clone(),
                language: chapter.language.clone(),
                reference_audio: reference_audio.clone(),
                direction: if use_ssml {
                    Some(chapter.direction.clone())
                } else {
                    None
                },
                use_ssml,
                engine: Arc::clone(&engine),
            });
            chunk_index += 1;
        }
    }

    let total_chunks = jobs.len();
    let params = EngineParams {
        ssml: gen.edge_tts_ssml,
        temperature: gen.xtts_temperature,
        repetition_penalty: gen.xtts_repetition_penalty,
    };

    let results = synthesize_all(
        &jobs,
        gen.max_retries_per_chunk,
        gen.edge_tts_concurrency.max(1),
        &config.qc,
        config.mix.target_lufs,
        &params,
        cancel,
    );

    // Collate in chunk order.
    let mut report = QcReport::new(project_id, &chapter.id);
    let mut chunk_paths: Vec<PathBuf> = Vec::new();
    let mut failed_chunks = 0usize;
    for result in &results {
        report.chunks.push(result.qc.clone());
        if result.failed {
            failed_chunks += 1;
        }
        if let Some(path) = &result.path {
            chunk_paths.push(path.clone());
        }
    }

    // Stitch what we have.
    let chapter_output = raw_dir.join(format!("{}.wav", chapter.id));
    let stitched = if chunk_paths.is_empty() {
        false
    } else {
        match crossfade_stitch(&chunk_paths, &chapter_output, crossfade_ms, gen.leading_silence_ms)
        {
            Ok(ok) => ok,
            Err(e) => {
                tracing::error!("[{}] stitch failed for {}: {}", project_id, chapter.id, e);
                false
            }
        }
    };

    // VRAM lifecycle for the chapter-level engine.
    if let Ok(engine) = registry.get(attempt_engine) {
        apply_vram_policy(engine.as_ref(), gen.xtts_vram_management, gen.xtts_reload_every_n, chapter_number);
    }

    if let Err(e) = report.save(&layout::generated_dir(project_path)) {
        tracing::warn!("[{}] could not save QC report for {}: {}", project_id, chapter.id, e);
    }

    let status = if stitched && failed_chunks == 0 && !cancel.is_cancelled() {
        NodeStatus::Complete
    } else if stitched || !chunk_paths.is_empty() {
        NodeStatus::Partial
    } else {
        NodeStatus::Failed
    };

    tracker.update_chapter_status(
        &chapter.id,
        status,
        ChapterState {
            chunks: Some(total_chunks as u32),
            failed_chunks: Some(failed_chunks as u32),
            engine_used: Some(attempt_engine.to_string()),
            crossfade_ms: Some(crossfade_ms),
            output: stitched.then(|| chapter_output.display().to_string()),
            ..Default::default()
        },
    )?;

    Ok(ChapterOutcome {
        chapter_id: chapter.id.clone(),
        status,
        total_chunks,
        failed_chunks,
        engine_used: attempt_engine.to_string(),
        crossfade_ms,
        output: stitched.then_some(chapter_output),
        qc_fail_rate: report.fail_rate(),
        error: (!stitched).then(|| "Stitch failed or no chunks produced".to_string()),
    })
}

fn chapter_error_state(engine: &str, error: &str) -> ChapterState {
    let mut state = ChapterState {
        chunks: Some(0),
        failed_chunks: Some(0),
        engine_used: Some(engine.to_string()),
        ..Default::default()
    };
    state.extra.insert("error".to_string(), json!(error));
    state
}

/// Synthesize all chunk jobs, preserving chunk order in the result.
///
/// GPU-resident engines serialize their own calls, so their jobs run
/// sequentially; stateless engines run in bounded parallel waves.
fn synthesize_all(
    jobs: &[ChunkJob],
    max_retries: u32,
    concurrency: usize,
    qc: &QcConfig,
    target_lufs: f64,
    params: &EngineParams,
    cancel: &CancelHandle,
) -> Vec<ChunkResult> {
    let mut results: Vec<ChunkResult> = Vec::with_capacity(jobs.len());

    let mut position = 0usize;
    while position < jobs.len() {
        if cancel.is_cancelled() {
            for job in &jobs[position..] {
                results.push(ChunkResult {
                    chunk_index: job.chunk_index,
                    path: None,
                    qc: generation_failure(&job.chunk_id, "cancelled"),
                    failed: true,
                });
            }
            break;
        }

        let parallel_ok = !jobs[position].engine.requires_gpu();
        let wave_len = if parallel_ok {
            // Extend the wave while the engine stays parallel-safe.
            jobs[position..]
                .iter()
                .take(concurrency)
                .take_while(|j| !j.engine.requires_gpu())
                .count()
        } else {
            1
        };
        let wave = &jobs[position..position + wave_len];

        if wave.len() == 1 {
            let job = &wave[0];
            results.push(synthesize_chunk(job, max_retries, qc, target_lufs, params));
        } else {
            let mut wave_results: Vec<Option<ChunkResult>> =
                (0..wave.len()).map(|_| None).collect();
            std::thread::scope(|scope| {
                let mut handles = Vec::with_capacity(wave.len());
                for (slot, job) in wave.iter().enumerate() {
                    handles.push((
                        slot,
                        scope.spawn(move || {
                            synthesize_chunk(job, max_retries, qc, target_lufs, params)
                        }),
                    ));
                }
                for (slot, handle) in handles {
                    match handle.join() {
                        Ok(result) => wave_results[slot] = Some(result),
                        Err(_) => {
                            let job = &wave[slot];
                            wave_results[slot] = Some(ChunkResult {
                                chunk_index: job.chunk_index,
                                path: None,
                                qc: generation_failure(&job.chunk_id, "synthesis worker panicked"),
                                failed: true,
                            });
                        }
                    }
                }
            });
            results.extend(wave_results.into_iter().flatten());
        }

        position += wave_len;
    }

    results.sort_by_key(|r| r.chunk_index);
    results
}

/// Synthesize a single chunk with retries; a QC `fail` on a produced
/// file counts as a generation failure for retry purposes. A chunk that
/// still fails QC on the last attempt is kept for stitching but counted
/// as failed.
fn synthesize_chunk(
    job: &ChunkJob,
    max_retries: u32,
    qc: &QcConfig,
    target_lufs: f64,
    params: &EngineParams,
) -> ChunkResult {
    let mut last_error = String::from("Unknown generation error");

    for attempt in 0..=max_retries {
        let request = GenerationRequest {
            text: job.text.clone(),
            output_path: job.output_path.clone(),
            voice: job.voice.clone(),
            language: job.language.clone(),
            reference_audio: job.reference_audio.clone(),
            direction: job.direction.clone(),
            params: EngineParams {
                ssml: job.use_ssml,
                ..params.clone()
            },
        };

        let result = job.engine.generate(&request);

        let file_ok = result.success
            && job.output_path.exists()
            && std::fs::metadata(&job.output_path)
                .map(|m| m.len() > 0)
                .unwrap_or(false);

        if file_ok {
            let qc_result = scan_chunk(&job.output_path, &job.chunk_id, qc, None, target_lufs);

            if qc_result.status() == CheckStatus::Fail && attempt < max_retries {
                last_error = format!("QC failed: {}", qc_result.failure_summary());
                tracing::warn!(
                    "{}: QC fail, retry {}/{}",
                    job.chunk_id,
                    attempt + 1,
                    max_retries
                );
                continue;
            }

            let failed = qc_result.status() == CheckStatus::Fail;
            if failed {
                tracing::warn!("{}: QC fail after {} retries", job.chunk_id, max_retries);
            }
            return ChunkResult {
                chunk_index: job.chunk_index,
                path: Some(job.output_path.clone()),
                qc: qc_result,
                failed,
            };
        }

        last_error = result
            .error
            .unwrap_or_else(|| "Unknown generation error".to_string());
        if attempt < max_retries {
            tracing::warn!(
                "{}: attempt {} failed - {}",
                job.chunk_id,
                attempt + 1,
                last_error
            );
        }
    }

    tracing::error!("{}: FAILED - {}", job.chunk_id, last_error);
    ChunkResult {
        chunk_index: job.chunk_index,
        path: None,
        qc: generation_failure(&job.chunk_id, &last_error),
        failed: true,
    }
}

/// Apply the configured VRAM policy after a chapter, when the engine
/// exposes the lifecycle hooks.
fn apply_vram_policy(
    engine: &dyn TtsEngine,
    policy: VramPolicy,
    reload_every_n: u32,
    chapter_number: usize,
) {
    let Some(hooks) = engine.vram() else {
        return;
    };

    match policy {
        VramPolicy::EmptyCachePerChapter => hooks.release_vram(),
        VramPolicy::Conservative => hooks.unload_model(),
        VramPolicy::ReloadPeriodic => {
            let n = reload_every_n.max(1) as usize;
            if (chapter_number + 1) % n == 0 {
                hooks.unload_model();
            } else {
                hooks.release_vram();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::engines::{GenerationResult, VoiceDescriptor, VramManaged};
    use crate::project::config::{ChapterMode, CharacterSpec, Direction};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Deterministic test engine: bursts of tone over a quiet floor, so
    /// chunk QC separates speech from noise cleanly.
    struct ToneEngine {
        calls: Arc<AtomicUsize>,
        fail_first: usize,
        gpu: bool,
        vram_events: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    impl ToneEngine {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_first: 0,
                gpu: false,
                vram_events: Arc::new(parking_lot::Mutex::new(Vec::new())),
            }
        }

        fn write_speech_like(path: &Path) {
            let sr = 24_000usize;
            let mut samples = Vec::new();
            for _ in 0..3 {
                for i in 0..sr / 5 {
                    samples.push(
                        (i as f32 * 2.0 * std::f32::consts::PI * 220.0 / 24_000.0).sin() * 0.2,
                    );
                }
                for i in 0..sr / 10 {
                    samples.push(if i % 2 == 0 { 0.001 } else { -0.001 });
                }
            }
            AudioBuffer::new(samples, sr as u32, 1).save_wav(path).unwrap();
        }
    }

    impl TtsEngine for ToneEngine {
        fn name(&self) -> &str {
            "tone"
        }
        fn supports_cloning(&self) -> bool {
            false
        }
        fn supports_ssml(&self) -> bool {
            false
        }
        fn requires_gpu(&self) -> bool {
            self.gpu
        }
        fn generate(&self, request: &GenerationRequest) -> GenerationResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return GenerationResult::failed(
                    crate::engines::EngineErrorKind::Other,
                    "synthetic failure",
                );
            }
            Self::write_speech_like(&request.output_path);
            GenerationResult::ok(0.9, 24_000)
        }
        fn list_voices(&self, _language: Option<&str>) -> Result<Vec<VoiceDescriptor>, String> {
            Ok(Vec::new())
        }
        fn test_connection(&self) -> bool {
            true
        }
        fn vram(&self) -> Option<&dyn VramManaged> {
            self.gpu.then_some(self as &dyn VramManaged)
        }
    }

    impl VramManaged for ToneEngine {
        fn release_vram(&self) {
            self.vram_events.lock().push("release");
        }
        fn unload_model(&self) {
            self.vram_events.lock().push("unload");
        }
    }

    /// Engine that always fails.
    struct BrokenEngine {
        calls: Arc<AtomicUsize>,
    }

    impl TtsEngine for BrokenEngine {
        fn name(&self) -> &str {
            "broken"
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
        fn generate(&self, _request: &GenerationRequest) -> GenerationResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            GenerationResult::failed(crate::engines::EngineErrorKind::Other, "always broken")
        }
        fn list_voices(&self, _language: Option<&str>) -> Result<Vec<VoiceDescriptor>, String> {
            Ok(Vec::new())
        }
        fn test_connection(&self) -> bool {
            false
        }
    }

    fn setup_project(engine: &str, text: &str) -> (tempfile::TempDir, ProjectStore) {
        let root = tempdir().unwrap();
        let store = ProjectStore::new(root.path());
        let path = store.create("BOOK").unwrap();

        std::fs::write(path.join("01_TEXT/chapters/ch01.txt"), text).unwrap();

        let mut config = store.load_config("BOOK").unwrap();
        config.characters.insert(
            "narrator".to_string(),
            CharacterSpec {
                name: "Narrator".to_string(),
                engine: engine.to_string(),
                voice: Some("test-voice".to_string()),
                reference_audio: None,
                dialect: None,
                persona: None,
                unknown: BTreeMap::new(),
            },
        );
        config.chapters.push(ChapterSpec {
            id: "ch01".to_string(),
            title: "Chapter One".to_string(),
            language: "en".to_string(),
            source: "01_TEXT/chapters/ch01.txt".to_string(),
            character: Some("narrator".to_string()),
            default_character: None,
            mode: ChapterMode::Single,
            direction: Direction::default(),
        });
        // Wide QC margins: these tests exercise orchestration, not
        // loudness measurement (which needs ffmpeg on PATH anyway).
        config.qc.snr_min_db = 5.0;
        config.qc.lufs_deviation_max = 40.0;
        config.generation.fallback_chain = vec![];
        config.generation.max_retries_per_chunk = 1;
        store.save_config("BOOK", &config).unwrap();
        (root, store)
    }

    fn registry_with(engines: Vec<(&'static str, Arc<dyn TtsEngine>)>) -> EngineRegistry {
        let mut registry = EngineRegistry::new();
        for (name, engine) in engines {
            let engine = Arc::clone(&engine);
            registry.register(name, move || Arc::clone(&engine));
        }
        registry
    }

    #[test]
    fn generates_chunks_and_stitches_chapter() {
        let (_root, store) = setup_project("tone", "First sentence. Second sentence here.");
        let registry = registry_with(vec![("tone", Arc::new(ToneEngine::new()))]);

        let outcome = run(
            &store,
            "BOOK",
            &registry,
            &GenerateOptions::default(),
            &CancelHandle::new(),
        )
        .unwrap();

        assert_eq!(outcome.node_status, NodeStatus::Complete);
        assert_eq!(outcome.failed_chunks, 0);
        assert!(outcome.total_chunks >= 1);

        let chapter = &outcome.chapters[0];
        assert_eq!(chapter.status, NodeStatus::Complete);
        let output = chapter.output.as_ref().unwrap();
        assert!(output.exists());
        assert!(output.ends_with("ch01.wav"));

        // Chapter sub-map persisted with chunk counts.
        let state = store.load_state("BOOK").unwrap();
        let chapters = state.node(Node::Generate).chapters.unwrap();
        assert_eq!(chapters["ch01"].status, NodeStatus::Complete);
        assert_eq!(chapters["ch01"].failed_chunks, Some(0));

        // QC report saved next to the generated audio.
        assert!(store
            .resolve("BOOK")
            .unwrap()
            .join("03_GENERATED/qc_report_ch01.json")
            .exists());
    }

    #[test]
    fn retries_recover_from_transient_failures() {
        let (_root, store) = setup_project("tone", "Only one short sentence.");
        let mut engine = ToneEngine::new();
        engine.fail_first = 1; // first call fails, retry succeeds
        let registry = registry_with(vec![("tone", Arc::new(engine))]);

        let outcome = run(
            &store,
            "BOOK",
            &registry,
            &GenerateOptions::default(),
            &CancelHandle::new(),
        )
        .unwrap();

        assert_eq!(outcome.node_status, NodeStatus::Complete);
        assert_eq!(outcome.failed_chunks, 0);
    }

    #[test]
    fn fallback_chain_rescues_a_chapter() {
        let (_root, store) = setup_project("broken", "Some text to speak.");
        let mut config = store.load_config("BOOK").unwrap();
        config.generation.fallback_chain = vec!["tone".to_string()];
        store.save_config("BOOK", &config).unwrap();

        let broken_calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![
            (
                "broken",
                Arc::new(BrokenEngine {
                    calls: Arc::clone(&broken_calls),
                }),
            ),
            ("tone", Arc::new(ToneEngine::new())),
        ]);

        let outcome = run(
            &store,
            "BOOK",
            &registry,
            &GenerateOptions::default(),
            &CancelHandle::new(),
        )
        .unwrap();

        assert_eq!(outcome.node_status, NodeStatus::Complete);
        assert_eq!(outcome.chapters[0].engine_used, "tone");
        assert!(broken_calls.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn project_scope_skips_dead_primary_for_later_chapters() {
        let (_root, store) = setup_project("broken", "Chapter one text.");
        let path = store.resolve("BOOK").unwrap();
        std::fs::write(path.join("01_TEXT/chapters/ch02.txt"), "Chapter two text.").unwrap();

        let mut config = store.load_config("BOOK").unwrap();
        config.generation.fallback_chain = vec!["tone".to_string()];
        config.generation.fallback_scope = FallbackScope::Project;
        let mut second = config.chapters[0].clone();
        second.id = "ch02".to_string();
        second.source = "01_TEXT/chapters/ch02.txt".to_string();
        config.chapters.push(second);
        store.save_config("BOOK", &config).unwrap();

        let broken_calls = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(vec![
            (
                "broken",
                Arc::new(BrokenEngine {
                    calls: Arc::clone(&broken_calls),
                }),
            ),
            ("tone", Arc::new(ToneEngine::new())),
        ]);

        let outcome = run(
            &store,
            "BOOK",
            &registry,
            &GenerateOptions::default(),
            &CancelHandle::new(),
        )
        .unwrap();

        assert_eq!(outcome.node_status, NodeStatus::Complete);
        // Chapter 1 exhausted the primary (retries included); chapter 2
        // went straight to the fallback without touching it again.
        let calls_after_ch1 = broken_calls.load(Ordering::SeqCst);
        assert!(calls_after_ch1 > 0);
        assert_eq!(outcome.chapters[1].engine_used, "tone");
    }

    #[test]
    fn exhausted_engines_fail_the_node() {
        let (_root, store) = setup_project("broken", "Doomed text.");
        let registry = registry_with(vec![(
            "broken",
            Arc::new(BrokenEngine {
                calls: Arc::new(AtomicUsize::new(0)),
            }),
        )]);

        let outcome = run(
            &store,
            "BOOK",
            &registry,
            &GenerateOptions::default(),
            &CancelHandle::new(),
        )
        .unwrap();

        assert_eq!(outcome.node_status, NodeStatus::Failed);
        assert!(outcome.failed_chunks > 0);

        let state = store.load_state("BOOK").unwrap();
        assert_eq!(state.status(Node::Generate), NodeStatus::Failed);
        assert!(state.node(Node::Generate).extra.contains_key("error"));
    }

    #[test]
    fn conservative_policy_unloads_after_chapter() {
        let (_root, store) = setup_project("tone", "GPU chapter text.");
        let mut config = store.load_config("BOOK").unwrap();
        config.generation.xtts_vram_management = VramPolicy::Conservative;
        store.save_config("BOOK", &config).unwrap();

        let mut engine = ToneEngine::new();
        engine.gpu = true;
        let events = Arc::clone(&engine.vram_events);
        let registry = registry_with(vec![("tone", Arc::new(engine))]);

        run(
            &store,
            "BOOK",
            &registry,
            &GenerateOptions::default(),
            &CancelHandle::new(),
        )
        .unwrap();

        assert_eq!(events.lock().as_slice(), &["unload"]);
    }

    #[test]
    fn cancellation_leaves_node_partial() {
        let (_root, store) = setup_project("tone", "Never spoken.");
        let registry = registry_with(vec![("tone", Arc::new(ToneEngine::new()))]);

        let cancel = CancelHandle::new();
        cancel.cancel();
        let outcome = run(&store, "BOOK", &registry, &GenerateOptions::default(), &cancel).unwrap();

        assert_eq!(outcome.node_status, NodeStatus::Partial);
        let state = store.load_state("BOOK").unwrap();
        assert_eq!(state.status(Node::Generate), NodeStatus::Partial);
    }

    #[test]
    fn unknown_engine_fails_chapter() {
        let (_root, store) = setup_project("ghost-engine", "Text.");
        let registry = registry_with(vec![("tone", Arc::new(ToneEngine::new()))]);

        let outcome = run(
            &store,
            "BOOK",
            &registry,
            &GenerateOptions::default(),
            &CancelHandle::new(),
        )
        .unwrap();

        assert_eq!(outcome.chapters[0].status, NodeStatus::Failed);
        assert!(outcome.chapters[0]
            .error
            .as_deref()
            .unwrap_or("")
            .contains("Engine not available")
            || outcome.chapters[0].total_chunks == 0);
    }
}
