//! BookForge - command line shell for the audiobook pipeline.
//!
//! Translates user intent into calls on the core: project CRUD, node
//! execution, engine inspection, and one-shot synthesis. Exit codes:
//! 0 success, 1 command failure, 2 hard gate not passed.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bf_core::engines::{EngineRegistry, GenerationRequest};
use bf_core::nodes::generate::GenerateOptions;
use bf_core::nodes::{self, CancelHandle};
use bf_core::pipeline::node::{Node, NodeStatus};
use bf_core::pipeline::state::Tracker;
use bf_core::project::store::ProjectStore;
use bf_core::runner::{run_from, RunOptions, RunnerError};

mod render;

/// Exit code for an unpassed hard gate.
const EXIT_GATE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "bookforge")]
#[command(about = "Batch audiobook production pipeline")]
#[command(version)]
struct Cli {
    /// Projects root directory.
    #[arg(long, default_value = "PROJECTS", env = "BOOKFORGE_ROOT")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new project.
    New {
        /// Project name; sanitized to [A-Za-z0-9_-].
        name: String,
    },

    /// List all projects.
    List,

    /// Show the pipeline status table for a project.
    Status { project_id: String },

    /// Run the validation gate.
    Validate { project_id: String },

    /// Import chapter text files.
    Ingest {
        project_id: String,
        /// Directory containing .txt sources.
        #[arg(long)]
        source: PathBuf,
        /// Override the detected language for all files.
        #[arg(long)]
        language: Option<String>,
    },

    /// Run TTS generation.
    Generate {
        project_id: String,
        /// Override the engine for all segments.
        #[arg(long)]
        engine: Option<String>,
        /// Comma-separated chapter ids to generate.
        #[arg(long)]
        chapters: Option<String>,
        /// Skip chapters already complete.
        #[arg(long)]
        resume: bool,
    },

    /// Re-scan generated chunks (advisory QC).
    Qc {
        project_id: String,
        /// Print the per-chapter report summary.
        #[arg(long)]
        report: bool,
    },

    /// Normalize and trim stitched chapters.
    Process { project_id: String },

    /// Render an ambient bed.
    Compose {
        project_id: String,
        /// Mood preset name.
        #[arg(long, default_value = "contemplative")]
        mood: String,
        /// Bed duration in seconds.
        #[arg(long, default_value_t = 60.0)]
        duration: f64,
        /// RNG seed for reproducible renders.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Mix chapters with the ambient bed.
    Mix {
        project_id: String,
        /// Bed filename under 05_MUSIC/generated.
        #[arg(long)]
        music: Option<String>,
    },

    /// Run the final QC gate on mixed renders.
    QcFinal { project_id: String },

    /// Export deliverables and the manifest.
    Export { project_id: String },

    /// Run the pipeline from a node to the end.
    Run {
        project_id: String,
        /// Starting node; defaults to the first unfinished node.
        #[arg(long)]
        from: Option<String>,
        /// Override the engine for generation.
        #[arg(long)]
        engine: Option<String>,
        /// Bed filename for the mix node.
        #[arg(long)]
        music: Option<String>,
    },

    /// Inspect TTS engines.
    Engines {
        #[command(subcommand)]
        command: EnginesCommand,
    },

    /// One-shot synthesis outside any project.
    Quick {
        /// Text to speak.
        text: String,
        /// Engine name.
        #[arg(long, default_value = "edge")]
        engine: String,
        /// Voice id.
        #[arg(long, default_value = "ar-SA-HamedNeural")]
        voice: String,
        /// Output WAV path.
        #[arg(short, long, default_value = "quick.wav")]
        output: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum EnginesCommand {
    /// List registered engines with capabilities.
    List,
    /// Probe an engine's readiness.
    Test { engine: String },
    /// List an engine's voices.
    Voices {
        engine: String,
        /// Filter by language prefix (e.g. "ar").
        #[arg(long)]
        lang: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Console logging plus a rolling file under <root>/.logs.
    let logs_dir = cli.root.join(".logs");
    let _ = std::fs::create_dir_all(&logs_dir);
    let file_appender = tracing_appender::rolling::daily(logs_dir, "bookforge.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bf_core=info,bf_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(RunnerError::GateBlocked { gate, node }) = e.downcast_ref::<RunnerError>() {
                eprintln!("{} Gate '{}' has not passed; cannot run '{}'", render::MARK_FAIL, gate, node);
                return ExitCode::from(EXIT_GATE);
            }
            eprintln!("{} {:#}", render::MARK_FAIL, e);
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: &Cli) -> Result<()> {
    let store = ProjectStore::new(&cli.root);

    match &cli.command {
        Command::New { name } => {
            let path = store.create(name)?;
            println!("{} Created project at {}", render::MARK_OK, path.display());
            Ok(())
        }

        Command::List => {
            let projects = store.list()?;
            if projects.is_empty() {
                println!("No projects under {}", cli.root.display());
                return Ok(());
            }
            render::print_project_table(&projects);
            Ok(())
        }

        Command::Status { project_id } => {
            let config = store.load_config(project_id)?;
            let state = store.load_state(project_id)?;
            render::print_status(&config, &state);
            Ok(())
        }

        Command::Validate { project_id } => {
            let report = nodes::validate::run(&store, project_id)?;
            render::print_validation(&report);
            if report.ok() {
                Ok(())
            } else {
                anyhow::bail!("validation failed with {} error(s)", report.failures.len())
            }
        }

        Command::Ingest {
            project_id,
            source,
            language,
        } => {
            let outcome = nodes::ingest::run(&store, project_id, source, language.as_deref())?;
            println!(
                "{} Ingested {} file(s), skipped {}",
                render::MARK_OK,
                outcome.ingested,
                outcome.skipped
            );
            for record in &outcome.details {
                println!("  {} -> {} [{}]", record.file, record.chapter_id, record.language);
            }
            Ok(())
        }

        Command::Generate {
            project_id,
            engine,
            chapters,
            resume,
        } => {
            guard_gate(&store, project_id, Node::Generate)?;
            let registry = default_registry(&store, project_id)?;
            let options = GenerateOptions {
                engine_override: engine.clone(),
                chapters: chapters
                    .as_ref()
                    .map(|s| s.split(',').map(|c| c.trim().to_string()).collect()),
                resume: *resume,
            };
            let outcome = nodes::generate::run(
                &store,
                project_id,
                &registry,
                &options,
                &CancelHandle::new(),
            )?;
            render::print_generate(&outcome);
            match outcome.node_status {
                NodeStatus::Failed => anyhow::bail!(
                    "generation failed ({:.1}% of chunks)",
                    outcome.fail_rate_percent
                ),
                _ => Ok(()),
            }
        }

        Command::Qc { project_id, report } => {
            let outcome = nodes::qc_scan::run(&store, project_id)?;
            println!(
                "{} Scanned {} chunk(s), {} failed ({:.1}%)",
                if outcome.failed_chunks == 0 {
                    render::MARK_OK
                } else {
                    render::MARK_WARN
                },
                outcome.total_chunks,
                outcome.failed_chunks,
                outcome.fail_rate_percent
            );
            if *report {
                for chapter in &outcome.reports {
                    println!(
                        "  {}: {} pass / {} warn / {} fail",
                        chapter.chapter_id,
                        chapter.pass_count(),
                        chapter.warn_count(),
                        chapter.fail_count()
                    );
                }
            }
            Ok(())
        }

        Command::Process { project_id } => {
            let outcome = nodes::process::run(&store, project_id)?;
            println!(
                "{} Processed {}/{} chapter(s)",
                render::MARK_OK,
                outcome.processed,
                outcome.total_files
            );
            for error in &outcome.errors {
                println!("  {} {}", render::MARK_FAIL, error);
            }
            Ok(())
        }

        Command::Compose {
            project_id,
            mood,
            duration,
            seed,
        } => {
            let outcome = nodes::compose::run(&store, project_id, mood, *duration, *seed, false)?;
            println!(
                "{} Rendered {} bed ({:.0}s) -> {}",
                render::MARK_OK,
                outcome.mood,
                outcome.duration_sec,
                outcome.output.display()
            );
            Ok(())
        }

        Command::Mix { project_id, music } => {
            let outcome = nodes::mix::run(&store, project_id, music.as_deref())?;
            println!(
                "{} Mixed {}/{} chapter(s){}",
                render::MARK_OK,
                outcome.mixed,
                outcome.total_chapters,
                outcome
                    .bed
                    .as_ref()
                    .map(|b| format!(" with bed {}", b.display()))
                    .unwrap_or_else(|| " (voice only)".to_string())
            );
            Ok(())
        }

        Command::QcFinal { project_id } => {
            let report = nodes::qc_final::run(&store, project_id)?;
            render::print_final_qc(&report);
            if report.passed() {
                Ok(())
            } else {
                anyhow::bail!("final QC failed on {} file(s)", report.failed_files)
            }
        }

        Command::Export { project_id } => {
            guard_gate(&store, project_id, Node::Export)?;
            let outcome = nodes::export::run(&store, project_id)?;
            println!(
                "{} Exported {} artifact(s), {} failed",
                render::MARK_OK,
                outcome.exported,
                outcome.failed
            );
            if let Some(manifest) = &outcome.manifest_path {
                println!("  manifest: {}", manifest.display());
            }
            Ok(())
        }

        Command::Run {
            project_id,
            from,
            engine,
            music,
        } => {
            let options = RunOptions {
                engine_override: engine.clone(),
                bed_file: music.clone(),
                registry: None,
                cancel: CancelHandle::new(),
            };
            let report = run_from(&store, project_id, from.as_deref(), options)?;
            for (node, status) in &report.executed {
                println!("  {} {}", render::status_mark(*status), node);
            }
            println!("{} Pipeline run finished", render::MARK_OK);
            Ok(())
        }

        Command::Engines { command } => {
            // Engine inspection works without a project; credentials
            // resolve from the environment.
            let registry = EngineRegistry::with_defaults(&cli.root, 0);
            match command {
                EnginesCommand::List => {
                    for name in registry.list_available() {
                        let caps = registry.capabilities(&name)?;
                        println!(
                            "{:8} cloning={} ssml={} gpu={}",
                            caps.name, caps.supports_cloning, caps.supports_ssml, caps.requires_gpu
                        );
                    }
                    Ok(())
                }
                EnginesCommand::Test { engine } => {
                    let instance = registry.get(engine)?;
                    if instance.test_connection() {
                        println!("{} {} is ready", render::MARK_OK, engine);
                        Ok(())
                    } else {
                        anyhow::bail!("engine '{}' is not ready (missing credentials or binary?)", engine)
                    }
                }
                EnginesCommand::Voices { engine, lang } => {
                    let instance = registry.get(engine)?;
                    let voices = instance
                        .list_voices(lang.as_deref())
                        .map_err(|e| anyhow::anyhow!("{}", e))?;
                    for voice in voices {
                        println!("{:32} {:8} {}", voice.id, voice.locale, voice.name);
                    }
                    Ok(())
                }
            }
        }

        Command::Quick {
            text,
            engine,
            voice,
            output,
        } => {
            let registry = EngineRegistry::with_defaults(&cli.root, 0);
            let instance = registry.get(engine)?;
            let request = GenerationRequest {
                text: text.clone(),
                output_path: output.clone(),
                voice: Some(voice.clone()),
                language: String::new(),
                reference_audio: None,
                direction: None,
                params: Default::default(),
            };
            let result = instance.generate(&request);
            if result.success {
                println!(
                    "{} Wrote {} ({:.1}s @ {} Hz)",
                    render::MARK_OK,
                    output.display(),
                    result.duration_sec,
                    result.sample_rate
                );
                Ok(())
            } else {
                anyhow::bail!(
                    "synthesis failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".to_string())
                )
            }
        }
    }
}

/// Fail fast (exit code 2) when a hard gate blocks the requested node.
fn guard_gate(store: &ProjectStore, project_id: &str, node: Node) -> Result<()> {
    let tracker = Tracker::new(store, project_id);
    let (ok, gate) = tracker.can_proceed_to(node)?;
    if !ok {
        return Err(RunnerError::GateBlocked { node, gate }.into());
    }
    Ok(())
}

fn default_registry(store: &ProjectStore, project_id: &str) -> Result<EngineRegistry> {
    let path = store.resolve(project_id)?;
    let config = store.load_config(project_id)?;
    Ok(EngineRegistry::with_defaults(
        &path,
        config.generation.edge_tts_rate_limit_ms,
    ))
}
