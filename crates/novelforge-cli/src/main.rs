//! Command-line driver for the novelforge orchestrator. Grounded on the
//! teacher's `pagi-daemon` entry point: `dotenvy::dotenv()` first, then
//! `tracing_subscriber` with an `EnvFilter` driven by `RUST_LOG`, then
//! `#[tokio::main]`. Unlike the daemon this binary runs one operation and exits.

mod echo_adapter;

use clap::{Parser, Subcommand};
use novelforge_core::agents::registry::AgentRegistry;
use novelforge_core::agents::AgentRole;
use novelforge_core::storage::sled_store::SledStorageBackend;
use novelforge_core::{Orchestrator, OrchestratorConfig, OutlineEntry};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "novelforge", about = "Drive a multi-agent novel-generation project")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Project id to operate on.
    #[arg(long, global = true)]
    project: String,
}

#[derive(Subcommand)]
enum Command {
    /// Generate every chapter in the outline, then run detect-and-fix to convergence.
    Generate {
        /// Path to a JSON file containing the outline entries.
        #[arg(long)]
        outline: std::path::PathBuf,
    },
    /// Draft a structural outline via the Global Architect (up to 5 regenerations
    /// plus a protagonist-injection fallback), writing it to a JSON file `generate` can consume.
    PlanOutline {
        /// Canonical protagonist name, checked for 40% presence across chapters.
        #[arg(long)]
        protagonist: String,
        /// Where to write the resulting outline JSON.
        #[arg(long)]
        out: std::path::PathBuf,
    },
    /// Run only the detect-and-fix / final review cycle over the existing manuscript.
    FinalReview,
    /// Regenerate any chapter currently flagged as truncated or garbled.
    RegenerateTruncated,
    /// Run the continuity sentinel over the manuscript and print its findings.
    ContinuitySentinel,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[novelforge-cli] .env not loaded: {e} (using system environment)");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = OrchestratorConfig::from_env();

    let storage = Arc::new(SledStorageBackend::open(&config.storage_path)?);
    let agents = Arc::new(build_registry());
    let orchestrator = Orchestrator::new(storage, agents, config);

    match cli.command {
        Command::Generate { outline } => {
            let raw = std::fs::read_to_string(&outline)?;
            let entries: Vec<OutlineEntry> = serde_json::from_str(&raw)?;
            orchestrator.generate_novel(&cli.project, entries).await?;
        }
        Command::PlanOutline { protagonist, out } => {
            let outline = orchestrator.plan_outline(&cli.project, &protagonist).await?;
            std::fs::write(&out, serde_json::to_string_pretty(&outline)?)?;
        }
        Command::FinalReview => {
            orchestrator.run_final_review_only(&cli.project).await?;
        }
        Command::RegenerateTruncated => {
            orchestrator.regenerate_truncated(&cli.project).await?;
        }
        Command::ContinuitySentinel => {
            let findings = orchestrator.run_continuity_sentinel(&cli.project).await?;
            for finding in findings {
                println!("{finding}");
            }
        }
    }

    Ok(())
}

/// Wires every [`AgentRole`] to the echo adapter. A real deployment swaps
/// this for adapters backed by an actual LLM client; the orchestrator only
/// depends on the [`novelforge_core::agents::AgentAdapter`] trait.
fn build_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for role in [
        AgentRole::GlobalArchitect,
        AgentRole::ChapterArchitect,
        AgentRole::Ghostwriter,
        AgentRole::SmartEditor,
        AgentRole::Summarizer,
        AgentRole::NarrativeDirector,
        AgentRole::Inquisidor,
        AgentRole::Estilista,
        AgentRole::Ritmo,
        AgentRole::Ensamblador,
        AgentRole::FinalReviewer,
        AgentRole::BetaReader,
        AgentRole::QaAuditor,
        AgentRole::SeriesThreadFixer,
        AgentRole::InjuryExtractor,
    ] {
        registry.register(Arc::new(echo_adapter::EchoAdapter::new(role)));
    }
    registry
}
