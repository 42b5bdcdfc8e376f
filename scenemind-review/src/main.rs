use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use scenemind_core::config::{LlmConfig, SceneMindConfig};
use scenemind_core::session::NarrativeSession;
use scenemind_core::types::SessionId;
use scenemind_core::{parse_fountain, SessionStore};
use scenemind_llm::{LlmClient, LlmProvider, ReviewTemplates};
use scenemind_review::engine::DocumentReport;
use scenemind_review::telemetry::init_tracing;
use scenemind_review::{PersonaSet, ReviewEngine};

#[derive(Parser)]
#[command(name = "scenemind", version, about = "Scene-by-scene screenplay review with reviewers that remember")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Review a Fountain screenplay with a panel of personas
    Review {
        /// Screenplay in Fountain format
        script: PathBuf,
        /// Engine configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Persona set (TOML); the bundled panel when omitted
        #[arg(long)]
        personas: Option<PathBuf>,
        /// Prompt template override (TOML)
        #[arg(long)]
        templates: Option<PathBuf>,
        /// SQLite database to save the session into
        #[arg(long)]
        db: Option<PathBuf>,
        /// Resume a saved session by id (requires --db)
        #[arg(long, requires = "db")]
        resume: Option<String>,
        /// Print the final report as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// List the personas in a persona set
    Personas {
        /// Persona set (TOML); the bundled panel when omitted
        #[arg(long)]
        personas: Option<PathBuf>,
    },
    /// List sessions saved in a database
    Sessions {
        /// SQLite database
        #[arg(long)]
        db: PathBuf,
        /// Config for persistence settings
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Review { script, config, personas, templates, db, resume, json } => {
            let config = load_config(config.as_deref())?;
            init_tracing(&config.telemetry, &config.general.log_level)?;
            let report = review(&script, config.clone(), personas.as_deref(), templates.as_deref(), db.as_deref(), resume.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            if config.telemetry.metrics_enabled {
                print!("{}", report.counters.to_prometheus());
            }
        }
        Command::Personas { personas } => {
            let set = load_personas(personas.as_deref())?;
            for p in set.iter() {
                println!("{:<18} {:<10} {:<28} {}", p.id, p.name, p.reviewer_type, p.description);
            }
        }
        Command::Sessions { db, config } => {
            let config = load_config(config.as_deref())?;
            let store = SessionStore::open(&db, &config.persistence)?;
            for id in store.list_sessions()? {
                println!("{id}");
            }
        }
    }

    Ok(())
}

async fn review(
    script: &Path,
    config: SceneMindConfig,
    personas: Option<&Path>,
    templates: Option<&Path>,
    db: Option<&Path>,
    resume: Option<&str>,
) -> Result<DocumentReport> {
    let text = std::fs::read_to_string(script).with_context(|| format!("failed to read {}", script.display()))?;
    let screenplay = parse_fountain(&text);
    if screenplay.scenes.is_empty() {
        bail!("{} contains no scenes", script.display());
    }

    let set = load_personas(personas)?;
    let panel = set.select(&config.reviewers)?;
    let store = db.map(|path| SessionStore::open(path, &config.persistence)).transpose()?;

    let session = match (resume, &store) {
        (Some(id), Some(store)) => {
            let id = SessionId(uuid::Uuid::parse_str(id).with_context(|| format!("invalid session id {id}"))?);
            let snapshot = store.load_session(&id)?.with_context(|| format!("session {id} not found"))?;
            NarrativeSession::from_snapshot(config.clone(), snapshot)?
        }
        _ => NarrativeSession::new(config.clone())?,
    };

    let mut engine = ReviewEngine::new(session, panel, client_for(&config.llm)?)?;
    for (name, provider) in &config.providers {
        engine = engine.with_named_provider(name.clone(), client_for(provider)?);
    }
    if let Some(path) = templates {
        engine = engine.with_templates(ReviewTemplates::from_file(path)?);
    }
    if let Some(store) = store {
        engine = engine.with_store(store);
    }
    let title = script.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    engine = engine.with_title(title);

    info!(session = %engine.session().id(), scenes = screenplay.scenes.len(), "Starting review");
    Ok(engine.review_document(&screenplay).await?)
}

fn load_config(path: Option<&Path>) -> Result<SceneMindConfig> {
    match path {
        Some(path) => SceneMindConfig::from_file(path).with_context(|| format!("failed to load {}", path.display())),
        None => Ok(SceneMindConfig::default()),
    }
}

fn load_personas(path: Option<&Path>) -> Result<PersonaSet> {
    Ok(match path {
        Some(path) => PersonaSet::from_file(path)?,
        None => PersonaSet::bundled()?,
    })
}

fn client_for(llm: &LlmConfig) -> Result<LlmClient> {
    let api_key = llm.api_key_env.as_deref().and_then(|var| std::env::var(var).ok());
    let provider = LlmProvider::from_name(&llm.provider, &llm.base_url, api_key)?;
    Ok(LlmClient::new(provider, llm.model.clone(), llm.max_retries))
}

fn print_report(report: &DocumentReport) {
    println!("{} ({} scenes, session {})", report.title, report.scenes_reviewed, report.session_id);
    println!();
    for r in &report.reviewers {
        println!("{} [{}]", r.name, r.reviewer_type);
        println!("  engagement {:.2}  enjoyment {:+.2}  ({} scenes read)", r.overall_engagement, r.overall_enjoyment, r.scenes_reviewed);
        if !r.favourite_scenes.is_empty() {
            println!("  loved scenes: {:?}", r.favourite_scenes);
        }
        if !r.disliked_scenes.is_empty() {
            println!("  disliked scenes: {:?}", r.disliked_scenes);
        }
        if !r.scenes_failed.is_empty() {
            println!("  no reading for: {:?}", r.scenes_failed);
        }
        for (character, opinion) in &r.character_opinions {
            println!("  {character}: {opinion}");
        }
        if let Some(reaction) = &r.last_reaction {
            println!("  last word: \"{reaction}\"");
        }
        println!();
    }
    if !report.open_questions.is_empty() {
        println!("Still wondering:");
        for q in &report.open_questions {
            println!("  [{}] {}", q.question_id, q.text);
        }
        println!();
    }
    let latency = report.latency;
    println!(
        "reviews: {} requested, {} failed, {} rejected | latency p50 {:.0}ms p99 {:.0}ms",
        report.counters.reviews_requested,
        report.counters.reviews_failed,
        report.counters.reviews_rejected,
        latency.p50,
        latency.p99
    );
}
