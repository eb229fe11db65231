//! `rlm`: recursive language model runner CLI.
//!
//! Repo-scale commands drive event-sourced runs under a base directory;
//! `ask` runs the interactive engine over an inline or file-backed context.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;

use rlm_runner::core::types::{Domain, RunMode, SchedulerKind};
use rlm_runner::io::config::load_defaults;
use rlm_runner::io::store::RunStore;
use rlm_runner::synthesis::SynthesisTarget;
use rlm_runner::synthesis::export::ExportFormat;
use rlm_runner::tools::{RepoTools, RlmOptions, StartOptions, rlm};

#[derive(Parser)]
#[command(name = "rlm", version, about = "Recursive language model runner")]
struct Cli {
    /// Base directory holding run directories and config.toml.
    #[arg(long, default_value = ".rlm/runs", global = true)]
    base: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a run over the given scope paths.
    Start {
        objective: String,
        /// Scope paths (defaults to the current directory).
        paths: Vec<PathBuf>,
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        max_depth: Option<u32>,
        #[arg(long)]
        max_llm_calls: Option<i64>,
        #[arg(long)]
        max_tokens: Option<i64>,
        #[arg(long)]
        max_wall_clock_ms: Option<i64>,
        #[arg(long)]
        scheduler: Option<String>,
    },
    /// Process up to N queued nodes.
    Step {
        run_id: String,
        #[arg(long, default_value_t = 1)]
        max_nodes: u32,
    },
    /// Drive the run until terminal or idle.
    Run {
        run_id: String,
        #[arg(long, default_value_t = 200)]
        max_nodes: u32,
    },
    /// Print run status, depth histogram, and active branches.
    Status { run_id: String },
    /// Cancel a non-terminal run.
    Cancel { run_id: String },
    /// Resume a cancelled or failed run.
    Resume { run_id: String },
    /// Synthesize wiki/review artifacts.
    Synthesize {
        run_id: String,
        #[arg(long, default_value = "auto")]
        target: String,
    },
    /// Export the run as markdown or json.
    Export {
        run_id: String,
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// Ask the interactive engine a question over a context.
    Ask {
        query: String,
        /// Raw context text, or `file:` followed by an absolute path.
        #[arg(long)]
        context: String,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        max_llm_calls: Option<u32>,
        #[arg(long)]
        max_depth: Option<u32>,
    },
}

fn main() {
    rlm_runner::logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let tools = RepoTools::new(RunStore::new(&cli.base));

    match cli.command {
        Command::Start {
            objective,
            paths,
            mode,
            domain,
            max_depth,
            max_llm_calls,
            max_tokens,
            max_wall_clock_ms,
            scheduler,
        } => {
            let defaults = load_defaults(&cli.base.join("config.toml"))?;
            let options = StartOptions {
                mode: mode.as_deref().map(parse_mode).transpose()?,
                domain: domain.as_deref().map(parse_domain).transpose()?,
                max_depth: max_depth.or(Some(defaults.max_depth)),
                max_llm_calls: max_llm_calls.or(Some(defaults.max_llm_calls)),
                max_tokens: max_tokens.or(Some(defaults.max_tokens)),
                max_wall_clock_ms: max_wall_clock_ms.or(Some(defaults.max_wall_clock_ms)),
                scheduler: match scheduler.as_deref() {
                    Some(s) => Some(parse_scheduler(s)?),
                    None => Some(defaults.scheduler),
                },
            };
            let paths = if paths.is_empty() {
                vec![std::env::current_dir().context("resolve current directory")?]
            } else {
                paths
            };
            print_json(&tools.start(&objective, paths, &options)?)
        }
        Command::Step { run_id, max_nodes } => print_json(&tools.step(&run_id, Some(max_nodes))?),
        Command::Run { run_id, max_nodes } => print_json(&tools.run(&run_id, Some(max_nodes))?),
        Command::Status { run_id } => print_json(&tools.status(&run_id)?),
        Command::Cancel { run_id } => print_json(&tools.cancel(&run_id)?),
        Command::Resume { run_id } => print_json(&tools.resume(&run_id)?),
        Command::Synthesize { run_id, target } => {
            print_json(&tools.synthesize(&run_id, Some(parse_target(&target)?))?)
        }
        Command::Export { run_id, format } => {
            print_json(&tools.export(&run_id, parse_format(&format)?)?)
        }
        Command::Ask {
            query,
            context,
            max_iterations,
            max_llm_calls,
            max_depth,
        } => {
            let options = RlmOptions {
                max_iterations,
                max_llm_calls,
                max_depth,
            };
            let model = Arc::new(rlm_engine::HttpModelClient::from_env()?);
            let spawner = Arc::new(rlm_engine::PythonSpawner::default());
            let outcome = rlm(&query, &context, &options, model, spawner)?;
            println!("{}", outcome.answer);
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_mode(s: &str) -> Result<RunMode> {
    match s {
        "generic" => Ok(RunMode::Generic),
        "wiki" => Ok(RunMode::Wiki),
        "review" => Ok(RunMode::Review),
        other => Err(anyhow!("unknown mode '{other}' (generic|wiki|review)")),
    }
}

fn parse_domain(s: &str) -> Result<Domain> {
    match s {
        "security" => Ok(Domain::Security),
        "quality" => Ok(Domain::Quality),
        "performance" => Ok(Domain::Performance),
        "docs" => Ok(Domain::Docs),
        "architecture" => Ok(Domain::Architecture),
        other => Err(anyhow!(
            "unknown domain '{other}' (security|quality|performance|docs|architecture)"
        )),
    }
}

fn parse_scheduler(s: &str) -> Result<SchedulerKind> {
    match s {
        "bfs" => Ok(SchedulerKind::Bfs),
        "dfs" => Ok(SchedulerKind::Dfs),
        "hybrid" => Ok(SchedulerKind::Hybrid),
        other => Err(anyhow!("unknown scheduler '{other}' (bfs|dfs|hybrid)")),
    }
}

fn parse_target(s: &str) -> Result<SynthesisTarget> {
    match s {
        "auto" => Ok(SynthesisTarget::Auto),
        "wiki" => Ok(SynthesisTarget::Wiki),
        "review" => Ok(SynthesisTarget::Review),
        "all" => Ok(SynthesisTarget::All),
        other => Err(anyhow!("unknown target '{other}' (auto|wiki|review|all)")),
    }
}

fn parse_format(s: &str) -> Result<ExportFormat> {
    match s {
        "markdown" | "md" => Ok(ExportFormat::Markdown),
        "json" => Ok(ExportFormat::Json),
        other => Err(anyhow!("unknown format '{other}' (markdown|json)")),
    }
}
