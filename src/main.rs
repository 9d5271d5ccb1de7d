use chrono::{TimeZone, Utc};
use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;
use vibe_runner::domain::{OutcomeKind, TriggerEvent};
use vibe_runner::llm::{AnthropicClient, CompletionResponse, LlmClient, MockLlmClient, ToolCall};
use vibe_runner::persist::{JsonlOutcomeStore, OutcomeStore};
use vibe_runner::runner::{RunReport, Worker};
use vibe_runner::sandbox::{LocalSandboxProvider, MemorySandboxProvider, SandboxProvider};
use vibe_runner::steps::{JsonlStepJournal, StepJournal};

fn setup_logging(config: &Config) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(env!("CARGO_PKG_NAME"))
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join(format!("{}.log", env!("CARGO_PKG_NAME")));

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run {
            task,
            dry_run,
            max_iterations,
        } => handle_run_command(task, *dry_run, *max_iterations, cli.is_verbose(), config).await,
        Commands::Resume { run_id } => handle_resume_command(run_id, cli.is_verbose(), config).await,
        Commands::Steps { run_id } => handle_steps_command(run_id, cli.is_verbose(), config),
        Commands::Outcomes { run_id } => handle_outcomes_command(run_id.as_deref(), config),
    }
}

fn build_worker(config: &Config, dry_run: bool, task: Option<&str>) -> Result<Worker> {
    let journal: Arc<dyn StepJournal> =
        Arc::new(JsonlStepJournal::new(config.storage.steps_dir()).context("Failed to open step journal")?);
    let store: Arc<dyn OutcomeStore> =
        Arc::new(JsonlOutcomeStore::new(config.storage.outcomes_dir()).context("Failed to open outcome store")?);

    let llm: Arc<dyn LlmClient>;
    let sandbox: Arc<dyn SandboxProvider>;
    if dry_run {
        llm = Arc::new(dry_run_model(task.unwrap_or_default()));
        sandbox = Arc::new(MemorySandboxProvider::new());
    } else {
        llm = Arc::new(AnthropicClient::new(config.anthropic()).context("Failed to create model client")?);
        sandbox = Arc::new(LocalSandboxProvider::new(config.local_sandbox()));
    }

    Ok(Worker::new(llm, sandbox, journal, store, config.worker()))
}

/// Scripted model for dry runs: write a page, then report completion
fn dry_run_model(task: &str) -> MockLlmClient {
    let page = format!(
        "export default function Page() {{\n  return <main>{}</main>;\n}}\n",
        task.replace('<', "&lt;").replace('>', "&gt;")
    );
    MockLlmClient::new(vec![
        CompletionResponse::tool_use(vec![ToolCall::new(
            "dry_run_write",
            "write_files",
            serde_json::json!({"files": [{"path": "app/page.tsx", "content": page}]}),
        )]),
        CompletionResponse::text(format!(
            "<task_summary>\nDry run: wrote app/page.tsx for \"{}\".\n</task_summary>",
            task
        )),
    ])
}

/// Cancellation token raised on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling run, persisting outcome...".yellow());
            token.cancel();
        }
    });
    cancel
}

async fn handle_run_command(
    task: &str,
    dry_run: bool,
    max_iterations: Option<u32>,
    verbose: bool,
    config: &Config,
) -> Result<()> {
    info!("Running task: {} (dry run: {})", task, dry_run);
    let mut config = config.clone();
    if let Some(max) = max_iterations {
        config.run.max_iterations = max;
    }

    let worker = build_worker(&config, dry_run, Some(task))?;
    if dry_run {
        println!("{}", "Dry run: in-memory sandbox, scripted model".yellow());
    }
    println!("{} {}", "Task:".green(), task);

    let report = worker
        .run(TriggerEvent::new(task), &cancel_on_ctrl_c())
        .await
        .context("Run failed")?;
    print_report(&report, verbose)
}

async fn handle_resume_command(run_id: &str, verbose: bool, config: &Config) -> Result<()> {
    info!("Resuming run: {}", run_id);
    println!("{} {}", "Resuming:".green(), run_id);

    let worker = build_worker(config, false, None)?;
    let report = worker
        .resume(run_id, &cancel_on_ctrl_c())
        .await
        .context(format!("Failed to resume {}", run_id))?;
    print_report(&report, verbose)
}

fn print_report(report: &RunReport, verbose: bool) -> Result<()> {
    let kind = match report.kind {
        OutcomeKind::Result => "RESULT".green(),
        OutcomeKind::Error => "ERROR".red(),
    };
    println!("{} {} [{}]", "Run:".cyan(), report.run_id, kind);
    match report.stop_reason {
        Some(reason) => println!("  Stopped: {} after {} iteration(s)", reason, report.iterations),
        None => println!("  Stopped: {} after {} iteration(s)", "fatal error".red(), report.iterations),
    }
    if let Some(session) = &report.session_id {
        println!("  Sandbox: {}", session);
    }
    if !report.output.endpoint.is_empty() {
        println!("  Endpoint: {}", report.output.endpoint.bold());
    }
    println!("  Files: {}", report.output.files.len());
    if verbose {
        for path in report.output.files.keys() {
            println!("    {}", path);
        }
    }
    println!("  Summary: {}", report.output.summary);

    if let Err(e) = &report.delivery {
        println!("{} {}", "Outcome not persisted:".red(), e);
        return Err(eyre!("outcome of {} was not persisted: {}", report.run_id, e));
    }
    Ok(())
}

fn handle_steps_command(run_id: &str, verbose: bool, config: &Config) -> Result<()> {
    info!("Listing steps for run: {}", run_id);
    let journal = JsonlStepJournal::new(config.storage.steps_dir()).context("Failed to open step journal")?;
    let steps = journal.list(run_id).context("Failed to read step journal")?;

    if steps.is_empty() {
        println!("{} {}", "No steps recorded for".yellow(), run_id);
        return Ok(());
    }

    println!("{} {}", "Steps for:".green(), run_id);
    for step in steps {
        let at = Utc
            .timestamp_millis_opt(step.committed_at)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!("  {} {} (attempts: {})", at.dimmed(), step.name.cyan(), step.attempts);
        if verbose {
            println!("    {}", step.output);
        }
    }
    Ok(())
}

fn handle_outcomes_command(run_id: Option<&str>, config: &Config) -> Result<()> {
    info!("Listing outcomes (run: {:?})", run_id);
    let store = JsonlOutcomeStore::new(config.storage.outcomes_dir()).context("Failed to open outcome store")?;

    let records: Vec<_> = match run_id {
        Some(id) => store.find_by_run(id)?.into_iter().collect(),
        None => store.list()?,
    };

    if records.is_empty() {
        println!("{}", "No outcomes recorded".yellow());
        return Ok(());
    }

    for record in records {
        let kind = match record.kind {
            OutcomeKind::Result => "RESULT".green(),
            OutcomeKind::Error => "ERROR".red(),
        };
        println!(
            "{} {} [{}] {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            record.run_id,
            kind,
            record.content.lines().next().unwrap_or_default()
        );
        if let Some(fragment) = record.fragment {
            println!("    {} ({} file(s))", fragment.sandbox_url, fragment.files.len());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging
    setup_logging(&config).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
