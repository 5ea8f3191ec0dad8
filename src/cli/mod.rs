//! Command-line interface for careerflow.
//!
//! Provides commands for running an analysis, listing the workflow steps
//! and showing the resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{StubAdapter, TaskKind};
use crate::config::{self, ResolvedConfig};
use crate::core::{ChannelReporter, Engine, ProgressStatus, ProgressUpdate, StepRegistry};
use crate::domain::RunInput;
use crate::workflow::career_registry;

/// careerflow - Concurrent candidate-to-job analysis engine
#[derive(Parser, Debug)]
#[command(name = "careerflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an analysis
    Run(RunArgs),

    /// List the workflow steps
    Steps,

    /// Show resolved configuration (debug)
    Config,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Session ID
    #[arg(long, default_value = "cli")]
    pub session: String,

    /// Resume ID
    #[arg(long, default_value = "resume")]
    pub resume_id: String,

    /// Resume text file (parsing is skipped without one)
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Job to analyze, as `<id>` or `<id>=<description file>` (repeatable)
    #[arg(long = "job", required = true)]
    pub jobs: Vec<String>,

    /// Simulated latency of every stub task, in milliseconds
    #[arg(long, default_value = "0")]
    pub latency_ms: u64,

    /// Make a task kind fail (repeatable), e.g. `--fail market_insights`
    #[arg(long = "fail")]
    pub fail: Vec<String>,

    /// Write the run journal (JSONL) to this file
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Override the configured run timeout
    #[arg(long)]
    pub timeout_seconds: Option<u64>,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run(args) => run_analysis(args).await,
            Commands::Steps => show_steps(),
            Commands::Config => show_config(),
        }
    }
}

/// Build the run input from command-line arguments
fn build_input(args: &RunArgs) -> Result<RunInput> {
    let mut job_ids = Vec::with_capacity(args.jobs.len());
    let mut job_texts = Vec::new();

    for job in &args.jobs {
        match job.split_once('=') {
            Some((job_id, path)) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read job description: {}", path))?;
                job_ids.push(job_id.to_string());
                job_texts.push((job_id.to_string(), text));
            }
            None => job_ids.push(job.clone()),
        }
    }

    let mut input = RunInput::new(&args.session, &args.resume_id, job_ids);
    if let Some(ref path) = args.resume {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read resume: {}", path.display()))?;
        input = input.with_resume_text(text);
    }
    for (job_id, text) in job_texts {
        input = input.with_job_text(job_id, text);
    }

    Ok(input)
}

fn build_registry(config: &ResolvedConfig, latency: Duration, failing: &[TaskKind]) -> Result<StepRegistry> {
    let stub = StubAdapter::synthetic().with_latency(latency);
    let adapters = failing
        .iter()
        .fold(config.adapters(Arc::new(stub)), |adapters, &kind| {
            let failing = StubAdapter::failing(format!("{} disabled with --fail", kind));
            adapters.with(kind, Arc::new(failing.with_latency(latency)))
        });

    Ok(career_registry(&adapters, &config.workflow)?)
}

fn print_update(update: &ProgressUpdate) {
    let marker = match update.status {
        ProgressStatus::Pending => "..",
        ProgressStatus::Running => ">>",
        ProgressStatus::Completed => "ok",
        ProgressStatus::Failed => "!!",
    };
    eprintln!(
        "[{:>3}%] {} {:<26} {}",
        update.percent,
        marker,
        update.step,
        update.message.as_deref().unwrap_or("")
    );
}

/// Run an analysis with the given arguments
async fn run_analysis(args: RunArgs) -> Result<()> {
    let config = config::load_config()?;

    let failing = args
        .fail
        .iter()
        .map(|kind| kind.parse::<TaskKind>())
        .collect::<Result<Vec<_>>>()?;
    let registry = build_registry(&config, Duration::from_millis(args.latency_ms), &failing)?;

    let mut settings = config.engine;
    if let Some(seconds) = args.timeout_seconds {
        if seconds == 0 {
            anyhow::bail!("--timeout-seconds must be at least 1");
        }
        settings.run_timeout = Duration::from_secs(seconds);
    }

    let (reporter, mut updates) = ChannelReporter::channel(256);
    let engine = Engine::new(registry, settings)
        .with_limits(config.limits.clone())
        .with_reporter(Arc::new(reporter));

    let input = build_input(&args)?;
    let handle = engine.start(input)?;
    let run_id = handle.run_id();
    let journal = handle.journal();

    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            print_update(&update);
        }
    });

    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[Cancelling run {}]", run_id);
            token.cancel();
        }
    });

    let outcome = handle.await_result().await;

    // Closing the last sender lets the printer drain and stop
    drop(engine);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    if let Some(path) = args.journal {
        journal.write_jsonl(&path).await?;
        eprintln!("[Journal written to {}]", path.display());
    }

    match outcome {
        Ok(result) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("Failed to serialize result")?
            );
            if result.is_degraded() {
                eprintln!(
                    "\n[Run {} completed with fallbacks for: {}]",
                    run_id,
                    result.failed_tasks.join(", ")
                );
            } else {
                eprintln!("\n[Run {} completed successfully]", run_id);
            }
        }
        Err(e) => {
            eprintln!("\n[Run {} {}: {}]", run_id, describe(&e), e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn describe(error: &crate::core::RunError) -> &'static str {
    use crate::core::ErrorKind;

    match error.kind() {
        ErrorKind::CancellationRequested => "cancelled",
        ErrorKind::BarrierTimeout => "timed out",
        _ => "failed",
    }
}

/// List the workflow steps
fn show_steps() -> Result<()> {
    let config = config::load_config()?;
    let registry = build_registry(&config, Duration::ZERO, &[])?;

    println!("{:<26} {:>5}  {:<40} EMITS", "STEP", "MAX", "ACCEPTS");
    println!("{}", "-".repeat(100));

    for step in registry.steps() {
        let join = |tags: &[crate::domain::EventTag]| {
            tags.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
        };
        println!(
            "{:<26} {:>5}  {:<40} {}",
            step.name(),
            step.concurrency(),
            join(step.accepted_tags()),
            join(step.emitted_tags())
        );
    }

    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::load_config()?;

    println!("careerflow configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Engine:");
    println!("  Run timeout:  {}s", cfg.engine.run_timeout.as_secs());
    match cfg.engine.task_timeout {
        Some(timeout) => println!("  Task timeout: {}s", timeout.as_secs()),
        None => println!("  Task timeout: (disabled)"),
    }
    println!();
    println!("Limits:");
    println!("  Max jobs per run:   {}", cfg.limits.max_jobs_per_run);
    println!("  Max content length: {} chars", cfg.limits.max_content_length);
    println!();
    println!("Workers:");
    let workers = &cfg.workflow.workers;
    for (name, limit) in [
        ("start", workers.start),
        ("parse_resume", workers.parse_resume),
        ("analyze_jd", workers.analyze_jd),
        ("collect_parsing", workers.collect_parsing),
        ("match_skills", workers.match_skills),
        ("collect_matches", workers.collect_matches),
        ("generate_recommendations", workers.generate_recommendations),
        ("generate_interview_prep", workers.generate_interview_prep),
        ("generate_market_insights", workers.generate_market_insights),
        ("finalize", workers.finalize),
    ] {
        println!("  {:<26} {}", name, limit);
    }
    println!();
    println!("Default job title: {}", cfg.workflow.default_job_title);
    println!();
    println!("Task adapters:");
    for kind in TaskKind::ALL {
        match cfg.commands.get(&kind) {
            Some(spec) => println!("  {:<16} {} {}", kind, spec.program, spec.args.join(" ")),
            None => println!("  {:<16} (stub)", kind),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn args(jobs: &[&str]) -> RunArgs {
        RunArgs {
            session: "s1".into(),
            resume_id: "r1".into(),
            resume: None,
            jobs: jobs.iter().map(|j| j.to_string()).collect(),
            latency_ms: 0,
            fail: Vec::new(),
            journal: None,
            timeout_seconds: None,
        }
    }

    #[test]
    fn test_build_input_reads_job_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("jd.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Platform Engineer").unwrap();

        let spec = format!("j2={}", path.display());
        let input = build_input(&args(&["j1", &spec])).unwrap();

        assert_eq!(input.job_ids, vec!["j1", "j2"]);
        assert!(input.job_texts["j2"].starts_with("Platform Engineer"));
        assert!(!input.job_texts.contains_key("j1"));
        assert!(input.needs_parsing());
    }

    #[test]
    fn test_build_input_missing_file() {
        assert!(build_input(&args(&["j1=/no/such/file.txt"])).is_err());
    }

    #[test]
    fn test_cli_parses_run_command() {
        let cli = Cli::try_parse_from([
            "careerflow",
            "run",
            "--job",
            "j1",
            "--job",
            "j2",
            "--fail",
            "market_insights",
            "--latency-ms",
            "20",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.jobs, vec!["j1", "j2"]);
                assert_eq!(args.fail, vec!["market_insights"]);
                assert_eq!(args.latency_ms, 20);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
