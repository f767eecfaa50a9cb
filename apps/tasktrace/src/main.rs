mod confirm;
mod display;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tasktrace_events::EventListener;
use tasktrace_kernel::{ReplayReport, TaskKernelBuilder};
use tasktrace_runtime::{AutoApprove, Confirmer, ReplayStatus};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::confirm::LineConfirmer;
use crate::display::ConsoleDisplay;

#[derive(Debug, Parser)]
#[command(name = "tasktrace")]
#[command(about = "Replay and inspect recorded task traces")]
struct Cli {
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Re-emit a recorded task on the console with its original pacing.
    Replay {
        path: PathBuf,
        /// Playback multiplier; 0 replays without waiting.
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
        /// Do not ask before each round.
        #[arg(long, short)]
        yes: bool,
    },
    /// Validate a snapshot and load it for resumption.
    Resume { path: PathBuf },
    /// Show the summary of one snapshot.
    Summary {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List task snapshots found under a directory, newest first.
    List {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let kernel = TaskKernelBuilder::new().build();

    match cli.command {
        Command::Replay { path, speed, yes } => {
            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

            let confirmer: Box<dyn Confirmer> = if yes || !std::io::stdin().is_terminal() {
                Box::new(AutoApprove)
            } else {
                Box::new(LineConfirmer::stdin())
            };
            let display: Arc<dyn EventListener> = Arc::new(ConsoleDisplay::stdout());
            let report = kernel
                .replay(&path, speed, vec![display], confirmer.as_ref(), &cancel)
                .await?;
            print_report(&report);
        }
        Command::Resume { path } => {
            let state = kernel.resume(&path).await?;
            let timeline = state.timeline();
            println!(
                "task {} ready to resume ({} events): {}",
                state.task_id(),
                timeline.len(),
                state.summary().instruction
            );
        }
        Command::Summary { path, json } => {
            let summary = kernel.summary(&path).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let record = summary.record();
                println!("task:        {}", summary.task_id);
                println!("version:     {}", summary.version);
                println!("instruction: {}", summary.instruction);
                println!("started:     {}", record.start_time);
                println!("finished:    {}", record.done_time);
            }
        }
        Command::List { dir } => {
            let tasks = kernel.list(&dir).await?;
            if tasks.is_empty() {
                println!("no tasks found in {}", dir.display());
            }
            for task in tasks {
                let row = task.summary.record();
                println!(
                    "{:<32}  {:>8}  {:>8}  {}",
                    row.task_id.as_str(),
                    row.start_time,
                    row.done_time,
                    row.instruction
                );
            }
        }
    }

    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to install Ctrl+C handler");
        return;
    }
    info!("interrupt received, cancelling replay");
    cancel.cancel();
}

fn print_report(report: &ReplayReport) {
    let outcome = &report.outcome;
    match outcome.status {
        ReplayStatus::Completed => println!(
            "replayed task {}: {} of {} events",
            report.task_id, outcome.events_published, report.total_events
        ),
        ReplayStatus::Cancelled => println!(
            "replay of task {} cancelled after {} of {} events",
            report.task_id, outcome.events_published, report.total_events
        ),
        ReplayStatus::AbortedByUser => println!(
            "replay of task {} stopped at round checkpoint after {} of {} events",
            report.task_id, outcome.events_published, report.total_events
        ),
    }
    if report.raw_records > 0 {
        println!("{} record(s) could not be decoded", report.raw_records);
    }
}
