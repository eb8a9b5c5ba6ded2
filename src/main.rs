//! # Tasker CLI
//!
//! Runs email, calendar, social, clean and backup tasks immediately, at a
//! given time, or once a condition holds. Scheduled and conditional work is
//! persisted and recovered on the next start.
//!
//! Usage:
//!   tasker templates                                  # List built-in templates
//!   tasker records                                    # Show persisted records
//!   tasker run --template emailBase                   # Run a template now
//!   tasker run --type social --name hello --payload '{"message":"hi"}' --at 2030-01-01T09:00:00Z
//!   tasker run --template cleanBasic --when night     # Run once it is night
//!   tasker serve                                      # Recover, then stream results until Ctrl-C

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tasker_core::config::StoreBackend;
use tasker_core::{Condition, ExecutionStrategyConfig, TaskPayload, TaskType, TaskerConfig};
use tasker_scheduler::{JsonFileStore, RecordStore, SqliteStore, TaskRequestBuilder, TaskRunner};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tasker",
    version,
    about = "⏱️ Tasker: immediate, scheduled and conditional task runner"
)]
struct Cli {
    /// Config file (default: ~/.tasker/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered templates
    Templates,
    /// Show persisted task records
    Records,
    /// Run one task and wait for its outcome
    Run(RunArgs),
    /// Recover persisted work and print results until Ctrl-C
    Serve,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Template key (e.g. emailBase)
    #[arg(long, conflicts_with = "task_type")]
    template: Option<String>,

    /// Task type: email, calendar, social, clean, backup
    #[arg(long = "type")]
    task_type: Option<String>,

    /// Task name
    #[arg(long)]
    name: Option<String>,

    /// Payload as a JSON object
    #[arg(long)]
    payload: Option<String>,

    /// Run at this ISO-8601 time
    #[arg(long, conflicts_with = "when")]
    at: Option<String>,

    /// Run once this condition holds: day, night or a registered key
    #[arg(long)]
    when: Option<String>,

    /// Milliseconds between condition checks
    #[arg(long, requires = "when")]
    interval_ms: Option<u64>,

    /// Condition checks before giving up
    #[arg(long, requires = "when")]
    max_attempts: Option<u32>,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn load_config(path: Option<&str>) -> Result<TaskerConfig> {
    let mut config = match path {
        Some(p) => TaskerConfig::load_from(&PathBuf::from(expand_path(p)))?,
        None => TaskerConfig::load()?,
    };
    config.store.path = expand_path(&config.store.path);
    config.tasks.backup_destination = expand_path(&config.tasks.backup_destination);
    Ok(config)
}

fn open_store(config: &TaskerConfig) -> Result<Arc<dyn RecordStore>> {
    let path = PathBuf::from(&config.store.path);
    let store: Arc<dyn RecordStore> = match config.store.backend {
        StoreBackend::Json => Arc::new(JsonFileStore::new(&path)),
        StoreBackend::Sqlite => Arc::new(
            SqliteStore::open(&path)
                .with_context(|| format!("opening {}", path.display()))?,
        ),
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "tasker=debug,tasker_scheduler=debug"
    } else {
        "tasker=info,tasker_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_deref())?;
    let store = open_store(&config)?;

    match cli.command {
        Command::Templates => {
            let runner = TaskRunner::new(config);
            println!("📋 Templates:");
            for t in runner.list_templates() {
                println!("   {:<16} {:<10} {}", t.key, t.task_type.as_str(), t.name);
            }
        }
        Command::Records => {
            let records = store.get_all()?;
            if records.is_empty() {
                println!("📭 No persisted records");
            }
            for r in records {
                println!(
                    "   {}  {:<9} {:<10} {}{}",
                    r.id,
                    r.result.status.as_str(),
                    r.task_type.as_str(),
                    r.name,
                    r.result
                        .scheduled_for
                        .map(|at| format!(" @ {at}"))
                        .unwrap_or_default()
                );
            }
        }
        Command::Run(args) => run_once(config, store, args).await?,
        Command::Serve => serve(config, store).await?,
    }
    Ok(())
}

fn build_request(args: &RunArgs) -> Result<tasker_core::TaskRequest> {
    let mut builder = match (&args.template, &args.task_type) {
        (Some(key), _) => TaskRequestBuilder::from_template(key),
        (None, Some(t)) => TaskRequestBuilder::from_builder().task_type(t.parse::<TaskType>()?),
        (None, None) => bail!("either --template or --type is required"),
    };
    if let Some(name) = &args.name {
        builder = builder.name(name);
    }
    if let Some(raw) = &args.payload {
        let payload: TaskPayload =
            serde_json::from_str(raw).context("--payload must be a JSON object")?;
        builder = builder.payload(payload);
    }
    if let Some(at) = &args.at {
        builder = builder.strategy(ExecutionStrategyConfig::Scheduled {
            target_date: at.clone(),
        });
    }
    if let Some(when) = &args.when {
        builder = builder.strategy(ExecutionStrategyConfig::Conditional {
            condition: Condition::from(when.as_str()),
            interval_ms: args.interval_ms,
            max_attempts: args.max_attempts,
        });
    }
    Ok(builder.build()?)
}

async fn run_once(config: TaskerConfig, store: Arc<dyn RecordStore>, args: RunArgs) -> Result<()> {
    let request = build_request(&args)?;
    let runner = TaskRunner::builder(config).store(store).build();
    let report = runner.recover().await?;
    if report.total() > 0 {
        println!("♻️  Recovered {} task(s)", report.total());
    }

    let mut results = runner.subscribe_results();
    let response = runner.run(request);
    let Some(task_id) = response.task_id.clone() else {
        bail!(
            "task rejected: {}",
            response.error.unwrap_or_else(|| "unknown error".into())
        );
    };
    println!(
        "🚀 {} ({}) started as {task_id}",
        response.task_name.unwrap_or_default(),
        response.strategy.map(|s| s.to_string()).unwrap_or_default()
    );

    loop {
        tokio::select! {
            received = results.recv() => {
                let notification = match received {
                    Ok(n) => n,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => bail!("result channel closed: {e}"),
                };
                if notification.task_id != task_id {
                    continue;
                }
                println!("{}", notification.render());
                if notification.result.status.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("🛑 Interrupted; pending work stays persisted");
                break;
            }
        }
    }
    runner.shutdown();
    Ok(())
}

async fn serve(config: TaskerConfig, store: Arc<dyn RecordStore>) -> Result<()> {
    let runner = TaskRunner::builder(config).store(store).build();
    let mut results = runner.subscribe_results();
    let report = runner.recover().await?;
    println!(
        "♻️  Recovery: {} executed, {} failed, {} scheduled, {} conditional ({} degraded), {} skipped",
        report.executed,
        report.failed,
        report.rearmed_scheduled,
        report.rearmed_conditional,
        report.degraded,
        report.skipped
    );
    println!("👂 Waiting for results (Ctrl-C to stop)");

    loop {
        tokio::select! {
            received = results.recv() => match received {
                Ok(n) => println!("{}", n.render()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("⚠️ Skipped {skipped} result(s)");
                }
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    let cancelled = runner.shutdown();
    println!("🛑 Stopped ({cancelled} conditional task(s) cancelled)");
    Ok(())
}
