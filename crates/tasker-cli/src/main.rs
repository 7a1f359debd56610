use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use tasker_core::Config;
use tasker_core::broker::{Broker, SqliteBroker};
use tasker_core::cron::{JobRegistry, JobRunner, SqliteContextFactory};
use tasker_core::dispatcher::Dispatcher;
use tasker_core::impls::{LogNotificationSender, SqliteTodoStore};
use tasker_core::ports::{TodoStore, UserDirectory};
use tasker_core::tasks::email_registry;
use tasker_core::telemetry;

#[derive(Parser)]
#[command(name = "tasker", about = "Tasker cron job runner and task worker")]
struct Cli {
    /// TOML config file. Environment variables (TASKER_*) override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available cron jobs
    List,
    /// Process queued tasks until Ctrl-C
    Worker,
    /// Run one cron job by name, e.g. `tasker auto-archive`
    #[command(external_subcommand)]
    Job(Vec<String>),
}

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "tasker failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let registry = JobRegistry::with_builtin_jobs();
    match cli.command {
        Command::List => {
            print!("{}", registry.help());
            Ok(())
        }
        Command::Worker => run_worker(cli.config.as_deref()).await,
        Command::Job(args) => {
            let [name] = args.as_slice() else {
                bail!("expected exactly one job name, got {args:?}");
            };
            run_job(&registry, name, cli.config.as_deref()).await
        }
    }
}

async fn run_job(registry: &JobRegistry, name: &str, config: Option<&Path>) -> Result<()> {
    let job = match registry.get(name) {
        Ok(job) => job,
        Err(e) => {
            eprint!("{}", registry.help());
            return Err(e.into());
        }
    };
    let config = Config::load(config).context("failed to load config")?;

    let runner = JobRunner::new(Arc::new(SqliteContextFactory::new(config)));
    let summary = runner
        .run(job.as_ref())
        .await
        .with_context(|| format!("job '{name}' failed"))?;

    println!(
        "{name}: scanned={} succeeded={} failed={}",
        summary.scanned, summary.succeeded, summary.failed
    );
    Ok(())
}

async fn run_worker(config: Option<&Path>) -> Result<()> {
    let config = Config::load(config).context("failed to load config")?;

    let store = Arc::new(
        SqliteTodoStore::open(&config.database.path)
            .with_context(|| format!("failed to open {}", config.database.path.display()))?,
    );
    let broker: Arc<dyn Broker> = Arc::new(
        SqliteBroker::open(&config.broker.path)
            .with_context(|| format!("failed to open {}", config.broker.path.display()))?,
    );

    let registry = email_registry(
        Arc::clone(&store) as Arc<dyn UserDirectory>,
        Arc::new(LogNotificationSender),
    )
    .context("failed to build task registry")?;
    let dispatcher = Dispatcher::new(broker, Arc::new(registry), config.dispatcher_config()?)?;
    let workers = dispatcher.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    workers.shutdown_and_join().await?;
    store.close().await?;
    tracing::info!("worker stopped");
    Ok(())
}
