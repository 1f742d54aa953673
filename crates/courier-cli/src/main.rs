mod tasks;
mod tracing_setup;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use courier_core::app::{BuildError, QueueBuilder, ReaperLoop, WorkerGroup};
use courier_core::config::{ConfigError, QueueConfig};
use courier_core::domain::{JobId, QueueError, StoreError};
use courier_core::impls::{InMemoryStore, StoreQueue};
#[cfg(feature = "redis")]
use courier_core::impls::RedisStore;
use courier_core::ports::{QueueBackend, Store};
use courier_core::typed::{RegistryError, Task, TypedJob};
use tracing::{error, info, warn};

use crate::tasks::{ChargeCard, WelcomeEmail};

const REAPER_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "courier", version, about = "Store-backed job queue")]
struct Cli {
    /// JSON or TOML config file; COURIER_* variables still win
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Redis URL; without it an in-memory store is used (overrides COURIER_REDIS_URL)
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// Queue name (defaults to COURIER_DEFAULT_QUEUE)
    #[arg(long, global = true)]
    queue: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Push sample jobs and run workers until the queue is idle
    Demo {
        #[arg(long, default_value_t = 10)]
        jobs: usize,
        #[arg(long, default_value_t = 2)]
        workers: usize,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Run workers until Ctrl-C
    Work {
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Extra queues, popped after --queue in the given order
        #[arg(long, value_delimiter = ',')]
        also: Vec<String>,
    },
    /// Print ready/delayed/reserved/dead counts as JSON
    Stats,
    /// List dead-lettered jobs as JSON
    Failed {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Push a dead-lettered job again with its attempts reset
    Retry { id: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("output: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match QueueConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("courier: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(url) = cli.redis_url.clone() {
        config.redis_url = Some(url);
    }
    if let Some(queue) = cli.queue.clone() {
        config.default_queue = queue;
    }
    tracing_setup::install(&config.logging);

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "courier failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: QueueConfig) -> Result<(), CliError> {
    match config.redis_url.clone() {
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = RedisStore::connect(&url).await?;
            dispatch(command, store, config).await
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            warn!("built without the `redis` feature, falling back to the in-memory store");
            dispatch(command, InMemoryStore::new(), config).await
        }
        None => dispatch(command, InMemoryStore::new(), config).await,
    }
}

fn build_queue<S: Store>(store: S, config: QueueConfig) -> Result<StoreQueue<S>, CliError> {
    let queue = QueueBuilder::new()
        .register_task::<WelcomeEmail>()?
        .register_task::<ChargeCard>()?
        .expect_types(&[WelcomeEmail::TYPE, ChargeCard::TYPE])
        .config(config)
        .build(store)?;
    Ok(queue)
}

async fn dispatch<S: Store + 'static>(command: Command, store: S, config: QueueConfig) -> Result<(), CliError> {
    let queue = Arc::new(build_queue(store, config)?);
    let name = queue.config().default_queue.clone();

    match command {
        Command::Demo {
            jobs,
            workers,
            timeout_secs,
        } => demo(queue, name, jobs, workers, Duration::from_secs(timeout_secs)).await,
        Command::Work { workers, also } => {
            let mut queues = vec![name];
            queues.extend(also);
            work(queue, queues, workers).await
        }
        Command::Stats => print_json(&queue.counts(&name).await?),
        Command::Failed { offset, limit } => print_json(&queue.failed_jobs(offset, limit).await?),
        Command::Retry { id } => {
            let id = JobId::new(id);
            if queue.retry_failed(&id).await? {
                info!(job_id = %id, "job pushed again");
            } else {
                warn!(job_id = %id, "no dead-lettered job with that id");
            }
            Ok(())
        }
    }
}

async fn demo<S: Store + 'static>(
    queue: Arc<StoreQueue<S>>,
    name: String,
    jobs: usize,
    workers: usize,
    timeout: Duration,
) -> Result<(), CliError> {
    for i in 0..jobs {
        let mut job = TypedJob::new(WelcomeEmail {
            to: format!("user{i}@example.com"),
        });
        queue.push(&mut job, &name).await?;
    }
    let mut declined = TypedJob::new(ChargeCard {
        order_id: 42,
        decline: true,
    });
    queue.later(Duration::from_millis(500), &mut declined, &name).await?;
    info!(jobs = jobs + 1, queue = %name, "demo jobs enqueued");

    let queues = vec![name.clone()];
    let group = WorkerGroup::spawn(
        workers,
        queue.clone(),
        queues.clone(),
        queue.config().retry_policy(),
    );
    let (stop_reaper, reaper) = ReaperLoop::new(queue.clone(), queues, REAPER_INTERVAL).spawn();

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!("demo timed out before the queue went idle");
                break;
            }
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                if queue.counts(&name).await?.is_idle() {
                    break;
                }
            }
        }
    }

    let stats = group.shutdown_and_join().await;
    let _ = stop_reaper.send(true);
    if let Err(e) = reaper.await {
        error!(error = %e, "reaper task panicked");
    }

    print_json(&serde_json::json!({
        "workers": stats,
        "counts": queue.counts(&name).await?,
        "dead_letters": queue.failed_jobs(0, 10).await?,
    }))
}

async fn work<S: Store + 'static>(
    queue: Arc<StoreQueue<S>>,
    queues: Vec<String>,
    workers: usize,
) -> Result<(), CliError> {
    let group = WorkerGroup::spawn(
        workers,
        queue.clone(),
        queues.clone(),
        queue.config().retry_policy(),
    );
    let (stop_reaper, reaper) = ReaperLoop::new(queue, queues, REAPER_INTERVAL).spawn();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for Ctrl-C, stopping");
    }
    info!("shutting down");

    let stats = group.shutdown_and_join().await;
    let _ = stop_reaper.send(true);
    if let Err(e) = reaper.await {
        error!(error = %e, "reaper task panicked");
    }
    print_json(&stats)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
