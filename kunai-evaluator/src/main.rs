use kunai_evaluator::config::Config;
use kunai_evaluator::evaluator::{self, EvaluatorOptions};
use kunai_evaluator::exec::ExecutorOptions;
use kunai_evaluator::queue::{JobQueue, LocalQueue, LogProgress, ProgressSink};
use kunai_evaluator::queue::{RedisModule, RedisProgress, RedisQueue};
use kunai_evaluator::server::Server;
use kunai_evaluator::store::{FileStore, LocalFileStore};
use kunai_protocol::EvaluationConfig;
use kunai_utils::tracing::setup_tracing;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use structopt::StructOpt;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, StructOpt)]
#[structopt(name = "kunai-evaluator")]
struct Args {
    /// Root directory of the task and submission files
    #[structopt(long, parse(from_os_str))]
    file_store_root: PathBuf,

    #[structopt(long, default_value = "1", parse(try_from_str = parse_multiplier))]
    time_limit_multiplier: f64,

    #[structopt(long, default_value = "1", parse(try_from_str = parse_multiplier))]
    memory_limit_multiplier: f64,

    /// `local` or a redis url
    #[structopt(long, default_value = "local")]
    queue: String,

    #[structopt(long, default_value = "kunai-evaluator.toml", parse(from_os_str))]
    config: PathBuf,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Serves the redis queues until interrupted
    Serve,
    /// Evaluates one submission and prints the report
    Evaluate {
        #[structopt(parse(from_os_str))]
        config: PathBuf,
    },
}

fn parse_multiplier(s: &str) -> Result<f64> {
    let value: f64 = s.parse()?;
    if !value.is_finite() || value <= 0.0 {
        anyhow::bail!("multiplier must be above 0, found {}", value);
    }
    Ok(value)
}

/// `None` for the in-process queue.
fn parse_queue(queue: &str) -> Result<Option<String>> {
    match queue {
        "local" => Ok(None),
        url if url.starts_with("redis://") || url.starts_with("rediss://") => {
            Ok(Some(url.to_owned()))
        }
        _ => anyhow::bail!("unsupported queue: {:?}", queue),
    }
}

#[tracing::instrument(err)]
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        info!("{} not found, using the default config", path.display());
        return Ok(Config::default());
    }
    info!("loading config from {}", path.display());
    let config = Config::from_file(path)?;
    info!("config is loaded:\n{:#?}", config);
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    setup_tracing();

    let args = Args::from_args();
    let mut config = load_config(&args.config)?;

    let redis_url = parse_queue(&args.queue)?;
    let use_redis = redis_url.is_some();
    if let Some(url) = redis_url {
        config.redis.url = url;
    }

    let executor = Arc::new(ExecutorOptions::from_config(
        &config,
        args.time_limit_multiplier,
        args.memory_limit_multiplier,
    ));
    let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(&args.file_store_root));
    let options = EvaluatorOptions::default();

    match args.cmd {
        Command::Serve => {
            if !use_redis {
                anyhow::bail!("serve needs a redis queue, pass --queue redis://...");
            }
            let redis = Arc::new(RedisModule::new(&config.redis)?);
            let server = Arc::new(Server::new(redis, executor, store, options));
            server.run(&config.worker).await
        }
        Command::Evaluate { config: path } => {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let evaluation = EvaluationConfig::from_json(&content)?;

            let (queue, progress): (Arc<dyn JobQueue>, Arc<dyn ProgressSink>) = if use_redis {
                let redis = Arc::new(RedisModule::new(&config.redis)?);
                let id = Uuid::new_v4();
                info!(evaluation = %id, "dispatching through redis");
                let queue = RedisQueue::new(redis.clone(), id);
                (Arc::new(queue), Arc::new(RedisProgress::new(redis, id)))
            } else {
                let workers = config.worker.testcase_workers;
                let queue = LocalQueue::start(workers, executor, store);
                (Arc::new(queue), Arc::new(LogProgress))
            };

            let report = evaluator::evaluate(evaluation, queue, progress, options).await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
