//! spool-demo: drives the scheduler with file-writing work items.
//!
//! Scenarios:
//! - `fan-out`: several producer threads submit one item per file
//! - `sequential`: a single long-running item writes every file in a loop
//!
//! Prints scheduler and provider metrics as JSON once the scheduler has
//! been stopped.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use spool_core::{load_dotenv, PoolConfig, ProviderKind};
use spool_scheduler::{Scheduler, WorkHandle, WorkItem, WorkStatus};

const PRODUCERS: usize = 4;

const SAMPLE_TEXT: &str = "\
Spool demo output.

Each file in this directory was written by one work item. The scheduler
queued the item, the dispatcher forwarded it to the selected worker
provider, and a fresh execution context ran it. When many contexts are
alive at once the provider slows down the creation of new ones instead of
refusing them, so a burst of submissions stretches out over time.
";

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Submit one work item per file from several producer threads.
    FanOut,
    /// Submit a single work item that writes every file itself.
    Sequential,
}

/// Spool scheduler demo. Writes sample files through a throttled worker provider.
#[derive(Parser, Debug)]
#[command(name = "spool-demo", version, about)]
struct Cli {
    /// Path to a pool config TOML file.
    #[arg(long, env = "SPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Worker provider backend (thread, event-loop). Overrides the config file.
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Number of files to write.
    #[arg(long, env = "SPOOL_DEMO_COUNT", default_value_t = 1000)]
    count: usize,

    #[arg(long, value_enum, default_value_t = Scenario::FanOut)]
    scenario: Scenario,

    /// Directory for the generated files. Defaults to a fresh temp directory.
    #[arg(long, env = "SPOOL_DEMO_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Write logs to this file instead of stderr.
    #[arg(long, env = "SPOOL_LOG_FILE")]
    log_file: Option<PathBuf>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("creating log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter()).init();
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<PoolConfig> {
    let mut config = match &cli.config {
        Some(path) => match PoolConfig::from_file(path) {
            Ok(cfg) => {
                info!(path = %path.display(), "loaded pool config");
                cfg
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to load config, using defaults");
                PoolConfig::from_env()?
            }
        },
        None => PoolConfig::from_env()?,
    };
    if let Some(kind) = cli.provider {
        config.provider = kind;
    }
    config.validate()?;
    Ok(config)
}

// ── Work ────────────────────────────────────────────────────────────

fn write_sample_file(dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("{}.txt", Uuid::new_v4()));
    fs::write(&path, SAMPLE_TEXT).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn file_item(dir: PathBuf, index: usize) -> WorkItem {
    WorkItem::new(move || {
        write_sample_file(&dir)?;
        info!(index, "file written");
        Ok(())
    })
    .with_label(format!("write-file-{index}"))
}

fn fan_out(scheduler: &Scheduler, dir: &Path, count: usize) -> Vec<WorkHandle> {
    let per_producer = count.div_ceil(PRODUCERS);
    thread::scope(|scope| {
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let start = p * per_producer;
                let end = count.min(start + per_producer);
                scope.spawn(move || {
                    let mut handles = Vec::with_capacity(end.saturating_sub(start));
                    for index in start..end {
                        let item = file_item(dir.to_path_buf(), index);
                        handles.push(item.handle());
                        if let Err(e) = scheduler.submit(item) {
                            error!(index, error = %e, "submission failed");
                        }
                    }
                    handles
                })
            })
            .collect();

        producers
            .into_iter()
            .flat_map(|p| p.join().unwrap_or_default())
            .collect()
    })
}

fn sequential(scheduler: &Scheduler, dir: &Path, count: usize) -> Vec<WorkHandle> {
    let dir = dir.to_path_buf();
    let item = WorkItem::from_fn(move || {
        for index in 0..count {
            match write_sample_file(&dir) {
                Ok(_) => info!(index, "file written"),
                Err(e) => error!(index, error = %format!("{e:#}"), "file write failed"),
            }
        }
    })
    .with_label("write-files-sequentially");
    let handle = item.handle();
    if let Err(e) = scheduler.submit(item) {
        error!(error = %e, "submission failed");
    }
    vec![handle]
}

// ── Main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let config = load_config(&cli)?;
    let output_dir = cli
        .output_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("spool-demo").join(Uuid::new_v4().to_string()));

    info!(
        provider = %config.provider,
        slow_down = config.slow_down_threshold,
        slow_even_more = config.slow_even_more_threshold,
        count = cli.count,
        scenario = ?cli.scenario,
        output_dir = %output_dir.display(),
        "starting spool demo"
    );

    let scheduler = Scheduler::from_config(&config)?;
    let handles = match cli.scenario {
        Scenario::FanOut => fan_out(&scheduler, &output_dir, cli.count),
        Scenario::Sequential => sequential(&scheduler, &output_dir, cli.count),
    };

    let faulted = handles
        .iter()
        .map(WorkHandle::wait)
        .filter(|status| *status != WorkStatus::Completed)
        .count();
    if faulted > 0 {
        warn!(faulted, "some work items did not complete");
    }

    scheduler.stop();

    let report = serde_json::json!({
        "scheduler": scheduler.metrics(),
        "provider": scheduler.provider().metrics(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("Done. Files written to {}", output_dir.display());
    Ok(())
}
