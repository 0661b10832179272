//! visidx CLI
//!
//! - `render`: print the bulk operation and task key of each lifecycle record
//! - `replay`: submit lifecycle records through the visibility store
//! - `check-config`: validate a configuration file and print its effective values
//!
//! Records are read as JSON lines (`-` for stdin), one tagged record per line:
//! `{"kind": "started", "workflow_id": "...", ...}`.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::task::JoinSet;

use visidx_core::backend::{BulkClient, HttpBulkClient, InMemoryIndex};
use visidx_core::config::{BackendConfig, Config, LogFormat};
use visidx_core::logging::{LogConfig, init_logging};
use visidx_core::processor::{BatchProcessor, ProcessorStats};
use visidx_core::store::{self, VisibilityStore};
use visidx_core::{BulkOperation, LifecycleRecord};

#[derive(Parser)]
#[command(name = "visidx")]
#[command(
    about = "Workflow visibility indexing: render and replay lifecycle records",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Log level or filter directive (overrides the config file)
    #[arg(long, global = true, env = "VISIDX_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: pretty or json (overrides the config file)
    #[arg(long, global = true, env = "VISIDX_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print each record's bulk operation and task key as JSON lines
    Render {
        /// JSON-lines record file, or `-` for stdin
        #[arg(short, long)]
        input: PathBuf,

        /// Target index name
        #[arg(long, default_value = visidx_core::config::DEFAULT_INDEX_NAME)]
        index: String,
    },

    /// Submit records through the batch processor and print a summary
    Replay {
        /// JSON-lines record file, or `-` for stdin
        #[arg(short, long)]
        input: PathBuf,

        /// TOML configuration file
        #[arg(short, long, env = "VISIDX_CONFIG")]
        config: Option<PathBuf>,

        /// Print the in-memory index contents after the summary
        #[arg(long)]
        dump: bool,
    },

    /// Validate a configuration file and print the effective configuration
    CheckConfig {
        /// TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct RenderedRecord<'a> {
    line: usize,
    kind: &'static str,
    task_key: &'a str,
    operation: &'a BulkOperation,
}

#[derive(Serialize)]
struct ReplayFailure {
    line: usize,
    doc_id: String,
    stage: &'static str,
    error: String,
}

#[derive(Serialize)]
struct ReplaySummary {
    index: String,
    records: usize,
    committed: usize,
    failures: Vec<ReplayFailure>,
    processor: ProcessorStats,
}

#[derive(Serialize)]
struct DumpedDocument<'a> {
    id: &'a str,
    version: i64,
    doc: &'a visidx_core::Document,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { ref input, ref index } => {
            init_cli_logging(&LogConfig::default(), &cli)?;
            render(input, index)
        }
        Commands::Replay {
            ref input,
            ref config,
            dump,
        } => {
            let config = match config {
                Some(path) => Config::load(path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => Config::default(),
            };
            init_cli_logging(&config.logging, &cli)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("starting tokio runtime")?;
            runtime.block_on(replay(input, &config, dump))
        }
        Commands::CheckConfig { ref config } => {
            let loaded = Config::load(config)
                .with_context(|| format!("loading config {}", config.display()))?;
            print!("{}", loaded.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_cli_logging(base: &LogConfig, cli: &Cli) -> anyhow::Result<()> {
    let mut log_config = base.clone();
    if let Some(level) = &cli.log_level {
        log_config.level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        log_config.format = format;
    }
    init_logging(&log_config).context("initializing logging")?;
    Ok(())
}

/// Parse JSON-lines records, keeping 1-based line numbers. Blank lines are skipped.
fn read_records(input: &Path) -> anyhow::Result<Vec<(usize, LifecycleRecord)>> {
    let reader: Box<dyn BufRead> = if input == Path::new("-") {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        let file = std::fs::File::open(input)
            .with_context(|| format!("opening {}", input.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("reading line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: LifecycleRecord = serde_json::from_str(&line)
            .with_context(|| format!("parsing record on line {line_no}"))?;
        records.push((line_no, record));
    }
    Ok(records)
}

fn render(input: &Path, index: &str) -> anyhow::Result<()> {
    let records = read_records(input)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (line, record) in &records {
        let submission = store::prepare(index, record)
            .with_context(|| format!("mapping record on line {line}"))?;
        let rendered = RenderedRecord {
            line: *line,
            kind: record.kind(),
            task_key: submission.task_key.as_str(),
            operation: &submission.operation,
        };
        serde_json::to_writer(&mut out, &rendered)?;
        writeln!(out)?;
    }
    Ok(())
}

async fn replay(input: &Path, config: &Config, dump: bool) -> anyhow::Result<()> {
    let records = read_records(input)?;

    let memory = Arc::new(InMemoryIndex::new());
    let client: Arc<dyn BulkClient> = match &config.backend {
        BackendConfig::Memory => memory.clone(),
        BackendConfig::Http { .. } => {
            if dump {
                bail!("--dump is only available with the memory backend");
            }
            let http = HttpBulkClient::from_config(&config.backend)?
                .context("http backend selected but not constructed")?;
            Arc::new(http)
        }
    };

    let processor = Arc::new(BatchProcessor::start(config.processor.clone(), client));
    let visibility = Arc::new(VisibilityStore::new(
        Arc::clone(&processor),
        config.index_name.clone(),
    ));
    tracing::info!(
        records = records.len(),
        index = %config.index_name,
        "Replaying lifecycle records"
    );

    let total = records.len();
    let mut tasks = JoinSet::new();
    for (line, record) in records {
        let visibility = Arc::clone(&visibility);
        tasks.spawn(async move {
            let outcome = visibility.record(&record).await;
            (line, record, outcome)
        });
    }

    let mut committed = 0;
    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (line, record, outcome) = joined.context("replay task panicked")?;
        match outcome {
            Ok(()) => committed += 1,
            Err(err) => failures.push(ReplayFailure {
                line,
                doc_id: format!("{}~{}", record.workflow_id(), record.run_id()),
                stage: err.stage(),
                error: err.to_string(),
            }),
        }
    }
    processor.stop().await;
    failures.sort_by_key(|f| f.line);

    let summary = ReplaySummary {
        index: config.index_name.clone(),
        records: total,
        committed,
        failures,
        processor: processor.stats(),
    };
    println!("{}", serde_json::to_string(&summary)?);

    if dump {
        for stored in memory.documents(&config.index_name) {
            let dumped = DumpedDocument {
                id: &stored.id,
                version: stored.version,
                doc: &stored.doc,
            };
            println!("{}", serde_json::to_string(&dumped)?);
        }
    }

    if !summary.failures.is_empty() {
        bail!(
            "{} of {} records were not indexed",
            summary.failures.len(),
            summary.records
        );
    }
    Ok(())
}
