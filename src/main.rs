use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use lifecourse_indexer::constants::{DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY};
use lifecourse_indexer::telemetry::{Verbosity, init_subscriber};
use lifecourse_indexer::{
    ElasticClient, IndexClient, IndexerError, Indexer, MemoryIndex, Result, RunConfig, SqliteStore,
    TranscribedIndexer,
};

#[derive(Parser, Debug)]
#[command(name = "lifecourse-indexer", version)]
#[command(about = "Assemble lifecourses and publish them into fresh search index generations")]
struct Cli {
    /// Root of the linked dataset.
    #[arg(long = "ll-path", env = "LIFECOURSE_LL_PATH")]
    ll_path: PathBuf,

    /// Root of the transcribed source files. Defaults to the dataset root.
    #[arg(long = "trs-path", env = "LIFECOURSE_TRS_PATH")]
    trs_path: Option<PathBuf>,

    /// Search engine base URL.
    #[arg(long = "es-host", env = "LIFECOURSE_ES_HOST")]
    es_host: Option<String>,

    /// SQLite file mirroring the lifecourses.
    #[arg(long = "db-path", env = "LIFECOURSE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Version tag stamped on everything this run publishes.
    #[arg(long = "data-version", env = "LIFECOURSE_DATA_VERSION")]
    data_version: Option<String>,

    #[arg(long)]
    skip_db: bool,

    #[arg(long)]
    skip_pas: bool,

    /// Read at most this many lifecourses and only the appearances they reference. 0 reads all.
    #[arg(long, default_value_t = 0)]
    max_entries: usize,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Seconds before a partially filled batch is flushed.
    #[arg(long, default_value_t = 30)]
    flush_interval: u64,

    /// Sources processed in parallel.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    #[arg(long, requires = "snapshot_bucket")]
    snapshot_repository: Option<String>,

    /// S3 bucket to snapshot the activated indices into.
    #[arg(long)]
    snapshot_bucket: Option<String>,

    /// Only publish the raw transcriptions behind the `transcribed` alias.
    #[arg(long, conflicts_with_all = ["skip_pas", "snapshot_bucket"])]
    transcribed_only: bool,

    /// Publish into an in-process index instead of a search engine.
    #[arg(long)]
    dry_run: bool,

    #[arg(short, long)]
    verbose: bool,

    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        let mut builder = RunConfig::builder(&self.ll_path)
            .transcribed_root(self.trs_path.clone().unwrap_or_else(|| self.ll_path.clone()))
            .max_entries(self.max_entries)
            .batch_size(self.batch_size)
            .flush_interval(Duration::from_secs(self.flush_interval))
            .concurrency(self.concurrency)
            .skip_db(self.skip_db)
            .skip_pas(self.skip_pas);
        if let Some(version) = &self.data_version {
            builder = builder.data_version(version.clone());
        }
        if let Some(bucket) = &self.snapshot_bucket {
            builder = builder.snapshot(self.snapshot_repository.clone(), bucket.clone());
        }
        builder.build()
    }
}

fn execute(cli: &Cli) -> Result<()> {
    let config = cli.run_config();
    let client: Box<dyn IndexClient> = if cli.dry_run {
        Box::new(MemoryIndex::new())
    } else {
        let host = cli
            .es_host
            .as_deref()
            .ok_or_else(|| IndexerError::Config("--es-host is required unless --dry-run".into()))?;
        Box::new(ElasticClient::new(host)?)
    };

    if cli.transcribed_only {
        let report = TranscribedIndexer::new(&config, client.as_ref()).run()?;
        tracing::info!(
            target = "lifecourse::cli",
            sources = report.sources,
            published = report.published,
            skipped = report.skipped,
            "transcribed indexing finished"
        );
        return Ok(());
    }

    let mut store = match (&cli.db_path, cli.skip_db) {
        (Some(path), false) => Some(SqliteStore::open(path)?),
        (None, false) => {
            return Err(IndexerError::Config(
                "--db-path is required unless --skip-db".into(),
            ));
        }
        (_, true) => None,
    };

    let mut indexer = Indexer::new(&config, client.as_ref());
    if let Some(store) = store.as_mut() {
        indexer = indexer.with_store(store);
    }
    let report = indexer.run()?;
    tracing::info!(
        target = "lifecourse::cli",
        data_version = %report.data_version,
        lifecourses = report.lifecourses,
        dangling = report.assembly.dangling,
        sources = report.sources.len(),
        activated = report.activated.len(),
        snapshot = report.snapshot.as_deref().unwrap_or("none"),
        "indexing finished"
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_subscriber(Verbosity::from_flags(cli.verbose, cli.quiet));

    match execute(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(target = "lifecourse::cli", error = %err, "indexing failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
