//! # ocaz CLI
//!
//! The `ocaz` binary drives the catalog: it registers URLs, runs the
//! enrichment stages as batch jobs, inspects records and serves the
//! forwarder.
//!
//! ## Usage
//!
//! ```bash
//! ocaz --config ./config/ocaz.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ocaz init` | Create the SQLite database, tables and indexes |
//! | `ocaz add-url [URL]...` | Register URLs (stdin when none are given) |
//! | `ocaz resolve prefix` | Fetch prefixes of unresolved URLs |
//! | `ocaz resolve sha1` | Stream full content of objects without a sha1 |
//! | `ocaz resolve media` | Probe dimensions and timing of media objects |
//! | `ocaz resolve phash` | Perceptual hash of image objects |
//! | `ocaz classify <service>` | Label images with an external classifier |
//! | `ocaz stats` | Field coverage counts |
//! | `ocaz show <hash>` | Print the records a hash names |
//! | `ocaz locate <hash>` | Print a live URL for a hash |
//! | `ocaz serve forwarder` | Start the redirecting HTTP forwarder |
//!
//! ## Examples
//!
//! ```bash
//! # Register a list of URLs
//! cat urls.txt | ocaz add-url
//!
//! # Resolve a sample of 1000 prefixes with 16 workers
//! ocaz resolve prefix --max-records 1000 --max-workers 16
//!
//! # Classify with a service not listed in the config
//! ocaz classify nsfw-opennsfw2 --url http://localhost:8001
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ocaz::batch::{run_batch, BatchFailed, BatchOptions, Resolver};
use ocaz::classifier::ClassifierClient;
use ocaz::config::{self, ClassifierConfig, Config};
use ocaz::fetch::Fetcher;
use ocaz::probe::{FfprobeDecoder, MediaDecoder};
use ocaz::resolve::{
    ClassifyResolver, FullHashResolver, MediaProbeResolver, PerceptualHashResolver,
    PrefixResolver,
};
use ocaz::store::{IdentityStore, SqliteStore};
use ocaz::{db, forward, ingest, migrate, server, show, stats};

const DEFAULT_CONFIG: &str = "./config/ocaz.toml";

/// ocaz: a content-addressable catalog of media reachable over HTTP.
///
/// URLs are identified by the SHA-1 of their first ten megabytes; each
/// identity is enriched by independent batch stages.
#[derive(Parser)]
#[command(name = "ocaz", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/ocaz.toml`, which may be absent. A file named
    /// explicitly must exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path; overrides `[db].path`.
    #[arg(long, global = true, env = "OCAZ_DATABASE", alias = "mongodb-url")]
    database: Option<PathBuf>,

    /// Log verbosity when `RUST_LOG` is not set.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Info,
    Debug,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema. Idempotent.
    Init,

    /// Register URLs for cataloguing.
    ///
    /// URLs already known are left untouched. With no arguments, reads one
    /// URL per line from stdin.
    AddUrl {
        urls: Vec<String>,
    },

    /// Run an enrichment stage over every record it still applies to.
    Resolve {
        #[command(subcommand)]
        stage: Stage,
    },

    /// Label image objects with an external classifier.
    ///
    /// Predictions are recorded under SERVICE. The classifier's base URL
    /// comes from `[classifiers.<SERVICE>]` unless `--url` is given.
    Classify {
        service: String,

        /// Classifier base URL, overriding the config.
        #[arg(long)]
        url: Option<String>,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Print field coverage counts.
    Stats,

    /// Print the url and object records a hash names, as JSON.
    Show {
        hash: String,
    },

    /// Print a live URL for a url hash, prefix hash or full sha1.
    Locate {
        hash: String,
    },

    /// Start an HTTP service.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum Stage {
    /// Fetch the prefix of every URL without a prefix hash.
    Prefix(JobArgs),
    /// Stream full content of objects without a sha1.
    Sha1(JobArgs),
    /// Probe dimensions, duration and frame rate of media objects.
    Media(JobArgs),
    /// Compute perceptual hashes of image objects.
    Phash(JobArgs),
}

/// Job settings shared by batch commands.
#[derive(Args, Clone, Copy)]
struct JobArgs {
    /// Process at most this many records, sampled at random.
    #[arg(long)]
    max_records: Option<usize>,

    /// Number of chunks processed in parallel [config default: 4].
    #[arg(long)]
    max_workers: Option<usize>,

    /// Records per chunk and per bulk write [config default: 10].
    #[arg(long)]
    chunk_size: Option<usize>,
}

#[derive(Subcommand)]
enum ServeService {
    /// Redirect hashes to live URLs.
    Forwarder {
        /// Listen address, overriding `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    let mut cfg = match &cli.config {
        Some(path) => config::load_config(path, true)?,
        None => config::load_config(&PathBuf::from(DEFAULT_CONFIG), false)?,
    };
    if let Some(database) = cli.database {
        cfg.db.path = database;
    }

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path, 1).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::AddUrl { urls } => {
            let urls = if urls.is_empty() {
                std::io::stdin()
                    .lock()
                    .lines()
                    .collect::<std::io::Result<Vec<String>>>()
                    .context("Failed to read URLs from stdin")?
            } else {
                urls
            };
            let store = open_store(&cfg, 1).await?;
            let summary = ingest::add_urls(store.as_ref(), &urls).await?;
            println!(
                "submitted {}, inserted {}, already known {}, rejected {}",
                summary.submitted, summary.inserted, summary.existing, summary.rejected
            );
        }
        Commands::Resolve { stage } => {
            let fetcher = Fetcher::new(&cfg.fetch)?;
            let prefix_size = cfg.fetch.prefix_size;
            match stage {
                Stage::Prefix(job) => {
                    run_stage(&cfg, job, PrefixResolver::new(fetcher, prefix_size)).await?
                }
                Stage::Sha1(job) => {
                    run_stage(&cfg, job, FullHashResolver::new(fetcher, prefix_size)).await?
                }
                Stage::Media(job) => {
                    let decoder: Arc<dyn MediaDecoder> =
                        Arc::new(FfprobeDecoder::new(&cfg.media));
                    run_stage(&cfg, job, MediaProbeResolver::new(decoder)).await?
                }
                Stage::Phash(job) => {
                    run_stage(&cfg, job, PerceptualHashResolver::new(fetcher)).await?
                }
            }
        }
        Commands::Classify { service, url, job } => {
            let classifier_cfg = match (url, cfg.classifier(&service)) {
                (Some(url), _) => ClassifierConfig::new(url),
                (None, Some(configured)) => configured.clone(),
                (None, None) => bail!(
                    "no classifier configured for '{}': add [classifiers.{}] or pass --url",
                    service,
                    service
                ),
            };
            let client = ClassifierClient::new(&service, &classifier_cfg)?;
            match client.about().await {
                Ok(about) => info!(
                    service = %service,
                    reported = %about.name,
                    version = %about.version,
                    "classifier reachable"
                ),
                Err(err) => warn!(service = %service, error = %err, "classifier /about failed"),
            }
            let fetcher = Fetcher::new(&cfg.fetch)?;
            run_stage(&cfg, job, ClassifyResolver::new(fetcher, client)).await?;
        }
        Commands::Stats => {
            let store = open_store(&cfg, 1).await?;
            stats::run_stats(store.as_ref(), Some(cfg.db.path.as_path())).await?;
        }
        Commands::Show { hash } => {
            let store = open_store(&cfg, 1).await?;
            show::run_show(store.as_ref(), &hash).await?;
        }
        Commands::Locate { hash } => {
            let store = open_store(&cfg, 1).await?;
            match forward::resolve_any(store.as_ref(), &hash).await? {
                Some(url) => println!("{}", url),
                None => bail!("no live url for hash {}", hash),
            }
        }
        Commands::Serve { service } => match service {
            ServeService::Forwarder { bind } => {
                let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
                let store = open_store(&cfg, 8).await?;
                server::run_server(&bind, store).await?;
            }
        },
    }

    Ok(())
}

fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ocaz={}", level.as_str())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_store(cfg: &Config, max_connections: u32) -> Result<Arc<dyn IdentityStore>> {
    let pool = db::connect(&cfg.db.path, max_connections).await?;
    migrate::run_migrations(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

async fn run_stage<R: Resolver>(cfg: &Config, job: JobArgs, resolver: R) -> Result<()> {
    let options = BatchOptions::from_config(
        &cfg.batch,
        job.max_records,
        job.max_workers,
        job.chunk_size,
    );
    let connections = u32::try_from(options.max_workers + 1).unwrap_or(u32::MAX);
    let store = open_store(cfg, connections).await?;
    let resolver = Arc::new(resolver);
    match run_batch(resolver.clone(), store, &options, shutdown_signal()).await {
        Ok(report) => {
            report.print(resolver.name());
            Ok(())
        }
        Err(err) => {
            if let Some(failed) = err.downcast_ref::<BatchFailed>() {
                failed.report.print(&failed.stage);
            }
            Err(err)
        }
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed the run is never
/// interrupted.
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
