//! Batch orchestrator shared by every enrichment stage.
//!
//! A run goes through the same steps regardless of stage:
//!
//! 1. **Select** candidates via [`Resolver::candidates`] (rows whose output
//!    field is missing).
//! 2. **Shuffle** them and apply the `max_records` cap.
//! 3. **Partition** into chunks of `chunk_size`.
//! 4. **Dispatch** chunks onto at most `max_workers` concurrent tasks.
//! 5. Each task resolves its chunk sequentially and issues **one
//!    [`IdentityStore::bulk_write`]** for the chunk.
//!
//! A failing item ends its chunk, but the mutations of items already
//! resolved in that chunk are written before the task returns. Items whose
//! error [`ResolveError::is_skippable`] are logged and passed over.
//!
//! When the shutdown future completes (operator interrupt), no further
//! chunks are started and in-flight tasks are aborted without waiting.
//! Anything not written is re-selected by the next run.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::BatchConfig;
use crate::error::ResolveError;
use crate::models::Mutation;
use crate::store::IdentityStore;

/// One enrichment stage: how to find work and how to resolve one item.
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    type Candidate: Debug + Send + Sync + 'static;

    /// Short stage name used in logs and reports.
    fn name(&self) -> &str;

    /// Every row this stage has yet to resolve.
    async fn candidates(&self, store: &dyn IdentityStore) -> Result<Vec<Self::Candidate>>;

    /// Resolves one candidate into the mutations that record its result.
    async fn resolve(
        &self,
        store: &dyn IdentityStore,
        candidate: &Self::Candidate,
    ) -> Result<Vec<Mutation>, ResolveError>;
}

/// Per-run job settings shared by all batch commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    pub max_records: Option<usize>,
    pub max_workers: usize,
    pub chunk_size: usize,
}

impl BatchOptions {
    pub fn from_config(
        config: &BatchConfig,
        max_records: Option<usize>,
        max_workers: Option<usize>,
        chunk_size: Option<usize>,
    ) -> Self {
        Self {
            max_records,
            max_workers: max_workers.unwrap_or(config.max_workers),
            chunk_size: chunk_size.unwrap_or(config.chunk_size),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            bail!("max_workers must be greater than zero");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        Ok(())
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default(), None, None, None)
    }
}

/// Summary of one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub candidates: usize,
    pub chunks: usize,
    pub chunks_completed: usize,
    pub chunks_failed: usize,
    /// Chunks never started or aborted by an interrupt.
    pub chunks_abandoned: usize,
    pub resolved: usize,
    pub skipped: usize,
    pub mutations_written: u64,
    pub interrupted: bool,
}

impl BatchReport {
    fn absorb(&mut self, outcome: &ChunkOutcome) {
        self.resolved += outcome.resolved;
        self.skipped += outcome.skipped;
        self.mutations_written += outcome.written;
    }

    pub fn print(&self, stage: &str) {
        println!("resolve {}", stage);
        println!("  candidates:  {}", self.candidates);
        println!(
            "  chunks:      {} ({} completed, {} failed, {} abandoned)",
            self.chunks, self.chunks_completed, self.chunks_failed, self.chunks_abandoned
        );
        println!("  resolved:    {}", self.resolved);
        println!("  skipped:     {}", self.skipped);
        println!("  writes:      {}", self.mutations_written);
        if self.interrupted {
            println!("  interrupted: yes");
        }
    }
}

/// Returned by [`run_batch`] when chunks failed. Carries the full report so
/// callers can still show what was resolved.
#[derive(Debug)]
pub struct BatchFailed {
    pub stage: String,
    pub report: BatchReport,
}

impl fmt::Display for BatchFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} of {} chunks failed",
            self.stage, self.report.chunks_failed, self.report.chunks
        )
    }
}

impl std::error::Error for BatchFailed {}

#[derive(Debug, Default)]
struct ChunkOutcome {
    resolved: usize,
    skipped: usize,
    written: u64,
}

#[derive(Debug)]
struct ChunkFailure {
    outcome: ChunkOutcome,
    error: String,
}

/// Splits `items` into consecutive chunks of at most `size` elements.
pub fn partition<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size.max(1)));
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Runs `resolver` over all of its candidates.
///
/// Returns a [`BatchFailed`] error when any chunk failed, after every other
/// chunk has had the chance to finish. An interrupt is not an error.
pub async fn run_batch<R, F>(
    resolver: Arc<R>,
    store: Arc<dyn IdentityStore>,
    options: &BatchOptions,
    shutdown: F,
) -> Result<BatchReport>
where
    R: Resolver,
    F: Future<Output = ()> + Send,
{
    options.validate()?;

    let mut candidates = resolver.candidates(store.as_ref()).await?;
    let available = candidates.len();
    candidates.shuffle(&mut rand::thread_rng());
    if let Some(max) = options.max_records {
        candidates.truncate(max);
    }

    let chunks = partition(candidates, options.chunk_size);
    let mut report = BatchReport {
        candidates: chunks.iter().map(Vec::len).sum(),
        chunks: chunks.len(),
        ..Default::default()
    };
    info!(
        stage = resolver.name(),
        available,
        selected = report.candidates,
        chunks = report.chunks,
        max_workers = options.max_workers,
        "starting batch"
    );

    let mut pending = chunks.into_iter().enumerate();
    let mut workers: JoinSet<Result<ChunkOutcome, ChunkFailure>> = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        while workers.len() < options.max_workers {
            let Some((index, chunk)) = pending.next() else {
                break;
            };
            let span = info_span!("chunk", stage = resolver.name(), index);
            workers.spawn(
                process_chunk(resolver.clone(), store.clone(), chunk).instrument(span),
            );
        }
        if workers.is_empty() {
            break;
        }

        tokio::select! {
            _ = &mut shutdown => {
                report.interrupted = true;
                report.chunks_abandoned = workers.len() + pending.len();
                warn!(
                    stage = resolver.name(),
                    abandoned = report.chunks_abandoned,
                    "interrupted, shutting down without waiting for running chunks"
                );
                workers.abort_all();
                break;
            }
            Some(joined) = workers.join_next() => {
                match joined {
                    Ok(Ok(outcome)) => {
                        report.chunks_completed += 1;
                        report.absorb(&outcome);
                    }
                    Ok(Err(failure)) => {
                        report.chunks_failed += 1;
                        report.absorb(&failure.outcome);
                        error!(stage = resolver.name(), error = %failure.error, "chunk failed");
                    }
                    Err(join_error) => {
                        report.chunks_failed += 1;
                        error!(stage = resolver.name(), error = %join_error, "chunk task panicked");
                    }
                }
            }
        }
    }

    info!(
        stage = resolver.name(),
        resolved = report.resolved,
        skipped = report.skipped,
        failed_chunks = report.chunks_failed,
        "batch finished"
    );

    if report.chunks_failed > 0 && !report.interrupted {
        return Err(BatchFailed {
            stage: resolver.name().to_string(),
            report,
        }
        .into());
    }
    Ok(report)
}

async fn process_chunk<R: Resolver>(
    resolver: Arc<R>,
    store: Arc<dyn IdentityStore>,
    chunk: Vec<R::Candidate>,
) -> Result<ChunkOutcome, ChunkFailure> {
    info!(items = chunk.len(), "processing chunk");
    let mut outcome = ChunkOutcome::default();
    let mut mutations = Vec::new();

    for candidate in &chunk {
        match resolver.resolve(store.as_ref(), candidate).await {
            Ok(produced) => {
                mutations.extend(produced);
                outcome.resolved += 1;
            }
            Err(err) if err.is_skippable() => {
                warn!(?candidate, error = %err, "skipping item");
                outcome.skipped += 1;
            }
            Err(err) => {
                error!(?candidate, error = %err, retryable = err.is_retryable(), "item failed");
                let mut error = err.to_string();
                match store.bulk_write(&mutations).await {
                    Ok(written) => outcome.written = written,
                    Err(flush) => error = format!("{}; flushing completed items also failed: {:#}", error, flush),
                }
                return Err(ChunkFailure { outcome, error });
            }
        }
    }

    match store.bulk_write(&mutations).await {
        Ok(written) => {
            outcome.written = written;
            info!(resolved = outcome.resolved, written, "chunk written");
            Ok(outcome)
        }
        Err(err) => Err(ChunkFailure {
            error: format!("bulk write failed: {:#}", err),
            outcome: ChunkOutcome::default(),
        }),
    }
}
