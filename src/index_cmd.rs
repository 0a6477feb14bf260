//! `mailrag index`: push stored messages into the vector store.
//!
//! Messages are read from SQLite, then chunked, embedded and upserted by
//! the core [`Indexer`]. The run is bounded by `[timeouts].index_secs` and
//! stops early on Ctrl-C; both cancel the batch through one token.

use anyhow::{bail, Result};
use mailrag_core::index::{BatchReport, Indexer};
use mailrag_core::models::NormalizedMessage;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::messages::{self, MessageFilter, Pagination};
use crate::qdrant::QdrantStore;

/// Load the messages an index run should cover, newest first.
pub async fn load_messages(
    config: &Config,
    limit: Option<usize>,
    since: Option<&str>,
) -> Result<Vec<NormalizedMessage>> {
    let filter = MessageFilter {
        since: since
            .map(|s| messages::parse_day_bound(s, false))
            .transpose()?,
        ..Default::default()
    };
    // SQLite treats a negative LIMIT as unbounded.
    let page = Pagination {
        limit: limit.map(|l| l as i64).unwrap_or(-1),
        offset: 0,
    };

    let pool = db::connect(config).await?;
    let loaded = messages::list_messages(&pool, &filter, page).await?;
    pool.close().await;
    Ok(loaded)
}

pub async fn run_index(config: &Config, limit: Option<usize>, since: Option<&str>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Indexing requires embeddings. Set [embedding] provider in config.");
    }

    let cancel = CancellationToken::new();
    let watcher = spawn_cancel_watcher(
        cancel.clone(),
        Duration::from_secs(config.timeouts.index_secs),
    );
    let result = index_until_cancelled(config, limit, since, &cancel).await;
    watcher.abort();
    result
}

async fn index_until_cancelled(
    config: &Config,
    limit: Option<usize>,
    since: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    let pending = until_cancelled(cancel, load_messages(config, limit, since)).await?;
    if pending.is_empty() {
        println!("index");
        println!("  messages: 0");
        println!("ok");
        return Ok(());
    }

    let embedder = create_provider(&config.embedding)?;
    let store = Arc::new(QdrantStore::new(&config.vector_store)?);
    until_cancelled(cancel, store.ensure_collection(embedder.dims())).await?;

    let indexer = Indexer::new(embedder, store.clone(), config.chunking.chunker()?);
    let report = indexer.index_batch(&pending, cancel).await?;
    print_report(store.collection(), pending.len(), &report);

    if report.failed() > 0 {
        bail!("{} message(s) failed to index", report.failed());
    }
    Ok(())
}

/// Run `fut` unless `token` is cancelled first.
async fn until_cancelled<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => bail!("indexing cancelled"),
        result = fut => result,
    }
}

/// Cancel `token` on Ctrl-C or once `deadline` has elapsed.
fn spawn_cancel_watcher(token: CancellationToken, deadline: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling indexing");
            }
            _ = tokio::time::sleep(deadline) => {
                warn!(secs = deadline.as_secs(), "Index deadline reached, cancelling");
            }
        }
        token.cancel();
    })
}

fn print_report(collection: &str, total: usize, report: &BatchReport) {
    println!("index {}", collection);
    println!("  messages: {}", total);
    println!("  indexed: {}", report.indexed());
    println!("  skipped: {}", report.skipped());
    println!("  failed: {}", report.failed());
    println!("  points written: {}", report.points_written());
    for (email_id, err) in report.failures() {
        println!("  ! {}: {}", email_id, err);
    }
    if report.failed() == 0 {
        println!("ok");
    }
}
