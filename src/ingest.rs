//! Sync pipeline orchestration.
//!
//! Coordinates the flow: export connector → normalization → relational
//! store. Vector indexing is a separate step (`mailrag index`).

use anyhow::Result;
use mailrag_core::normalize::normalize_message;
use tracing::info;

use crate::config::Config;
use crate::connector_fs;
use crate::db;
use crate::messages::{self, UpsertOutcome};

/// Counters reported by a sync run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub found: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

pub async fn sync_messages(config: &Config, limit: Option<usize>) -> Result<SyncSummary> {
    let mut exported = connector_fs::scan_exports(config)?;
    if let Some(lim) = limit {
        exported.truncate(lim);
    }

    let pool = db::connect(config).await?;
    let mut summary = SyncSummary {
        found: exported.len(),
        ..Default::default()
    };

    for item in &exported {
        let message = normalize_message(&item.raw);
        match messages::upsert_message(&pool, &message).await? {
            UpsertOutcome::Inserted => summary.inserted += 1,
            UpsertOutcome::Updated => summary.updated += 1,
            UpsertOutcome::Unchanged => summary.unchanged += 1,
        }
    }

    pool.close().await;
    info!(
        found = summary.found,
        inserted = summary.inserted,
        updated = summary.updated,
        unchanged = summary.unchanged,
        "Sync finished"
    );
    Ok(summary)
}

pub async fn run_sync(config: &Config, limit: Option<usize>, dry_run: bool) -> Result<()> {
    if dry_run {
        let mut exported = connector_fs::scan_exports(config)?;
        if let Some(lim) = limit {
            exported.truncate(lim);
        }
        let with_body = exported
            .iter()
            .filter(|item| !normalize_message(&item.raw).body.is_empty())
            .count();
        println!("sync (dry-run)");
        println!("  messages found: {}", exported.len());
        println!("  with body text: {}", with_body);
        return Ok(());
    }

    let summary = sync_messages(config, limit).await?;

    println!("sync");
    println!("  messages found: {}", summary.found);
    println!("  inserted: {}", summary.inserted);
    println!("  updated: {}", summary.updated);
    println!("  unchanged: {}", summary.unchanged);
    println!("ok");
    Ok(())
}
