//! Message inspection commands: `list`, `show`, `parse` and `delete`.

use anyhow::{bail, Result};
use mailrag_core::index::Indexer;
use mailrag_core::models::NormalizedMessage;
use mailrag_core::normalize::normalize_message;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::connector_fs;
use crate::db;
use crate::embedding::create_provider;
use crate::messages::{self, MessageFilter, Pagination};
use crate::qdrant::QdrantStore;

pub struct ListArgs {
    pub from: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn run_list(config: &Config, args: &ListArgs) -> Result<()> {
    let filter = MessageFilter {
        from: args.from.clone(),
        since: args
            .since
            .as_deref()
            .map(|s| messages::parse_day_bound(s, false))
            .transpose()?,
        until: args
            .until
            .as_deref()
            .map(|s| messages::parse_day_bound(s, true))
            .transpose()?,
    };
    let page = Pagination {
        limit: args.limit,
        offset: args.offset,
    };

    let pool = db::connect(config).await?;
    let total = messages::count_messages(&pool, &filter).await?;
    let listed = messages::list_messages(&pool, &filter, page).await?;
    pool.close().await;

    if listed.is_empty() {
        println!("No messages.");
        return Ok(());
    }

    println!("{:<12} {:<18} {:<32} SUBJECT", "DATE", "ID", "FROM");
    for message in &listed {
        println!(
            "{:<12} {:<18} {:<32} {}",
            format_date(message),
            message.id,
            truncate(&message.from, 32),
            message.subject
        );
    }
    println!();
    println!(
        "{} of {} message(s), offset {}",
        listed.len(),
        total,
        args.offset
    );
    Ok(())
}

pub async fn run_show(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let message = messages::get_message(&pool, id).await?;
    pool.close().await;

    let Some(message) = message else {
        bail!("message not found: {}", id);
    };

    println!("--- Message ---");
    println!("id:       {}", message.id);
    println!("thread:   {}", message.thread_id);
    println!("subject:  {}", message.subject);
    println!("from:     {}", message.from);
    println!("to:       {}", message.to.join(", "));
    println!(
        "date:     {}",
        message
            .date
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "(unknown)".to_string())
    );
    println!();
    println!("--- Body ---");
    println!("{}", message.body);

    Ok(())
}

/// Normalize an export file without touching the database.
pub fn run_parse(path: &Path) -> Result<()> {
    let normalized: Vec<NormalizedMessage> = connector_fs::read_export(path)?
        .iter()
        .map(normalize_message)
        .collect();

    match normalized.as_slice() {
        [single] => println!("{}", serde_json::to_string_pretty(single)?),
        many => println!("{}", serde_json::to_string_pretty(many)?),
    }
    Ok(())
}

/// Remove a message's points from the vector store, then its row.
pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let embedder = create_provider(&config.embedding)?;
    let store = Arc::new(QdrantStore::new(&config.vector_store)?);
    let indexer = Indexer::new(embedder, store, config.chunking.chunker()?);
    indexer.delete_message(id).await?;

    let pool = db::connect(config).await?;
    let removed = messages::delete_message(&pool, id).await?;
    pool.close().await;

    println!("delete {}", id);
    println!("  vectors: removed");
    println!("  message row: {}", if removed { "removed" } else { "not found" });
    println!("ok");
    Ok(())
}

fn format_date(message: &NormalizedMessage) -> String {
    message
        .date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", kept)
}
