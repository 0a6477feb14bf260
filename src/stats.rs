//! Database and vector store overview.
//!
//! Used by `mailrag stats` to confirm that syncs and index runs did what
//! was expected. An unreachable vector store is reported, not fatal.

use anyhow::Result;
use mailrag_core::store::VectorStore;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::qdrant::QdrantStore;

/// Run the stats command: query the database and vector store, print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            SUM(CASE WHEN date_ts > 0 THEN 1 ELSE 0 END) AS dated,
            MIN(CASE WHEN date_ts > 0 THEN date_ts END) AS oldest,
            MAX(date_ts) AS newest
        FROM emails
        "#,
    )
    .fetch_one(&pool)
    .await?;

    let total: i64 = row.get("total");
    let dated: Option<i64> = row.get("dated");
    let oldest: Option<i64> = row.get("oldest");
    let newest: Option<i64> = row.get("newest");

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    pool.close().await;

    println!("mailrag stats");
    println!("=============");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Messages:    {}", total);
    println!("  With date:   {}", dated.unwrap_or(0));
    if let (Some(oldest), Some(newest)) = (oldest, newest) {
        println!("  Range:       {} .. {}", format_day(oldest), format_day(newest));
    }
    println!();

    println!("  Collection:  {}", config.vector_store.collection);
    let store = QdrantStore::new(&config.vector_store)?;
    match store.collection_stats().await {
        Ok(stats) => {
            println!("  Status:      {}", stats.status);
            println!("  Points:      {}", stats.point_count);
            println!("  Vectors:     {}", stats.vector_count);
        }
        Err(e) => println!("  Status:      unavailable ({:#})", e),
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_day(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ts.to_string())
}
