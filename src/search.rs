//! `mailrag search`: semantic search over indexed messages.
//!
//! Wires the configured embedding provider and Qdrant collection into the
//! core [`Retriever`] and bounds the whole call by `[timeouts].search_secs`.

use anyhow::{anyhow, Result};
use mailrag_core::models::RankedResult;
use mailrag_core::search::{Retriever, SearchOptions};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::qdrant::QdrantStore;

/// Search options for one call: explicit flags win over `[retrieval]`.
pub fn search_options(config: &Config, limit: Option<usize>, min_score: Option<f32>) -> SearchOptions {
    let options = SearchOptions::new(limit.unwrap_or(config.retrieval.final_limit));
    match min_score.or(config.retrieval.min_score) {
        Some(min) => options.with_min_score(min),
        None => options,
    }
}

pub async fn search_messages(
    config: &Config,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<RankedResult>> {
    let embedder = create_provider(&config.embedding)?;
    let store = Arc::new(QdrantStore::new(&config.vector_store)?);
    let retriever = Retriever::new(embedder, store).with_candidate_pool(
        config.retrieval.candidate_multiplier,
        config.retrieval.score_floor,
    );

    let secs = config.timeouts.search_secs;
    let results = tokio::time::timeout(Duration::from_secs(secs), retriever.search(query, options))
        .await
        .map_err(|_| anyhow!("Search timed out after {}s", secs))??;
    Ok(results)
}

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    min_score: Option<f32>,
) -> Result<()> {
    let options = search_options(config, limit, min_score);
    let results = search_messages(config, query, &options).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let subject = if result.subject.is_empty() {
            "(no subject)"
        } else {
            result.subject.as_str()
        };
        println!("{}. [{:.2}] {}", i + 1, result.score, subject);
        println!("    from: {}", result.from);
        println!(
            "    excerpt: \"{}\"",
            excerpt(&result.snippet, 200).replace('\n', " ").trim()
        );
        println!("    id: {}", result.email_id);
        println!();
    }

    Ok(())
}

/// At most `max_chars` characters of `text`, with an ellipsis when cut.
fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
