//! Mail export connector.
//!
//! Walks `[sync].root` for Gmail API message exports (`format=full` JSON).
//! A file may hold a single message object or an array of them. Files that
//! fail to read or parse are skipped with a warning so one bad export does
//! not block a sync.

use anyhow::{anyhow, bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use mailrag_core::normalize::RawMessage;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Config;

/// A raw message together with the export file it came from.
#[derive(Debug, Clone)]
pub struct ExportedMessage {
    pub source_path: String,
    pub raw: RawMessage,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExportFile {
    Many(Vec<RawMessage>),
    One(Box<RawMessage>),
}

pub fn scan_exports(config: &Config) -> Result<Vec<ExportedMessage>> {
    let sync = config
        .sync
        .as_ref()
        .ok_or_else(|| anyhow!("[sync] section not configured"))?;

    let root = &sync.root;
    if !root.exists() {
        bail!("Sync root does not exist: {}", root.display());
    }

    let include_set = build_globset(&sync.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string()];
    default_excludes.extend(sync.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(sync.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push((rel_str, path.to_path_buf()));
    }

    // Sort for deterministic ordering
    files.sort();

    let mut messages = Vec::new();
    for (rel_str, path) in files {
        match read_export(&path) {
            Ok(raws) => {
                debug!(file = %rel_str, messages = raws.len(), "Read export file");
                messages.extend(raws.into_iter().map(|raw| ExportedMessage {
                    source_path: rel_str.clone(),
                    raw,
                }));
            }
            Err(e) => warn!(file = %rel_str, error = %format!("{:#}", e), "Skipping export file"),
        }
    }

    Ok(messages)
}

/// Read one export file.
pub fn read_export(path: &Path) -> Result<Vec<RawMessage>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let parsed: ExportFile = serde_json::from_str(&content)
        .with_context(|| format!("Not a message export: {}", path.display()))?;

    let raws = match parsed {
        ExportFile::Many(raws) => raws,
        ExportFile::One(raw) => vec![*raw],
    };
    Ok(raws.into_iter().filter(|r| !r.id.is_empty()).collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(root: &Path) -> Config {
        parse_config(&format!(
            "[db]\npath = \"{}/db.sqlite\"\n[sync]\nroot = \"{}\"\nexclude_globs = [\"skip/**\"]\n",
            root.display(),
            root.display()
        ))
        .unwrap()
    }

    #[test]
    fn test_scan_reads_objects_and_arrays() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("skip")).unwrap();
        fs::write(root.join("a.json"), r#"{"id": "m1", "payload": {}}"#).unwrap();
        fs::write(root.join("b.json"), r#"[{"id": "m2"}, {"id": "m3"}]"#).unwrap();
        fs::write(root.join("broken.json"), "{ not json").unwrap();
        fs::write(root.join("notes.txt"), r#"{"id": "ignored"}"#).unwrap();
        fs::write(root.join("skip/c.json"), r#"{"id": "excluded"}"#).unwrap();

        let found = scan_exports(&config_for(root)).unwrap();
        let ids: Vec<&str> = found.iter().map(|m| m.raw.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(found[1].source_path, "b.json");
    }

    #[test]
    fn test_missing_root_is_error() {
        let tmp = TempDir::new().unwrap();
        let cfg = config_for(&tmp.path().join("nope"));
        assert!(scan_exports(&cfg).is_err());
    }
}
