use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mailrag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("mailrag");
    path
}

fn encode(text: &str) -> String {
    URL_SAFE_NO_PAD.encode(text.as_bytes())
}

fn invoice_message() -> String {
    format!(
        r#"{{
  "id": "18c0abc",
  "threadId": "t-1",
  "snippet": "Please find the invoice",
  "internalDate": "1769463114000",
  "payload": {{
    "mimeType": "multipart/alternative",
    "headers": [
      {{"name": "From", "value": "Alice <alice@example.com>"}},
      {{"name": "To", "value": "me@example.com"}},
      {{"name": "Subject", "value": "Quarterly invoice"}},
      {{"name": "Date", "value": "Mon, 26 Jan 2026 13:31:54 -0800"}}
    ],
    "parts": [
      {{"mimeType": "text/plain", "body": {{"data": "{}"}}}},
      {{"mimeType": "text/html", "body": {{"data": "{}"}}}}
    ]
  }}
}}"#,
        encode("Please find the invoice attached."),
        encode("<p>Please find the <b>invoice</b> attached.</p>")
    )
}

fn newsletter_batch() -> String {
    format!(
        r#"[
  {{
    "id": "18c0def",
    "threadId": "t-2",
    "payload": {{
      "mimeType": "text/html",
      "headers": [
        {{"name": "From", "value": "bob@example.com"}},
        {{"name": "Subject", "value": "Welcome aboard"}},
        {{"name": "Date", "value": "Tue, 3 Feb 2026 09:00:00 +0000"}}
      ],
      "body": {{"data": "{}"}}
    }}
  }},
  {{
    "id": "18c0fed",
    "threadId": "t-3",
    "internalDate": "1700000000000",
    "payload": {{
      "mimeType": "text/plain",
      "headers": [
        {{"name": "From", "value": "carol@example.com"}},
        {{"name": "Subject", "value": "Old note"}}
      ],
      "body": {{"data": "{}"}}
    }}
  }}
]"#,
        encode("<html><body><p>Hello &amp; welcome</p><script>track()</script></body></html>"),
        encode("Remember the offsite.")
    )
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let mail_dir = root.join("mail");
    fs::create_dir_all(&mail_dir).unwrap();
    fs::write(mail_dir.join("invoice.json"), invoice_message()).unwrap();
    fs::write(mail_dir.join("batch.json"), newsletter_batch()).unwrap();
    fs::write(mail_dir.join("README.txt"), "not an export").unwrap();

    // Port 9 (discard) keeps the vector store unreachable.
    let config_content = format!(
        r#"[db]
path = "{}/data/mail.sqlite"

[chunking]
max_tokens = 500
overlap_tokens = 50

[retrieval]
final_limit = 5

[vector_store]
url = "http://127.0.0.1:9"
collection = "test_emails"
timeout_secs = 2

[sync]
root = "{}/mail"
include_globs = ["**/*.json"]

[logging]
level = "warn"
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("mailrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mailrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mailrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("OPENAI_API_KEY")
        .env_remove("QDRANT_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mailrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn synced_env() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_mailrag(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    let (stdout, stderr, success) = run_mailrag(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    (tmp, config_path)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mailrag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/mail.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_mailrag(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_mailrag(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sync_imports_exports() {
    let (_tmp, config_path) = setup_test_env();

    run_mailrag(&config_path, &["init"]);
    let (stdout, stderr, success) = run_mailrag(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("messages found: 3"));
    assert!(stdout.contains("inserted: 3"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_sync_idempotent_no_duplicates() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_mailrag(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("inserted: 0"), "got: {}", stdout);
    assert!(stdout.contains("unchanged: 3"), "got: {}", stdout);
}

#[test]
fn test_sync_dry_run() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_mailrag(&config_path, &["sync", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("messages found: 3"));
    assert!(stdout.contains("with body text: 3"));
}

#[test]
fn test_sync_with_limit() {
    let (_tmp, config_path) = setup_test_env();

    run_mailrag(&config_path, &["init"]);
    let (stdout, _, success) = run_mailrag(&config_path, &["sync", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("inserted: 1"));
}

#[test]
fn test_list_newest_first() {
    let (_tmp, config_path) = synced_env();

    let (stdout, stderr, success) = run_mailrag(&config_path, &["list"]);
    assert!(success, "list failed: {}", stderr);

    let welcome = stdout.find("18c0def").expect("welcome listed");
    let invoice = stdout.find("18c0abc").expect("invoice listed");
    let old = stdout.find("18c0fed").expect("old note listed");
    assert!(welcome < invoice && invoice < old, "got: {}", stdout);
    assert!(stdout.contains("3 of 3 message(s)"));
}

#[test]
fn test_list_filters() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_mailrag(&config_path, &["list", "--from", "ALICE"]);
    assert!(success);
    assert!(stdout.contains("18c0abc"));
    assert!(!stdout.contains("18c0def"));

    let (stdout, _, success) = run_mailrag(&config_path, &["list", "--since", "2026-01-01"]);
    assert!(success);
    assert!(stdout.contains("2 of 2 message(s)"), "got: {}", stdout);

    let (_, stderr, success) = run_mailrag(&config_path, &["list", "--since", "yesterday"]);
    assert!(!success);
    assert!(stderr.contains("YYYY-MM-DD"));
}

#[test]
fn test_show_message() {
    let (_tmp, config_path) = synced_env();

    let (stdout, stderr, success) = run_mailrag(&config_path, &["show", "18c0def"]);
    assert!(success, "show failed: {}", stderr);
    assert!(stdout.contains("Welcome aboard"));
    assert!(stdout.contains("Hello & welcome"));
    assert!(!stdout.contains("<p>"));
    assert!(!stdout.contains("track()"));
}

#[test]
fn test_show_prefers_plain_text_part() {
    let (_tmp, config_path) = synced_env();

    let (stdout, _, success) = run_mailrag(&config_path, &["show", "18c0abc"]);
    assert!(success);
    assert!(stdout.contains("Please find the invoice attached."));
    assert!(stdout.contains("2026-01-26T13:31:54-08:00"));
}

#[test]
fn test_show_missing_message() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_mailrag(&config_path, &["show", "nonexistent-id"]);
    assert!(!success);
    assert!(stderr.contains("message not found"));
}

#[test]
fn test_parse_needs_no_config() {
    let (tmp, _config_path) = setup_test_env();
    let missing_config = tmp.path().join("missing.toml");
    let export = tmp.path().join("mail/invoice.json");

    let (stdout, stderr, success) =
        run_mailrag(&missing_config, &["parse", export.to_str().unwrap()]);
    assert!(success, "parse failed: {}", stderr);

    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["id"], "18c0abc");
    assert_eq!(json["subject"], "Quarterly invoice");
    assert_eq!(json["body"], "Please find the invoice attached.");
    assert_eq!(json["to"][0], "me@example.com");
}

#[test]
fn test_parse_batch_falls_back_to_internal_date() {
    let (tmp, config_path) = setup_test_env();
    let export = tmp.path().join("mail/batch.json");

    let (stdout, _, success) = run_mailrag(&config_path, &["parse", export.to_str().unwrap()]);
    assert!(success);

    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 2);
    let date = chrono::DateTime::parse_from_rfc3339(json[1]["date"].as_str().unwrap()).unwrap();
    assert_eq!(date.timestamp(), 1_700_000_000);
}

#[test]
fn test_search_empty_query_errors() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_mailrag(&config_path, &["search", "   "]);
    assert!(!success, "Empty query should be rejected");
    assert!(stderr.contains("empty query"));
}

#[test]
fn test_search_errors_when_embeddings_disabled() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_mailrag(&config_path, &["search", "invoice"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "got: {}", stderr);
}

#[test]
fn test_index_errors_when_embeddings_disabled() {
    let (_tmp, config_path) = synced_env();

    let (_, stderr, success) = run_mailrag(&config_path, &["index"]);
    assert!(!success);
    assert!(stderr.contains("requires embeddings"));
}

#[test]
fn test_stats_tolerates_unreachable_vector_store() {
    let (_tmp, config_path) = synced_env();

    let (stdout, stderr, success) = run_mailrag(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Messages:    3"));
    assert!(stdout.contains("test_emails"));
    assert!(stdout.contains("unavailable"));
}
