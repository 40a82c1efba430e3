use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn sdocs_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sdocs");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(docs_dir.join("api")).unwrap();
    fs::write(
        docs_dir.join("rules.md"),
        "# Language Rules\n\n## Type\nRULESET\n\nScripts run once per frame. Static mutable state is not allowed, \
         and every entity reference must be checked before use because entities can be destroyed mid-frame.\n",
    )
    .unwrap();
    fs::write(
        docs_dir.join("api/movement.md"),
        "# Movement Functions\n\n## Type\nFUNCTIONS\n\nMove entities around the level.\n\n\
         ```csharp\nvoid MoveTo(Entity entity, Vector3 target, float speed);\n```\n",
    )
    .unwrap();
    fs::write(docs_dir.join("notes.txt"), "not part of the corpus").unwrap();

    let config_content = format!(
        r#"[knowledge_base]
path = "{}/docs"

[loader]
max_retries = 1
retry_delay_ms = 1

[index]
cache_dir = "{}/data"
batch_delay_ms = 0

[embedding]
provider = "disabled"

[llm]
provider = "disabled"

[memory]
max_turns = 4
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("sdocs.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sdocs(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sdocs_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("SCRIPTDOCS_FORCE_RECREATE")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sdocs binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_ingest_loads_markdown_only() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sdocs(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("Loaded 2 files (0 failed)"),
        "unexpected output: {}",
        stdout
    );
}

#[test]
fn test_ingest_json_report() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sdocs(&config_path, &["ingest", "--json"]);
    assert!(success, "ingest failed: stderr={}", stderr);
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["loader"]["total_files"], 2);
    assert_eq!(report["loader"]["failed_files"], 0);
    // Embedding is disabled, so every batch fails and nothing is stored.
    assert_eq!(report["index"]["indexed"], 0);
    assert!(report["index"]["failed_chunks"].as_u64().unwrap() >= 2);
}

#[test]
fn test_ingest_reports_failed_file() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("docs/broken.md"), [0xc3, 0x28, 0xff]).unwrap();

    let (stdout, _, success) = run_sdocs(&config_path, &["ingest"]);
    assert!(success);
    assert!(stdout.contains("Loaded 3 files (1 failed)"), "got: {}", stdout);
    assert!(stdout.contains("failed: broken.md"));
}

#[test]
fn test_ingest_empty_corpus_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_file(tmp.path().join("docs/rules.md")).unwrap();
    fs::remove_file(tmp.path().join("docs/api/movement.md")).unwrap();

    let (_, stderr, success) = run_sdocs(&config_path, &["ingest"]);
    assert!(!success, "ingest of an empty corpus should fail");
    assert!(!stderr.is_empty());
}

#[test]
fn test_stats_on_fresh_index() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sdocs(&config_path, &["stats"]);
    assert!(success, "stats failed: stderr={}", stderr);
    assert!(stdout.contains("game_development_docs"));
    assert!(stdout.contains("Entries:     0"));
}

#[test]
fn test_ask_rejects_blank_question() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sdocs(&config_path, &["ask", "   ", "--json"]);
    assert!(success, "ask failed: stderr={}", stderr);
    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(response["outcome"], "rejected");
    assert_eq!(response["answer"], "Please provide a valid question.");
}

#[test]
fn test_ask_with_disabled_provider_fails_gracefully() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_sdocs(&config_path, &["ask", "How do I move an entity?", "--json"]);
    assert!(success, "ask should not exit with an error: stderr={}", stderr);
    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(response["outcome"], "provider_failed");
    assert_eq!(response["intent"], "question_answering");
    assert!(response["answer"]
        .as_str()
        .unwrap()
        .contains("not configured"));
}

#[test]
fn test_prune_on_empty_index() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sdocs(&config_path, &["prune"]);
    assert!(success, "prune failed: stderr={}", stderr);
    assert!(stdout.contains("Pruned 0 stale entries."));
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_sdocs(&missing, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, content.replace("max_turns = 4", "max_turns = 0")).unwrap();

    let (_, stderr, success) = run_sdocs(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("memory.max_turns"));
}

#[test]
fn test_unknown_provider_rejected() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(
        &config_path,
        content.replace("provider = \"disabled\"\n\n[llm]", "provider = \"cohere\"\n\n[llm]"),
    )
    .unwrap();

    let (_, stderr, success) = run_sdocs(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Unknown embedding provider"));
}

#[test]
fn test_check_reports_unconfigured_providers() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_sdocs(&config_path, &["check"]);
    assert!(!success, "check should fail with disabled providers");
    assert_eq!(stdout.matches("not configured").count(), 2, "got: {}", stdout);
    assert!(stderr.contains("2 of 2 provider checks failed"), "stderr: {}", stderr);
}

#[test]
fn test_check_json() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_sdocs(&config_path, &["check", "--json"]);
    assert!(!success);
    let checks: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(checks[0]["role"], "embedding");
    assert_eq!(checks[1]["role"], "llm");
    assert_eq!(checks[0]["ok"], false);
    assert_eq!(checks[1]["message"], "The model provider is not configured.");
}
