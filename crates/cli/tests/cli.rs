use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const DOCS: &str = concat!(
    r#"{"id": "rust", "text": "Rust guarantees memory safety without a garbage collector.", "category": "Lang", "date": "2023-05-01"}"#,
    "\n",
    r#"{"id": "tokio", "text": "Tokio is an asynchronous runtime for the Rust language.", "category": "lang", "date": "2024-02-10"}"#,
    "\n",
    r#"{"id": "bread", "text": "Sourdough bread needs a lively starter and a long proof.", "category": "food"}"#,
    "\n",
    "this line is not json\n",
);

fn sift() -> Command {
    let mut cmd = Command::cargo_bin("sift").unwrap();
    cmd.env_remove("SIFT_CONFIG")
        .env_remove("SIFT_EMBEDDING_MODE")
        .env_remove("RUST_LOG");
    cmd
}

fn build_index(dir: &Path, docs: &str) -> std::path::PathBuf {
    let input = dir.join("docs.jsonl");
    std::fs::write(&input, docs).unwrap();
    let out = dir.join("index");
    sift()
        .arg("--quiet")
        .arg("index")
        .arg("--input")
        .arg(&input)
        .arg("--out")
        .arg(&out)
        .assert()
        .success();
    out
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn index_reports_ingest_stats() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("docs.jsonl");
    std::fs::write(&input, DOCS).unwrap();

    let output = sift()
        .arg("index")
        .arg("--input")
        .arg(&input)
        .arg("--out")
        .arg(dir.path().join("index"))
        .output()
        .unwrap();
    assert!(output.status.success());

    let stats = stdout_json(&output);
    assert_eq!(stats["documents"], 3);
    assert_eq!(stats["chunks"], 3);
    assert_eq!(stats["errors"].as_array().unwrap().len(), 1);
    assert!(dir.path().join("index/vectors.bin").is_file());
    assert!(dir.path().join("index/metadata.json").is_file());
}

#[test]
fn query_prints_ranked_results() {
    let dir = TempDir::new().unwrap();
    let index = build_index(dir.path(), DOCS);

    let output = sift()
        .args(["--quiet", "query", "--top-k", "2", "--index"])
        .arg(&index)
        .arg("garbage collector")
        .output()
        .unwrap();
    assert!(output.status.success());

    let response = stdout_json(&output);
    let results = response["results"].as_array().unwrap();
    assert!(!results.is_empty() && results.len() <= 2);
    assert_eq!(results[0]["metadata"]["document_id"], "rust");
    assert!(response["confidence"]["level"].is_string());
}

#[test]
fn query_filters_by_category_and_date() {
    let dir = TempDir::new().unwrap();
    let index = build_index(dir.path(), DOCS);

    let output = sift()
        .args(["--quiet", "query", "--category", "LANG", "--from", "2024-01-01", "--index"])
        .arg(&index)
        .arg("Rust")
        .output()
        .unwrap();
    assert!(output.status.success());

    let response = stdout_json(&output);
    let ids: Vec<&str> = response["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["metadata"]["document_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["tokio"]);
}

#[test]
fn invalid_requests_exit_with_code_two() {
    let dir = TempDir::new().unwrap();
    let index = build_index(dir.path(), DOCS);

    sift()
        .args(["--quiet", "query", "--index"])
        .arg(&index)
        .arg("   ")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("invalid_request"));

    sift()
        .args(["--quiet", "query", "--top-k", "0", "--index"])
        .arg(&index)
        .arg("rust")
        .assert()
        .code(2);

    sift()
        .args(["--quiet", "query", "--from", "2024-01-01", "--to", "2023-01-01", "--index"])
        .arg(&index)
        .arg("rust")
        .assert()
        .code(2);
}

#[test]
fn corrupt_vectors_fall_back_to_keywords() {
    let dir = TempDir::new().unwrap();
    let index = build_index(dir.path(), DOCS);
    std::fs::write(index.join("vectors.bin"), b"junk").unwrap();

    let output = sift()
        .args(["--quiet", "query", "--index"])
        .arg(&index)
        .arg("sourdough starter")
        .output()
        .unwrap();
    assert!(output.status.success());
    let response = stdout_json(&output);
    assert_eq!(response["results"][0]["metadata"]["document_id"], "bread");
}

#[test]
fn no_retrieval_path_exits_with_code_three() {
    let dir = TempDir::new().unwrap();
    let index = build_index(dir.path(), "{\"id\": \"a\", \"text\": \"tiny\"}\n");
    std::fs::write(index.join("vectors.bin"), b"junk").unwrap();

    sift()
        .args(["--quiet", "query", "--index"])
        .arg(&index)
        .arg("anything")
        .assert()
        .code(3)
        .stdout(predicate::str::contains("unavailable"));
}

#[test]
fn stats_shows_category_histogram() {
    let dir = TempDir::new().unwrap();
    let index = build_index(dir.path(), DOCS);

    let output = sift()
        .args(["--quiet", "stats", "--index"])
        .arg(&index)
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary = stdout_json(&output);
    assert_eq!(summary["chunks"], 3);
    assert_eq!(summary["documents"], 3);
    assert_eq!(summary["categories"]["lang"], 2);
    assert_eq!(summary["categories"]["food"], 1);
    assert_eq!(summary["vectors"]["vector_count"], 3);
    assert_eq!(summary["manifest"]["model_id"], "hash-v1");
}

#[test]
fn config_file_changes_chunking() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("sift.toml");
    std::fs::write(&config, "[chunker]\nsize = 20\noverlap = 5\n").unwrap();
    let input = dir.path().join("docs.jsonl");
    std::fs::write(&input, DOCS).unwrap();

    let output = sift()
        .arg("--config")
        .arg(&config)
        .args(["--quiet", "index", "--input"])
        .arg(&input)
        .arg("--out")
        .arg(dir.path().join("index"))
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout_json(&output)["chunks"].as_u64().unwrap() > 3);
}

#[test]
fn bad_embedding_mode_is_rejected() {
    let dir = TempDir::new().unwrap();
    sift()
        .env("SIFT_EMBEDDING_MODE", "gpu")
        .args(["stats", "--index"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("SIFT_EMBEDDING_MODE"));
}

#[test]
fn missing_input_fails() {
    let dir = TempDir::new().unwrap();
    sift()
        .args(["index", "--input"])
        .arg(dir.path().join("absent.jsonl"))
        .arg("--out")
        .arg(dir.path().join("index"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read documents"));
}

#[test]
fn schema_describes_query_requests() {
    sift()
        .arg("schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("top_k"));
}
