//! Integration tests for the healthguard binary, run fully offline

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use tempfile::TempDir;

const PNEUMONIA_NOTE: &str =
    "45 year old male smoker with fever and productive cough. Exam reveals crackles.";

/// Offline command rooted in `dir` so no stray `.env` is picked up
fn healthguard(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("healthguard").unwrap();
    cmd.current_dir(dir)
        .env("EMBEDDING_PROVIDER", "hashing")
        .env("AGENT_MODE", "rule-based")
        .env_remove("LLM_PROVIDER")
        .env_remove("OPENAI_API_KEY")
        .env_remove("EMBEDDING_DIM")
        .env_remove("CHUNK_SIZE")
        .env_remove("CHUNK_OVERLAP")
        .env_remove("TOP_K")
        .env_remove("EMBEDDING_URL")
        .env_remove("EMBEDDING_TIMEOUT_SECS")
        .env("NOMINATIM_URL", "http://127.0.0.1:9/search")
        .env("OVERPASS_URL", "http://127.0.0.1:9/api/interpreter");
    cmd
}

fn write_custom_corpus(dir: &Path) -> std::path::PathBuf {
    let corpus = dir.join("corpus.json");
    std::fs::write(
        &corpus,
        r#"[
            {"id": "gout", "title": "Gout Review", "source_ref": "local", "text": "Acute monoarthritis of the big toe."},
            {"id": "lyme", "title": "Lyme Review", "source_ref": "local", "text": "Erythema migrans after a tick bite."}
        ]"#,
    )
    .unwrap();
    corpus
}

/// Index generation printed by `build-index`
fn built_generation(stdout: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    stdout
        .split("✓ Built index ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap()
        .to_string()
}

/// Answer a single HTTP request with `body` on a background thread
fn serve_once(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).into_owned();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        line.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).unwrap();
    });
    format!("http://{}", addr)
}

const OVERPASS_RESPONSE: &str = r#"{"elements": [
    {"type": "node", "lat": 51.508, "lon": -0.128, "tags": {"amenity": "hospital", "name": "City General", "emergency": "yes"}},
    {"type": "way", "center": {"lat": 51.55, "lon": -0.10}, "tags": {"amenity": "hospital", "name": "Royal Chest Hospital", "healthcare:speciality": "pneumology", "phone": "+44 20 1111 2222"}}
]}"#;

#[test]
fn test_diagnose_prints_cited_differential() {
    let dir = TempDir::new().unwrap();
    healthguard(dir.path())
        .args(["--memory", "diagnose", PNEUMONIA_NOTE])
        .assert()
        .success()
        .stdout(predicate::str::contains("State: DONE"))
        .stdout(predicate::str::contains("Community-Acquired Pneumonia (CAP)"))
        .stdout(predicate::str::contains("✓ verified"));
}

#[test]
fn test_diagnose_json_output() {
    let dir = TempDir::new().unwrap();
    let output = healthguard(dir.path())
        .args(["--memory", "diagnose", "--json", "-k", "4", PNEUMONIA_NOTE])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["state"], "DONE");
    assert_eq!(json["agent"], "rule-based");
    assert_eq!(json["retrieval"]["evidence"].as_array().unwrap().len(), 4);
    assert_eq!(
        json["diagnosis"][0]["item"]["condition_name"],
        "Community-Acquired Pneumonia (CAP)"
    );
}

#[test]
fn test_diagnose_reads_stdin() {
    let dir = TempDir::new().unwrap();
    healthguard(dir.path())
        .args(["--memory", "diagnose"])
        .write_stdin("Sudden hemiparesis and aphasia in an elderly woman.")
        .assert()
        .success()
        .stdout(predicate::str::contains("hemiparesis"));
}

#[test]
fn test_failed_run_exits_non_zero() {
    let dir = TempDir::new().unwrap();
    healthguard(dir.path())
        .args(["--memory", "diagnose", "Routine follow up visit."])
        .assert()
        .failure()
        .stdout(predicate::str::contains("State: FAILED"))
        .stderr(predicate::str::contains("no clinical findings could be extracted"));
}

#[test]
fn test_build_index_then_reuse_and_reset() {
    let dir = TempDir::new().unwrap();
    let index_path = dir.path().join("store").join("index.json");
    let index_arg = index_path.to_str().unwrap();

    let output = healthguard(dir.path())
        .args(["--index-path", index_arg, "build-index"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("✓ Saved to"));
    assert!(index_path.exists());
    let generation = built_generation(&output.stdout);

    healthguard(dir.path())
        .args(["--index-path", index_arg, "corpus"])
        .assert()
        .success()
        .stdout(predicate::str::contains("11 documents"))
        .stdout(predicate::str::contains(format!("Index {}", generation)))
        .stdout(predicate::str::contains("chunk size 500, overlap 100"))
        .stdout(predicate::str::contains("PMC_pneumonia_review"));

    healthguard(dir.path())
        .args(["--index-path", index_arg, "reset-index"])
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ Removed index"));
    assert!(!index_path.exists());
}

#[test]
fn test_snapshot_not_reused_for_other_corpus() {
    let dir = TempDir::new().unwrap();
    let index_path = dir.path().join("index.json");
    let index_arg = index_path.to_str().unwrap();
    let corpus = write_custom_corpus(dir.path());

    let output = healthguard(dir.path())
        .args(["--index-path", index_arg, "build-index"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let generation = built_generation(&output.stdout);

    healthguard(dir.path())
        .args(["--index-path", index_arg, "--corpus", corpus.to_str().unwrap(), "corpus"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 documents"))
        .stdout(predicate::str::contains("Gout Review [gout]"))
        .stdout(predicate::str::contains(generation.as_str()).not())
        .stdout(predicate::str::contains("PMC_pneumonia_review").not());
}

#[test]
fn test_snapshot_not_reused_for_other_chunking() {
    let dir = TempDir::new().unwrap();
    let index_path = dir.path().join("index.json");
    let index_arg = index_path.to_str().unwrap();

    let output = healthguard(dir.path())
        .args(["--index-path", index_arg, "build-index", "--chunk-size", "300", "--overlap", "50"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let generation = built_generation(&output.stdout);

    healthguard(dir.path())
        .args(["--index-path", index_arg, "corpus"])
        .assert()
        .success()
        .stdout(predicate::str::contains("chunk size 500, overlap 100"))
        .stdout(predicate::str::contains(generation.as_str()).not());

    healthguard(dir.path())
        .env("CHUNK_SIZE", "300")
        .env("CHUNK_OVERLAP", "50")
        .args(["--index-path", index_arg, "corpus"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("Index {}", generation)));
}

#[test]
fn test_build_index_rejects_bad_chunking() {
    let dir = TempDir::new().unwrap();
    healthguard(dir.path())
        .args(["--memory", "build-index", "--chunk-size", "100", "--overlap", "100"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid chunking"));
}

#[test]
fn test_search_respects_k() {
    let dir = TempDir::new().unwrap();
    healthguard(dir.path())
        .args(["--memory", "search", "chest pain radiating to the arm", "-k", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 3 results"));
}

#[test]
fn test_custom_corpus() {
    let dir = TempDir::new().unwrap();
    let corpus = write_custom_corpus(dir.path());

    healthguard(dir.path())
        .args(["--memory", "--corpus", corpus.to_str().unwrap(), "corpus"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 documents"))
        .stdout(predicate::str::contains("Gout Review [gout] 1 chunks"));
}

#[test]
fn test_invalid_corpus_is_rejected() {
    let dir = TempDir::new().unwrap();
    let corpus = dir.path().join("corpus.json");
    std::fs::write(&corpus, r#"[{"id": "a", "title": "A", "text": "no source"}]"#).unwrap();

    healthguard(dir.path())
        .args(["--memory", "--corpus", corpus.to_str().unwrap(), "corpus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("source_ref"));
}

#[test]
fn test_embedding_dim_offline() {
    let dir = TempDir::new().unwrap();
    healthguard(dir.path())
        .args(["embedding-dim"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Embedding dimension: 384"));
}

#[test]
fn test_health_offline() {
    let dir = TempDir::new().unwrap();
    healthguard(dir.path())
        .args(["health"])
        .assert()
        .success()
        .stdout(predicate::str::contains("offline hashing embedder"))
        .stdout(predicate::str::contains("LLM: not configured"));
}

#[test]
fn test_health_reports_unreachable_embedder() {
    let dir = TempDir::new().unwrap();
    healthguard(dir.path())
        .env("EMBEDDING_PROVIDER", "tei")
        .env("EMBEDDING_URL", "http://127.0.0.1:9")
        .env("EMBEDDING_TIMEOUT_SECS", "2")
        .args(["health"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("✗ Embeddings"));
}

#[test]
fn test_hospitals_for_condition() {
    let dir = TempDir::new().unwrap();
    let overpass = serve_once(OVERPASS_RESPONSE);

    healthguard(dir.path())
        .env("OVERPASS_URL", format!("{}/api/interpreter", overpass))
        .args([
            "hospitals",
            "--condition",
            "pneumonia",
            "--lat",
            "51.5074",
            "--lon",
            "-0.1278",
            "--radius",
            "8",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Condition: Community-Acquired Pneumonia (CAP)"))
        .stdout(predicate::str::contains("Specialty: Pulmonology"))
        .stdout(predicate::str::contains("Urgency: Urgent"))
        .stdout(predicate::str::contains("1. Royal Chest Hospital (Hospital)"))
        .stdout(predicate::str::contains("2. City General (Hospital)"))
        .stdout(predicate::str::contains("+44 20 1111 2222"));
}

#[test]
fn test_hospitals_from_note_json() {
    let dir = TempDir::new().unwrap();
    let overpass = serve_once(OVERPASS_RESPONSE);

    let output = healthguard(dir.path())
        .env("OVERPASS_URL", overpass)
        .args(["--memory", "hospitals", "--note", PNEUMONIA_NOTE, "--lat", "51.5074", "--lon", "-0.1278", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["recommendation"]["condition"], "Community-Acquired Pneumonia (CAP)");
    assert_eq!(json["recommendation"]["urgency"], "urgent");
    assert_eq!(json["facilities"].as_array().unwrap().len(), 2);
}

#[test]
fn test_hospitals_requires_location() {
    let dir = TempDir::new().unwrap();
    healthguard(dir.path())
        .args(["hospitals", "--condition", "Sepsis"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Provide --location"));
}
