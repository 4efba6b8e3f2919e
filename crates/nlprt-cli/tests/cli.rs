use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn nlprt() -> Command {
    Command::cargo_bin("nlprt").unwrap()
}

/// Config file pointing the model cache into `dir`.
fn config_in(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("config.json");
    let cache = dir.path().join("cache");
    fs::write(
        &path,
        format!(r#"{{"models": {{"cache_dir": {:?}}}}}"#, cache.to_string_lossy()),
    )
    .unwrap();
    path
}

#[test]
fn help_lists_commands() {
    nlprt()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("predict"))
        .stdout(predicate::str::contains("models"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn models_list_shows_default_repositories() {
    let dir = TempDir::new().unwrap();
    nlprt()
        .arg("-c")
        .arg(config_in(&dir))
        .args(["models", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("distilbert-base-uncased-finetuned-sst-2-english"))
        .stdout(predicate::str::contains("Helsinki-NLP/opus-mt-en-fr"));
}

#[test]
fn models_path_uses_configured_cache() {
    let dir = TempDir::new().unwrap();
    nlprt()
        .arg("-c")
        .arg(config_in(&dir))
        .args(["models", "path", "summarization"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cache"))
        .stdout(predicate::str::contains("facebook--bart-large-cnn"));
}

#[test]
fn models_status_reports_missing_files() {
    let dir = TempDir::new().unwrap();
    nlprt()
        .arg("-c")
        .arg(config_in(&dir))
        .args(["models", "status", "sentiment"])
        .assert()
        .success()
        .stdout(predicate::str::contains("missing"))
        .stdout(predicate::str::contains("nlprt models download sentiment"));
}

#[test]
fn unknown_task_is_rejected() {
    nlprt()
        .args(["models", "path", "poetry"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown task"));
}

#[test]
fn config_init_then_get_and_set() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("nlprt.json");

    nlprt()
        .args(["config", "init", "--output"])
        .arg(&path)
        .assert()
        .success();
    assert!(path.exists());

    nlprt()
        .args(["config", "init", "--output"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    nlprt()
        .arg("-c")
        .arg(&path)
        .args(["config", "get", "qa.top_k"])
        .assert()
        .success()
        .stdout("1\n");

    nlprt()
        .arg("-c")
        .arg(&path)
        .args(["config", "set", "qa.top_k", "3"])
        .assert()
        .success();

    nlprt()
        .arg("-c")
        .arg(&path)
        .args(["config", "get", "qa.top_k"])
        .assert()
        .success()
        .stdout("3\n");
}

#[test]
fn config_get_unknown_key_fails() {
    let dir = TempDir::new().unwrap();
    nlprt()
        .arg("-c")
        .arg(config_in(&dir))
        .args(["config", "get", "qa.nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("qa.nope"));
}

#[test]
fn config_set_rejects_invalid_decoding() {
    let dir = TempDir::new().unwrap();
    nlprt()
        .arg("-c")
        .arg(config_in(&dir))
        .args(["config", "set", "generation.top_p", "1.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("top_p"));
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    nlprt()
        .arg("-c")
        .arg(dir.path().join("absent.json"))
        .args(["models", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn predict_reports_missing_artifacts() {
    let dir = TempDir::new().unwrap();
    let model_dir = dir.path().join("model");
    fs::create_dir_all(&model_dir).unwrap();

    nlprt()
        .arg("-c")
        .arg(config_in(&dir))
        .args(["predict", "sentiment", "I love it", "--architecture", "distilbert", "--model-dir"])
        .arg(&model_dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("artifact not found"))
        .stderr(predicate::str::contains("model.onnx"));
}

#[test]
fn predict_rejects_unknown_architecture() {
    nlprt()
        .args(["predict", "ner", "Amy", "--architecture", "llama", "--model-dir", "."])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported architecture"));
}

#[test]
fn predict_needs_architecture_or_config_json() {
    let dir = TempDir::new().unwrap();
    nlprt()
        .arg("-c")
        .arg(config_in(&dir))
        .args(["predict", "pos", "Amy walks", "--model-dir"])
        .arg(dir.path().join("cache"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--architecture"));
}

#[test]
fn zero_shot_requires_labels() {
    nlprt()
        .args(["predict", "zero-shot", "Who won the election?"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--labels"));
}
