//! Scenario: CLI commands that never reach the database.
//!
//! GREEN when:
//! - `config-hash` prints a stable `config_hash=` line for the shipped defaults
//!   and an overlay changes it
//! - a literal secret in config aborts before anything connects
//! - `payback` rejects a malformed amount before connecting
//! - `sweep` without a database URL names the missing env var

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

fn repo_path(rel: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join(rel)
        .to_string_lossy()
        .to_string()
}

fn defaults() -> String {
    repo_path("../../config/defaults.yaml")
}

fn config_hash_of(paths: &[String]) -> String {
    let out = Command::cargo_bin("mls")
        .unwrap()
        .arg("config-hash")
        .args(paths)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8(out.stdout)
        .unwrap()
        .lines()
        .find_map(|l| l.strip_prefix("config_hash=").map(str::to_string))
        .expect("config_hash line")
}

#[test]
fn config_hash_is_stable_and_layer_sensitive() {
    let base = config_hash_of(&[defaults()]);
    assert_eq!(base.len(), 64);
    assert_eq!(base, config_hash_of(&[defaults()]));

    let layered = config_hash_of(&[defaults(), repo_path("tests/fixtures/overlay.yaml")]);
    assert_ne!(base, layered);
}

#[test]
fn secret_literal_in_config_is_rejected() {
    Command::cargo_bin("mls")
        .unwrap()
        .arg("config-hash")
        .arg(repo_path("tests/fixtures/secret_literal.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"))
        .stderr(predicate::str::contains("hunter2").not());
}

#[test]
fn payback_rejects_malformed_amount_offline() {
    Command::cargo_bin("mls")
        .unwrap()
        .env_remove("MLS_DATABASE_URL")
        .args(["payback", "--member", "EL001", "--product", "1", "--amount", "12x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --amount"));
}

#[test]
fn sweep_without_database_url_names_the_variable() {
    Command::cargo_bin("mls")
        .unwrap()
        .env_remove("MLS_DATABASE_URL")
        .args(["sweep", "--config", &defaults()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SECRETS_MISSING"))
        .stderr(predicate::str::contains("MLS_DATABASE_URL"));
}
