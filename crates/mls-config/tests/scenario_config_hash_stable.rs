//! Config hash stability.
//!
//! GREEN when:
//! - the same inputs hash identically on every load
//! - key order inside a YAML document does not change the hash
//! - a changed value or an override layer changes the hash

use mls_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
database:
  url_env: "MLS_DATABASE_URL"
settlement:
  customer_pool_pct: 15
  gratitude:
    max_levels: 21
    reference_value: "3450000"
    pool_pct: 7
"#;

const BASE_YAML_REORDERED: &str = r#"
settlement:
  gratitude:
    pool_pct: 7
    reference_value: "3450000"
    max_levels: 21
  customer_pool_pct: 15
database:
  url_env: "MLS_DATABASE_URL"
"#;

const OVERLAY_YAML: &str = r#"
settlement:
  customer_pool_pct: 12
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let original = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let reordered = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(
        original.config_hash, reordered.config_hash,
        "key order in YAML must not change the hash"
    );
}

#[test]
fn overlay_changes_hash_and_wins() {
    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let layered = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(base.config_hash, layered.config_hash);
    assert_eq!(
        layered.config_json.pointer("/settlement/customer_pool_pct"),
        Some(&serde_json::json!(12))
    );
    // Untouched siblings survive the merge.
    assert_eq!(
        layered.config_json.pointer("/settlement/gratitude/max_levels"),
        Some(&serde_json::json!(21))
    );
}

#[test]
fn hash_is_lowercase_sha256_hex() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded
        .config_hash
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
}
