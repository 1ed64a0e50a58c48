use mls_config::{
    load_layered_yaml_from_strings, report_unused_keys, ConfigConsumer, UnusedKeyPolicy,
};

const YAML: &str = r#"
database:
  url_env: MLS_DATABASE_URL
settlement:
  customer_pool_pct: 15
daemon:
  sweep_interval_secs: 30
legacy:
  payout_mode: "company49"
"#;

#[test]
fn warn_reports_unused_keys_without_error() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report = report_unused_keys(
        ConfigConsumer::Cli,
        &loaded.config_json,
        UnusedKeyPolicy::Warn,
    )
    .expect("warn must not error");

    // The CLI never reads the daemon schedule.
    assert_eq!(
        report.unused_leaf_pointers,
        vec![
            "/daemon/sweep_interval_secs".to_string(),
            "/legacy/payout_mode".to_string(),
        ]
    );
}

#[test]
fn daemon_consumes_its_schedule() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report = report_unused_keys(
        ConfigConsumer::Daemon,
        &loaded.config_json,
        UnusedKeyPolicy::Warn,
    )
    .unwrap();
    assert_eq!(report.unused_leaf_pointers, vec!["/legacy/payout_mode"]);
}

#[test]
fn fail_errors_on_unused_keys() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let err = report_unused_keys(
        ConfigConsumer::Daemon,
        &loaded.config_json,
        UnusedKeyPolicy::Fail,
    )
    .unwrap_err()
    .to_string();
    assert!(err.contains("CONFIG_UNUSED_KEYS"), "{err}");
    assert!(err.contains("/legacy/payout_mode"), "{err}");
}

#[test]
fn clean_config_passes_fail_policy() {
    let yaml = "settlement:\n  rank_soft_cap_pct: 90\n";
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let report =
        report_unused_keys(ConfigConsumer::Cli, &loaded.config_json, UnusedKeyPolicy::Fail)
            .unwrap();
    assert!(report.is_clean());
}
