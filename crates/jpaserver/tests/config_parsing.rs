use std::{env, fs};

use jpaserver::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("jpaserver.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
body_limit_bytes = 1024

[search]
default_count = 5
max_count = 10
max_joins = 16

[subscriptions]
poll_interval_ms = 250

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses, unspecified keys keep their defaults
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.search.default_count, 5);
    assert_eq!(cfg.search.max_count, 10);
    assert_eq!(cfg.search.max_joins, 16);
    assert_eq!(cfg.subscriptions.poll_interval_ms, 250);
    assert_eq!(cfg.subscriptions.outbound_buffer, 32);
    assert_eq!(cfg.logging.level.to_ascii_lowercase(), "debug");

    // 2) Env override should win over file
    unsafe {
        env::set_var("JPASERVER__SEARCH__DEFAULT_COUNT", "9");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.search.default_count, 9);
    unsafe {
        env::remove_var("JPASERVER__SEARCH__DEFAULT_COUNT");
    }

    // 3) Invalid config (default > max) should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[search]
default_count = 50
max_count = 10
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("default_count must be <="));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");
    let cfg = load_config(path.to_str()).expect("defaults");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.subscriptions.poll_interval_ms, 1000);
}
