use std::io::Write;

use weft_core::config::AppConfig;
use weft_core::error::WeftError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
working_dir = "/tmp/weft-assets"
max_steps = 500

[model]
provider = "anthropic"
model_id = "claude-3-haiku-20240307"
api_key = "sk-test-key"
max_tokens = 1024
temperature = 0.2

[model.retry]
max_retries = 5

[database]
path = "/tmp/weft-test.db"

[embedding]
base_url = "http://localhost:11434/v1"
model = "nomic-embed-text"
dims = 768
batch_size = 16

[log]
filter = "weft=debug"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.working_dir, "/tmp/weft-assets");
    assert_eq!(config.engine.max_steps, 500);

    let model = config.model.expect("model present");
    assert_eq!(model.provider, "anthropic");
    assert_eq!(model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(model.max_tokens, 1024);
    let retry = model.retry.expect("retry present");
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_backoff_ms, 1000);

    assert_eq!(config.database.path, "/tmp/weft-test.db");
    let embedding = config.embedding.expect("embedding present");
    assert_eq!(embedding.model, "nomic-embed-text");
    assert_eq!(embedding.dims, 768);
    assert_eq!(embedding.batch_size, 16);
    assert!(embedding.api_key.is_none());
    assert_eq!(config.log.filter, "weft=debug");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("WEFT_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
api_key = "${WEFT_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(
        config.model.and_then(|m| m.api_key),
        Some("expanded-key-value".to_string())
    );

    std::env::remove_var("WEFT_TEST_API_KEY");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\n").expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.working_dir, ".");
    assert_eq!(config.engine.max_steps, 0);
    assert!(config.model.is_none());
    assert!(config.embedding.is_none());
    assert_eq!(config.database.path, ":memory:");
    assert_eq!(config.log.filter, "weft=info,warn");
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weft.toml");

    assert!(matches!(AppConfig::load(&path), Err(WeftError::ConfigNotFound(_))));
    let config = AppConfig::load_or_default(&path).expect("defaults");
    assert_eq!(config.database.path, ":memory:");
}

#[test]
fn test_malformed_file_is_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine\nmax_steps = ").expect("write toml");

    assert!(matches!(
        AppConfig::load_or_default(tmp.path()),
        Err(WeftError::Config(_))
    ));
}
