//! Configuration loading and validation tests
//!
//! Tests focus on the observable outcome of loading a TOML file: defaults,
//! overrides written in the file, and the errors for unusable values.

use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use vstore::config::{ConfigError, VStoreConfig};
use vstore::MatchingMode;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_minimal_config_gets_defaults() {
    let temp_file = write_config(
        r#"
[storage]
base_dir = "/var/lib/vstore"

[master]
url = "http://master.local:50000"
"#,
    );

    let config = VStoreConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.storage.base_dir, PathBuf::from("/var/lib/vstore"));
    assert_eq!(config.master_url().unwrap().as_str(), "http://master.local:50000/");
    assert_eq!(config.matching.mode, MatchingMode::RulesNextOnNoMatch);
    assert!(config.matching.multiple_nodes_per_rule);
    assert_eq!(config.noise.rms_threshold, 1000);
    assert_eq!(config.noise.db_threshold, -25);
    assert!(!config.evaluation.enabled);
    assert!(config.upload.max_attempts >= 1);
}

#[test]
fn test_full_config_overrides_defaults() {
    let temp_file = write_config(
        r#"
[storage]
base_dir = "/data"

[master]
url = "https://master.example.org/api"
config_connect_timeout_secs = 7

[matching]
mode = "RANDOM"
multiple_nodes_per_rule = false

[upload]
max_attempts = 5
retry_delay_secs = 2

[evaluation]
enabled = true
logging_url = "http://eval.example.org"
"#,
    );

    let config = VStoreConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.master.config_connect_timeout_secs, 7);
    assert_eq!(config.matching.mode, MatchingMode::Random);
    assert!(!config.matching.multiple_nodes_per_rule);
    assert_eq!(config.upload.max_attempts, 5);
    assert_eq!(config.upload_retry_delay().as_secs(), 2);
    assert!(config.evaluation.enabled);
}

#[test]
fn test_invalid_master_url_is_rejected() {
    let temp_file = write_config(
        r#"
[storage]
base_dir = "/data"

[master]
url = "not a url"
"#,
    );

    let result = VStoreConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_evaluation_requires_logging_url() {
    let temp_file = write_config(
        r#"
[storage]
base_dir = "/data"

[master]
url = "http://master"

[evaluation]
enabled = true
"#,
    );

    let err = VStoreConfig::load_from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("logging_url"));
}

#[test]
fn test_logging_url_from_missing_env_var() {
    let temp_file = write_config(
        r#"
[storage]
base_dir = "/data"

[master]
url = "http://master"

[evaluation]
enabled = true
logging_url_env = "VSTORE_TEST_UNSET_LOGGING_URL"
"#,
    );

    match VStoreConfig::load_from_file(temp_file.path()) {
        Err(ConfigError::EnvVarNotFound(name)) => assert_eq!(name, "VSTORE_TEST_UNSET_LOGGING_URL"),
        other => panic!("expected a missing variable, got {other:?}"),
    }
}

#[test]
fn test_logging_url_from_env_var() {
    std::env::set_var("VSTORE_TEST_LOGGING_URL", "http://logs.local:8080");
    let temp_file = write_config(
        r#"
[storage]
base_dir = "/data"

[master]
url = "http://master"

[evaluation]
enabled = true
logging_url_env = "VSTORE_TEST_LOGGING_URL"
"#,
    );

    let config = VStoreConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.evaluation.logging_url.as_deref(), Some("http://logs.local:8080"));
}

#[test]
fn test_zero_upload_attempts_is_rejected() {
    let mut config = VStoreConfig::new("/data", "http://master");
    config.upload.max_attempts = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("[storage\nbase_dir = ");
    assert!(VStoreConfig::load_from_file(temp_file.path()).is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    let result = VStoreConfig::load_from_file(std::path::Path::new("/no/such/vstore.toml"));
    assert!(result.is_err());
}
