// tests/config_load.rs
use country_sentiment::config::{AppConfig, ENV_API_KEY, ENV_CONFIG_PATH};
use std::{env, fs};

#[test]
fn file_values_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("sentiment.toml");
    fs::write(
        &p,
        r#"
batch_size = 5
freshness_window_hours = 12
store_dir = "/var/lib/sentiment"

[llm]
provider = " Mock "
"#,
    )
    .unwrap();

    let cfg = AppConfig::load_from_file(&p).unwrap();
    assert_eq!(cfg.batch_size, 5);
    assert_eq!(cfg.freshness_window(), chrono::Duration::hours(12));
    assert_eq!(cfg.store_dir.to_str(), Some("/var/lib/sentiment"));
    assert_eq!(cfg.llm.provider, "mock");
    assert!(cfg.llm.api_key.is_empty());
    // untouched fields keep defaults
    assert_eq!(cfg.max_retries, 2);
    assert_eq!(cfg.initial_backoff_secs, 15);
}

#[test]
fn unknown_provider_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("sentiment.toml");
    fs::write(&p, "[llm]\nprovider = \"openai\"\n").unwrap();
    assert!(AppConfig::load_from_file(&p).is_err());
}

#[test]
fn broken_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("sentiment.toml");
    fs::write(&p, "batch_size = [").unwrap();
    assert!(AppConfig::load_from_file(&p).is_err());
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // Isolate CWD so the repo's own config/ is not picked up.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();

    env::remove_var(ENV_CONFIG_PATH);
    env::set_var(ENV_API_KEY, "test-key");

    // 1) Nothing on disk -> built-in defaults, key from env
    let cfg = AppConfig::load_default().unwrap();
    assert_eq!(cfg.batch_size, 3);
    assert_eq!(cfg.llm.api_key, "test-key");

    // 2) Fallback file in ./config/
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("sentiment.toml"), "batch_size = 4\n").unwrap();
    assert_eq!(AppConfig::load_default().unwrap().batch_size, 4);

    // 3) Env path wins over the fallback
    let p_env = tmp.path().join("elsewhere.toml");
    fs::write(&p_env, "batch_size = 99\n").unwrap();
    env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
    // clamped into 1..=10
    assert_eq!(AppConfig::load_default().unwrap().batch_size, 10);

    // 4) Env path pointing nowhere is an error, not a silent fallback
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(AppConfig::load_default().is_err());

    env::remove_var(ENV_CONFIG_PATH);
    env::remove_var(ENV_API_KEY);
    env::set_current_dir(&old).unwrap();
}

#[serial_test::serial]
#[test]
fn missing_api_key_leaves_key_empty() {
    env::remove_var(ENV_API_KEY);
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("sentiment.toml");
    fs::write(&p, "[llm]\nprovider = \"gemini\"\n").unwrap();

    let cfg = AppConfig::load_from_file(&p).unwrap();
    assert!(cfg.llm.enabled);
    assert!(cfg.llm.api_key.is_empty());
}
