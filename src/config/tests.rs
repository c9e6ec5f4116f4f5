use super::load_config;
use super::settings::{PartialQueueSettings, PartialSettings, Settings};

use serial_test::serial;
use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.store.path, "popq_db");
    assert_eq!(settings.queue.visibility_timeout_secs, 30);
    assert_eq!(settings.queue.retention_period_days, 14);
    assert_eq!(settings.queue.max_receive_count, 3);
    assert_eq!(settings.queue.batch_size, 10);
    assert_eq!(settings.topic.max_delivery_attempts, 3);
    assert_eq!(settings.worker.poll_interval_ms, 1000);
    assert_eq!(settings.logging.level, "info");
    assert!(settings.validate().is_ok());
}

#[test]
fn test_settings_convert_to_runtime_policies() {
    let settings = Settings::default();

    let queue = settings.queue.queue_config().unwrap();
    assert_eq!(queue.visibility_timeout, Duration::from_secs(30));
    assert_eq!(queue.retention_period, Duration::from_secs(14 * 86_400));
    assert_eq!(queue.max_receive_count, 3);

    let retry = settings.topic.retry_policy();
    assert_eq!(retry.max_attempts, 3);
    assert_eq!(retry.initial_backoff, Duration::from_millis(100));
    assert_eq!(retry.max_backoff, Duration::from_secs(2));
}

#[test]
fn test_partial_settings_keep_unset_defaults() {
    let partial = PartialSettings {
        queue: Some(PartialQueueSettings {
            batch_size: Some(5),
            ..PartialQueueSettings::default()
        }),
        ..PartialSettings::default()
    };

    let settings = partial.merge(Settings::default());
    assert_eq!(settings.queue.batch_size, 5);
    assert_eq!(settings.queue.max_receive_count, 3);
    assert_eq!(settings.topic, Settings::default().topic);
}

#[test]
fn test_validate_rejects_out_of_range_values() {
    let mut settings = Settings::default();
    settings.queue.batch_size = 11;
    assert!(settings.validate().is_err());

    settings.queue.batch_size = 0;
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.queue.max_receive_count = 0;
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.queue.visibility_timeout_secs = 0;
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.queue.retention_period_days = u64::MAX;
    assert!(settings.queue.queue_config().is_err());
    assert!(settings.validate().is_err());

    let mut settings = Settings::default();
    settings.notify.source_address = " ".into();
    assert!(settings.validate().is_err());
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    // load_config reads config/default.toml relative to the working directory
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [store]
        path = "/var/lib/popq"

        [queue]
        name = "orders"
        visibility_timeout_secs = 5
        max_receive_count = 4

        [notify]
        source_address = "alerts@example.com"
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.store.path, "/var/lib/popq");
    assert_eq!(cfg.queue.name, "orders");
    assert_eq!(cfg.queue.visibility_timeout_secs, 5);
    assert_eq!(cfg.queue.max_receive_count, 4);
    assert_eq!(cfg.queue.batch_size, 10);
    assert_eq!(cfg.notify.source_address, "alerts@example.com");
}

#[test]
#[serial]
fn test_load_config_from_env() {
    temp_env::with_vars(
        [
            ("POPQ_QUEUE__MAX_RECEIVE_COUNT", Some("5")),
            ("POPQ_TOPIC__NAME", Some("alerts")),
            ("POPQ_LOGGING__LEVEL", Some("debug")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.queue.max_receive_count, 5);
            assert_eq!(cfg.topic.name, "alerts");
            assert_eq!(cfg.logging.level, "debug");
        },
    );
}

#[test]
#[serial]
fn test_load_config_rejects_oversized_batch() {
    temp_env::with_var("POPQ_QUEUE__BATCH_SIZE", Some("11"), || {
        assert!(load_config().is_err());
    });
}
