//! Unit tests for environment-driven configuration.
//!
//! Environment variables are process-global, so these tests serialize
//! on a shared lock and scrub every key they touch.

use std::env;
use std::sync::{Mutex, MutexGuard, PoisonError};

use task_autopilot::config::{GlobalConfig, TaskSource};

static ENV_LOCK: Mutex<()> = Mutex::new(());

const KEYS: &[&str] = &[
    "TASKS_AUTO_ENABLED",
    "TASKS_AUTO_POLL_INTERVAL_MS",
    "TASKS_AUTO_BATCH_SIZE",
    "TASKS_AUTO_SOURCE",
    "TASKS_FLEX_POLL_LIMIT",
    "TASKS_FLEX_CLOSE_CONVERSATION",
    "TASKS_FLEX_COMPLETE_TASK",
    "TASKS_AUTOMATION_AUTHOR",
    "TASKS_AUTO_PING_DELAY_MS",
    "TASKS_AUTO_INACTIVE_DELAY_MS",
    "TWILIO_ACCOUNT_SID",
    "TWILIO_AUTH_TOKEN",
    "TWILIO_PHONE_NUMBER",
    "TWILIO_WORKSPACE_SID",
    "HTTP_PORT",
    "DATABASE_PATH",
];

fn clean_env() -> MutexGuard<'static, ()> {
    let guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    for key in KEYS {
        env::remove_var(key);
    }
    guard
}

#[test]
fn defaults_with_empty_environment() {
    let _guard = clean_env();

    let config = GlobalConfig::from_env().expect("valid config");
    assert!(config.automation.enabled);
    assert_eq!(config.automation.poll_interval_ms, 1000);
    assert_eq!(config.automation.batch_size, 100);
    assert_eq!(config.automation.source, TaskSource::Auto);
    assert_eq!(config.automation.flex_poll_limit, 50);
    assert!(config.automation.close_conversation);
    assert!(config.automation.complete_task);
    assert_eq!(config.automation.automation_author, "System");
    assert_eq!(config.automation.ping_delay_ms, 5000);
    assert_eq!(config.automation.inactive_delay_ms, 30_000);
    assert_eq!(config.http_port, 3000);
    assert_eq!(config.db_path, "tasks.db");
    assert!(config.provider.is_none());
}

#[test]
fn toggles_disable_only_on_literal_false() {
    let _guard = clean_env();

    env::set_var("TASKS_AUTO_ENABLED", "false");
    env::set_var("TASKS_FLEX_CLOSE_CONVERSATION", "no");
    env::set_var("TASKS_FLEX_COMPLETE_TASK", "0");
    let config = GlobalConfig::from_env().expect("valid config");
    assert!(!config.automation.enabled);
    // Anything other than the literal "false" keeps the toggle on.
    assert!(config.automation.close_conversation);
    assert!(config.automation.complete_task);
}

#[test]
fn source_modes_parse() {
    let _guard = clean_env();

    env::set_var("TASKS_AUTO_SOURCE", "internal");
    assert_eq!(
        GlobalConfig::from_env().expect("valid").automation.source,
        TaskSource::Internal
    );

    env::set_var("TASKS_AUTO_SOURCE", "flex");
    assert_eq!(
        GlobalConfig::from_env().expect("valid").automation.source,
        TaskSource::Flex
    );

    env::set_var("TASKS_AUTO_SOURCE", "sideways");
    assert!(GlobalConfig::from_env().is_err());
}

#[test]
fn numeric_overrides_and_validation() {
    let _guard = clean_env();

    env::set_var("TASKS_AUTO_POLL_INTERVAL_MS", "250");
    env::set_var("TASKS_AUTO_BATCH_SIZE", "7");
    env::set_var("TASKS_FLEX_POLL_LIMIT", "5");
    let config = GlobalConfig::from_env().expect("valid config");
    assert_eq!(config.automation.poll_interval_ms, 250);
    assert_eq!(config.automation.batch_size, 7);
    assert_eq!(config.automation.flex_poll_limit, 5);

    env::set_var("TASKS_AUTO_BATCH_SIZE", "zero");
    assert!(GlobalConfig::from_env().is_err());
    env::set_var("TASKS_AUTO_BATCH_SIZE", "0");
    assert!(GlobalConfig::from_env().is_err());
}

#[test]
fn inactive_offset_must_exceed_ping_offset() {
    let _guard = clean_env();

    env::set_var("TASKS_AUTO_PING_DELAY_MS", "30000");
    env::set_var("TASKS_AUTO_INACTIVE_DELAY_MS", "5000");
    assert!(GlobalConfig::from_env().is_err());
}

#[test]
fn provider_requires_complete_credentials() {
    let _guard = clean_env();

    env::set_var("TWILIO_ACCOUNT_SID", "AC123");
    let partial = GlobalConfig::from_env().expect("valid config");
    assert!(partial.provider.is_none());

    env::set_var("TWILIO_AUTH_TOKEN", "secret");
    env::set_var("TWILIO_PHONE_NUMBER", "+15550001111");
    env::set_var("TWILIO_WORKSPACE_SID", "WS999");
    let full = GlobalConfig::from_env().expect("valid config");
    let provider = full.provider.expect("provider configured");
    assert_eq!(provider.account_sid, "AC123");
    assert_eq!(provider.workspace_sid.as_deref(), Some("WS999"));
}
