//! Environment-driven configuration parsing and validation.
//!
//! Every knob is read from the process environment so the binary can run
//! unchanged across deployments. Boolean toggles follow the convention
//! "enabled unless the variable is the literal string `false`".

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::{AppError, Result};

/// Which task source the reconciliation loop draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSource {
    /// Only the internal SMS task table.
    Internal,
    /// Only provider-managed TaskRouter tasks.
    Flex,
    /// Prefer flex when it has work, fall back to internal.
    Auto,
}

impl TaskSource {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "internal" => Ok(Self::Internal),
            "flex" => Ok(Self::Flex),
            "auto" | "" => Ok(Self::Auto),
            other => Err(AppError::Config(format!(
                "TASKS_AUTO_SOURCE must be internal, flex or auto; got '{other}'"
            ))),
        }
    }
}

/// Tunables for the automation engine.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Master toggle for the reconciliation loop.
    pub enabled: bool,
    /// Tick period in milliseconds.
    pub poll_interval_ms: u64,
    /// Internal tasks fetched per tick.
    pub batch_size: u32,
    /// Task source resolution mode.
    pub source: TaskSource,
    /// Provider tasks fetched per tick.
    pub flex_poll_limit: u32,
    /// Close the conversation when a flex task goes inactive.
    pub close_conversation: bool,
    /// Complete the provider task when a flex task goes inactive.
    pub complete_task: bool,
    /// Author string for automated messages when no worker identity resolves.
    pub automation_author: String,
    /// Ping offset from the greeting timestamp, milliseconds.
    pub ping_delay_ms: u64,
    /// Inactivity-close offset from the greeting timestamp, milliseconds.
    pub inactive_delay_ms: u64,
}

impl AutomationConfig {
    /// Ping offset as a [`Duration`].
    #[must_use]
    pub fn ping_offset(&self) -> Duration {
        Duration::from_millis(self.ping_delay_ms)
    }

    /// Inactivity offset as a [`Duration`].
    #[must_use]
    pub fn inactive_offset(&self) -> Duration {
        Duration::from_millis(self.inactive_delay_ms)
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            source: TaskSource::Auto,
            flex_poll_limit: default_flex_poll_limit(),
            close_conversation: true,
            complete_task: true,
            automation_author: default_automation_author(),
            ping_delay_ms: default_ping_delay_ms(),
            inactive_delay_ms: default_inactive_delay_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> u32 {
    100
}

fn default_flex_poll_limit() -> u32 {
    50
}

fn default_automation_author() -> String {
    "System".into()
}

fn default_ping_delay_ms() -> u64 {
    5000
}

fn default_inactive_delay_ms() -> u64 {
    30_000
}

fn default_http_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "tasks.db".into()
}

/// Credentials and addressing for the messaging provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider account identifier.
    pub account_sid: String,
    /// Provider auth token.
    pub auth_token: String,
    /// Sender number for outbound SMS.
    pub phone_number: String,
    /// TaskRouter workspace; auto-detected when unset.
    pub workspace_sid: Option<String>,
}

/// Global configuration assembled from the process environment.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// HTTP bind port.
    pub http_port: u16,
    /// SQLite database file path.
    pub db_path: String,
    /// Automation engine tunables.
    pub automation: AutomationConfig,
    /// Provider credentials; `None` runs the engine without a live provider.
    pub provider: Option<ProviderConfig>,
}

impl GlobalConfig {
    /// Assemble configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is present but unparseable.
    pub fn from_env() -> Result<Self> {
        let automation = AutomationConfig {
            enabled: env_flag("TASKS_AUTO_ENABLED"),
            poll_interval_ms: env_u64("TASKS_AUTO_POLL_INTERVAL_MS", default_poll_interval_ms())?,
            batch_size: env_u32("TASKS_AUTO_BATCH_SIZE", default_batch_size())?,
            source: TaskSource::parse(&env::var("TASKS_AUTO_SOURCE").unwrap_or_default())?,
            flex_poll_limit: env_u32("TASKS_FLEX_POLL_LIMIT", default_flex_poll_limit())?,
            close_conversation: env_flag("TASKS_FLEX_CLOSE_CONVERSATION"),
            complete_task: env_flag("TASKS_FLEX_COMPLETE_TASK"),
            automation_author: env_or("TASKS_AUTOMATION_AUTHOR", default_automation_author),
            ping_delay_ms: env_u64("TASKS_AUTO_PING_DELAY_MS", default_ping_delay_ms())?,
            inactive_delay_ms: env_u64(
                "TASKS_AUTO_INACTIVE_DELAY_MS",
                default_inactive_delay_ms(),
            )?,
        };

        let config = Self {
            http_port: env_u64("HTTP_PORT", u64::from(default_http_port()))?
                .try_into()
                .map_err(|_| AppError::Config("HTTP_PORT out of range".into()))?,
            db_path: env_or("DATABASE_PATH", default_db_path),
            automation,
            provider: load_provider_config(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.automation.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "TASKS_AUTO_POLL_INTERVAL_MS must be greater than zero".into(),
            ));
        }
        if self.automation.batch_size == 0 {
            return Err(AppError::Config(
                "TASKS_AUTO_BATCH_SIZE must be greater than zero".into(),
            ));
        }
        if self.automation.inactive_delay_ms <= self.automation.ping_delay_ms {
            return Err(AppError::Config(
                "TASKS_AUTO_INACTIVE_DELAY_MS must exceed TASKS_AUTO_PING_DELAY_MS".into(),
            ));
        }
        Ok(())
    }
}

/// Load provider credentials; warn and return `None` when incomplete.
fn load_provider_config() -> Option<ProviderConfig> {
    let account_sid = non_empty_var("TWILIO_ACCOUNT_SID");
    let auth_token = non_empty_var("TWILIO_AUTH_TOKEN");
    let phone_number = non_empty_var("TWILIO_PHONE_NUMBER");

    match (account_sid, auth_token, phone_number) {
        (Some(account_sid), Some(auth_token), Some(phone_number)) => Some(ProviderConfig {
            account_sid,
            auth_token,
            phone_number,
            workspace_sid: non_empty_var("TWILIO_WORKSPACE_SID"),
        }),
        (None, None, None) => None,
        _ => {
            warn!("partial provider credentials in environment; provider disabled");
            None
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: fn() -> String) -> String {
    non_empty_var(key).unwrap_or_else(default)
}

/// `true` unless the variable is the literal string `false`.
fn env_flag(key: &str) -> bool {
    env::var(key).map_or(true, |v| v.trim() != "false")
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match non_empty_var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} must be an integer; got '{raw}'"))),
    }
}

fn env_u32(key: &str, default: u32) -> Result<u32> {
    match non_empty_var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} must be an integer; got '{raw}'"))),
    }
}
