//! Client configuration: defaults, then `attendance.toml`, then environment.

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use shared::domain::UserId;
use thiserror::Error;
use url::Url;

use crate::runtime::QueuePolicy;

pub const DEFAULT_CONFIG_FILE: &str = "attendance.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid base url '{value}': {source}")]
    BaseUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("base url '{0}' must use http or https")]
    BaseUrlScheme(String),
    #[error("invalid value '{value}' for {key}: {reason}")]
    Value {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub base_url: String,
    pub user_id: Option<UserId>,
    pub token: Option<String>,
    pub request_timeout_secs: u64,
    pub queue_policy: QueuePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".into(),
            user_id: None,
            token: None,
            request_timeout_secs: 30,
            queue_policy: QueuePolicy::Fifo,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    base_url: Option<String>,
    user_id: Option<i64>,
    token: Option<String>,
    request_timeout_secs: Option<u64>,
    queue_policy: Option<QueuePolicy>,
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn apply_toml(&mut self, raw: &str, path: &str) -> Result<(), SettingsError> {
        let file: FileSettings = toml::from_str(raw).map_err(|source| SettingsError::Parse {
            path: path.to_string(),
            source,
        })?;
        if let Some(v) = file.base_url {
            self.base_url = v;
        }
        if let Some(v) = file.user_id {
            self.user_id = Some(UserId(v));
        }
        if let Some(v) = file.token {
            self.token = Some(v);
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout_secs = v;
        }
        if let Some(v) = file.queue_policy {
            self.queue_policy = v;
        }
        Ok(())
    }

    /// Applies environment overrides read through `lookup`. For each setting
    /// the `APP__*` name wins over the `ATTENDANCE_*` one.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |primary: &str, override_key: &str| lookup(override_key).or_else(|| lookup(primary));

        if let Some(v) = pick("ATTENDANCE_BASE_URL", "APP__BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = pick("ATTENDANCE_USER_ID", "APP__USER_ID") {
            let parsed = v.trim().parse::<i64>().map_err(|e| SettingsError::Value {
                key: "user_id",
                value: v.clone(),
                reason: e.to_string(),
            })?;
            self.user_id = Some(UserId(parsed));
        }
        if let Some(v) = pick("ATTENDANCE_TOKEN", "APP__TOKEN") {
            self.token = Some(v);
        }
        if let Some(v) = pick("ATTENDANCE_TIMEOUT_SECS", "APP__TIMEOUT_SECS") {
            self.request_timeout_secs = v.trim().parse::<u64>().map_err(|e| SettingsError::Value {
                key: "request_timeout_secs",
                value: v.clone(),
                reason: e.to_string(),
            })?;
        }
        if let Some(v) = pick("ATTENDANCE_QUEUE_POLICY", "APP__QUEUE_POLICY") {
            self.queue_policy = v.parse().map_err(|reason| SettingsError::Value {
                key: "queue_policy",
                value: v.clone(),
                reason,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let url = Url::parse(&self.base_url).map_err(|source| SettingsError::BaseUrl {
            value: self.base_url.clone(),
            source,
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SettingsError::BaseUrlScheme(self.base_url.clone()));
        }
        if self.request_timeout_secs == 0 {
            return Err(SettingsError::Value {
                key: "request_timeout_secs",
                value: "0".into(),
                reason: "must be at least one second".into(),
            });
        }
        Ok(())
    }
}

/// Loads settings from `path` (or [`DEFAULT_CONFIG_FILE`] when it exists) and
/// the process environment.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, SettingsError> {
    let mut settings = Settings::default();

    let explicit = path.is_some();
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let display = path.display().to_string();
    match fs::read_to_string(path) {
        Ok(raw) => settings.apply_toml(&raw, &display)?,
        Err(err) if !explicit && err.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(SettingsError::Read {
                path: display,
                source,
            })
        }
    }

    settings.apply_env(|key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
