use std::{fs, path::Path, time::Duration};

use anyhow::{ensure, Context};
use serde::Deserialize;
use shared::domain::DEFAULT_MAX_FILE_SIZE;
use tracing::warn;
use url::Url;

use crate::controller::ControllerConfig;

pub const SETTINGS_FILE: &str = "uploader.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    /// Prefix for the relative artifact paths in results; the api base url when unset.
    pub artifact_base_url: Option<String>,
    pub max_file_size: u64,
    pub request_timeout_secs: u64,
    pub heartbeat_interval_ms: u64,
    pub completion_grace_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".into(),
            artifact_base_url: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            request_timeout_secs: 600,
            heartbeat_interval_ms: 500,
            completion_grace_ms: 500,
        }
    }
}

impl Settings {
    pub fn artifact_base_url(&self) -> &str {
        self.artifact_base_url
            .as_deref()
            .unwrap_or(&self.api_base_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_file_size: self.max_file_size,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            completion_grace: Duration::from_millis(self.completion_grace_ms),
            ..ControllerConfig::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        Url::parse(&self.api_base_url)
            .with_context(|| format!("invalid api base url '{}'", self.api_base_url))?;
        Url::parse(self.artifact_base_url())
            .with_context(|| format!("invalid artifact base url '{}'", self.artifact_base_url()))?;
        ensure!(self.max_file_size > 0, "max_file_size must be positive");
        ensure!(
            self.request_timeout_secs > 0,
            "request_timeout_secs must be positive"
        );
        ensure!(
            self.heartbeat_interval_ms > 0,
            "heartbeat_interval_ms must be positive"
        );
        Ok(())
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the optional TOML file, then environment overrides.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => match toml::from_str::<Settings>(&raw) {
            Ok(file_settings) => file_settings,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring unreadable settings file");
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    };

    if let Some(v) = lookup(&env, &["API_URL", "APP__API_URL"]) {
        settings.api_base_url = v;
    }
    if let Some(v) = lookup(&env, &["ARTIFACT_BASE_URL", "APP__ARTIFACT_BASE_URL"]) {
        settings.artifact_base_url = Some(v);
    }
    if let Some(v) = lookup_number(&env, &["MAX_FILE_SIZE", "APP__MAX_FILE_SIZE"]) {
        settings.max_file_size = v;
    }
    if let Some(v) = lookup_number(&env, &["APP__REQUEST_TIMEOUT_SECS"]) {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = lookup_number(&env, &["APP__HEARTBEAT_INTERVAL_MS"]) {
        settings.heartbeat_interval_ms = v;
    }
    if let Some(v) = lookup_number(&env, &["APP__COMPLETION_GRACE_MS"]) {
        settings.completion_grace_ms = v;
    }

    settings
}

/// Later keys win over earlier ones.
fn lookup(env: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| env(*key))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .last()
}

fn lookup_number(env: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<u64> {
    let mut found = None;
    for key in keys {
        let Some(raw) = env(*key) else {
            continue;
        };
        match raw.trim().parse::<u64>() {
            Ok(parsed) => found = Some(parsed),
            Err(_) => warn!(key = *key, value = %raw, "ignoring non-numeric setting override"),
        }
    }
    found
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
