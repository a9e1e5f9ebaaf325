use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use feed_core::ExhaustionRule;
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "feed.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub auth_token: Option<String>,
    pub page_size: Option<u32>,
    pub request_timeout: Duration,
    pub exhaustion_rule: ExhaustionRule,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8443".into(),
            auth_token: None,
            page_size: None,
            request_timeout: Duration::from_secs(15),
            exhaustion_rule: ExhaustionRule::default(),
            log_filter: "warn".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    auth_token: Option<String>,
    page_size: Option<u32>,
    request_timeout_ms: Option<u64>,
    exhaustion_rule: Option<ExhaustionRule>,
    log_filter: Option<String>,
}

/// Defaults, then the settings file (`feed.toml` unless `path` is given), then
/// environment. A missing default file is fine; a missing explicit one is not.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    match path {
        Some(path) => apply_file(&mut settings, path)?,
        None => {
            let default_path = Path::new(SETTINGS_FILE);
            if default_path.exists() {
                apply_file(&mut settings, default_path)?;
            }
        }
    }
    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

pub fn apply_file(settings: &mut Settings, path: &Path) -> anyhow::Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let file_cfg: FileSettings = toml::from_str(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;

    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.auth_token {
        settings.auth_token = Some(v);
    }
    if let Some(v) = file_cfg.page_size {
        settings.page_size = Some(v);
    }
    if let Some(v) = file_cfg.request_timeout_ms {
        settings.request_timeout = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.exhaustion_rule {
        settings.exhaustion_rule = v;
    }
    if let Some(v) = file_cfg.log_filter {
        settings.log_filter = v;
    }
    Ok(())
}

pub fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = lookup("FEED_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = lookup("FEED_AUTH_TOKEN") {
        settings.auth_token = Some(v);
    }
    if let Some(v) = lookup("APP__AUTH_TOKEN") {
        settings.auth_token = Some(v);
    }

    if let Some(v) = lookup("APP__PAGE_SIZE") {
        let parsed = v
            .parse::<u32>()
            .with_context(|| format!("APP__PAGE_SIZE must be a number, got '{v}'"))?;
        settings.page_size = Some(parsed);
    }

    if let Some(v) = lookup("APP__REQUEST_TIMEOUT_MS") {
        let parsed = v
            .parse::<u64>()
            .with_context(|| format!("APP__REQUEST_TIMEOUT_MS must be a number, got '{v}'"))?;
        settings.request_timeout = Duration::from_millis(parsed);
    }

    if let Some(v) = lookup("APP__EXHAUSTION_RULE") {
        settings.exhaustion_rule = v.parse().map_err(anyhow::Error::msg)?;
    }

    if let Some(v) = lookup("RUST_LOG") {
        settings.log_filter = v;
    }
    if let Some(v) = lookup("APP__LOG_FILTER") {
        settings.log_filter = v;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
