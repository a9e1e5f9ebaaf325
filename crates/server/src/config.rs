use std::{fs, path::Path, path::PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::api::MAX_TAKE;

pub const SETTINGS_FILE: &str = "server.toml";
pub const MAX_SEED_COUNT: u32 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_bind: String,
    /// Bearer tokens accepted by `/posts`. Empty accepts any non-blank token.
    pub auth_tokens: Vec<String>,
    pub seed_file: Option<PathBuf>,
    pub seed_count: u32,
    pub default_take: u32,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            auth_tokens: vec!["dev-token".into()],
            seed_file: None,
            seed_count: 57,
            default_take: 10,
            log_filter: "info".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    auth_tokens: Option<Vec<String>>,
    seed_file: Option<PathBuf>,
    seed_count: Option<u32>,
    default_take: Option<u32>,
    log_filter: Option<String>,
}

/// Defaults, then `server.toml` in the working directory, then environment.
pub fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    let path = Path::new(SETTINGS_FILE);
    if path.exists() {
        apply_file(&mut settings, path)?;
    }
    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

pub fn apply_file(settings: &mut Settings, path: &Path) -> anyhow::Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let file_cfg: FileSettings = toml::from_str(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;

    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.auth_tokens {
        settings.auth_tokens = v;
    }
    if let Some(v) = file_cfg.seed_file {
        settings.seed_file = Some(v);
    }
    if let Some(v) = file_cfg.seed_count {
        settings.seed_count = v;
    }
    if let Some(v) = file_cfg.default_take {
        settings.default_take = v;
    }
    if let Some(v) = file_cfg.log_filter {
        settings.log_filter = v;
    }
    check_limits(settings).with_context(|| format!("invalid settings in '{}'", path.display()))
}

pub fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = lookup("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = lookup("APP__AUTH_TOKENS") {
        settings.auth_tokens = split_tokens(&v);
    }

    if let Some(v) = lookup("APP__SEED_FILE") {
        settings.seed_file = Some(PathBuf::from(v));
    }

    if let Some(v) = lookup("APP__SEED_COUNT") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.seed_count = parsed;
        }
    }

    if let Some(v) = lookup("APP__DEFAULT_TAKE") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.default_take = parsed;
        }
    }

    if let Some(v) = lookup("RUST_LOG") {
        settings.log_filter = v;
    }
    if let Some(v) = lookup("APP__LOG_FILTER") {
        settings.log_filter = v;
    }
    check_limits(settings).context("invalid settings in environment")
}

fn check_limits(settings: &Settings) -> anyhow::Result<()> {
    if settings.default_take == 0 || settings.default_take > MAX_TAKE {
        bail!(
            "default_take must be between 1 and {MAX_TAKE}, got {}",
            settings.default_take
        );
    }
    if settings.seed_count > MAX_SEED_COUNT {
        bail!(
            "seed_count must be at most {MAX_SEED_COUNT}, got {}",
            settings.seed_count
        );
    }
    Ok(())
}

fn split_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
