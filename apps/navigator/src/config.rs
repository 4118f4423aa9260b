use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use client_core::DEFAULT_API_BASE_URL;
use serde::Deserialize;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "navigator.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub online_model: bool,
    pub request_timeout_seconds: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            online_model: true,
            request_timeout_seconds: 30,
            log_filter: "info".into(),
        }
    }
}

/// Every key is optional; absent keys keep the previous layer's value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    api_base_url: Option<String>,
    online_model: Option<bool>,
    request_timeout_seconds: Option<u64>,
    log_filter: Option<String>,
}

/// Defaults, then the config file, then the environment. An explicit
/// `config_path` must exist; the default `navigator.toml` is optional.
pub fn load_settings(
    config_path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let (path, required) = match config_path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    match fs::read_to_string(&path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
            if let Some(v) = file_cfg.api_base_url {
                settings.api_base_url = v;
            }
            if let Some(v) = file_cfg.online_model {
                settings.online_model = v;
            }
            if let Some(v) = file_cfg.request_timeout_seconds {
                settings.request_timeout_seconds = v;
            }
            if let Some(v) = file_cfg.log_filter {
                settings.log_filter = v;
            }
        }
        Err(e) if required => {
            return Err(e).with_context(|| format!("failed to read config file '{}'", path.display()));
        }
        Err(_) => {}
    }

    if let Some(v) = env("NAVIGATOR_API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = env("APP__ONLINE_MODEL") {
        settings.online_model = parse_flag(&v)
            .with_context(|| format!("APP__ONLINE_MODEL must be a boolean, got '{v}'"))?;
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECONDS") {
        settings.request_timeout_seconds = v
            .trim()
            .parse()
            .with_context(|| format!("APP__REQUEST_TIMEOUT_SECONDS must be a number, got '{v}'"))?;
    }

    if let Some(v) = env("RUST_LOG") {
        settings.log_filter = v;
    }
    if let Some(v) = env("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    settings.api_base_url = normalize_api_base_url(&settings.api_base_url)?;
    Ok(settings)
}

/// Trims whitespace and trailing slashes and checks the result is an
/// http(s) URL.
pub fn normalize_api_base_url(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        bail!("api base url must not be empty");
    }

    let parsed = Url::parse(trimmed).with_context(|| format!("invalid api base url '{raw}'"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("api base url '{raw}' must use http or https");
    }

    Ok(trimmed.to_string())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
