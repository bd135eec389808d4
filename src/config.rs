use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{self, Credentials};
use crate::mutation::{FailurePolicy, MutationPolicies};
use crate::overlay;

const DEFAULT_ENV_PREFIX: &str = "BOARD";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub mutations: MutationPolicies,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_cookie: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            session_cookie: None,
            bearer_token: None,
        }
    }
}

impl ApiConfig {
    /// A bearer token takes precedence over a session cookie.
    pub fn credentials(&self) -> Credentials {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        if let Some(token) = non_empty(&self.bearer_token) {
            Credentials::Bearer(token)
        } else if let Some(cookie) = non_empty(&self.session_cookie) {
            Credentials::Cookie(cookie)
        } else {
            Credentials::Anonymous
        }
    }
}

fn default_base_url() -> String {
    api::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("board-sync/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlayConfig {
    /// Database file; defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            path: None,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_key_prefix() -> String {
    overlay::DEFAULT_KEY_PREFIX.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "warn".to_string()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.trim().is_empty() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.user_agent.trim().is_empty() {
        base.api.user_agent = other.api.user_agent;
    }
    if !other.api.timeout.is_zero() {
        base.api.timeout = other.api.timeout;
    }
    if other.api.session_cookie.is_some() {
        base.api.session_cookie = other.api.session_cookie;
    }
    if other.api.bearer_token.is_some() {
        base.api.bearer_token = other.api.bearer_token;
    }

    if other.feed.page_size != 0 {
        base.feed.page_size = other.feed.page_size;
    }

    if other.overlay.path.is_some() {
        base.overlay.path = other.overlay.path;
    }
    if !other.overlay.key_prefix.is_empty() {
        base.overlay.key_prefix = other.overlay.key_prefix;
    }

    base.mutations = other.mutations;

    if !other.logging.filter.trim().is_empty() {
        base.logging.filter = other.logging.filter;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "api.session_cookie" => cfg.api.session_cookie = Some(value),
        "api.bearer_token" => cfg.api.bearer_token = Some(value),
        "feed.page_size" => {
            if let Ok(parsed) = value.parse::<u32>() {
                if parsed > 0 {
                    cfg.feed.page_size = parsed;
                }
            }
        }
        "overlay.path" => cfg.overlay.path = Some(PathBuf::from(value)),
        "overlay.key_prefix" => cfg.overlay.key_prefix = value,
        "mutations.like" | "mutations.unlike" | "mutations.edit" | "mutations.delete" => {
            let Some(policy) = parse_policy(&value) else {
                return;
            };
            match key {
                "mutations.like" => cfg.mutations.like = policy,
                "mutations.unlike" => cfg.mutations.unlike = policy,
                "mutations.edit" => cfg.mutations.edit = policy,
                _ => cfg.mutations.delete = policy,
            }
        }
        "logging.filter" => cfg.logging.filter = value,
        _ => {}
    }
}

fn parse_policy(value: &str) -> Option<FailurePolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "revert" => Some(FailurePolicy::Revert),
        "report-only" | "report_only" | "reportonly" => Some(FailurePolicy::ReportOnly),
        _ => None,
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("board-sync").join("config.yaml"))
}

/// Store the session cookie used to authenticate, keeping the rest of the
/// file intact.
pub fn save_session_cookie(path: Option<PathBuf>, cookie: &str) -> Result<PathBuf> {
    let cookie = cookie.trim();
    anyhow::ensure!(!cookie.is_empty(), "config: api.session_cookie is required");

    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };
    cfg.api.session_cookie = Some(cookie.to_string());

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}
