use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_UPLOAD_FOLDER: &str = "post-ig";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com/v21.0";
pub const DEFAULT_ASSET_API_URL: &str = "https://api.cloudinary.com";

const ACCESS_TOKEN: &str = "INSTAGRAM_ACCESS_TOKEN";
const ACCOUNT_ID: &str = "INSTAGRAM_ACCOUNT_ID";
const APP_SECRET: &str = "INSTAGRAM_APP_SECRET";
const GRAPH_URL: &str = "INSTAGRAM_GRAPH_URL";
const CLOUD_NAME: &str = "CLOUDINARY_CLOUD_NAME";
const API_KEY: &str = "CLOUDINARY_API_KEY";
const API_SECRET: &str = "CLOUDINARY_API_SECRET";
const UPLOAD_FOLDER: &str = "CLOUDINARY_UPLOAD_FOLDER";
const ASSET_API_URL: &str = "CLOUDINARY_API_URL";
const BIND: &str = "POST_IG_BIND";
const TIMEZONE: &str = "POST_IG_TIMEZONE";
const CONFIG_PATH: &str = "POST_IG_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Unknown timezone '{0}'")]
    Timezone(String),

    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

/// Whether the write path can run, and which keys keep it from doing so.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvStatus {
    pub ready: bool,
    pub missing: Vec<&'static str>,
}

/// Raw configuration. Every credential is optional here so that a partially
/// configured dashboard can still render and explain what is missing.
#[derive(Clone, Default, Deserialize)]
pub struct Config {
    pub access_token: Option<String>,
    pub account_id: Option<String>,
    pub app_secret: Option<String>,
    pub graph_url: Option<String>,
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub upload_folder: Option<String>,
    pub asset_api_url: Option<String>,
    pub bind: Option<String>,
    pub timezone: Option<String>,
}

/// Resolved credentials for the two providers.
#[derive(Clone)]
pub struct Credentials {
    pub access_token: String,
    pub account_id: String,
    pub app_secret: Option<String>,
    pub graph_url: String,
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub upload_folder: String,
    pub asset_api_url: String,
}

fn redact(value: &Option<String>) -> &'static str {
    if value.is_some() { "***REDACTED***" } else { "<unset>" }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("access_token", &redact(&self.access_token))
            .field("account_id", &self.account_id)
            .field("app_secret", &redact(&self.app_secret))
            .field("graph_url", &self.graph_url)
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("upload_folder", &self.upload_folder)
            .field("asset_api_url", &self.asset_api_url)
            .field("bind", &self.bind)
            .field("timezone", &self.timezone)
            .finish()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"***REDACTED***")
            .field("account_id", &self.account_id)
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &"***REDACTED***")
            .field("api_secret", &"***REDACTED***")
            .field("upload_folder", &self.upload_folder)
            .finish()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Config {
    /// Loads the optional TOML file, then lets environment variables override it.
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(e) = dotenv_problem(dotenvy::dotenv()) {
            tracing::warn!("Ignoring .env file: {e}");
        }

        let path = config_path();
        let mut config = match path {
            Some(ref path) if path.exists() => {
                let config = Self::from_file(path)?;
                tracing::info!("Config loaded from {}", path.display());
                config
            }
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overrides fields with any non-empty value `lookup` returns for their key.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields: [(&str, &mut Option<String>); 11] = [
            (ACCESS_TOKEN, &mut self.access_token),
            (ACCOUNT_ID, &mut self.account_id),
            (APP_SECRET, &mut self.app_secret),
            (GRAPH_URL, &mut self.graph_url),
            (CLOUD_NAME, &mut self.cloud_name),
            (API_KEY, &mut self.api_key),
            (API_SECRET, &mut self.api_secret),
            (UPLOAD_FOLDER, &mut self.upload_folder),
            (ASSET_API_URL, &mut self.asset_api_url),
            (BIND, &mut self.bind),
            (TIMEZONE, &mut self.timezone),
        ];
        for (key, slot) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *slot = Some(value);
            }
        }
    }

    /// Never fails: missing keys are reported by their environment variable name.
    pub fn status(&self) -> EnvStatus {
        let required = [
            (ACCESS_TOKEN, &self.access_token),
            (ACCOUNT_ID, &self.account_id),
            (CLOUD_NAME, &self.cloud_name),
            (API_KEY, &self.api_key),
            (API_SECRET, &self.api_secret),
        ];
        let missing: Vec<&'static str> = required
            .into_iter()
            .filter(|(_, value)| present(value).is_none())
            .map(|(key, _)| key)
            .collect();
        EnvStatus {
            ready: missing.is_empty(),
            missing,
        }
    }

    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let status = self.status();
        if !status.ready {
            return Err(ConfigError::Missing(status.missing));
        }
        let required = |value: &Option<String>| present(value).unwrap_or_default().to_string();
        Ok(Credentials {
            access_token: required(&self.access_token),
            account_id: required(&self.account_id),
            app_secret: present(&self.app_secret).map(str::to_string),
            graph_url: present(&self.graph_url)
                .unwrap_or(DEFAULT_GRAPH_URL)
                .trim_end_matches('/')
                .to_string(),
            cloud_name: required(&self.cloud_name),
            api_key: required(&self.api_key),
            api_secret: required(&self.api_secret),
            upload_folder: present(&self.upload_folder)
                .unwrap_or(DEFAULT_UPLOAD_FOLDER)
                .to_string(),
            asset_api_url: present(&self.asset_api_url)
                .unwrap_or(DEFAULT_ASSET_API_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub fn bind_addr(&self) -> &str {
        present(&self.bind).unwrap_or(DEFAULT_BIND)
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        match present(&self.timezone) {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ConfigError::Timezone(name.to_string())),
            None => Ok(Tz::UTC),
        }
    }
}

/// A missing `.env` is normal; anything else is worth reporting.
fn dotenv_problem(result: dotenvy::Result<PathBuf>) -> Option<dotenvy::Error> {
    match result {
        Err(e) if !e.not_found() => Some(e),
        _ => None,
    }
}

fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH) {
        return Some(PathBuf::from(path));
    }
    let home = std::env::var("HOME").ok()?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("post-ig")
            .join("config.toml"),
    )
}
