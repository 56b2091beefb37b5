//! Signup flow settings
//!
//! Layered configuration for the Embedded Signup flow: built-in defaults, an
//! optional TOML file, then `EMBEDDED_SIGNUP_*` environment overrides.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default environment variable prefix
pub const ENV_PREFIX: &str = "EMBEDDED_SIGNUP_";

/// Discriminator carried by every provider message that belongs to this flow
pub const DEFAULT_MESSAGE_DISCRIMINATOR: &str = "WA_EMBEDDED_SIGNUP";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid environment override {variable}: {reason}")]
    InvalidEnvironment { variable: String, reason: String },
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Settings for one Embedded Signup deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignupSettings {
    /// Base URL of the admin REST backend (`/embedded-signup/*` is appended)
    pub backend_url: String,
    /// Origins allowed to deliver session messages
    pub trusted_origins: Vec<String>,
    /// Value of the `type` field identifying this flow's messages
    pub message_discriminator: String,
    /// Provider SDK protocol version passed at init
    pub sdk_version: String,
    /// Session info version requested from the popup
    pub session_info_version: String,
    pub request_timeout_secs: u64,
    pub bearer_token: Option<String>,
}

impl Default for SignupSettings {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3000/api".to_string(),
            trusted_origins: vec![
                "https://www.facebook.com".to_string(),
                "https://web.facebook.com".to_string(),
            ],
            message_discriminator: DEFAULT_MESSAGE_DISCRIMINATOR.to_string(),
            sdk_version: "v21.0".to_string(),
            session_info_version: "3".to_string(),
            request_timeout_secs: 30,
            bearer_token: None,
        }
    }
}

impl SignupSettings {
    /// Parse settings from TOML; absent keys keep their defaults
    pub fn from_toml_str(raw: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load from `path` when it exists, then apply environment overrides and validate
    pub fn resolve(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) if path.exists() => Self::load(path)?,
            _ => Self::default(),
        };
        EnvironmentOverrides::load().apply(&mut settings);
        settings.validate()?;
        Ok(settings)
    }

    /// Request timeout for the shared backend HTTP client
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), SettingsError> {
        Url::parse(&self.backend_url)
            .map_err(|e| SettingsError::Invalid(format!("backend_url {}: {}", self.backend_url, e)))?;

        if self.trusted_origins.is_empty() {
            return Err(SettingsError::Invalid(
                "trusted_origins must list at least one origin".to_string(),
            ));
        }

        for origin in &self.trusted_origins {
            let url = Url::parse(origin)
                .map_err(|e| SettingsError::Invalid(format!("trusted origin {}: {}", origin, e)))?;
            let is_local = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"));
            if url.scheme() != "https" && !is_local {
                return Err(SettingsError::Invalid(format!(
                    "trusted origin {} must use https",
                    origin
                )));
            }
        }

        if self.message_discriminator.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "message_discriminator cannot be empty".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(SettingsError::Invalid(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("embedded-signup").join("settings.toml"))
    }
}

/// Environment variable overrides
#[derive(Debug, Default)]
pub struct EnvironmentOverrides {
    pub backend_url: Option<String>,
    pub trusted_origins: Option<Vec<String>>,
    pub message_discriminator: Option<String>,
    pub sdk_version: Option<String>,
    pub session_info_version: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub bearer_token: Option<String>,
    pub errors: Vec<SettingsError>,
}

impl EnvironmentOverrides {
    /// Load overrides from the process environment
    pub fn load() -> Self {
        Self::load_with_prefix(ENV_PREFIX)
    }

    /// Load overrides with custom prefix
    pub fn load_with_prefix(prefix: &str) -> Self {
        Self::from_lookup(prefix, |key| env::var(key).ok())
    }

    /// Load overrides through an arbitrary lookup function
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{}{}", prefix, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut overrides = Self {
            backend_url: get("BACKEND_URL"),
            trusted_origins: get("TRUSTED_ORIGINS").map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            }),
            message_discriminator: get("MESSAGE_TYPE"),
            sdk_version: get("SDK_VERSION"),
            session_info_version: get("SESSION_INFO_VERSION"),
            request_timeout_secs: None,
            bearer_token: get("BEARER_TOKEN"),
            errors: Vec::new(),
        };

        if let Some(raw) = get("REQUEST_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) => overrides.request_timeout_secs = Some(secs),
                Err(e) => overrides.errors.push(SettingsError::InvalidEnvironment {
                    variable: format!("{}REQUEST_TIMEOUT_SECS", prefix),
                    reason: e.to_string(),
                }),
            }
        }

        overrides
    }

    /// Check if any overrides are set
    pub fn has_any_overrides(&self) -> bool {
        self.backend_url.is_some()
            || self.trusted_origins.is_some()
            || self.message_discriminator.is_some()
            || self.sdk_version.is_some()
            || self.session_info_version.is_some()
            || self.request_timeout_secs.is_some()
            || self.bearer_token.is_some()
    }

    /// Apply overrides on top of `settings`
    pub fn apply(&self, settings: &mut SignupSettings) {
        for error in &self.errors {
            tracing::warn!("Ignoring environment override: {}", error);
        }

        if let Some(url) = &self.backend_url {
            settings.backend_url = url.clone();
        }
        if let Some(origins) = &self.trusted_origins {
            settings.trusted_origins = origins.clone();
        }
        if let Some(discriminator) = &self.message_discriminator {
            settings.message_discriminator = discriminator.clone();
        }
        if let Some(version) = &self.sdk_version {
            settings.sdk_version = version.clone();
        }
        if let Some(version) = &self.session_info_version {
            settings.session_info_version = version.clone();
        }
        if let Some(secs) = self.request_timeout_secs {
            settings.request_timeout_secs = secs;
        }
        if let Some(token) = &self.bearer_token {
            settings.bearer_token = Some(token.clone());
        }
    }
}
