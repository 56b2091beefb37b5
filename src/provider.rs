//! Provider-side types for the Embedded Signup flow
//!
//! The provider's JavaScript SDK is reached through the [`ProviderSdk`] trait so the
//! flow can be driven by a real webview bridge or by a scripted stand-in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::SignupSettings;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider config is incomplete: missing {0}")]
    IncompleteConfig(&'static str),
}

/// Error reported by the provider SDK surface
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SdkError {
    #[error("SDK script failed to load: {0}")]
    ScriptLoad(String),
    #[error("SDK initialization failed: {0}")]
    Init(String),
}

/// Provider identifiers supplied by the backend, immutable for one flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub provider_app_id: String,
    pub flow_config_id: String,
}

impl ProviderConfig {
    /// Build a config, rejecting blank identifiers
    pub fn new(
        provider_app_id: impl Into<String>,
        flow_config_id: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let config = Self {
            provider_app_id: provider_app_id.into(),
            flow_config_id: flow_config_id.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject blank identifiers
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.provider_app_id.trim().is_empty() {
            return Err(ProviderError::IncompleteConfig("providerAppId"));
        }
        if self.flow_config_id.trim().is_empty() {
            return Err(ProviderError::IncompleteConfig("flowConfigId"));
        }
        Ok(())
    }
}

/// Parameters passed to the SDK's initialization call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkInitParams {
    pub app_id: String,
    pub auto_log_app_events: bool,
    pub xfbml: bool,
    pub version: String,
}

impl SdkInitParams {
    /// Init parameters for `config` at protocol `version`
    pub fn new(config: &ProviderConfig, version: &str) -> Self {
        Self {
            app_id: config.provider_app_id.clone(),
            auto_log_app_events: true,
            xfbml: true,
            version: version.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginExtras {
    pub setup: serde_json::Map<String, serde_json::Value>,
    pub feature_type: String,
    pub session_info_version: String,
}

/// Flow configuration handed to the SDK's login call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub config_id: String,
    pub response_type: String,
    pub override_default_response_type: bool,
    pub extras: LoginExtras,
}

impl LoginRequest {
    /// Login request for `config` using the configured session info version
    pub fn new(config: &ProviderConfig, settings: &SignupSettings) -> Self {
        Self {
            config_id: config.flow_config_id.clone(),
            response_type: "code".to_string(),
            override_default_response_type: true,
            extras: LoginExtras {
                setup: serde_json::Map::new(),
                feature_type: String::new(),
                session_info_version: settings.session_info_version.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub code: Option<String>,
}

/// Raw payload of the SDK login callback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "authResponse", default)]
    pub auth_response: Option<AuthResponse>,
}

impl LoginResponse {
    /// Callback payload carrying an authorization code
    pub fn granted(code: impl Into<String>) -> Self {
        Self {
            status: Some("connected".to_string()),
            auth_response: Some(AuthResponse {
                code: Some(code.into()),
            }),
        }
    }

    /// Callback payload for a closed popup
    pub fn closed() -> Self {
        Self {
            status: Some("unknown".to_string()),
            auth_response: None,
        }
    }
}

/// Outcome of one popup authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResult {
    Granted(String),
    Denied,
    Cancelled,
}

impl From<LoginResponse> for AuthorizationResult {
    fn from(response: LoginResponse) -> Self {
        if response.status.as_deref() == Some("not_authorized") {
            return AuthorizationResult::Denied;
        }

        match response.auth_response {
            Some(auth) => match auth.code.map(|c| c.trim().to_string()) {
                Some(code) if !code.is_empty() => AuthorizationResult::Granted(code),
                _ => AuthorizationResult::Denied,
            },
            None => AuthorizationResult::Cancelled,
        }
    }
}

impl AuthorizationResult {
    /// Short label for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            AuthorizationResult::Granted(_) => "granted",
            AuthorizationResult::Denied => "denied",
            AuthorizationResult::Cancelled => "cancelled",
        }
    }
}

/// Surface of the external provider SDK consumed by the flow
#[async_trait]
pub trait ProviderSdk: Send + Sync {
    /// Inject the SDK script; resolves once the script has loaded
    async fn load_script(&self) -> Result<(), SdkError>;

    /// Run the SDK's init call; resolves when its initialization callback fires
    async fn init(&self, params: &SdkInitParams) -> Result<(), SdkError>;

    /// Open the provider popup and wait for its login callback
    async fn login(&self, request: &LoginRequest) -> LoginResponse;
}

/// Shorten a secret for log output
pub(crate) fn mask_code(code: &str) -> String {
    let prefix: String = code.chars().take(4).collect();
    format!("{}***", prefix)
}
