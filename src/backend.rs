//! Admin backend endpoints used by the signup flow
//!
//! `GET /embedded-signup/config` supplies the provider identifiers and
//! `POST /embedded-signup/complete` provisions the connection from an
//! authorization code.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::listener::SessionPayload;
use crate::provider::{ProviderConfig, ProviderError};
use crate::settings::SignupSettings;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Backend returned status {status}")]
    Status {
        status: u16,
        message: Option<String>,
    },
    #[error("Backend rejected the request: {}", .0.as_deref().unwrap_or("no reason given"))]
    Rejected(Option<String>),
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),
    #[error("Invalid provider config: {0}")]
    Provider(#[from] ProviderError),
    #[error("Invalid backend URL: {0}")]
    Url(#[from] url::ParseError),
}

impl BackendError {
    /// Human-readable reason supplied by the backend, if any
    pub fn backend_reason(&self) -> Option<&str> {
        match self {
            BackendError::Status { message, .. } => message.as_deref(),
            BackendError::Rejected(message) => message.as_deref(),
            _ => None,
        }
        .map(str::trim)
        .filter(|m| !m.is_empty())
    }
}

/// Body of `POST /embedded-signup/complete`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub code: String,
    pub entity_id: String,
    pub session_info: Option<SessionPayload>,
}

/// Provisioning data returned by a successful exchange
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionResult {
    pub data: Option<serde_json::Value>,
}

/// Response envelope used across the admin API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    fn reason(&self) -> Option<String> {
        self.error.clone().or_else(|| self.message.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConfigBody {
    Bare(ProviderConfig),
    Enveloped(ApiEnvelope<ProviderConfig>),
}

/// Backend operations the flow depends on
#[async_trait]
pub trait SignupBackend: Send + Sync {
    async fn fetch_config(&self) -> Result<ProviderConfig, BackendError>;

    async fn complete_signup(&self, request: &ExchangeRequest) -> Result<ProvisionResult, BackendError>;
}

/// reqwest-backed implementation of [`SignupBackend`]
#[derive(Debug, Clone)]
pub struct HttpSignupBackend {
    client: reqwest::Client,
    base_url: Url,
    bearer_token: Option<String>,
}

impl HttpSignupBackend {
    /// Build a backend with its own client honoring the configured timeout
    pub fn new(settings: &SignupSettings) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;
        Self::with_client(client, settings)
    }

    /// Build a backend around a shared client
    pub fn with_client(client: reqwest::Client, settings: &SignupSettings) -> Result<Self, BackendError> {
        let mut base_url = Url::parse(&settings.backend_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            bearer_token: settings.bearer_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base_url.join(path)?)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn parse_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "message"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|m| !m.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl SignupBackend for HttpSignupBackend {
    async fn fetch_config(&self) -> Result<ProviderConfig, BackendError> {
        let url = self.endpoint("embedded-signup/config")?;
        let response = self.authorize(self.client.get(url)).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: parse_error_message(&body),
            });
        }

        let config = match serde_json::from_str::<ConfigBody>(&body)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?
        {
            ConfigBody::Bare(config) => config,
            ConfigBody::Enveloped(envelope) => {
                if !envelope.success {
                    return Err(BackendError::Rejected(envelope.reason()));
                }
                envelope.data.ok_or_else(|| {
                    BackendError::InvalidResponse("config response has no data".to_string())
                })?
            }
        };

        config.validate()?;
        Ok(config)
    }

    async fn complete_signup(&self, request: &ExchangeRequest) -> Result<ProvisionResult, BackendError> {
        let url = self.endpoint("embedded-signup/complete")?;
        let response = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: parse_error_message(&body),
            });
        }

        let envelope: ApiEnvelope<serde_json::Value> = serde_json::from_str(&body)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        if !envelope.success {
            return Err(BackendError::Rejected(envelope.reason()));
        }

        Ok(ProvisionResult { data: envelope.data })
    }
}
