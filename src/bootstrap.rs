//! Provider SDK bootstrap
//!
//! Loads and initializes the provider SDK at most once per process. Concurrent
//! callers while initialization is in flight wait for the same attempt instead of
//! injecting the script again.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::provider::{ProviderConfig, ProviderSdk, SdkError, SdkInitParams};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
}

impl From<SdkError> for BootstrapError {
    fn from(err: SdkError) -> Self {
        BootstrapError::ProviderUnavailable(err.to_string())
    }
}

/// Proof that the SDK finished its own initialization callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkHandle {
    pub app_id: String,
    pub version: String,
    pub initialized_at: DateTime<Utc>,
}

/// Init-once guard around the provider SDK
///
/// The first outcome is kept for the life of the process, failures included: a
/// script that failed to load is not injected again until the host reloads.
#[derive(Debug, Default)]
pub struct SdkBootstrap {
    outcome: OnceCell<Result<SdkHandle, BootstrapError>>,
    injections: AtomicUsize,
}

impl SdkBootstrap {
    /// Create an uninitialized bootstrap
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve once the SDK is usable; a loaded script alone is not enough
    pub async fn ensure_ready(
        &self,
        sdk: &dyn ProviderSdk,
        config: &ProviderConfig,
        version: &str,
    ) -> Result<SdkHandle, BootstrapError> {
        let handle = self
            .outcome
            .get_or_init(|| self.inject(sdk, config, version))
            .await
            .clone()?;

        if handle.app_id != config.provider_app_id {
            tracing::warn!(
                initialized = %handle.app_id,
                requested = %config.provider_app_id,
                "Provider SDK already initialized for a different app id"
            );
        }

        Ok(handle)
    }

    async fn inject(
        &self,
        sdk: &dyn ProviderSdk,
        config: &ProviderConfig,
        version: &str,
    ) -> Result<SdkHandle, BootstrapError> {
        self.injections.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(app_id = %config.provider_app_id, "Injecting provider SDK script");

        let loaded = async {
            sdk.load_script().await?;
            let params = SdkInitParams::new(config, version);
            sdk.init(&params).await?;
            Ok::<_, SdkError>(params)
        }
        .await;

        match loaded {
            Ok(params) => {
                tracing::info!(app_id = %params.app_id, version = %params.version, "Provider SDK ready");
                Ok(SdkHandle {
                    app_id: params.app_id,
                    version: params.version,
                    initialized_at: Utc::now(),
                })
            }
            Err(err) => {
                tracing::warn!(app_id = %config.provider_app_id, "Provider SDK unavailable: {}", err);
                Err(BootstrapError::from(err))
            }
        }
    }

    /// Readiness signal; never reverts once true
    pub fn is_ready(&self) -> bool {
        matches!(self.outcome.get(), Some(Ok(_)))
    }

    /// Handle of the initialized SDK, if initialization succeeded
    pub fn handle(&self) -> Option<&SdkHandle> {
        self.outcome.get().and_then(|outcome| outcome.as_ref().ok())
    }

    /// Stored failure from the one injection attempt, if it failed
    pub fn failure(&self) -> Option<&BootstrapError> {
        self.outcome.get().and_then(|outcome| outcome.as_ref().err())
    }

    /// Number of script injections attempted
    pub fn injection_count(&self) -> usize {
        self.injections.load(Ordering::SeqCst)
    }
}

static GLOBAL_BOOTSTRAP: Lazy<Arc<SdkBootstrap>> = Lazy::new(|| Arc::new(SdkBootstrap::new()));

/// Process-wide SDK bootstrap shared by every flow instance
pub fn global_bootstrap() -> Arc<SdkBootstrap> {
    Arc::clone(&GLOBAL_BOOTSTRAP)
}
