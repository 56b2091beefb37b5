//! Embedded Signup flow
//!
//! Wires the bootstrap, launcher, listener and exchange coordinator to one
//! [`ConnectionMachine`]. `&mut self` on every driving method keeps a single
//! operation in flight per flow.

use std::sync::Arc;

use crate::backend::{ProvisionResult, SignupBackend};
use crate::bootstrap::{global_bootstrap, SdkBootstrap, SdkHandle};
use crate::exchange::CodeExchangeCoordinator;
use crate::launcher::{run_popup, LaunchError, PopupLauncher, PopupOutcome, PreparedLaunch};
use crate::listener::MessageBus;
use crate::machine::{ConnectionMachine, ConnectionState, FlowFailure, StateKind, TransitionError};
use crate::provider::{ProviderConfig, ProviderSdk};
use crate::settings::SignupSettings;
use crate::view::ConnectionView;

/// Host-side callbacks; only terminal outcomes are reported
pub trait SignupObserver: Send {
    /// The connection was provisioned
    fn on_complete(&mut self, entity_id: &str, result: &ProvisionResult);

    /// The flow settled in `Error`
    fn on_error(&mut self, _entity_id: &str, _failure: &FlowFailure) {}
}

/// One entity's signup flow, driven by the host UI
pub struct SignupFlow {
    settings: SignupSettings,
    entity_id: String,
    sdk: Arc<dyn ProviderSdk>,
    backend: Arc<dyn SignupBackend>,
    bootstrap: Arc<SdkBootstrap>,
    launcher: PopupLauncher,
    exchange: CodeExchangeCoordinator,
    machine: ConnectionMachine,
    provider_config: Option<ProviderConfig>,
    sdk_handle: Option<SdkHandle>,
    observer: Option<Box<dyn SignupObserver>>,
}

impl SignupFlow {
    /// Create a flow for `entity_id` using the process-wide SDK bootstrap
    pub fn new(
        settings: SignupSettings,
        entity_id: impl Into<String>,
        sdk: Arc<dyn ProviderSdk>,
        backend: Arc<dyn SignupBackend>,
        bus: MessageBus,
    ) -> Self {
        let launcher = PopupLauncher::new(&settings, bus);
        let exchange = CodeExchangeCoordinator::new(Arc::clone(&backend));

        Self {
            settings,
            entity_id: entity_id.into(),
            sdk,
            backend,
            bootstrap: global_bootstrap(),
            launcher,
            exchange,
            machine: ConnectionMachine::new(),
            provider_config: None,
            sdk_handle: None,
            observer: None,
        }
    }

    /// Use a dedicated bootstrap instead of the process-wide one
    pub fn with_bootstrap(mut self, bootstrap: Arc<SdkBootstrap>) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Register host callbacks for terminal outcomes
    pub fn with_observer(mut self, observer: Box<dyn SignupObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Current connection state
    pub fn state(&self) -> &ConnectionState {
        self.machine.state()
    }

    /// Rendered projection of the current state
    pub fn view(&self) -> ConnectionView {
        ConnectionView::from(self.machine.state())
    }

    /// Underlying state machine, including the transition trace
    pub fn machine(&self) -> &ConnectionMachine {
        &self.machine
    }

    /// Provider config fetched by `initialize`, if any
    pub fn provider_config(&self) -> Option<&ProviderConfig> {
        self.provider_config.as_ref()
    }

    /// Entity this flow connects
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Message bus the session listener attaches to
    pub fn bus(&self) -> &MessageBus {
        self.launcher.bus()
    }

    /// Fetch the provider config and bring the SDK up. No-op unless `Idle` with
    /// an uninitialized SDK.
    pub async fn initialize(&mut self) -> Result<&ConnectionState, TransitionError> {
        if self.machine.kind() != StateKind::Idle || self.machine.is_sdk_ready() {
            return Ok(self.machine.state());
        }

        let config = match self.backend.fetch_config().await {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(entity_id = %self.entity_id, "Embedded signup is not configured: {}", err);
                self.machine.config_failed(err.to_string())?;
                self.notify();
                return Ok(self.machine.state());
            }
        };

        self.machine.config_loaded()?;
        self.provider_config = Some(config.clone());

        match self
            .bootstrap
            .ensure_ready(self.sdk.as_ref(), &config, &self.settings.sdk_version)
            .await
        {
            Ok(handle) => {
                self.sdk_handle = Some(handle);
                self.machine.sdk_initialized()?;
            }
            Err(err) => {
                tracing::warn!(entity_id = %self.entity_id, "Provider SDK failed to load: {}", err);
                self.machine.sdk_failed(err.to_string())?;
                self.notify();
            }
        }

        Ok(self.machine.state())
    }

    /// Launch the provider popup and see the attempt through to a settled state.
    ///
    /// Returns `SdkNotReady` without touching the state when the SDK has not
    /// finished initializing.
    pub async fn connect(&mut self) -> Result<&ConnectionState, LaunchError> {
        let config = self
            .provider_config
            .clone()
            .ok_or(LaunchError::NotConfigured)?;

        let PreparedLaunch {
            listener,
            mut signals,
            request,
        } = self.launcher.prepare(self.sdk_handle.as_ref(), &config)?;

        let attempt_id = self.machine.launch(listener)?;
        tracing::info!(%attempt_id, entity_id = %self.entity_id, "Launching provider popup");

        let sdk = Arc::clone(&self.sdk);
        let machine = &mut self.machine;
        let outcome = run_popup(sdk.as_ref(), &request, &mut signals, |payload| {
            machine.capture_session(payload);
        })
        .await;

        let ticket = match outcome {
            PopupOutcome::CancelMessage => {
                tracing::info!(%attempt_id, "Provider signup cancelled by user");
                self.machine.cancel()?;
                None
            }
            PopupOutcome::Callback(result) => {
                tracing::debug!(%attempt_id, result = result.kind(), "Provider login callback fired");
                self.machine.authorize(result)?
            }
        };

        if let Some(ticket) = ticket {
            match self.exchange.exchange(ticket, &self.entity_id).await {
                Ok(result) => self.machine.exchange_succeeded(result)?,
                Err(err) => self.machine.exchange_failed(err.reason())?,
            }
        }

        self.notify();
        Ok(self.machine.state())
    }

    /// Leave a retryable error so the user can launch again
    pub fn retry(&mut self) -> Result<&ConnectionState, TransitionError> {
        self.machine.retry()?;
        Ok(self.machine.state())
    }

    /// Reuse the flow after a completed connection
    pub fn reset(&mut self) -> Result<&ConnectionState, TransitionError> {
        self.machine.reset()?;
        Ok(self.machine.state())
    }

    fn notify(&mut self) {
        let Some(observer) = self.observer.as_mut() else {
            return;
        };

        match self.machine.state() {
            ConnectionState::Complete(result) => observer.on_complete(&self.entity_id, result),
            ConnectionState::Error(failure) => observer.on_error(&self.entity_id, failure),
            _ => {}
        }
    }
}
