//! Popup authorization launcher
//!
//! The session capture listener is installed before the provider's login call so
//! the popup's first message cannot arrive ahead of it. The login callback and
//! the message channel stay independent producers; they are only correlated when
//! the callback resolves.

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::bootstrap::SdkHandle;
use crate::listener::{ListenerGuard, ListenerSignal, MessageBus, SessionCaptureListener, SessionPayload};
use crate::machine::TransitionError;
use crate::provider::{AuthorizationResult, LoginRequest, ProviderConfig, ProviderSdk};
use crate::settings::SignupSettings;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Provider SDK is not ready yet")]
    SdkNotReady,
    #[error("Provider config has not been loaded")]
    NotConfigured,
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// A launch whose listener is already live
#[derive(Debug)]
pub struct PreparedLaunch {
    pub listener: ListenerGuard,
    pub signals: UnboundedReceiver<ListenerSignal>,
    pub request: LoginRequest,
}

/// How the popup phase ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupOutcome {
    /// The provider posted an explicit cancel message
    CancelMessage,
    /// The SDK login callback fired
    Callback(AuthorizationResult),
}

#[derive(Debug, Clone)]
pub struct PopupLauncher {
    settings: SignupSettings,
    capture: SessionCaptureListener,
    bus: MessageBus,
}

impl PopupLauncher {
    /// Create a launcher whose listeners attach to `bus`
    pub fn new(settings: &SignupSettings, bus: MessageBus) -> Self {
        Self {
            settings: settings.clone(),
            capture: SessionCaptureListener::from_settings(settings),
            bus,
        }
    }

    /// Message bus listeners are attached to
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Check readiness, then attach the listener and build the login request
    pub fn prepare(
        &self,
        sdk: Option<&SdkHandle>,
        config: &ProviderConfig,
    ) -> Result<PreparedLaunch, LaunchError> {
        if sdk.is_none() {
            return Err(LaunchError::SdkNotReady);
        }

        let (tx, signals) = mpsc::unbounded_channel();
        let listener = self.capture.attach(&self.bus, tx);
        Ok(PreparedLaunch {
            listener,
            signals,
            request: LoginRequest::new(config, &self.settings),
        })
    }
}

/// Drive the provider popup until its callback fires or a cancel message arrives.
///
/// Session payloads seen along the way are handed to `on_session` in arrival
/// order. The callback is never held back waiting for a payload.
pub async fn run_popup<F>(
    sdk: &dyn ProviderSdk,
    request: &LoginRequest,
    signals: &mut UnboundedReceiver<ListenerSignal>,
    mut on_session: F,
) -> PopupOutcome
where
    F: FnMut(SessionPayload),
{
    let mut login = sdk.login(request);

    let response = loop {
        tokio::select! {
            biased;
            Some(signal) = signals.recv() => match signal {
                ListenerSignal::SessionInfo(payload) => on_session(payload),
                ListenerSignal::Cancel => return PopupOutcome::CancelMessage,
            },
            response = &mut login => break response,
        }
    };

    // delivered before the callback resolved but not yet polled
    while let Ok(signal) = signals.try_recv() {
        match signal {
            ListenerSignal::SessionInfo(payload) => on_session(payload),
            ListenerSignal::Cancel => return PopupOutcome::CancelMessage,
        }
    }

    PopupOutcome::Callback(AuthorizationResult::from(response))
}
