//! Embedded Signup channel connection
//!
//! Connects a merchant's messaging account to the platform through the
//! provider's hosted signup popup. The crate covers SDK bootstrap, session
//! capture from popup messages, the popup launch itself, the backend code
//! exchange and the connection state machine that ties them together.

pub mod backend;
pub mod bootstrap;
pub mod exchange;
pub mod flow;
pub mod launcher;
pub mod listener;
pub mod machine;
pub mod provider;
pub mod settings;
pub mod view;

pub use backend::{BackendError, ExchangeRequest, HttpSignupBackend, ProvisionResult, SignupBackend};
pub use bootstrap::{global_bootstrap, BootstrapError, SdkBootstrap, SdkHandle};
pub use exchange::{CodeExchangeCoordinator, ExchangeError, ExchangeTicket, GENERIC_EXCHANGE_FAILURE};
pub use flow::{SignupFlow, SignupObserver};
pub use launcher::{run_popup, LaunchError, PopupLauncher, PopupOutcome};
pub use listener::{
    InboundMessage, ListenerGuard, ListenerSignal, MessageBus, SessionCaptureListener, SessionPayload,
};
pub use machine::{
    ConnectionAttempt, ConnectionMachine, ConnectionState, FailureKind, FlowEvent, FlowFailure,
    StateKind, TransitionError, TransitionRecord, TRACE_CAPACITY,
};
pub use provider::{
    AuthorizationResult, LoginRequest, LoginResponse, ProviderConfig, ProviderError, ProviderSdk,
    SdkError, SdkInitParams,
};
pub use settings::{EnvironmentOverrides, SettingsError, SignupSettings};
pub use view::ConnectionView;

/// Any error surfaced by the crate
#[derive(Debug, thiserror::Error)]
pub enum SignupError {
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),
    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),
    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),
}

pub type Result<T> = std::result::Result<T, SignupError>;
