//! Connection state machine
//!
//! A single tagged state value drives the flow. The active [`ConnectionAttempt`]
//! owns the session capture listener, and every transition out of `Connecting`
//! releases it before the new state is stored.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::backend::ProvisionResult;
use crate::exchange::ExchangeTicket;
use crate::listener::{ListenerGuard, SessionPayload};
use crate::provider::AuthorizationResult;

/// Message used when the provider returns neither a code nor a cancellation
pub const NO_AUTHORIZATION_CODE: &str = "no authorization code";

/// Most recent transitions kept in the trace
pub const TRACE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StateKind {
    Idle,
    SdkLoading,
    Ready,
    Connecting,
    Exchanging,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlowEvent {
    ConfigLoaded,
    ConfigFailed,
    SdkInitialized,
    SdkFailed,
    SdkAlreadyReady,
    LaunchRequested,
    Cancelled,
    Granted,
    Denied,
    ExchangeSucceeded,
    ExchangeFailed,
    RetryRequested,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// Provider config missing or incomplete
    Configuration,
    /// SDK script failed to load or initialize
    Bootstrap,
    /// Popup returned without an authorization code
    Authorization,
    /// Backend rejected or failed the code exchange
    Exchange,
}

impl FailureKind {
    /// Configuration and bootstrap failures need a page reload
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Authorization | FailureKind::Exchange)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FlowFailure {
    /// Failure of `kind` with a user-facing message
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether the user may relaunch after this failure
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Idle,
    SdkLoading,
    Ready,
    Connecting,
    Exchanging,
    Complete(ProvisionResult),
    Error(FlowFailure),
}

impl ConnectionState {
    /// Tag of this state
    pub fn kind(&self) -> StateKind {
        match self {
            ConnectionState::Idle => StateKind::Idle,
            ConnectionState::SdkLoading => StateKind::SdkLoading,
            ConnectionState::Ready => StateKind::Ready,
            ConnectionState::Connecting => StateKind::Connecting,
            ConnectionState::Exchanging => StateKind::Exchanging,
            ConnectionState::Complete(_) => StateKind::Complete,
            ConnectionState::Error(_) => StateKind::Error,
        }
    }

    /// Failure details when in `Error`
    pub fn failure(&self) -> Option<&FlowFailure> {
        match self {
            ConnectionState::Error(failure) => Some(failure),
            _ => None,
        }
    }
}

/// One launch of the provider popup
#[derive(Debug)]
pub struct ConnectionAttempt {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub session: Option<SessionPayload>,
    pub authorization: Option<AuthorizationResult>,
    pub error: Option<String>,
    listener: Option<ListenerGuard>,
}

impl ConnectionAttempt {
    fn new(listener: ListenerGuard) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            session: None,
            authorization: None,
            error: None,
            listener: Some(listener),
        }
    }

    /// Whether this attempt still holds a live listener
    pub fn listener_attached(&self) -> bool {
        self.listener.as_ref().is_some_and(ListenerGuard::is_attached)
    }

    fn release_listener(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.detach();
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from: StateKind,
    pub event: FlowEvent,
    pub to: StateKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot apply {event:?} while {from:?}")]
    Invalid { from: StateKind, event: FlowEvent },
    #[error("{0:?} failures cannot be retried without reloading")]
    NotRetryable(FailureKind),
}

#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    sdk_ready: bool,
    attempt: Option<ConnectionAttempt>,
    trace: VecDeque<TransitionRecord>,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    /// Create a machine in `Idle`
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            sdk_ready: false,
            attempt: None,
            trace: VecDeque::with_capacity(TRACE_CAPACITY),
        }
    }

    /// Current state
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Tag of the current state
    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    /// Attempt in progress or just settled; cleared when the flow returns to `Idle`
    pub fn attempt(&self) -> Option<&ConnectionAttempt> {
        self.attempt.as_ref()
    }

    /// Last [`TRACE_CAPACITY`] transitions, oldest first
    pub fn trace(&self) -> &VecDeque<TransitionRecord> {
        &self.trace
    }

    /// Whether the SDK has initialized; never reverts
    pub fn is_sdk_ready(&self) -> bool {
        self.sdk_ready
    }

    /// Whether the active attempt still holds a live listener
    pub fn listener_attached(&self) -> bool {
        self.attempt
            .as_ref()
            .is_some_and(ConnectionAttempt::listener_attached)
    }

    fn require(&self, expected: StateKind, event: FlowEvent) -> Result<(), TransitionError> {
        if self.kind() == expected {
            Ok(())
        } else {
            Err(TransitionError::Invalid {
                from: self.kind(),
                event,
            })
        }
    }

    fn transition(&mut self, event: FlowEvent, to: ConnectionState) {
        let from = self.kind();
        if from == StateKind::Connecting && to.kind() != StateKind::Connecting {
            if let Some(attempt) = self.attempt.as_mut() {
                attempt.release_listener();
            }
        }

        let record = TransitionRecord {
            from,
            event,
            to: to.kind(),
            at: Utc::now(),
        };
        tracing::debug!(
            attempt_id = ?self.attempt.as_ref().map(|a| a.id),
            "Signup flow {:?} --{:?}--> {:?}",
            record.from,
            record.event,
            record.to
        );
        if self.trace.len() == TRACE_CAPACITY {
            self.trace.pop_front();
        }
        self.trace.push_back(record);
        self.state = to;
    }

    fn enter_idle(&mut self, event: FlowEvent) {
        self.transition(event, ConnectionState::Idle);
        self.attempt = None;
        if self.sdk_ready {
            self.transition(FlowEvent::SdkAlreadyReady, ConnectionState::Ready);
        }
    }

    fn fail(&mut self, event: FlowEvent, failure: FlowFailure) {
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.error = Some(failure.message.clone());
        }
        self.transition(event, ConnectionState::Error(failure));
    }

    /// Provider config arrived; start loading the SDK
    pub fn config_loaded(&mut self) -> Result<(), TransitionError> {
        self.require(StateKind::Idle, FlowEvent::ConfigLoaded)?;
        self.transition(FlowEvent::ConfigLoaded, ConnectionState::SdkLoading);
        Ok(())
    }

    /// Provider config missing or incomplete
    pub fn config_failed(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.require(StateKind::Idle, FlowEvent::ConfigFailed)?;
        self.fail(
            FlowEvent::ConfigFailed,
            FlowFailure::new(FailureKind::Configuration, message),
        );
        Ok(())
    }

    /// SDK init callback fired
    pub fn sdk_initialized(&mut self) -> Result<(), TransitionError> {
        self.require(StateKind::SdkLoading, FlowEvent::SdkInitialized)?;
        self.sdk_ready = true;
        self.transition(FlowEvent::SdkInitialized, ConnectionState::Ready);
        Ok(())
    }

    /// SDK script failed to load or initialize
    pub fn sdk_failed(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.require(StateKind::SdkLoading, FlowEvent::SdkFailed)?;
        self.fail(
            FlowEvent::SdkFailed,
            FlowFailure::new(FailureKind::Bootstrap, message),
        );
        Ok(())
    }

    /// Start a new attempt owning `listener`; the listener is dropped (and
    /// detached) if the machine is not ready to launch
    pub fn launch(&mut self, listener: ListenerGuard) -> Result<Uuid, TransitionError> {
        self.require(StateKind::Ready, FlowEvent::LaunchRequested)?;
        let attempt = ConnectionAttempt::new(listener);
        let id = attempt.id;
        self.attempt = Some(attempt);
        self.transition(FlowEvent::LaunchRequested, ConnectionState::Connecting);
        Ok(id)
    }

    /// Store a captured session payload; last write wins. Ignored outside `Connecting`.
    pub fn capture_session(&mut self, payload: SessionPayload) -> bool {
        if self.kind() != StateKind::Connecting {
            return false;
        }
        match self.attempt.as_mut() {
            Some(attempt) => {
                tracing::debug!(
                    attempt_id = %attempt.id,
                    keys = ?payload.keys().collect::<Vec<_>>(),
                    "Captured session info"
                );
                attempt.session = Some(payload);
                true
            }
            None => false,
        }
    }

    /// Abort the attempt after a provider cancel message
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.require(StateKind::Connecting, FlowEvent::Cancelled)?;
        self.enter_idle(FlowEvent::Cancelled);
        Ok(())
    }

    /// Apply the popup callback; only `Granted` yields a ticket for the exchange
    pub fn authorize(
        &mut self,
        result: AuthorizationResult,
    ) -> Result<Option<ExchangeTicket>, TransitionError> {
        let event = match &result {
            AuthorizationResult::Granted(_) => FlowEvent::Granted,
            AuthorizationResult::Denied => FlowEvent::Denied,
            AuthorizationResult::Cancelled => FlowEvent::Cancelled,
        };
        self.require(StateKind::Connecting, event)?;

        match result {
            AuthorizationResult::Granted(code) => {
                let ticket = match self.attempt.as_mut() {
                    Some(attempt) => {
                        attempt.authorization = Some(AuthorizationResult::Granted(code.clone()));
                        ExchangeTicket::new(attempt.id, code, attempt.session.clone())
                    }
                    None => ExchangeTicket::new(Uuid::new_v4(), code, None),
                };
                self.transition(FlowEvent::Granted, ConnectionState::Exchanging);
                Ok(Some(ticket))
            }
            AuthorizationResult::Denied => {
                if let Some(attempt) = self.attempt.as_mut() {
                    attempt.authorization = Some(AuthorizationResult::Denied);
                }
                self.fail(
                    FlowEvent::Denied,
                    FlowFailure::new(FailureKind::Authorization, NO_AUTHORIZATION_CODE),
                );
                Ok(None)
            }
            AuthorizationResult::Cancelled => {
                self.enter_idle(FlowEvent::Cancelled);
                Ok(None)
            }
        }
    }

    /// Backend provisioned the connection
    pub fn exchange_succeeded(&mut self, result: ProvisionResult) -> Result<(), TransitionError> {
        self.require(StateKind::Exchanging, FlowEvent::ExchangeSucceeded)?;
        self.transition(FlowEvent::ExchangeSucceeded, ConnectionState::Complete(result));
        Ok(())
    }

    /// Backend rejected or failed the exchange with `reason`
    pub fn exchange_failed(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.require(StateKind::Exchanging, FlowEvent::ExchangeFailed)?;
        self.fail(
            FlowEvent::ExchangeFailed,
            FlowFailure::new(FailureKind::Exchange, reason),
        );
        Ok(())
    }

    /// Leave a retryable `Error` for `Idle`, which settles on `Ready` once the SDK is up
    pub fn retry(&mut self) -> Result<(), TransitionError> {
        match &self.state {
            ConnectionState::Error(failure) if failure.is_retryable() => {
                self.enter_idle(FlowEvent::RetryRequested);
                Ok(())
            }
            ConnectionState::Error(failure) => Err(TransitionError::NotRetryable(failure.kind)),
            _ => Err(TransitionError::Invalid {
                from: self.kind(),
                event: FlowEvent::RetryRequested,
            }),
        }
    }

    /// Reuse the component after a completed connection
    pub fn reset(&mut self) -> Result<(), TransitionError> {
        self.require(StateKind::Complete, FlowEvent::Reset)?;
        self.enter_idle(FlowEvent::Reset);
        Ok(())
    }
}
