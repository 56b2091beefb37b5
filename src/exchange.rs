//! Code exchange coordinator
//!
//! Sends a granted authorization code, plus whatever session payload was
//! correlated with it, to the backend provisioning endpoint. One request, no
//! automatic retry; the backend decides whether provisioning succeeded.

use std::sync::Arc;

use thiserror::Error;

use crate::backend::{BackendError, ExchangeRequest, ProvisionResult, SignupBackend};
use crate::listener::SessionPayload;
use crate::provider::mask_code;

/// Shown when the backend gives no usable reason
pub const GENERIC_EXCHANGE_FAILURE: &str = "Failed to complete the connection. Please try again.";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("{0}")]
    Failed(String),
}

impl ExchangeError {
    /// Human-readable reason shown to the user
    pub fn reason(&self) -> &str {
        match self {
            ExchangeError::Failed(reason) => reason,
        }
    }
}

impl From<&BackendError> for ExchangeError {
    fn from(err: &BackendError) -> Self {
        let reason = err
            .backend_reason()
            .map(str::to_string)
            .unwrap_or_else(|| GENERIC_EXCHANGE_FAILURE.to_string());
        ExchangeError::Failed(reason)
    }
}

/// A granted code paired with its correlated session payload.
///
/// Only the connection state machine issues tickets, and only when it accepts a
/// `Granted` authorization result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeTicket {
    attempt_id: uuid::Uuid,
    code: String,
    session: Option<SessionPayload>,
}

impl ExchangeTicket {
    pub(crate) fn new(attempt_id: uuid::Uuid, code: String, session: Option<SessionPayload>) -> Self {
        Self {
            attempt_id,
            code,
            session,
        }
    }

    /// Attempt the code was granted in
    pub fn attempt_id(&self) -> uuid::Uuid {
        self.attempt_id
    }

    /// Authorization code to exchange
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Session payload captured during the attempt, if any
    pub fn session(&self) -> Option<&SessionPayload> {
        self.session.as_ref()
    }

    /// Request body for the entity being connected
    pub fn into_request(self, entity_id: &str) -> ExchangeRequest {
        ExchangeRequest {
            code: self.code,
            entity_id: entity_id.to_string(),
            session_info: self.session,
        }
    }
}

pub struct CodeExchangeCoordinator {
    backend: Arc<dyn SignupBackend>,
}

impl CodeExchangeCoordinator {
    /// Create a coordinator sending exchanges to `backend`
    pub fn new(backend: Arc<dyn SignupBackend>) -> Self {
        Self { backend }
    }

    /// Send one exchange request for `entity_id`; never retried
    pub async fn exchange(
        &self,
        ticket: ExchangeTicket,
        entity_id: &str,
    ) -> Result<ProvisionResult, ExchangeError> {
        let attempt_id = ticket.attempt_id();
        tracing::debug!(
            %attempt_id,
            entity_id,
            code = %mask_code(ticket.code()),
            has_session_info = ticket.session().is_some(),
            "Exchanging authorization code"
        );

        let request = ticket.into_request(entity_id);
        match self.backend.complete_signup(&request).await {
            Ok(result) => {
                tracing::info!(%attempt_id, entity_id, "Channel connection provisioned");
                Ok(result)
            }
            Err(err) => {
                tracing::warn!(%attempt_id, entity_id, "Code exchange failed: {}", err);
                Err(ExchangeError::from(&err))
            }
        }
    }
}
