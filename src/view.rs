//! User-facing projection of the connection state.

use serde::Serialize;

use crate::machine::ConnectionState;

/// The one affordance rendered for each state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum ConnectionView {
    NotConfigured { message: String },
    LoadingSdk,
    ReadyToConnect,
    Connecting,
    Exchanging,
    Connected,
    /// In-flow failure; the user can relaunch
    Failed { message: String },
}

impl ConnectionView {
    /// Label shown next to the spinner, button or banner
    pub fn label(&self) -> &str {
        match self {
            ConnectionView::NotConfigured { .. } => "Channel connection is not configured",
            ConnectionView::LoadingSdk => "Loading provider SDK...",
            ConnectionView::ReadyToConnect => "Connect account",
            ConnectionView::Connecting => "Waiting for the provider window...",
            ConnectionView::Exchanging => "Finalizing connection...",
            ConnectionView::Connected => "Connected",
            ConnectionView::Failed { message, .. } => message,
        }
    }

    /// Whether a spinner is shown
    pub fn shows_spinner(&self) -> bool {
        matches!(
            self,
            ConnectionView::LoadingSdk | ConnectionView::Connecting | ConnectionView::Exchanging
        )
    }

    /// Whether the launch button is enabled
    pub fn can_launch(&self) -> bool {
        matches!(self, ConnectionView::ReadyToConnect)
    }

    /// Whether the banner offers a retry; not-configured states need a reload
    pub fn can_retry(&self) -> bool {
        matches!(self, ConnectionView::Failed { .. })
    }
}

impl From<&ConnectionState> for ConnectionView {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Idle | ConnectionState::SdkLoading => ConnectionView::LoadingSdk,
            ConnectionState::Ready => ConnectionView::ReadyToConnect,
            ConnectionState::Connecting => ConnectionView::Connecting,
            ConnectionState::Exchanging => ConnectionView::Exchanging,
            ConnectionState::Complete(_) => ConnectionView::Connected,
            ConnectionState::Error(failure) if failure.is_retryable() => ConnectionView::Failed {
                message: failure.message.clone(),
            },
            ConnectionState::Error(failure) => ConnectionView::NotConfigured {
                message: failure.message.clone(),
            },
        }
    }
}
