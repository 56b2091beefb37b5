//! Session capture over the host's cross-origin message channel
//!
//! [`MessageBus`] stands in for the host window's `message` event target. The
//! [`SessionCaptureListener`] filters what arrives on it and forwards only this
//! flow's messages; [`ListenerGuard`] owns the registration and removes it when
//! detached or dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use crate::settings::SignupSettings;

/// One message delivered on the host channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub origin: String,
    pub data: String,
}

impl InboundMessage {
    /// Message posted by `origin` carrying raw `data`
    pub fn new(origin: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            data: data.into(),
        }
    }
}

type Handler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: u64,
    handlers: BTreeMap<u64, Handler>,
}

/// Host-wide message channel shared by every subscriber
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<Mutex<BusInner>>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

fn lock(inner: &Mutex<BusInner>) -> MutexGuard<'_, BusInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MessageBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(&self, handler: Handler) -> u64 {
        let mut inner = lock(&self.inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.insert(id, handler);
        id
    }

    /// Deliver a message to every current subscriber, in subscription order
    pub fn post(&self, message: InboundMessage) {
        let handlers: Vec<Handler> = lock(&self.inner).handlers.values().cloned().collect();
        for handler in handlers {
            handler(&message);
        }
    }

    /// Number of currently registered listeners
    pub fn listener_count(&self) -> usize {
        lock(&self.inner).handlers.len()
    }
}

/// Correlation data captured from the provider popup (e.g. `waba_id`, `phone_number_id`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionPayload(serde_json::Map<String, serde_json::Value>);

impl SessionPayload {
    /// Wrap captured fields
    pub fn new(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(fields)
    }

    /// Raw value of `key`
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// String value of `key`, accepting numeric identifiers too
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Messaging account id captured from the popup
    pub fn waba_id(&self) -> Option<String> {
        self.get_str("waba_id")
    }

    /// Phone number id captured from the popup
    pub fn phone_number_id(&self) -> Option<String> {
        self.get_str("phone_number_id")
    }

    /// Captured field names
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What an accepted message asks the flow to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerSignal {
    SessionInfo(SessionPayload),
    Cancel,
}

#[derive(Debug, Deserialize)]
struct SignupMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Origin allow-list plus discriminator check for provider messages
#[derive(Debug, Clone)]
pub struct SessionCaptureListener {
    trusted_origins: Vec<String>,
    discriminator: String,
}

fn normalize_origin(origin: &str) -> Option<String> {
    let url = Url::parse(origin.trim()).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

impl SessionCaptureListener {
    /// Build a listener accepting `trusted_origins`; unparsable origins are dropped
    pub fn new<I, S>(trusted_origins: I, discriminator: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            trusted_origins: trusted_origins
                .into_iter()
                .filter_map(|o| normalize_origin(o.as_ref()))
                .collect(),
            discriminator: discriminator.into(),
        }
    }

    /// Build a listener from the configured origins and discriminator
    pub fn from_settings(settings: &SignupSettings) -> Self {
        Self::new(&settings.trusted_origins, settings.message_discriminator.clone())
    }

    /// Whether `origin` is on the allow-list after normalization
    pub fn is_trusted(&self, origin: &str) -> bool {
        normalize_origin(origin).is_some_and(|o| self.trusted_origins.contains(&o))
    }

    /// Classify one message; `None` means it must not affect the flow
    pub fn classify(&self, message: &InboundMessage) -> Option<ListenerSignal> {
        if !self.is_trusted(&message.origin) {
            return None;
        }

        let parsed: SignupMessage = serde_json::from_str(&message.data).ok()?;
        if parsed.kind != self.discriminator {
            return None;
        }

        match parsed.event.as_deref() {
            Some("CANCEL") => Some(ListenerSignal::Cancel),
            Some("ERROR") => {
                let detail = parsed
                    .data
                    .as_ref()
                    .and_then(|d| d.get("error_message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error");
                tracing::warn!("Provider reported a signup error: {}", detail);
                None
            }
            _ => match parsed.data {
                Some(serde_json::Value::Object(fields)) if !fields.is_empty() => {
                    Some(ListenerSignal::SessionInfo(SessionPayload::new(fields)))
                }
                _ => None,
            },
        }
    }

    /// Register on `bus`, forwarding accepted messages into `sink`
    pub fn attach(&self, bus: &MessageBus, sink: UnboundedSender<ListenerSignal>) -> ListenerGuard {
        let filter = self.clone();
        let id = bus.subscribe(Arc::new(move |message: &InboundMessage| {
            if let Some(signal) = filter.classify(message) {
                let _ = sink.send(signal);
            }
        }));

        tracing::debug!(listener_id = id, "Session capture listener attached");
        ListenerGuard {
            bus: Arc::downgrade(&bus.inner),
            id: Some(id),
        }
    }
}

/// Owned registration on a [`MessageBus`]
#[derive(Debug)]
#[must_use = "dropping the guard detaches the listener"]
pub struct ListenerGuard {
    bus: Weak<Mutex<BusInner>>,
    id: Option<u64>,
}

impl ListenerGuard {
    /// Remove the registration; later calls are no-ops
    pub fn detach(&mut self) {
        if let Some(id) = self.id.take() {
            if let Some(inner) = self.bus.upgrade() {
                lock(&inner).handlers.remove(&id);
            }
            tracing::debug!(listener_id = id, "Session capture listener detached");
        }
    }

    /// Whether the registration is still live
    pub fn is_attached(&self) -> bool {
        self.id.is_some()
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.detach();
    }
}
