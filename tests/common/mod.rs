// Embedded Signup test utilities
// Scripted provider SDK, in-memory backend and observer fixtures

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use embedded_signup::{
    BackendError, ExchangeRequest, FlowFailure, InboundMessage, LoginRequest, LoginResponse,
    MessageBus, ProviderConfig, ProviderSdk, ProvisionResult, SdkBootstrap, SdkError,
    SdkInitParams, SignupBackend, SignupFlow, SignupObserver, SignupSettings,
};

pub const TRUSTED_ORIGIN: &str = "https://www.facebook.com";
pub const ENTITY_ID: &str = "merchant-42";

pub const SESSION_MESSAGE: &str =
    r#"{"type":"WA_EMBEDDED_SIGNUP","event":"FINISH","data":{"waba_id":"1","phone_number_id":"2"}}"#;
pub const CANCEL_MESSAGE: &str =
    r#"{"type":"WA_EMBEDDED_SIGNUP","event":"CANCEL","data":{"current_step":"PHONE_NUMBER_SETUP"}}"#;

/// What one popup does: messages it posts while open, then its callback
#[derive(Debug, Clone)]
pub struct PopupScript {
    pub posts: Vec<InboundMessage>,
    /// `None` keeps the popup open forever
    pub response: Option<LoginResponse>,
}

impl PopupScript {
    pub fn granted(code: &str) -> Self {
        Self {
            posts: Vec::new(),
            response: Some(LoginResponse::granted(code)),
        }
    }

    pub fn closed() -> Self {
        Self {
            posts: Vec::new(),
            response: Some(LoginResponse::closed()),
        }
    }

    pub fn denied() -> Self {
        Self {
            posts: Vec::new(),
            response: Some(LoginResponse {
                status: Some("not_authorized".to_string()),
                auth_response: None,
            }),
        }
    }

    pub fn open() -> Self {
        Self {
            posts: Vec::new(),
            response: None,
        }
    }

    pub fn posting(mut self, origin: &str, data: &str) -> Self {
        self.posts.push(InboundMessage::new(origin, data));
        self
    }
}

/// Provider SDK stand-in driven by queued popup scripts
pub struct FakeSdk {
    bus: MessageBus,
    popups: Mutex<VecDeque<PopupScript>>,
    fail_load: bool,
    pub loads: AtomicUsize,
    pub inits: AtomicUsize,
    pub logins: AtomicUsize,
    pub listeners_at_login: Mutex<Vec<usize>>,
}

impl FakeSdk {
    pub fn new(bus: &MessageBus) -> Self {
        Self {
            bus: bus.clone(),
            popups: Mutex::new(VecDeque::new()),
            fail_load: false,
            loads: AtomicUsize::new(0),
            inits: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            listeners_at_login: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(bus: &MessageBus) -> Self {
        Self {
            fail_load: true,
            ..Self::new(bus)
        }
    }

    pub fn push_popup(&self, script: PopupScript) {
        self.popups.lock().unwrap().push_back(script);
    }

    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderSdk for FakeSdk {
    async fn load_script(&self) -> Result<(), SdkError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(SdkError::ScriptLoad("blocked by content policy".to_string()));
        }
        Ok(())
    }

    async fn init(&self, _params: &SdkInitParams) -> Result<(), SdkError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn login(&self, _request: &LoginRequest) -> LoginResponse {
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.listeners_at_login
            .lock()
            .unwrap()
            .push(self.bus.listener_count());

        let script = self
            .popups
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(PopupScript::closed);

        for message in script.posts {
            self.bus.post(message);
        }

        match script.response {
            Some(response) => response,
            None => std::future::pending().await,
        }
    }
}

/// In-memory admin backend recording every exchange request
pub struct FakeBackend {
    config: Option<ProviderConfig>,
    replies: Mutex<VecDeque<Result<ProvisionResult, BackendError>>>,
    pub config_fetches: AtomicUsize,
    pub requests: Mutex<Vec<ExchangeRequest>>,
}

impl FakeBackend {
    pub fn configured() -> Self {
        Self::with_config(Some(provider_config()))
    }

    pub fn unconfigured() -> Self {
        Self::with_config(None)
    }

    fn with_config(config: Option<ProviderConfig>) -> Self {
        Self {
            config,
            replies: Mutex::new(VecDeque::new()),
            config_fetches: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: Result<ProvisionResult, BackendError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn exchange_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ExchangeRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SignupBackend for FakeBackend {
    async fn fetch_config(&self) -> Result<ProviderConfig, BackendError> {
        self.config_fetches.fetch_add(1, Ordering::SeqCst);
        self.config
            .clone()
            .ok_or_else(|| BackendError::Rejected(Some("Embedded signup is not configured".to_string())))
    }

    async fn complete_signup(&self, request: &ExchangeRequest) -> Result<ProvisionResult, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(ProvisionResult {
                    data: Some(serde_json::json!({"channelId": "ch-1"})),
                })
            })
    }
}

/// Observer that records terminal callbacks as strings
#[derive(Clone, Default)]
pub struct RecordingObserver {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl SignupObserver for RecordingObserver {
    fn on_complete(&mut self, entity_id: &str, _result: &ProvisionResult) {
        self.events.lock().unwrap().push(format!("complete:{}", entity_id));
    }

    fn on_error(&mut self, entity_id: &str, failure: &FlowFailure) {
        self.events
            .lock()
            .unwrap()
            .push(format!("error:{}:{}", entity_id, failure.message));
    }
}

pub fn provider_config() -> ProviderConfig {
    ProviderConfig::new("123456789", "cfg-987").unwrap()
}

/// Everything a flow test needs, wired to a private bootstrap
pub struct Harness {
    pub bus: MessageBus,
    pub sdk: Arc<FakeSdk>,
    pub backend: Arc<FakeBackend>,
    pub bootstrap: Arc<SdkBootstrap>,
}

impl Harness {
    pub fn new() -> Self {
        let bus = MessageBus::new();
        let sdk = Arc::new(FakeSdk::new(&bus));
        Self::with_parts(bus, sdk, Arc::new(FakeBackend::configured()))
    }

    pub fn with_parts(bus: MessageBus, sdk: Arc<FakeSdk>, backend: Arc<FakeBackend>) -> Self {
        Self {
            bus,
            sdk,
            backend,
            bootstrap: Arc::new(SdkBootstrap::new()),
        }
    }

    pub fn flow(&self) -> SignupFlow {
        SignupFlow::new(
            SignupSettings::default(),
            ENTITY_ID,
            self.sdk.clone(),
            self.backend.clone(),
            self.bus.clone(),
        )
        .with_bootstrap(self.bootstrap.clone())
    }
}
