// Embedded Signup flow integration tests
// Drives SignupFlow end to end against the scripted SDK and in-memory backend

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use embedded_signup::{
    BackendError, ConnectionView, FailureKind, FlowEvent, LaunchError, StateKind, TransitionError,
    TRACE_CAPACITY,
};
use pretty_assertions::assert_eq;

use common::{
    FakeBackend, FakeSdk, Harness, PopupScript, RecordingObserver, CANCEL_MESSAGE, ENTITY_ID,
    SESSION_MESSAGE, TRUSTED_ORIGIN,
};

#[tokio::test]
async fn test_config_failure_never_loads_sdk() {
    let bus = embedded_signup::MessageBus::new();
    let harness = Harness::with_parts(
        bus.clone(),
        Arc::new(FakeSdk::new(&bus)),
        Arc::new(FakeBackend::unconfigured()),
    );
    let observer = RecordingObserver::default();
    let mut flow = harness.flow().with_observer(Box::new(observer.clone()));

    let kind = flow.initialize().await.unwrap().kind();
    assert_eq!(kind, StateKind::Error);

    let failure = flow.state().failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Configuration);
    assert!(flow
        .machine()
        .trace()
        .iter()
        .all(|record| record.to != StateKind::SdkLoading));
    assert_eq!(harness.sdk.loads.load(Ordering::SeqCst), 0);
    assert!(matches!(flow.view(), ConnectionView::NotConfigured { .. }));
    assert_eq!(observer.events().len(), 1);
    assert!(observer.events()[0].starts_with("error:merchant-42:"));
}

#[tokio::test]
async fn test_granted_without_session_sends_null_session_info() {
    let harness = Harness::new();
    let observer = RecordingObserver::default();
    let mut flow = harness.flow().with_observer(Box::new(observer.clone()));

    assert_eq!(flow.initialize().await.unwrap().kind(), StateKind::Ready);
    assert!(flow.view().can_launch());

    harness.sdk.push_popup(PopupScript::granted("abc123"));
    assert_eq!(flow.connect().await.unwrap().kind(), StateKind::Complete);

    let request = harness.backend.last_request().unwrap();
    assert_eq!(
        serde_json::to_value(&request).unwrap(),
        serde_json::json!({
            "code": "abc123",
            "entityId": ENTITY_ID,
            "sessionInfo": null,
        })
    );
    assert_eq!(flow.view(), ConnectionView::Connected);
    assert_eq!(observer.events(), vec!["complete:merchant-42".to_string()]);
}

#[tokio::test]
async fn test_session_message_before_callback_is_correlated() {
    let harness = Harness::new();
    let mut flow = harness.flow();
    flow.initialize().await.unwrap();

    harness
        .sdk
        .push_popup(PopupScript::granted("xyz").posting(TRUSTED_ORIGIN, SESSION_MESSAGE));
    assert_eq!(flow.connect().await.unwrap().kind(), StateKind::Complete);

    let request = harness.backend.last_request().unwrap();
    assert_eq!(request.code, "xyz");
    assert_eq!(
        serde_json::to_value(request.session_info.unwrap()).unwrap(),
        serde_json::json!({"waba_id": "1", "phone_number_id": "2"})
    );
}

#[tokio::test]
async fn test_closed_popup_relaunches_without_stale_session() {
    let harness = Harness::new();
    let observer = RecordingObserver::default();
    let mut flow = harness.flow().with_observer(Box::new(observer.clone()));
    flow.initialize().await.unwrap();

    harness
        .sdk
        .push_popup(PopupScript::closed().posting(TRUSTED_ORIGIN, SESSION_MESSAGE));
    assert_eq!(flow.connect().await.unwrap().kind(), StateKind::Ready);

    let trace = flow.machine().trace();
    let cancelled = &trace[trace.len() - 2];
    assert_eq!(cancelled.event, FlowEvent::Cancelled);
    assert_eq!(cancelled.to, StateKind::Idle);
    assert!(flow.machine().attempt().is_none());
    assert_eq!(harness.backend.exchange_count(), 0);
    assert!(observer.events().is_empty());

    harness.sdk.push_popup(PopupScript::granted("fresh"));
    flow.connect().await.unwrap();

    let request = harness.backend.last_request().unwrap();
    assert_eq!(request.code, "fresh");
    assert_eq!(request.session_info, None);
}

#[tokio::test]
async fn test_exchange_rejection_surfaces_reason_and_retry_reenables_launch() {
    let harness = Harness::new();
    let observer = RecordingObserver::default();
    let mut flow = harness.flow().with_observer(Box::new(observer.clone()));
    flow.initialize().await.unwrap();

    harness
        .backend
        .push_reply(Err(BackendError::Rejected(Some("token expired".to_string()))));
    harness.sdk.push_popup(PopupScript::granted("abc123"));
    flow.connect().await.unwrap();

    let failure = flow.state().failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Exchange);
    assert_eq!(failure.message, "token expired");
    assert_eq!(
        flow.view(),
        ConnectionView::Failed {
            message: "token expired".to_string(),
        }
    );
    assert!(flow.view().can_retry());
    assert_eq!(
        observer.events(),
        vec!["error:merchant-42:token expired".to_string()]
    );

    assert_eq!(flow.retry().unwrap().kind(), StateKind::Ready);
    assert!(flow.view().can_launch());

    harness.sdk.push_popup(PopupScript::granted("abc124"));
    assert_eq!(flow.connect().await.unwrap().kind(), StateKind::Complete);
    assert_eq!(harness.backend.exchange_count(), 2);
}

#[tokio::test]
async fn test_listener_attached_only_while_connecting() {
    let harness = Harness::new();
    let mut flow = harness.flow();
    flow.initialize().await.unwrap();
    assert_eq!(harness.bus.listener_count(), 0);

    let popups = vec![
        PopupScript::granted("a"),
        PopupScript::closed(),
        PopupScript::denied(),
        PopupScript::open().posting(TRUSTED_ORIGIN, CANCEL_MESSAGE),
    ];

    for popup in popups {
        harness.sdk.push_popup(popup);
        flow.connect().await.unwrap();
        assert_eq!(harness.bus.listener_count(), 0);
        assert!(!flow.machine().listener_attached());

        match flow.machine().kind() {
            StateKind::Complete => {
                flow.reset().unwrap();
            }
            StateKind::Error => {
                flow.retry().unwrap();
            }
            _ => {}
        }
        assert_eq!(flow.machine().kind(), StateKind::Ready);
    }

    assert_eq!(
        *harness.sdk.listeners_at_login.lock().unwrap(),
        vec![1, 1, 1, 1]
    );
}

#[tokio::test]
async fn test_exchange_only_runs_for_granted_results() {
    let harness = Harness::new();
    let mut flow = harness.flow();
    flow.initialize().await.unwrap();

    harness.sdk.push_popup(PopupScript::denied());
    flow.connect().await.unwrap();
    let failure = flow.state().failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Authorization);
    assert_eq!(failure.message, "no authorization code");
    flow.retry().unwrap();

    harness.sdk.push_popup(PopupScript::closed());
    flow.connect().await.unwrap();

    harness
        .sdk
        .push_popup(PopupScript::open().posting(TRUSTED_ORIGIN, CANCEL_MESSAGE));
    flow.connect().await.unwrap();

    assert_eq!(harness.backend.exchange_count(), 0);
    assert!(flow
        .machine()
        .trace()
        .iter()
        .all(|record| record.to != StateKind::Exchanging));
}

#[tokio::test]
async fn test_cancel_message_closes_open_popup() {
    let harness = Harness::new();
    let mut flow = harness.flow();
    flow.initialize().await.unwrap();

    harness.sdk.push_popup(
        PopupScript::open()
            .posting(TRUSTED_ORIGIN, SESSION_MESSAGE)
            .posting(TRUSTED_ORIGIN, CANCEL_MESSAGE),
    );
    assert_eq!(flow.connect().await.unwrap().kind(), StateKind::Ready);
    assert!(flow.state().failure().is_none());
    assert_eq!(harness.sdk.login_count(), 1);
}

#[tokio::test]
async fn test_untrusted_and_foreign_messages_do_not_affect_session() {
    let harness = Harness::new();
    let mut flow = harness.flow();
    flow.initialize().await.unwrap();

    harness.sdk.push_popup(
        PopupScript::granted("abc")
            .posting("https://evil.example.com", SESSION_MESSAGE)
            .posting("http://www.facebook.com", SESSION_MESSAGE)
            .posting(TRUSTED_ORIGIN, r#"{"type":"SOMETHING_ELSE","data":{"waba_id":"9"}}"#)
            .posting(TRUSTED_ORIGIN, "not json")
            .posting(TRUSTED_ORIGIN, r#"{"type":"XX_EMBEDDED_SIGNUP","event":"CANCEL"}"#)
            .posting("https://evil.example.com", CANCEL_MESSAGE),
    );
    assert_eq!(flow.connect().await.unwrap().kind(), StateKind::Complete);
    assert_eq!(harness.backend.last_request().unwrap().session_info, None);
}

#[tokio::test]
async fn test_connect_requires_initialized_sdk() {
    let bus = embedded_signup::MessageBus::new();
    let harness = Harness::with_parts(
        bus.clone(),
        Arc::new(FakeSdk::failing(&bus)),
        Arc::new(FakeBackend::configured()),
    );
    let mut flow = harness.flow();

    assert!(matches!(flow.connect().await, Err(LaunchError::NotConfigured)));

    flow.initialize().await.unwrap();
    assert_eq!(flow.state().failure().unwrap().kind, FailureKind::Bootstrap);
    assert!(matches!(flow.connect().await, Err(LaunchError::SdkNotReady)));
    assert_eq!(harness.sdk.login_count(), 0);
    assert_eq!(harness.bus.listener_count(), 0);

    assert!(matches!(
        flow.retry(),
        Err(TransitionError::NotRetryable(FailureKind::Bootstrap))
    ));
}

#[tokio::test]
async fn test_flows_share_one_sdk_initialization() {
    let harness = Harness::new();
    let mut first = harness.flow();
    let mut second = harness.flow();

    let (a, b) = tokio::join!(first.initialize(), second.initialize());
    assert_eq!(a.unwrap().kind(), StateKind::Ready);
    assert_eq!(b.unwrap().kind(), StateKind::Ready);

    assert_eq!(harness.sdk.loads.load(Ordering::SeqCst), 1);
    assert_eq!(harness.sdk.inits.load(Ordering::SeqCst), 1);
    assert_eq!(harness.bootstrap.injection_count(), 1);

    let mut third = harness.flow();
    third.initialize().await.unwrap();
    assert_eq!(harness.sdk.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_sdk_load_is_not_retried_by_later_flows() {
    let bus = embedded_signup::MessageBus::new();
    let harness = Harness::with_parts(
        bus.clone(),
        Arc::new(FakeSdk::failing(&bus)),
        Arc::new(FakeBackend::configured()),
    );
    let mut first = harness.flow();
    let mut second = harness.flow();

    first.initialize().await.unwrap();
    second.initialize().await.unwrap();

    for flow in [&first, &second] {
        assert_eq!(flow.state().failure().unwrap().kind, FailureKind::Bootstrap);
        assert!(matches!(flow.view(), ConnectionView::NotConfigured { .. }));
    }
    assert_eq!(harness.sdk.loads.load(Ordering::SeqCst), 1);
    assert_eq!(harness.bootstrap.injection_count(), 1);
    assert!(harness.bootstrap.failure().is_some());
}

#[tokio::test]
async fn test_reused_flow_trace_stays_bounded() {
    let harness = Harness::new();
    let mut flow = harness.flow();
    flow.initialize().await.unwrap();

    for _ in 0..200 {
        harness.sdk.push_popup(PopupScript::closed());
        flow.connect().await.unwrap();
    }

    assert_eq!(flow.machine().kind(), StateKind::Ready);
    assert_eq!(flow.machine().trace().len(), TRACE_CAPACITY);
    assert_eq!(harness.sdk.login_count(), 200);
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let harness = Harness::new();
    let mut flow = harness.flow();

    flow.initialize().await.unwrap();
    flow.initialize().await.unwrap();

    assert_eq!(flow.machine().kind(), StateKind::Ready);
    assert_eq!(harness.backend.config_fetches.load(Ordering::SeqCst), 1);
    assert_eq!(flow.provider_config().unwrap().flow_config_id, "cfg-987");
}
