//! End-to-end tests for the session lifecycle and delivery pipeline.
//!
//! Tests verify:
//! - Do-Not-Track suppression
//! - Final flush on stop and hard teardown on destroy
//! - Shutdown while deliveries are still retrying
//! - Fixed-delay retry bound and failure reporting
//! - Privacy rules applied before events reach a batch
//! - Batch wire contents (session, user, attributes, metadata)

use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use session_sdk::capture::{
    ConsoleLevel, ConsoleRecord, ElementNode, InteractionKind, InteractionRecord, NetworkRecord,
};
use session_sdk::session::Viewport;
use session_sdk::upload::OutboundRequest;
use session_sdk::{
    ManualProducer, PageInfo, ProducerHandle, RawEvent, SdkError, SdkOptions, SessionManager,
    SessionState, StaticHost, Transport, MASK_MARKER,
};

/// Records every request and answers with a configurable status.
struct MockTransport {
    status: AtomicU16,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl MockTransport {
    fn new(status: u16) -> Arc<Self> {
        Arc::new(MockTransport {
            status: AtomicU16::new(status),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    fn bodies(&self) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .map(|r| serde_json::from_str(&r.body).unwrap())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(&self, request: OutboundRequest) -> Result<u16, String> {
        self.requests.lock().push(request);
        Ok(self.status.load(Ordering::SeqCst))
    }
}

struct Harness {
    manager: SessionManager,
    handle: ProducerHandle,
    transport: Arc<MockTransport>,
    host: Arc<StaticHost>,
}

fn page() -> PageInfo {
    PageInfo {
        user_agent: "Mozilla/5.0 (test)".to_string(),
        url: "https://shop.example/checkout".to_string(),
        referrer: Some("https://shop.example/cart".to_string()),
        viewport: Viewport {
            width: 1440,
            height: 900,
        },
        timezone: "Europe/Berlin".to_string(),
        language: "de-DE".to_string(),
    }
}

fn options() -> SdkOptions {
    let mut options = SdkOptions::with_api_key("test-key");
    options.upload_interval_ms = Some(1_000);
    options.max_retries = Some(3);
    options.retry_delay_ms = Some(1_000);
    options
}

fn harness(options: SdkOptions, status: u16) -> Harness {
    let (producer, handle) = ManualProducer::new();
    let transport = MockTransport::new(status);
    let host = Arc::new(StaticHost::new(page()));
    let manager = SessionManager::new(host.clone(), Box::new(producer), transport.clone());
    manager.init(options).unwrap();
    Harness {
        manager,
        handle,
        transport,
        host,
    }
}

fn click(ts: u64) -> RawEvent {
    RawEvent::Interaction(InteractionRecord {
        timestamp: ts,
        kind: InteractionKind::MouseInteraction,
        target: vec![ElementNode::new("button").with_id("buy")],
        value: None,
        data: json!({ "x": 10, "y": 20 }),
    })
}

fn input(ts: u64, input_type: &str, value: &str) -> RawEvent {
    RawEvent::Interaction(InteractionRecord {
        timestamp: ts,
        kind: InteractionKind::Input,
        target: vec![
            ElementNode::new("input").with_attribute("type", input_type),
            ElementNode::new("form"),
        ],
        value: Some(value.to_string()),
        data: Value::Null,
    })
}

fn console(ts: u64) -> RawEvent {
    RawEvent::Console(ConsoleRecord {
        timestamp: ts,
        level: ConsoleLevel::Error,
        args: vec!["payment failed".to_string()],
        stack: None,
    })
}

fn request(ts: u64) -> RawEvent {
    RawEvent::Network(NetworkRecord {
        timestamp: ts,
        method: "POST".to_string(),
        url: "/api/pay".to_string(),
        status: Some(502),
        duration_ms: 340,
    })
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_do_not_track_suppresses_recording() {
    let h = harness(options(), 200);
    h.host.set_do_not_track(true);

    h.manager.start_recording().unwrap();

    assert_eq!(h.manager.state(), SessionState::Idle);
    assert!(!h.manager.is_active());
    assert!(h.manager.session_id().is_none());
    assert!(!h.handle.is_running());
    assert!(!h.handle.emit(click(1)));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_do_not_track_read_on_every_start() {
    let h = harness(options(), 200);
    h.host.set_do_not_track(true);
    h.manager.start_recording().unwrap();
    assert!(h.manager.session_id().is_none());

    h.host.set_do_not_track(false);
    h.manager.start_recording().unwrap();
    assert!(h.manager.is_active());
    assert!(h.manager.session_id().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_stop_flushes_pending_events_in_one_batch() {
    let h = harness(options(), 200);
    h.manager.start_recording().unwrap();

    assert!(h.handle.emit(click(1)));
    assert!(h.handle.emit(click(2)));

    let report = h.manager.stop().await.unwrap().unwrap();

    assert!(report.is_delivered());
    assert_eq!(report.event_count, 2);
    assert_eq!(h.transport.calls(), 1);
    let body = &h.transport.bodies()[0];
    assert_eq!(body["events"].as_array().unwrap().len(), 2);
    assert_eq!(h.manager.buffered_events(), 0);
    assert_eq!(h.manager.state(), SessionState::Stopped);
    assert!(!h.manager.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_ignores_late_events() {
    let h = harness(options(), 200);
    h.manager.start_recording().unwrap();
    h.handle.emit(click(1));
    h.manager.stop().await.unwrap();

    assert!(!h.handle.emit(click(2)));
    assert_eq!(h.manager.stop().await.unwrap(), None);
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_with_empty_buffer_sends_nothing() {
    let h = harness(options(), 200);
    h.manager.start_recording().unwrap();
    assert_eq!(h.manager.stop().await.unwrap(), None);
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_session_duration() {
    let h = harness(options(), 200);
    assert_eq!(h.manager.session_duration(), 0);

    h.manager.start_recording().unwrap();
    tokio::time::sleep(Duration::from_millis(5_000)).await;

    assert!(h.manager.session_duration() >= 5_000);
}

#[tokio::test(start_paused = true)]
async fn test_start_while_recording_is_noop() {
    let h = harness(options(), 200);
    h.manager.start_recording().unwrap();
    let id = h.manager.session_id();

    h.manager.start_recording().unwrap();
    assert_eq!(h.manager.session_id(), id);
}

#[tokio::test(start_paused = true)]
async fn test_init_while_recording_is_invalid() {
    let h = harness(options(), 200);
    h.manager.start_recording().unwrap();
    let err = h.manager.init(options()).unwrap_err();
    assert_eq!(
        err,
        SdkError::InvalidState {
            operation: "init",
            state: SessionState::Recording
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_opens_new_session() {
    let h = harness(options(), 200);
    h.manager.set_user_id("user-42").unwrap();
    h.manager.start_recording().unwrap();
    let first = h.manager.session_id().unwrap();
    h.manager.stop().await.unwrap();

    // Session id stays readable until destroy.
    assert_eq!(h.manager.session_id().as_deref(), Some(first.as_str()));

    h.manager.start_recording().unwrap();
    let second = h.manager.session_id().unwrap();
    assert_ne!(first, second);
    assert_eq!(h.manager.user_id().as_deref(), Some("user-42"));
}

#[tokio::test(start_paused = true)]
async fn test_producer_failure_is_fatal_to_start() {
    let transport = MockTransport::new(200);
    let manager = SessionManager::new(
        Arc::new(StaticHost::new(page())),
        Box::new(ManualProducer::unsupported("DOM capture unavailable")),
        transport.clone(),
    );
    manager.init(options()).unwrap();

    let err = manager.start_recording().unwrap_err();
    assert!(matches!(err, SdkError::Capability(_)));
    assert_eq!(manager.state(), SessionState::Idle);
    assert!(manager.session_id().is_none());
}

// ============================================================================
// DESTROY
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_destroy_drops_buffer_without_flushing() {
    let h = harness(options(), 200);
    h.manager.start_recording().unwrap();
    h.handle.emit(click(1));
    h.handle.emit(console(2));

    h.manager.destroy();

    assert_eq!(h.manager.state(), SessionState::Destroyed);
    assert!(h.manager.session_id().is_none());
    assert_eq!(h.manager.session_duration(), 0);
    assert!(!h.manager.is_active());
    assert!(!h.handle.emit(click(3)));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_calls_after_destroy_fail() {
    let h = harness(options(), 200);
    h.manager.destroy();
    h.manager.destroy();

    assert_eq!(h.manager.set_user_id("u"), Err(SdkError::Destroyed));
    assert_eq!(
        h.manager.set_attributes([("plan", json!("pro"))]),
        Err(SdkError::Destroyed)
    );
    assert_eq!(h.manager.start_recording(), Err(SdkError::Destroyed));
    assert_eq!(h.manager.init(options()), Err(SdkError::Destroyed));
    assert_eq!(h.manager.stop().await, Err(SdkError::Destroyed));
    assert_eq!(h.manager.flush().await, Err(SdkError::Destroyed));
}

// ============================================================================
// DELIVERY
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_retries_then_reports() {
    let h = harness(options(), 503);
    let failures = Arc::new(AtomicUsize::new(0));
    let seen = failures.clone();
    h.manager.on_delivery_failure(move |report| {
        assert_eq!(report.attempts, 4);
        seen.fetch_add(1, Ordering::SeqCst);
    });

    h.manager.start_recording().unwrap();
    h.handle.emit(click(1));
    let report = h.manager.stop().await.unwrap().unwrap();

    assert!(!report.is_delivered());
    assert_eq!(report.attempts, 4);
    assert_eq!(h.transport.calls(), 4);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(h.manager.stats().batches_failed, 1);
    // The failed batch is gone, not re-queued.
    assert_eq!(h.manager.buffered_events(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_tick_delivers() {
    let h = harness(options(), 200);
    h.manager.start_recording().unwrap();
    h.handle.emit(click(1));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.transport.calls(), 1);

    h.handle.emit(click(2));
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(h.transport.calls(), 2);

    // Sequence numbers keep increasing across batches.
    let bodies = h.transport.bodies();
    assert_eq!(bodies[0]["events"][0]["seq"], 0);
    assert_eq!(bodies[1]["events"][0]["seq"], 1);

    h.manager.stop().await.unwrap();
    assert_eq!(h.manager.stats().batches_sent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_manual_flush_requires_recording() {
    let h = harness(options(), 200);
    assert!(matches!(
        h.manager.flush().await,
        Err(SdkError::InvalidState { .. })
    ));

    h.manager.start_recording().unwrap();
    h.handle.emit(request(1));
    let report = h.manager.flush().await.unwrap().unwrap();
    assert!(report.is_delivered());
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_carries_session_state() {
    let h = harness(options(), 200);
    h.manager.set_user_id("user-7").unwrap();
    h.manager
        .set_attributes([("plan", json!("free")), ("seats", json!(3))])
        .unwrap();
    h.manager.start_recording().unwrap();
    h.manager.set_attributes([("plan", json!("pro"))]).unwrap();

    h.handle.emit(click(10));
    h.handle.emit(console(11));
    h.handle.emit(request(12));
    h.manager.stop().await.unwrap();

    let body = &h.transport.bodies()[0];
    assert_eq!(body["sessionId"], json!(h.manager.session_id().unwrap()));
    assert_eq!(body["userId"], "user-7");
    assert_eq!(body["attributes"], json!({ "plan": "pro", "seats": 3 }));
    assert_eq!(body["metadata"]["url"], "https://shop.example/checkout");
    assert_eq!(body["metadata"]["userAgent"], "Mozilla/5.0 (test)");
    assert_eq!(body["metadata"]["timezone"], "Europe/Berlin");
    assert_eq!(body["metadata"]["viewport"]["width"], 1440);
    assert_eq!(body["events"].as_array().unwrap().len(), 1);
    assert_eq!(body["consoleLogs"][0]["args"][0], "payment failed");
    assert_eq!(body["networkRequests"][0]["status"], 502);
    assert!(body["timestamp"].as_u64().unwrap() > 0);
    assert!(body["duration"].is_u64());

    let headers = &h.transport.requests.lock()[0].headers;
    assert!(headers.contains(&("X-API-Key".to_string(), "test-key".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_user_state_settable_while_idle_and_stopped() {
    let h = harness(options(), 200);
    h.manager.set_user_id("a").unwrap();
    h.manager.start_recording().unwrap();
    h.manager.stop().await.unwrap();
    h.manager.set_user_id("b").unwrap();
    h.manager.set_attributes([("k", json!(1))]).unwrap();
    assert_eq!(h.manager.user_id().as_deref(), Some("b"));
    assert_eq!(h.manager.attributes()["k"], json!(1));

    h.manager.clear_user_id().unwrap();
    assert!(h.manager.user_id().is_none());
}

// ============================================================================
// SHUTDOWN WITH DELIVERIES IN FLIGHT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_retrying_tick_delivery() {
    let h = harness(options(), 503);
    h.manager.start_recording().unwrap();
    h.handle.emit(click(1));

    // Tick at 1000ms sends the first attempt, retries follow every 1000ms.
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.transport.calls(), 1);

    let started = tokio::time::Instant::now();
    assert_eq!(h.manager.stop().await.unwrap(), None);
    let waited = started.elapsed();

    assert_eq!(h.transport.calls(), 4);
    assert_eq!(h.manager.stats().batches_failed, 1);
    let budget = h.manager.config().unwrap().retry_budget();
    assert!(waited >= Duration::from_millis(2_900));
    assert!(waited <= budget);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_aborts_tick_deliveries() {
    let h = harness(options(), 503);
    h.manager.start_recording().unwrap();
    h.handle.emit(click(1));
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(h.transport.calls(), 1);

    h.manager.destroy();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_cancels_pending_stop() {
    let Harness {
        manager,
        handle,
        transport,
        ..
    } = harness(options(), 503);
    let manager = Arc::new(manager);
    manager.start_recording().unwrap();
    handle.emit(click(1));

    let stopping = tokio::spawn({
        let manager = manager.clone();
        async move { manager.stop().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.calls(), 1);

    manager.destroy();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(transport.calls(), 1);
    assert_eq!(stopping.await.unwrap(), Ok(None));
    assert_eq!(manager.state(), SessionState::Destroyed);
}

// ============================================================================
// PRIVACY
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_password_never_leaves_the_gate() {
    let h = harness(options(), 200);
    h.manager.start_recording().unwrap();
    h.handle.emit(input(1, "password", "secret123"));
    h.handle.emit(input(2, "text", "hello"));
    h.manager.stop().await.unwrap();

    let raw_body = h.transport.requests.lock()[0].body.clone();
    assert!(!raw_body.contains("secret123"));

    let body: Value = serde_json::from_str(&raw_body).unwrap();
    assert_eq!(body["events"][0]["value"], MASK_MARKER);
    assert_eq!(body["events"][1]["value"], "hello");
}

#[tokio::test(start_paused = true)]
async fn test_blocked_class_never_buffered() {
    let mut opts = options();
    opts.record.block_class = "no-record".to_string();
    let h = harness(opts, 200);
    h.manager.start_recording().unwrap();

    let blocked = RawEvent::Interaction(InteractionRecord {
        timestamp: 1,
        kind: InteractionKind::MouseInteraction,
        target: vec![ElementNode::new("div").with_class("no-record")],
        value: None,
        data: Value::Null,
    });
    assert!(!h.handle.emit(blocked));
    assert_eq!(h.manager.buffered_events(), 0);

    assert_eq!(h.manager.stop().await.unwrap(), None);
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_block_selector_and_toggles() {
    let mut opts = options();
    opts.record.block_selector = Some("#payment input".to_string());
    opts.record.network = false;
    let h = harness(opts, 200);
    h.manager.start_recording().unwrap();

    let inside = RawEvent::Interaction(InteractionRecord {
        timestamp: 1,
        kind: InteractionKind::Input,
        target: vec![
            ElementNode::new("input"),
            ElementNode::new("div").with_id("payment"),
        ],
        value: Some("4111".to_string()),
        data: Value::Null,
    });
    assert!(!h.handle.emit(inside));
    assert!(!h.handle.emit(request(2)));
    assert!(h.handle.emit(console(3)));
    assert_eq!(h.manager.buffered_events(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_overflow_drops_oldest() {
    let mut opts = options();
    opts.max_buffered_events = Some(Some(2));
    let h = harness(opts, 200);
    h.manager.start_recording().unwrap();
    for ts in 1..=3 {
        h.handle.emit(click(ts));
    }
    h.manager.stop().await.unwrap();

    let body = &h.transport.bodies()[0];
    let timestamps: Vec<u64> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["timestamp"].as_u64().unwrap())
        .collect();
    assert_eq!(timestamps, vec![2, 3]);
    assert_eq!(h.manager.stats().events_dropped, 1);
}
