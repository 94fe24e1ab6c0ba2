//! Reconciliation integration tests
//!
//! A real SQLite file and a wiremock server stand in for the device store and
//! the remote API.

use std::time::Duration;

use campo_sync::offline::{OperationQueue, PassOutcome};
use campo_sync::shared::SyncConfig;
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{atividade, denuncia, TestQueue, TEST_TIMEOUT};
use crate::{assert_completed, assert_contains, assert_ok, assert_pending};

#[tokio::test]
async fn test_timeout_then_server_error_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/denuncias"))
        .respond_with(ResponseTemplate::new(201).set_delay(TEST_TIMEOUT * 4))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/denuncias"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/denuncias"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let queue = TestQueue::new(&server.uri());
    let db = queue.open().await;
    let event = assert_ok!(OperationQueue::new(db.clone()).enqueue(denuncia("denuncia-e1")).await);
    let reconciler = queue.reconciler("foreground").await;

    let report = assert_completed!(reconciler.reconcile_once().await);
    assert_eq!(report.failed, 1);
    let stored = assert_ok!(db.get(&event.id).await).expect("event still queued");
    assert_eq!(stored.attempts, 1);
    assert_contains!(stored.last_error.clone().unwrap_or_default(), "timed out");

    let report = assert_completed!(reconciler.reconcile_once().await);
    assert_eq!(report.failed, 1);
    let stored = assert_ok!(db.get(&event.id).await).expect("event still queued");
    assert_eq!(stored.attempts, 2);
    assert_eq!(stored.last_error.as_deref(), Some("HTTP 500"));

    let report = assert_completed!(reconciler.reconcile_once().await);
    assert_eq!(report.delivered, 1);
    assert!(assert_ok!(db.get(&event.id).await).is_none());
}

#[tokio::test]
async fn test_conflict_settles_the_event() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/atividades/42"))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate idempotency key"))
        .expect(1)
        .mount(&server)
        .await;

    let queue = TestQueue::new(&server.uri());
    let db = queue.open().await;
    assert_ok!(OperationQueue::new(db.clone()).enqueue(atividade(42, "atividade-42-v3")).await);

    let report = assert_completed!(queue.reconciler("foreground").await.reconcile_once().await);
    assert_eq!(report.already_applied, 1);
    assert_eq!(report.synced(), 1);
    assert!(!report.had_failures());
    assert_pending!(db, 0);
}

#[tokio::test]
async fn test_client_errors_are_retried_not_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("{\"erro\":\"campo obrigatório\"}"))
        .mount(&server)
        .await;

    let queue = TestQueue::new(&server.uri());
    let db = queue.open().await;
    let event = assert_ok!(OperationQueue::new(db.clone()).enqueue(denuncia("denuncia-422")).await);
    let reconciler = queue.reconciler("foreground").await;

    for expected_attempts in 1..=3 {
        let report = assert_completed!(reconciler.reconcile_once().await);
        assert_eq!(report.failed, 1);
        let stored = assert_ok!(db.get(&event.id).await).expect("event still queued");
        assert_eq!(stored.attempts, expected_attempts);
        assert_eq!(stored.last_error.as_deref(), Some("HTTP 422"));
    }
}

#[tokio::test]
async fn test_same_idempotency_key_on_every_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let queue = TestQueue::new(&server.uri());
    let db = queue.open().await;
    assert_ok!(OperationQueue::new(db.clone()).enqueue(denuncia("denuncia-7f3a")).await);
    let reconciler = queue.reconciler("foreground").await;

    for _ in 0..4 {
        assert_completed!(reconciler.reconcile_once().await);
    }
    assert_pending!(db, 0);

    let requests = server.received_requests().await.expect("request recording enabled");
    assert_eq!(requests.len(), 4);
    for request in &requests {
        let key = request
            .headers
            .get("idempotency-key")
            .and_then(|value| value.to_str().ok());
        assert_eq!(key, Some("denuncia-7f3a"));
    }
}

#[tokio::test]
async fn test_overlapping_passes_in_one_context_send_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let queue = TestQueue::new(&server.uri());
    let db = queue.open().await;
    assert_ok!(OperationQueue::new(db.clone()).enqueue(denuncia("denuncia-overlap")).await);
    let reconciler = queue.reconciler("foreground").await;

    let (first, second) = tokio::join!(reconciler.reconcile_once(), reconciler.reconcile_once());
    let first = assert_ok!(first);
    let second = assert_ok!(second);

    assert!(first.is_skipped() != second.is_skipped(), "exactly one pass should run");
    let report = first.report().or(second.report()).expect("one completed pass");
    assert_eq!(report.delivered, 1);
    assert!(!reconciler.is_running());
    assert_pending!(db, 0);
}

#[tokio::test]
async fn test_two_contexts_racing_on_one_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(150)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(409).set_delay(Duration::from_millis(150)))
        .mount(&server)
        .await;

    let queue = TestQueue::new(&server.uri());
    let db = queue.open().await;
    assert_ok!(OperationQueue::new(db.clone()).enqueue(denuncia("denuncia-race")).await);

    let foreground = queue.reconciler("foreground").await;
    let background = queue.reconciler("background").await;
    let (a, b) = tokio::join!(foreground.reconcile_once(), background.reconcile_once());
    let a = assert_completed!(a);
    let b = assert_completed!(b);

    assert_eq!(a.delivered + b.delivered, 1);
    assert_eq!(a.already_applied + b.already_applied, 1);
    assert!(!a.had_failures() && !b.had_failures());
    assert_pending!(db, 0);
}

#[tokio::test]
async fn test_queue_survives_reopen() {
    let queue = TestQueue::new("http://localhost:8000/v1");

    let first = queue.open().await;
    let event = assert_ok!(
        OperationQueue::new(first.clone())
            .enqueue(denuncia("denuncia-durable").with_header("X-Origem", "campo"))
            .await
    );
    first.close().await;

    let second = queue.open().await;
    let restored = assert_ok!(second.get(&event.id).await).expect("event survived reopen");
    assert_eq!(restored, event);
    assert_eq!(restored.headers.get("X-Origem").map(String::as_str), Some("campo"));
}

#[tokio::test]
async fn test_attempt_cap_moves_event_to_dead_letters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let queue = TestQueue::with(&server.uri(), |builder| builder.max_attempts(2));
    let db = queue.open().await;
    let event = assert_ok!(OperationQueue::new(db.clone()).enqueue(denuncia("denuncia-cap")).await);
    let reconciler = queue.reconciler("foreground").await;

    let report = assert_completed!(reconciler.reconcile_once().await);
    assert_eq!((report.failed, report.dead_lettered), (1, 0));

    let report = assert_completed!(reconciler.reconcile_once().await);
    assert_eq!((report.failed, report.dead_lettered), (0, 1));
    assert!(report.had_failures());
    assert_pending!(db, 0);

    let dead = assert_ok!(db.dead_letters().await);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event.id, event.id);
    assert_eq!(dead[0].event.attempts, 2);
    assert_eq!(dead[0].event.last_error.as_deref(), Some("HTTP 500"));

    // Nothing left to send.
    let report = assert_completed!(reconciler.reconcile_once().await);
    assert_eq!(report.attempted, 0);
}

#[tokio::test]
async fn test_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/atividades/7"))
        .and(header("content-type", "application/json"))
        .and(header("idempotency-key", "atividade-7-v1"))
        .and(header("authorization", "Bearer do-evento"))
        .and(header("x-dispositivo", "tablet-03"))
        .and(body_json(serde_json::json!({ "status": "concluida" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let queue = TestQueue::with(&format!("{}/v1/", server.uri()), |builder| {
        builder
            .default_header("Authorization", "Bearer padrao")
            .default_header("X-Dispositivo", "tablet-03")
    });
    let db = queue.open().await;
    let request = assert_ok!(atividade(7, "atividade-7-v1")
        .with_header("authorization", "Bearer do-evento")
        .with_json(&serde_json::json!({ "status": "concluida" })));
    assert_ok!(OperationQueue::new(db.clone()).enqueue(request).await);

    let report = assert_completed!(queue.reconciler("foreground").await.reconcile_once().await);
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn test_absolute_target_bypasses_api_base() {
    let api = MockServer::start().await;
    let elsewhere = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/campo"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&elsewhere)
        .await;

    let queue = TestQueue::new(&api.uri());
    let db = queue.open().await;
    let request = campo_sync::offline::EnqueueRequest::new(
        "NOTIFY_HOOK",
        format!("{}/hooks/campo", elsewhere.uri()),
        campo_sync::shared::Method::Post,
        "hook-1",
    );
    assert_ok!(OperationQueue::new(db.clone()).enqueue(request).await);

    let report = assert_completed!(queue.reconciler("foreground").await.reconcile_once().await);
    assert_eq!(report.delivered, 1);
    assert!(api.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_unreachable_api_records_network_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let queue = TestQueue::new(&format!("http://127.0.0.1:{}", port));
    let db = queue.open().await;
    let event = assert_ok!(OperationQueue::new(db.clone()).enqueue(denuncia("denuncia-offline")).await);

    let outcome = queue.reconciler("foreground").await.reconcile_once().await;
    assert!(matches!(outcome, Ok(PassOutcome::Completed(ref report)) if report.failed == 1));

    let stored = assert_ok!(db.get(&event.id).await).expect("event still queued");
    assert_eq!(stored.attempts, 1);
    assert_contains!(stored.last_error.unwrap_or_default(), "network error");
}

#[tokio::test]
async fn test_config_from_toml_drives_reconciler() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/denuncias"))
        .and(header("x-chave-app", "abc"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let toml = format!(
        r#"
api_base_url = "{}/api"
database_path = "{}"
request_timeout_secs = 2

[default_headers]
X-Chave-App = "abc"
"#,
        server.uri(),
        dir.path().join("queue.db").display()
    );
    let config = assert_ok!(SyncConfig::from_toml_str(&toml));

    let db = assert_ok!(campo_sync::local_db::LocalDatabase::open(&config.database_path).await);
    assert_ok!(OperationQueue::new(db.clone()).enqueue(denuncia("denuncia-toml")).await);

    let reconciler = campo_sync::offline::Reconciler::new(
        db.clone(),
        assert_ok!(campo_sync::offline::ApiClient::new(&config)),
    );
    let report = assert_completed!(reconciler.reconcile_once().await);
    assert_eq!(report.delivered, 1);
}
