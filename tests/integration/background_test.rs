//! Foreground/background coordination tests
//!
//! Both contexts open their own handle on the same queue file, as a page and
//! its service worker would.

use std::time::Duration;

use assert_matches::assert_matches;
use campo_sync::offline::PassOutcome;
use campo_sync::shared::ContextMessage;
use campo_sync::sync::network_monitor::NetworkMonitor;
use campo_sync::sync::{BackgroundSync, NetworkStatus, PassNotice, PassTrigger, SyncService};
use tokio::sync::broadcast;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{denuncia, TestQueue};
use crate::{assert_ok, assert_pending};

async fn next_notice(notices: &mut broadcast::Receiver<PassNotice>) -> PassNotice {
    assert_ok!(
        tokio::time::timeout(Duration::from_secs(5), notices.recv()).await,
        "timed out waiting for background pass"
    )
    .expect("background notices closed")
}

#[tokio::test]
async fn test_enqueue_in_foreground_is_delivered_by_background() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let queue = TestQueue::new(&server.uri());
    let monitor = NetworkMonitor::default();
    let background = assert_ok!(BackgroundSync::spawn(&queue.config, monitor.clone()).await);
    let mut notices = background.subscribe();

    // Foreground loop not started: only the background can deliver.
    let mut service = assert_ok!(SyncService::new(queue.config.clone(), monitor).await);
    service.attach_background(background.messenger());
    assert_ok!(service.enqueue(denuncia("denuncia-bg")).await);

    let notice = next_notice(&mut notices).await;
    assert_eq!(notice.trigger, PassTrigger::Message);
    assert_matches!(notice.outcome, Ok(PassOutcome::Completed(report)) if report.delivered == 1);

    let db = queue.open().await;
    assert_pending!(db, 0);
    background.shutdown().await;
}

#[tokio::test]
async fn test_registration_deferred_until_restore() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let queue = TestQueue::new(&server.uri());
    let monitor = NetworkMonitor::new(NetworkStatus::Offline);
    let background = assert_ok!(BackgroundSync::spawn(&queue.config, monitor.clone()).await);
    let mut notices = background.subscribe();

    let mut service = assert_ok!(SyncService::new(queue.config.clone(), monitor.clone()).await);
    service.attach_background(background.messenger());
    assert_ok!(service.enqueue(denuncia("denuncia-deferred")).await);
    assert!(service.request_background_sync(campo_sync::shared::message::DEFAULT_SYNC_TAG));

    let early = tokio::time::timeout(Duration::from_millis(200), notices.recv()).await;
    assert!(early.is_err(), "no background pass while offline");
    assert!(server.received_requests().await.unwrap_or_default().is_empty());

    monitor.set_online(true);
    let notice = next_notice(&mut notices).await;
    assert_eq!(notice.trigger, PassTrigger::ConnectivityRestored);
    assert_matches!(notice.outcome, Ok(PassOutcome::Completed(report)) if report.already_applied == 1);

    background.shutdown().await;
}

#[tokio::test]
async fn test_both_contexts_running_settle_everything_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;

    let queue = TestQueue::new(&server.uri());
    let monitor = NetworkMonitor::default();
    let background = assert_ok!(BackgroundSync::spawn(&queue.config, monitor.clone()).await);
    let mut service = assert_ok!(SyncService::new(queue.config.clone(), monitor).await);
    service.attach_background(background.messenger());
    service.start().await;

    for n in 0..5 {
        assert_ok!(service.enqueue(denuncia(&format!("denuncia-par-{}", n))).await);
    }

    let db = &queue.open().await;
    let drained = crate::common::eventually(Duration::from_secs(5), || async move {
        db.count().await.map(|n| n == 0).unwrap_or(false)
    })
    .await;
    assert!(drained, "every event should leave the queue");

    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.len() >= 5, "each event delivered at least once");
    assert!(db.dead_letters().await.map(|d| d.is_empty()).unwrap_or(false));

    service.shutdown().await;
    background.shutdown().await;
}

#[tokio::test]
async fn test_raw_json_messages_from_the_page() {
    let queue = TestQueue::new("http://127.0.0.1:9/v1");
    let background = assert_ok!(BackgroundSync::spawn(&queue.config, NetworkMonitor::default()).await);
    let mut notices = background.subscribe();

    assert!(assert_ok!(background.messenger().post_json(r#"{"type":"PROCESS_QUEUE"}"#)));
    let notice = next_notice(&mut notices).await;
    assert_eq!(notice.trigger, PassTrigger::Message);

    assert!(background.post_message(ContextMessage::register_default()));
    let notice = next_notice(&mut notices).await;
    assert_eq!(notice.trigger, PassTrigger::SyncRegistration);

    assert!(background.messenger().post_json("{\"type\":\"UNKNOWN\"}").is_err());

    background.shutdown().await;
}
