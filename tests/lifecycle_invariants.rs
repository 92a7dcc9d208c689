//! LRA Lifecycle Invariant Tests
//!
//! Tests for invariants:
//! - Completion in enlistment order, compensation in reverse
//! - Terminal statuses are sticky
//! - At most one end-phase driver per LRA
//! - Nested cancel propagation

use std::sync::Arc;
use std::time::Duration;

use sagad::engine::{Coordinator, CoordinatorError, EngineSettings, EnlistSource};
use sagad::lra::LraStatus;
use sagad::store::MemoryStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Test Utilities
// =============================================================================

fn coordinator() -> Arc<Coordinator> {
    let settings = EngineSettings {
        callback_timeout: Duration::from_secs(2),
        retry_backoff_base_ms: 1,
        retry_backoff_cap_ms: 20,
    };
    Arc::new(
        Coordinator::new(
            "http://localhost:8080/lra-coordinator",
            Arc::new(MemoryStore::new()),
            settings,
        )
        .unwrap(),
    )
}

fn link_header(server: &MockServer, compensate: &str, complete: Option<&str>) -> String {
    let mut header = format!("<{}{}>; rel=\"compensate\"", server.uri(), compensate);
    if let Some(complete) = complete {
        header.push_str(&format!(", <{}{}>; rel=\"complete\"", server.uri(), complete));
    }
    header
}

// =============================================================================
// Simple close
// =============================================================================

/// Closing invokes complete exactly once and never compensate.
#[tokio::test]
async fn test_simple_close_completes_once() {
    let participant = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/k1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Completed"))
        .expect(1)
        .mount(&participant)
        .await;
    Mock::given(method("PUT"))
        .and(path("/c1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&participant)
        .await;

    let c = coordinator();
    let id = c.start_lra("t1", 0, None).await.unwrap();
    c.join(
        id.as_str(),
        EnlistSource::Link(link_header(&participant, "/c1", Some("/k1"))),
        0,
        None,
    )
    .await
    .unwrap();

    let status = c.close(id.as_str()).await.unwrap();
    assert_eq!(status, LraStatus::Closed);
}

// =============================================================================
// Ordering
// =============================================================================

/// Compensation runs in reverse enlistment order.
#[tokio::test]
async fn test_cancel_compensates_in_reverse_order() {
    let participant = MockServer::start().await;
    for n in 1..=3 {
        Mock::given(method("PUT"))
            .and(path(format!("/c{}", n)))
            .respond_with(ResponseTemplate::new(200).set_body_string("Compensated"))
            .expect(1)
            .mount(&participant)
            .await;
    }

    let c = coordinator();
    let id = c.start_lra("t1", 0, None).await.unwrap();
    for n in 1..=3 {
        c.join(
            id.as_str(),
            EnlistSource::Link(format!(
                "<{}/c{}>; rel=\"compensate\"",
                participant.uri(),
                n
            )),
            0,
            None,
        )
        .await
        .unwrap();
    }

    let status = c.cancel(id.as_str()).await.unwrap();
    assert_eq!(status, LraStatus::Cancelled);

    let requests = participant.received_requests().await.unwrap();
    let paths: Vec<String> = requests.iter().map(|r| r.url.path().to_string()).collect();
    assert_eq!(paths, vec!["/c3", "/c2", "/c1"]);
}

/// Completion runs in enlistment order.
#[tokio::test]
async fn test_close_completes_in_enlistment_order() {
    let participant = MockServer::start().await;
    for n in 1..=3 {
        Mock::given(method("PUT"))
            .and(path(format!("/k{}", n)))
            .respond_with(ResponseTemplate::new(200).set_body_string("Completed"))
            .expect(1)
            .mount(&participant)
            .await;
    }

    let c = coordinator();
    let id = c.start_lra("t1", 0, None).await.unwrap();
    for n in 1..=3 {
        c.join(
            id.as_str(),
            EnlistSource::Link(link_header(
                &participant,
                &format!("/x{}", n),
                Some(&format!("/k{}", n)),
            )),
            0,
            None,
        )
        .await
        .unwrap();
    }

    let status = c.close(id.as_str()).await.unwrap();
    assert_eq!(status, LraStatus::Closed);

    let requests = participant.received_requests().await.unwrap();
    let paths: Vec<String> = requests.iter().map(|r| r.url.path().to_string()).collect();
    assert_eq!(paths, vec!["/k1", "/k2", "/k3"]);
}

// =============================================================================
// Terminal stickiness
// =============================================================================

/// Terminal status reads never change; mutating verbs report gone.
#[tokio::test]
async fn test_terminal_status_is_sticky() {
    let c = coordinator();
    let id = c.start_lra("t1", 0, None).await.unwrap();
    assert_eq!(c.cancel(id.as_str()).await.unwrap(), LraStatus::Cancelled);

    for _ in 0..3 {
        assert_eq!(
            c.get_status(id.as_str()).await.unwrap(),
            LraStatus::Cancelled
        );
    }
    assert!(matches!(
        c.close(id.as_str()).await.unwrap_err(),
        CoordinatorError::Gone(_)
    ));
    assert!(matches!(
        c.cancel(id.as_str()).await.unwrap_err(),
        CoordinatorError::Gone(_)
    ));
    assert!(matches!(
        c.renew(id.as_str(), 1000).await.unwrap_err(),
        CoordinatorError::Gone(_)
    ));
}

// =============================================================================
// At-most-one driver
// =============================================================================

/// Two racing closes produce exactly one complete invocation.
#[tokio::test]
async fn test_concurrent_closes_drive_once() {
    let participant = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/k1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("Completed")
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&participant)
        .await;

    let c = coordinator();
    let id = c.start_lra("t1", 0, None).await.unwrap();
    c.join(
        id.as_str(),
        EnlistSource::Link(link_header(&participant, "/c1", Some("/k1"))),
        0,
        None,
    )
    .await
    .unwrap();

    let c1 = c.clone();
    let c2 = c.clone();
    let id1 = id.as_str().to_string();
    let id2 = id.as_str().to_string();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { c1.close(&id1).await }),
        tokio::spawn(async move { c2.close(&id2).await }),
    );
    // Neither racer may see an error; the loser reports the in-flight
    // status.
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    // Let the winning driver settle, then confirm the terminal state.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(c.get_status(id.as_str()).await.unwrap(), LraStatus::Closed);
}

// =============================================================================
// Nested LRAs
// =============================================================================

/// Cancelling a parent cancels its children; ended children are gone.
#[tokio::test]
async fn test_nested_cancel_propagates() {
    let c = coordinator();
    let parent = c.start_lra("p", 0, None).await.unwrap();
    let child = c.start_lra("n", 0, Some(parent.as_str())).await.unwrap();

    assert_eq!(
        c.cancel(parent.as_str()).await.unwrap(),
        LraStatus::Cancelled
    );
    assert_eq!(
        c.get_status(child.as_str()).await.unwrap(),
        LraStatus::Cancelled
    );
    assert!(matches!(
        c.close(child.as_str()).await.unwrap_err(),
        CoordinatorError::Gone(_)
    ));
}

/// Closing a parent completes participants of its children too.
#[tokio::test]
async fn test_nested_close_drives_child_participants() {
    let participant = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/child-complete"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Completed"))
        .expect(1)
        .mount(&participant)
        .await;

    let c = coordinator();
    let parent = c.start_lra("p", 0, None).await.unwrap();
    let child = c.start_lra("n", 0, Some(parent.as_str())).await.unwrap();
    c.join(
        child.as_str(),
        EnlistSource::Link(link_header(
            &participant,
            "/child-compensate",
            Some("/child-complete"),
        )),
        0,
        None,
    )
    .await
    .unwrap();

    assert_eq!(c.close(parent.as_str()).await.unwrap(), LraStatus::Closed);
    assert_eq!(
        c.get_status(child.as_str()).await.unwrap(),
        LraStatus::Closed
    );
}

// =============================================================================
// Permanent failure
// =============================================================================

/// A participant that vanishes mid end-phase fails the LRA into the
/// failed record kind.
#[tokio::test]
async fn test_status_poll_losing_participant_fails_the_lra() {
    use sagad::store::RecordKind;

    let participant = MockServer::start().await;
    // Complete is accepted asynchronously, then the participant vanishes:
    // the status endpoint answers 404.
    Mock::given(method("PUT"))
        .and(path("/k1"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&participant)
        .await;
    Mock::given(method("GET"))
        .and(path("/s1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&participant)
        .await;

    let c = coordinator();
    let id = c.start_lra("t1", 0, None).await.unwrap();
    let link = format!(
        "<{uri}/c1>; rel=\"compensate\", <{uri}/k1>; rel=\"complete\", <{uri}/s1>; rel=\"status\"",
        uri = participant.uri()
    );
    c.join(id.as_str(), EnlistSource::Link(link), 0, None)
        .await
        .unwrap();

    // The first pass parks the participant in Completing; later passes
    // poll the status endpoint and see it is lost.
    c.close(id.as_str()).await.unwrap();
    let mut status = c.get_status(id.as_str()).await.unwrap();
    for _ in 0..50 {
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        status = c.close(id.as_str()).await.unwrap_or(status);
    }

    assert_eq!(status, LraStatus::FailedToClose);
    assert!(c
        .store()
        .read(RecordKind::FailedLongRunningAction, id.uid())
        .unwrap()
        .is_some());
    assert!(c
        .store()
        .read(RecordKind::LongRunningAction, id.uid())
        .unwrap()
        .is_none());
}
