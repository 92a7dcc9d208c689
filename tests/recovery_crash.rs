//! Recovery and Durability Tests
//!
//! Tests for invariants:
//! - A started LRA survives a coordinator restart
//! - Recovery re-drives unfinished end phases to convergence
//! - Asynchronous participants converge through status polling

use std::sync::Arc;
use std::time::Duration;

use sagad::engine::{Coordinator, EngineSettings, EnlistSource};
use sagad::lra::LraStatus;
use sagad::recovery;
use sagad::store::{FileStore, MemoryStore, RecordKind};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Test Utilities
// =============================================================================

const BASE: &str = "http://localhost:8080/lra-coordinator";

fn settings() -> EngineSettings {
    EngineSettings {
        callback_timeout: Duration::from_secs(2),
        retry_backoff_base_ms: 1,
        retry_backoff_cap_ms: 20,
    }
}

fn file_coordinator(dir: &TempDir) -> Arc<Coordinator> {
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    Arc::new(Coordinator::new(BASE, store, settings()).unwrap())
}

async fn drive_until_terminal(c: &Arc<Coordinator>, id: &str) -> LraStatus {
    for _ in 0..100 {
        recovery::run_pass(c).await;
        let status = c.get_status(id).await.unwrap();
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("LRA did not converge: {}", id);
}

// =============================================================================
// Durability across restart
// =============================================================================

/// A started LRA is recovered after the process is replaced.
#[tokio::test]
async fn test_started_lra_survives_restart() {
    let dir = TempDir::new().unwrap();

    let id = {
        let first = file_coordinator(&dir);
        first.start_lra("t1", 0, None).await.unwrap()
        // first dropped: simulated crash
    };

    let second = file_coordinator(&dir);
    let stats = recovery::run_pass(&second).await;
    assert_eq!(stats.scanned, 1);
    assert_eq!(
        second.get_status(id.as_str()).await.unwrap(),
        LraStatus::Active
    );
    assert_eq!(second.list_lras(None).await.unwrap().len(), 1);
}

/// A close interrupted by a crash is re-driven on the next coordinator's
/// recovery tick, and the LRA disappears once complete succeeds.
#[tokio::test]
async fn test_recovery_redrives_interrupted_close() {
    let dir = TempDir::new().unwrap();
    let participant = MockServer::start().await;

    // The first complete attempt fails hard; the coordinator "crashes"
    // with the LRA left in Closing.
    Mock::given(method("PUT"))
        .and(path("/k1"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&participant)
        .await;
    Mock::given(method("PUT"))
        .and(path("/k1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Completed"))
        .mount(&participant)
        .await;

    let id = {
        let first = file_coordinator(&dir);
        let id = first.start_lra("t1", 0, None).await.unwrap();
        let link = format!(
            "<{uri}/c1>; rel=\"compensate\", <{uri}/k1>; rel=\"complete\"",
            uri = participant.uri()
        );
        first
            .join(id.as_str(), EnlistSource::Link(link), 0, None)
            .await
            .unwrap();
        let status = first.close(id.as_str()).await.unwrap();
        assert_eq!(status, LraStatus::Closing);
        id
    };

    // Fresh process over the same store
    let second = file_coordinator(&dir);
    let status = drive_until_terminal(&second, id.as_str()).await;
    assert_eq!(status, LraStatus::Closed);

    // Gone from the live records and from the default listing
    assert!(second
        .store()
        .read(RecordKind::LongRunningAction, id.uid())
        .unwrap()
        .is_none());
    assert!(second.list_lras(None).await.unwrap().is_empty());

    // The participant saw the retry
    let requests = participant.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

// =============================================================================
// Asynchronous participants
// =============================================================================

/// A participant answering 202 converges through status polling.
#[tokio::test]
async fn test_async_participant_converges_via_status_polls() {
    let participant = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/k1"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&participant)
        .await;
    // Status answers "still working" once, then terminal.
    Mock::given(method("GET"))
        .and(path("/s1"))
        .respond_with(ResponseTemplate::new(202))
        .up_to_n_times(1)
        .mount(&participant)
        .await;
    Mock::given(method("GET"))
        .and(path("/s1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Completed"))
        .mount(&participant)
        .await;

    let store = Arc::new(MemoryStore::new());
    let c = Arc::new(Coordinator::new(BASE, store, settings()).unwrap());
    let id = c.start_lra("t1", 0, None).await.unwrap();
    let link = format!(
        "<{uri}/c1>; rel=\"compensate\", <{uri}/k1>; rel=\"complete\", <{uri}/s1>; rel=\"status\"",
        uri = participant.uri()
    );
    c.join(id.as_str(), EnlistSource::Link(link), 0, None)
        .await
        .unwrap();

    let status = c.close(id.as_str()).await.unwrap();
    assert_eq!(status, LraStatus::Closing);
    assert_eq!(c.recovering_ids().await, vec![id.as_str().to_string()]);

    let status = drive_until_terminal(&c, id.as_str()).await;
    assert_eq!(status, LraStatus::Closed);
    assert!(c.recovering_ids().await.is_empty());
}

/// The recovery listing exposes in-flight end phases until convergence.
#[tokio::test]
async fn test_recovering_ids_drain_after_convergence() {
    let participant = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/c1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&participant)
        .await;
    Mock::given(method("PUT"))
        .and(path("/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Compensated"))
        .mount(&participant)
        .await;

    let store = Arc::new(MemoryStore::new());
    let c = Arc::new(Coordinator::new(BASE, store, settings()).unwrap());
    let id = c.start_lra("t1", 0, None).await.unwrap();
    c.join(
        id.as_str(),
        EnlistSource::Link(format!("<{}/c1>; rel=\"compensate\"", participant.uri())),
        0,
        None,
    )
    .await
    .unwrap();

    assert_eq!(c.cancel(id.as_str()).await.unwrap(), LraStatus::Cancelling);
    assert!(!c.recovering_ids().await.is_empty());

    let status = drive_until_terminal(&c, id.as_str()).await;
    assert_eq!(status, LraStatus::Cancelled);
    assert!(c.recovering_ids().await.is_empty());
}
