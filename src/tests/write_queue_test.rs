//! Write queue execution against a mocked warehouse

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::services::warehouse::{WarehouseClient, WriteOperation, WriteQueue, tables};

fn client_for(server: &MockServer) -> Arc<WarehouseClient> {
    Arc::new(WarehouseClient::new(&server.uri(), "test_project", "test_dataset"))
}

/// After one drain, no priority-2 request reaches the warehouse before a
/// pending priority-1 request.
#[tokio::test]
async fn priority_one_is_written_before_priority_two() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"/tables/[a-z_]+/insertAll$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"insert_errors": []})))
        .mount(&server)
        .await;

    let queue = WriteQueue::new(client_for(&server));
    queue.enqueue(tables::RAW_DOCS, vec![json!({"raw_id": "r1"})], WriteOperation::Insert, 3);
    queue.enqueue(tables::EVENTS, vec![json!({"event_id": "e1"})], WriteOperation::Insert, 2);
    queue.enqueue(
        tables::ASSESSMENTS,
        vec![json!({"assessment_id": "a1"})],
        WriteOperation::Insert,
        1,
    );

    let processed = queue.flush().await;
    assert_eq!(processed, 3);

    let requests = server.received_requests().await.unwrap();
    let order: Vec<String> = requests
        .iter()
        .map(|r: &Request| r.url.path().to_string())
        .collect();

    let assessments_pos = order
        .iter()
        .position(|p| p.contains("/assessments/"))
        .unwrap();
    let events_pos = order.iter().position(|p| p.contains("/events/")).unwrap();
    let raw_docs_pos = order.iter().position(|p| p.contains("/raw_docs/")).unwrap();

    assert!(assessments_pos < events_pos);
    assert!(events_pos < raw_docs_pos);

    // Everything drained
    assert_eq!(queue.status().pending, 0);
}

/// Upsert stages rows into an ephemeral table, merges on the primary key,
/// and drops the staging table afterwards.
#[tokio::test]
async fn upsert_uses_staging_table_and_merge() {
    let server = MockServer::start().await;

    // Staging table creation
    Mock::given(method("POST"))
        .and(path("/v1/projects/test_project/datasets/test_dataset/tables"))
        .and(body_partial_json(json!({"like": "users"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    // Staged rows insert
    Mock::given(method("POST"))
        .and(path_regex(r"/tables/temp_[0-9a-f]{8}/insertAll$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"insert_errors": []})))
        .expect(1)
        .mount(&server)
        .await;

    // MERGE statement
    Mock::given(method("POST"))
        .and(path("/v1/projects/test_project/queries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": []})))
        .expect(1)
        .mount(&server)
        .await;

    // Staging cleanup
    Mock::given(method("DELETE"))
        .and(path_regex(r"/tables/temp_[0-9a-f]{8}$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .upsert(tables::USERS, &[json!({"user_id": "u1", "username": "ana"})])
        .await
        .unwrap();

    // The MERGE keyed on user_id
    let requests = server.received_requests().await.unwrap();
    let merge_body = requests
        .iter()
        .find(|r| r.url.path().ends_with("/queries"))
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .unwrap();
    assert!(merge_body.contains("ON T.user_id = S.user_id"));
}

/// The staging table is dropped even when the MERGE fails.
#[tokio::test]
async fn staging_table_is_dropped_on_merge_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/projects/test_project/datasets/test_dataset/tables"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"/tables/temp_[0-9a-f]{8}/insertAll$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"insert_errors": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/projects/test_project/queries"))
        .respond_with(ResponseTemplate::new(500).set_body_string("merge exploded"))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"/tables/temp_[0-9a-f]{8}$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .upsert(tables::USERS, &[json!({"user_id": "u1"})])
        .await;
    assert!(result.is_err());
}

/// A failed request is dropped, not retried, and does not block the rest
/// of the drain.
#[tokio::test]
async fn failed_request_is_dropped_and_drain_continues() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"/tables/raw_docs/insertAll$"))
        .respond_with(ResponseTemplate::new(500).set_body_string("storage error"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"/tables/events/insertAll$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"insert_errors": []})))
        .expect(1)
        .mount(&server)
        .await;

    let queue = WriteQueue::new(client_for(&server));
    queue.enqueue(tables::RAW_DOCS, vec![json!({"raw_id": "r1"})], WriteOperation::Insert, 1);
    queue.enqueue(tables::EVENTS, vec![json!({"event_id": "e1"})], WriteOperation::Insert, 2);

    let processed = queue.flush().await;
    assert_eq!(processed, 2);
    assert_eq!(queue.status().pending, 0);
}

/// Rejected rows (insert_errors in the reply) surface as an error.
#[tokio::test]
async fn insert_errors_in_reply_fail_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"/insertAll$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "insert_errors": [{"index": 0, "message": "schema mismatch"}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .insert_all(tables::EVENTS, &[json!({"event_id": "e1"})])
        .await;
    assert!(result.is_err());
}

/// Shutdown drains whatever is pending.
#[tokio::test]
async fn shutdown_drains_pending_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"/insertAll$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"insert_errors": []})))
        .expect(2)
        .mount(&server)
        .await;

    let queue = WriteQueue::new(client_for(&server));
    queue.enqueue(tables::EVENTS, vec![json!({"event_id": "e1"})], WriteOperation::Insert, 2);
    queue.enqueue(tables::EVENTS, vec![json!({"event_id": "e2"})], WriteOperation::Insert, 2);

    let drained = queue.shutdown().await;
    assert_eq!(drained, 2);
    assert_eq!(queue.status().pending, 0);
}
