//! Redis/Queue integration tests.

use fswap_models::SwapRequest;
use fswap_queue::{JobQueue, QueueError, QueuedRequest};

fn request(job_id: Option<String>) -> QueuedRequest {
    let mut req: SwapRequest = serde_json::from_str(
        r#"{
            "media_type": "image",
            "source_url": "https://cdn.example.com/face.jpg",
            "target_url": "https://cdn.example.com/target.jpg"
        }"#,
    )
    .expect("request payload");
    req.job_id = job_id;
    QueuedRequest::new(req)
}

/// Test Redis connection and basic operations.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    // Stream length (should not error)
    let len = queue.len().await.expect("Failed to get queue length");
    println!("Queue length: {}", len);
}

/// Test request enqueue and dequeue cycle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_request_enqueue_dequeue() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job_id = format!("test-{}", uuid::Uuid::new_v4());
    let req = request(Some(job_id.clone()));

    // Enqueue
    let message_id = queue.enqueue(&req).await.expect("Failed to enqueue");
    println!("Enqueued request {} with message ID {}", job_id, message_id);

    // Consume
    let consumer_name = "test-consumer";
    let requests = queue
        .consume(consumer_name, 1000, 1)
        .await
        .expect("Failed to consume");

    assert_eq!(requests.len(), 1);
    let (msg_id, consumed) = &requests[0];
    assert_eq!(consumed.idempotency_key(), Some(job_id.as_str()));

    // Acknowledge and release the dedup key
    queue.ack(msg_id).await.expect("Failed to ack");
    queue
        .clear_dedup(consumed)
        .await
        .expect("Failed to clear dedup");
    println!("Request {} acknowledged", job_id);
}

/// Test that a duplicate job id is rejected until the dedup key clears.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_job_id_rejected() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job_id = format!("test-dup-{}", uuid::Uuid::new_v4());
    let req = request(Some(job_id.clone()));

    queue.enqueue(&req).await.expect("Failed to enqueue");

    let err = queue.enqueue(&req).await.expect_err("Duplicate admitted");
    assert!(matches!(err, QueueError::Duplicate(id) if id == job_id));

    // After the key clears the same id is admitted again.
    queue.clear_dedup(&req).await.expect("Failed to clear dedup");
    queue.enqueue(&req).await.expect("Failed to re-enqueue");
    queue.clear_dedup(&req).await.ok();
}

/// Test DLQ functionality.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dlq() {
    dotenvy::dotenv().ok();

    let queue = JobQueue::from_env().expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");

    let job_id = format!("test-dlq-{}", uuid::Uuid::new_v4());
    let req = request(Some(job_id.clone()));

    let message_id = queue.enqueue(&req).await.expect("Failed to enqueue");

    // Consume it
    let consumer_name = "test-dlq-consumer";
    let requests = queue
        .consume(consumer_name, 1000, 1)
        .await
        .expect("Failed to consume");
    assert!(!requests.is_empty());

    // Park it on the dead-letter stream
    queue
        .dlq(&message_id, &req, "Test error")
        .await
        .expect("Failed to move to DLQ");
    queue.clear_dedup(&req).await.ok();

    // Check DLQ length increased
    let dlq_len = queue.dlq_len().await.expect("Failed to get DLQ length");
    assert!(dlq_len > 0);
    println!("DLQ length: {}", dlq_len);
}
