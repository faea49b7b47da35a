//! Repository and broker tests against a real Postgres.
//!
//! Requires Docker: `cargo test -p holdfast-services --test postgres_test -- --ignored`

mod helpers;

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use helpers::postgres::setup_database;
use helpers::start_time;
use holdfast_core::constants::{
    IPFS_PIN_QUEUE, IPFS_PIN_REMOVAL_QUEUE, PIN_EXCHANGE, PIN_REMOVAL_EXCHANGE,
};
use holdfast_core::models::{LifecycleIntent, NewUpload, UnpinIntent};
use holdfast_core::{Clock, ManualClock, PinError};
use holdfast_db::{NetworkMemberRepository, QueueRepository, UploadLedger, UploadRepository};
use holdfast_queue::{ConsumerConfig, IntentConsumer, JobQueueGateway, Outcome, PgBroker};
use holdfast_services::{AccessGate, PgAccessGate};

fn unpin(content_id: &str, user: &str) -> LifecycleIntent {
    LifecycleIntent::Unpin(UnpinIntent {
        content_id: content_id.to_string(),
        network_name: "public".to_string(),
        user_name: user.to_string(),
        expired_at: None,
    })
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upload_repository_create_and_duplicate() {
    let db = setup_database().await;
    let clock = Arc::new(ManualClock::new(start_time()));
    let ledger = UploadRepository::new(db.pool.clone(), clock.clone());

    let created = ledger
        .create(NewUpload::pin("Qm123", "public", "alice", 1))
        .await
        .unwrap();
    assert_eq!(created.co_owners, vec!["alice".to_string()]);
    assert_eq!(created.garbage_collect_at, start_time() + chrono::Duration::days(29));

    let err = ledger
        .create(NewUpload::pin("Qm123", "public", "alice", 6))
        .await
        .unwrap_err();
    assert!(matches!(err, PinError::DuplicateRecord { .. }));

    // Same content for another user is a separate record.
    ledger
        .create(NewUpload::pin("Qm123", "public", "bob", 6))
        .await
        .unwrap();
    assert_eq!(ledger.find_by_content("Qm123").await.unwrap().len(), 2);
    assert_eq!(ledger.find_by_content_and_user("Qm123", "bob").await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upload_repository_renew_never_shortens() {
    let db = setup_database().await;
    let clock = Arc::new(ManualClock::new(start_time()));
    let ledger = UploadRepository::new(db.pool.clone(), clock.clone());

    let created = ledger
        .create(NewUpload::pin("Qm123", "public", "alice", 6))
        .await
        .unwrap();

    let renewed = ledger.renew("Qm123", "public", "alice", 1).await.unwrap();
    assert_eq!(renewed.garbage_collect_at, created.garbage_collect_at);
    assert_eq!(renewed.hold_months, 6);
    assert_eq!(renewed.co_owners, vec!["alice".to_string()]);

    let longer = ledger.renew("Qm123", "public", "alice", 12).await.unwrap();
    assert!(longer.garbage_collect_at > created.garbage_collect_at);
    assert_eq!(longer.hold_months, 12);

    let missing = ledger.renew("QmNope", "public", "alice", 1).await.unwrap_err();
    assert!(matches!(missing, PinError::RecordNotFound(_)));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_upload_repository_sweep_is_idempotent() {
    let db = setup_database().await;
    let clock = Arc::new(ManualClock::new(start_time()));
    let ledger = UploadRepository::new(db.pool.clone(), clock.clone());

    ledger.create(NewUpload::pin("QmA", "public", "alice", 1)).await.unwrap();
    ledger.create(NewUpload::pin("QmB", "public", "alice", 3)).await.unwrap();

    clock.advance(chrono::Duration::days(35));
    let now = clock.now();
    let first = ledger.sweep_expired(now).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].content_id, "QmA");
    assert!(ledger.sweep_expired(now).await.unwrap().is_empty());

    let rest = ledger.list_all().await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].content_id, "QmB");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_pg_broker_concurrent_publishes_are_durable() {
    let db = setup_database().await;
    let broker = PgBroker::new(db.pool.clone());
    let repository = broker.repository().clone();
    let gateway = JobQueueGateway::new(Arc::new(broker), Duration::from_secs(5));

    let tasks = (0..32).map(|i| {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .publish(IPFS_PIN_REMOVAL_QUEUE, &unpin(&format!("Qm{}", i), "alice"))
                .await
        })
    });
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    assert_eq!(repository.pending_count(IPFS_PIN_REMOVAL_QUEUE).await.unwrap(), 32);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_claim_hides_message_until_released() {
    let db = setup_database().await;
    let broker = PgBroker::new(db.pool.clone());
    let repository = broker.repository().clone();
    let gateway = JobQueueGateway::new(Arc::new(broker), Duration::from_secs(5));
    gateway
        .publish(IPFS_PIN_REMOVAL_QUEUE, &unpin("Qm123", "alice"))
        .await
        .unwrap();

    let queues = vec![IPFS_PIN_REMOVAL_QUEUE.to_string()];
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    let claimed = repository
        .claim(&queues, first, Duration::from_secs(60))
        .await
        .unwrap()
        .expect("message available");
    assert_eq!(claimed.delivery_count, 1);
    assert_eq!(claimed.locked_by, Some(first));

    // Invisible to everyone else while claimed.
    assert!(repository
        .claim(&queues, second, Duration::from_secs(60))
        .await
        .unwrap()
        .is_none());

    repository
        .release(claimed.id, first, Duration::ZERO, "backend unavailable")
        .await
        .unwrap();
    let again = repository
        .claim(&queues, second, Duration::from_secs(60))
        .await
        .unwrap()
        .expect("released message is visible");
    assert_eq!(again.id, claimed.id);
    assert_eq!(again.delivery_count, 2);
    assert_eq!(again.last_error.as_deref(), Some("backend unavailable"));

    // The stale owner cannot ack.
    assert!(!repository.ack(again.id, first).await.unwrap());
    assert!(repository.ack(again.id, second).await.unwrap());
    assert_eq!(repository.pending_count(IPFS_PIN_REMOVAL_QUEUE).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_exchange_fans_out_and_unroutable_fails() {
    let db = setup_database().await;
    let broker = PgBroker::new(db.pool.clone());
    let repository = broker.repository().clone();
    let gateway = JobQueueGateway::new(Arc::new(broker), Duration::from_secs(5));
    gateway.declare_topology().await.unwrap();
    repository.bind_queue(PIN_REMOVAL_EXCHANGE, "audit-queue").await.unwrap();

    let delivered = gateway
        .publish_with_exchange(PIN_REMOVAL_EXCHANGE, &unpin("Qm123", "alice"))
        .await
        .unwrap();
    assert_eq!(delivered, 2);
    assert_eq!(repository.pending_count(IPFS_PIN_REMOVAL_QUEUE).await.unwrap(), 1);
    assert_eq!(repository.pending_count("audit-queue").await.unwrap(), 1);
    assert_eq!(repository.pending_count(IPFS_PIN_QUEUE).await.unwrap(), 0);

    let err = gateway
        .publish_with_exchange("no-such-exchange", &unpin("Qm123", "alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, PinError::QueuePublish { .. }));

    // Binding is idempotent.
    gateway.declare_topology().await.unwrap();
    let delivered = gateway
        .publish_with_exchange(PIN_EXCHANGE, &unpin("Qm456", "alice"))
        .await
        .unwrap();
    assert_eq!(delivered, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_undecodable_message_is_dead_lettered() {
    let db = setup_database().await;
    let repository = QueueRepository::new(db.pool.clone());
    sqlx::query(
        "INSERT INTO queue_messages (queue_name, payload) VALUES ($1, $2)",
    )
    .bind(IPFS_PIN_QUEUE)
    .bind(serde_json::json!({"kind": "unknown"}))
    .execute(&db.pool)
    .await
    .unwrap();

    let h = helpers::harness();
    let config = ConsumerConfig::default().with_queues(&[IPFS_PIN_QUEUE]);
    let outcome = IntentConsumer::run_once(&repository, &h.processor, &config, Uuid::new_v4())
        .await
        .unwrap();

    assert_eq!(outcome, Some(Outcome::DeadLettered));
    assert_eq!(repository.pending_count(IPFS_PIN_QUEUE).await.unwrap(), 0);
    assert_eq!(repository.dead_letter_count(IPFS_PIN_QUEUE).await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_membership_gates_private_networks() {
    let db = setup_database().await;
    let members = NetworkMemberRepository::new(db.pool.clone());
    members.add_member("acme", "alice").await.unwrap();
    members.add_member("acme", "alice").await.unwrap();

    let gate = PgAccessGate::new(NetworkMemberRepository::new(db.pool.clone()));
    gate.check_access("alice", "acme").await.unwrap();
    gate.check_access("bob", "public").await.unwrap();
    assert!(matches!(
        gate.check_access("bob", "acme").await,
        Err(PinError::AccessDenied { .. })
    ));

    assert_eq!(members.networks_for_user("alice").await.unwrap(), vec!["acme".to_string()]);
    assert!(members.remove_member("acme", "alice").await.unwrap());
    assert!(!members.remove_member("acme", "alice").await.unwrap());
    assert!(gate.check_access("alice", "acme").await.is_err());
}
