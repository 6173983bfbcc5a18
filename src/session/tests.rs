use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::StreamExt;

use super::memory::binding_matches;
use super::*;
use crate::config::RetrySettings;
use crate::utils::FleetError;

const EXCHANGE: &str = "vehicle.exchange";
const LOCATION_QUEUE: &str = "vehicle.realtime.location";

#[test]
fn test_binding_matches_topic_patterns() {
    assert!(binding_matches(
        "realtime.location.B1234ABC",
        "realtime.location.B1234ABC"
    ));
    assert!(!binding_matches(
        "realtime.location.B1234ABC",
        "realtime.location.D9XYZ"
    ));
    assert!(binding_matches("realtime.*.B1234ABC", "realtime.status.B1234ABC"));
    assert!(!binding_matches("realtime.*", "realtime.status.B1234ABC"));
    assert!(binding_matches("realtime.#", "realtime.status.B1234ABC"));
    assert!(binding_matches("#", "control.kill_vehicle.B1234ABC"));
    assert!(binding_matches("control.#.B1234ABC", "control.B1234ABC"));
}

#[tokio::test]
async fn test_bind_requires_existing_queue_and_exchange() {
    let broker = MemoryBroker::new();
    broker.declare_exchange(EXCHANGE);

    let err = broker
        .bind_queue(LOCATION_QUEUE, EXCHANGE, "realtime.location.B1234ABC")
        .await
        .unwrap_err();
    match err {
        FleetError::Topology {
            queue, exchange, ..
        } => {
            assert_eq!(queue, LOCATION_QUEUE);
            assert_eq!(exchange, EXCHANGE);
        }
        other => panic!("expected Topology, got {other:?}"),
    }

    broker.declare_queue(LOCATION_QUEUE);
    assert!(
        broker
            .bind_queue(LOCATION_QUEUE, "missing.exchange", "realtime.location.B1234ABC")
            .await
            .is_err()
    );
    broker
        .bind_queue(LOCATION_QUEUE, EXCHANGE, "realtime.location.B1234ABC")
        .await
        .unwrap();
    assert_eq!(
        broker.bindings(LOCATION_QUEUE, EXCHANGE),
        vec!["realtime.location.B1234ABC".to_string()]
    );
}

#[tokio::test]
async fn test_publish_routes_to_bound_queue_and_ack_clears_pending() {
    let broker = MemoryBroker::with_vehicle_topology(EXCHANGE);
    broker
        .bind_queue(LOCATION_QUEUE, EXCHANGE, "realtime.location.B1234ABC")
        .await
        .unwrap();

    broker
        .publish(EXCHANGE, "realtime.location.B1234ABC", b"{\"latitude\":1.5}")
        .await
        .unwrap();
    broker
        .publish(EXCHANGE, "realtime.location.OTHER", b"{}")
        .await
        .unwrap();
    assert_eq!(broker.published().len(), 2);

    let mut stream = broker.consume(LOCATION_QUEUE, "ctag-1").await.unwrap();
    assert!(broker.has_consumer(LOCATION_QUEUE));

    let delivery = stream.next().await.unwrap().unwrap();
    assert_eq!(delivery.routing_key, "realtime.location.B1234ABC");
    assert_eq!(delivery.body, b"{\"latitude\":1.5}");
    assert!(!delivery.redelivered);
    assert_eq!(broker.unacked(), 1);

    delivery.settle(Disposition::Ack).await.unwrap();
    assert_eq!(broker.unacked(), 0);
    assert!(broker.dropped().is_empty());
}

#[tokio::test]
async fn test_reject_with_requeue_redelivers() {
    let broker = MemoryBroker::with_vehicle_topology(EXCHANGE);
    broker
        .bind_queue(LOCATION_QUEUE, EXCHANGE, "realtime.location.*")
        .await
        .unwrap();
    broker
        .publish(EXCHANGE, "realtime.location.B1234ABC", b"{}")
        .await
        .unwrap();

    let mut stream = broker.consume(LOCATION_QUEUE, "ctag-1").await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    first
        .settle(Disposition::Reject { requeue: true })
        .await
        .unwrap();

    let second = stream.next().await.unwrap().unwrap();
    assert!(second.redelivered);
    second
        .settle(Disposition::Reject { requeue: false })
        .await
        .unwrap();

    assert_eq!(broker.unacked(), 0);
    assert_eq!(broker.dropped().len(), 1);
}

#[tokio::test]
async fn test_single_consumer_per_queue_and_handback_on_drop() {
    let broker = MemoryBroker::with_vehicle_topology(EXCHANGE);
    let stream = broker.consume(LOCATION_QUEUE, "ctag-1").await.unwrap();
    assert!(matches!(
        broker.consume(LOCATION_QUEUE, "ctag-2").await,
        Err(FleetError::Consume { .. })
    ));

    drop(stream);
    assert!(!broker.has_consumer(LOCATION_QUEUE));
    // the dropped consumer was never cancelled, so its tag is still taken
    assert_eq!(broker.consumer_tags(), vec!["ctag-1".to_string()]);
    assert!(matches!(
        broker.consume(LOCATION_QUEUE, "ctag-1").await,
        Err(FleetError::Consume { .. })
    ));
    assert!(broker.consume(LOCATION_QUEUE, "ctag-2").await.is_ok());
}

#[tokio::test]
async fn test_cancel_ends_stream_and_keeps_later_messages_queued() {
    let broker = MemoryBroker::with_vehicle_topology(EXCHANGE);
    broker
        .bind_queue(LOCATION_QUEUE, EXCHANGE, "realtime.location.B1234ABC")
        .await
        .unwrap();
    let mut stream = broker.consume(LOCATION_QUEUE, "ctag-1").await.unwrap();

    let waiting = tokio::spawn(async move {
        let next = stream.next().await;
        (next.is_none(), stream)
    });
    tokio::task::yield_now().await;

    broker.cancel("ctag-1").await.unwrap();
    let (ended, stream) = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("cancel did not wake the consumer")
        .unwrap();
    assert!(ended);
    assert!(broker.consumer_tags().is_empty());
    assert!(!broker.has_consumer(LOCATION_QUEUE));
    drop(stream);

    broker
        .publish(EXCHANGE, "realtime.location.B1234ABC", b"{}")
        .await
        .unwrap();
    let mut next = broker.consume(LOCATION_QUEUE, "ctag-2").await.unwrap();
    let delivery = next.next().await.unwrap().unwrap();
    assert_eq!(delivery.body, b"{}");
    delivery.settle(Disposition::Ack).await.unwrap();

    // unknown tags are ignored
    broker.cancel("ctag-unknown").await.unwrap();
}

#[tokio::test]
async fn test_disconnect_fails_active_consumers() {
    let broker = MemoryBroker::with_vehicle_topology(EXCHANGE);
    let mut stream = broker.consume(LOCATION_QUEUE, "ctag-1").await.unwrap();

    broker.disconnect();

    assert!(matches!(
        stream.next().await,
        Some(Err(FleetError::Consume { .. }))
    ));
    assert!(stream.next().await.is_none());
    assert!(matches!(
        broker.publish(EXCHANGE, "realtime.location.B1234ABC", b"{}").await,
        Err(FleetError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let broker = MemoryBroker::with_vehicle_topology(EXCHANGE);
    assert!(!broker.is_closed());
    broker.close().await.unwrap();
    broker.close().await.unwrap();
    assert!(broker.is_closed());
    assert!(matches!(
        broker.consume(LOCATION_QUEUE, "ctag-1").await,
        Err(FleetError::SessionClosed)
    ));
}

#[test]
fn test_retry_delay_doubles_and_caps() {
    let policy = RetryPolicy {
        max_attempts: 10,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_millis(1_000),
    };
    assert_eq!(policy.delay_for(0), Duration::from_millis(100));
    assert_eq!(policy.delay_for(1), Duration::from_millis(200));
    assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    assert_eq!(policy.delay_for(4), Duration::from_millis(1_000));
    assert_eq!(policy.delay_for(40), Duration::from_millis(1_000));
}

#[test]
fn test_retry_disabled_means_fail_fast() {
    let settings = RetrySettings {
        enabled: false,
        max_attempts: 9,
        initial_backoff_ms: 10,
        max_backoff_ms: 100,
    };
    assert_eq!(RetryPolicy::from_settings(&settings), RetryPolicy::fail_fast());

    let enabled = RetrySettings {
        enabled: true,
        max_attempts: 0,
        ..settings
    };
    assert_eq!(RetryPolicy::from_settings(&enabled).max_attempts, 1);
}

#[tokio::test]
async fn test_retry_gives_up_after_max_attempts() {
    let policy = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    };
    let attempts = Arc::new(AtomicU32::new(0));

    let result: crate::utils::Result<()> = policy
        .run(|| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(FleetError::Connection {
                    endpoint: "127.0.0.1:5672".to_string(),
                    reason: "connection refused".to_string(),
                })
            }
        })
        .await;

    assert!(matches!(result, Err(FleetError::Connection { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_does_not_repeat_topology_errors() {
    let policy = RetryPolicy {
        max_attempts: 5,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
    };
    let attempts = Arc::new(AtomicU32::new(0));

    let result: crate::utils::Result<()> = policy
        .run(|| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(FleetError::Topology {
                    queue: LOCATION_QUEUE.to_string(),
                    exchange: EXCHANGE.to_string(),
                    reason: "NOT_FOUND".to_string(),
                })
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_succeeds_after_transient_failure() {
    let policy = RetryPolicy {
        max_attempts: 4,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
    };
    let attempts = Arc::new(AtomicU32::new(0));

    let value = policy
        .run(|| {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FleetError::Connection {
                        endpoint: "127.0.0.1:5672".to_string(),
                        reason: "timeout".to_string(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
