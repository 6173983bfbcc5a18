use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::{Map, Value, json};

use super::request::{default_order_id, format_timestamp};
use super::*;
use crate::session::MemoryBroker;
use crate::topic::Command;
use crate::utils::FleetError;

const EXCHANGE: &str = "vehicle.exchange";

fn publisher() -> (MemoryBroker, CommandPublisher) {
    let broker = MemoryBroker::with_vehicle_topology(EXCHANGE);
    let publisher = CommandPublisher::new(Arc::new(broker.clone()), EXCHANGE);
    (broker, publisher)
}

fn body_of(outbound: &OutboundCommand) -> Map<String, Value> {
    match serde_json::from_str(&outbound.body).unwrap() {
        Value::Object(map) => map,
        other => panic!("expected an object body, got {other}"),
    }
}

#[test]
fn test_start_rent_generates_order_id() {
    let request = CommandRequest::start_rent("B1234ABC", None);
    let order_id = request.order_id().unwrap();

    let suffix = order_id
        .strip_prefix("ORD-B1234ABC-")
        .expect("order id prefix");
    assert!(!suffix.is_empty());
    assert!(suffix.chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn test_start_rent_keeps_explicit_order_id() {
    let request = CommandRequest::start_rent("B1234ABC", Some("ORD-123456"));
    assert_eq!(request.order_id(), Some("ORD-123456"));
    assert_eq!(request.command, "start_rent");
}

#[test]
fn test_default_order_id_uses_unix_seconds() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    assert_eq!(default_order_id("B1234ABC", now), "ORD-B1234ABC-1714557600");
}

#[test]
fn test_timestamp_format_has_millis_and_zulu() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    assert_eq!(format_timestamp(now), "2024-05-01T10:00:00.000Z");
}

#[tokio::test]
async fn test_kill_vehicle_publishes_timestamp_only() {
    let (broker, publisher) = publisher();

    let outbound = publisher
        .send(CommandRequest::kill_vehicle("B1234ABC"))
        .await
        .unwrap();

    assert_eq!(outbound.routing_key, "control.kill_vehicle.B1234ABC");
    assert_eq!(outbound.command, Command::KillVehicle);
    let body = body_of(&outbound);
    assert_eq!(body.len(), 1);
    assert!(body.get("timestamp").and_then(Value::as_str).is_some());

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, EXCHANGE);
    assert_eq!(published[0].routing_key, "control.kill_vehicle.B1234ABC");
    assert_eq!(published[0].body, outbound.body.as_bytes());
}

#[tokio::test]
async fn test_start_rent_body_carries_order_id() {
    let (broker, publisher) = publisher();

    let outbound = publisher
        .send(CommandRequest::start_rent("B1234ABC", Some("ORD-42")))
        .await
        .unwrap();

    assert_eq!(outbound.routing_key, "control.start_rent.B1234ABC");
    let body = body_of(&outbound);
    assert_eq!(body.get("order_id"), Some(&json!("ORD-42")));
    assert!(body.contains_key("timestamp"));
    assert_eq!(broker.published().len(), 1);
}

#[tokio::test]
async fn test_missing_payload_sends_empty_object() {
    let (_broker, publisher) = publisher();

    let outbound = publisher
        .send(CommandRequest::new("B1234ABC", "end_rent", None))
        .await
        .unwrap();

    assert_eq!(outbound.body, "{}");
    assert_eq!(outbound.routing_key, "control.end_rent.B1234ABC");
}

#[tokio::test]
async fn test_unknown_command_is_rejected_before_publish() {
    let (broker, publisher) = publisher();

    let err = publisher
        .send(CommandRequest::new("B1234ABC", "reboot", None))
        .await
        .unwrap_err();

    assert!(matches!(err, FleetError::UnknownCommand(ref name) if name == "reboot"));
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_invalid_vehicle_is_rejected_before_publish() {
    let (broker, publisher) = publisher();

    for vehicle in ["", "B12.34"] {
        let err = publisher
            .send(CommandRequest::end_rent(vehicle))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::InvalidIdentifier { .. }));
    }
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_send_on_closed_session_fails() {
    let (broker, publisher) = publisher();
    broker.disconnect();

    let err = publisher
        .send(CommandRequest::end_rent("B1234ABC"))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::SessionClosed));
}

#[tokio::test]
async fn test_concurrent_sends_are_independent() {
    let (broker, publisher) = publisher();

    let mut tasks = Vec::new();
    for vehicle in ["B1", "B2", "B3", "B4"] {
        let publisher = publisher.clone();
        tasks.push(tokio::spawn(async move {
            publisher.send(CommandRequest::end_rent(vehicle)).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut keys: Vec<String> = broker
        .published()
        .into_iter()
        .map(|m| m.routing_key)
        .collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "control.end_rent.B1",
            "control.end_rent.B2",
            "control.end_rent.B3",
            "control.end_rent.B4"
        ]
    );
}

#[tokio::test]
async fn test_dry_run_records_without_a_broker() {
    let (publisher, recorded) = CommandPublisher::dry_run(EXCHANGE);
    assert_eq!(publisher.exchange(), EXCHANGE);

    let sent = publisher
        .send(CommandRequest::end_rent("B1234ABC"))
        .await
        .unwrap();
    assert_eq!(sent.routing_key, "control.end_rent.B1234ABC");

    let published = recorded.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].routing_key, sent.routing_key);
    assert_eq!(published[0].body, sent.body.as_bytes());

    assert!(matches!(
        publisher.send(CommandRequest::new("B1234ABC", "reboot", None)).await,
        Err(FleetError::UnknownCommand(_))
    ));
    assert_eq!(recorded.published().len(), 1);
}
