use fleetops_core::{Cluster, FleetError};
use fleetops_devkit::{fleet_test, MockBroker};
use serde_json::json;
use std::time::Duration;

const GRACE: Duration = Duration::from_secs(1);

#[tokio::test]
async fn test_empty_receive() {
    let broker = MockBroker::new();
    let listener = broker.bind("test", "test");
    broker.disconnect();

    let messages = listener.finish(GRACE).await.unwrap();
    assert_eq!(messages.len(), 0);
}

#[tokio::test]
async fn test_receive_message() {
    let broker = MockBroker::new();
    let listener = broker.bind("test", "test2");
    broker.publish("test", "test2", r#"{"message": "message"}"#);
    broker.disconnect();

    let messages = listener.finish(GRACE).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["message"], "message");
}

#[tokio::test]
async fn test_message_order() {
    let broker = MockBroker::new();
    let listener = broker.bind("test3", "test3");
    broker.publish_json("test3", "test3", &json!({"order": 1})).unwrap();
    broker.publish_json("test3", "test3", &json!({"order": 2})).unwrap();
    broker.disconnect();

    let messages = listener.finish(GRACE).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["order"], 1);
    assert_eq!(messages[1]["order"], 2);
}

#[tokio::test]
async fn test_other_routing_keys_are_ignored() {
    let broker = MockBroker::new();
    let listener = broker.bind("test", "wanted");
    broker.publish("test", "unwanted", "{}");
    broker.publish("test", "wanted", r#"{"ok": true}"#);
    broker.disconnect();

    assert_eq!(listener.finish(GRACE).await.unwrap(), vec![json!({"ok": true})]);
}

#[tokio::test]
async fn test_non_json_payload_is_an_error() {
    let broker = MockBroker::new();
    let listener = broker.bind("test", "k");
    broker.publish("test", "k", "plain text");
    broker.disconnect();

    let err = listener.finish(GRACE).await.unwrap_err();
    assert!(matches!(err, FleetError::Decode { index: 0, .. }));
}

#[tokio::test]
async fn test_collect_keeps_messages_around_bad_payload() {
    let broker = MockBroker::new();
    let listener = broker.bind("test", "k");
    broker.publish("test", "k", r#"{"step": "before"}"#);
    broker.publish("test", "k", "plain text");
    broker.publish("test", "k", r#"{"step": "after"}"#);
    broker.disconnect();

    let collected = listener.collect(GRACE).await;
    assert_eq!(collected.messages, vec![json!({"step": "before"}), json!({"step": "after"})]);
    assert!(matches!(collected.error, Some(FleetError::Decode { index: 1, .. })));
}

fleet_test!(test_harness_listener_counts_deliveries, |harness| {
    let listener = harness.listen("events", "deploy");
    for n in 0..5 {
        harness.broker.publish_json("events", "deploy", &json!({"n": n}))?;
    }
    while listener.forwarded() < 5 {
        tokio::task::yield_now().await;
    }
    harness.broker.disconnect();

    let messages = listener.finish(GRACE).await?;
    let order: Vec<i64> = messages.iter().filter_map(|m| m["n"].as_i64()).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    Ok(())
});

/// Needs a RabbitMQ reachable as described by `tests/fixtures/vagrant_inventory.yml`.
#[tokio::test]
#[ignore]
async fn test_live_broker_message_order() {
    use lapin::options::BasicPublishOptions;
    use lapin::BasicProperties;

    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/vagrant_inventory.yml");
    let cluster = Cluster::load(path).unwrap();
    let listener = cluster.create_listener("vagrant", "test3", "test3").await.unwrap();

    let endpoint = cluster.inventory().broker_endpoint("vagrant").unwrap();
    let conn = lapin::Connection::connect(&endpoint.amqp_uri().unwrap(), Default::default())
        .await
        .unwrap();
    let ch = conn.create_channel().await.unwrap();
    for payload in [r#"{"order": 1}"#, r#"{"order": 2}"#] {
        ch.basic_publish("test3", "test3", BasicPublishOptions::default(), payload.as_bytes(), BasicProperties::default())
            .await
            .unwrap()
            .await
            .unwrap();
    }
    while listener.received() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let messages = listener.close().await.unwrap();
    assert_eq!(messages, vec![json!({"order": 1}), json!({"order": 2})]);
    conn.close(200, "OK").await.unwrap();
}
