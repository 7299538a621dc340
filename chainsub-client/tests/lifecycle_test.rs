//! Integration tests for lifecycle triggers

mod common;

use chainsub_client::{Host, HostBuilder, LifecycleEvent, SubscribeRequest};
use chainsub_core::{ManagerConfig, Network};
use chainsub_store::{RecordStore, SledRecordStore};
use common::{config, confirmation, drain, inbound, notification, MockTransport};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn host_on(config: ManagerConfig, store: Arc<dyn RecordStore>, transport: Arc<MockTransport>) -> Host {
    HostBuilder::new(config)
        .with_store(store)
        .with_transport(transport)
        .build()
        .await
        .unwrap()
}

fn slot_subscription(network: &str) -> SubscribeRequest {
    SubscribeRequest::new("slotSubscribe", "slotUnsubscribe", network)
}

#[tokio::test]
async fn test_start_discards_state_from_previous_run() {
    let store: Arc<dyn RecordStore> = Arc::new(SledRecordStore::temporary().unwrap());
    let (transport, mut events) = MockTransport::new();
    let network = Network::from("net-A");

    // Previous run: one live connection and a confirmed subscription
    let previous = host_on(config(&["net-A"], 0, Duration::from_millis(10)), Arc::clone(&store), transport.clone()).await;
    let stale_conn = previous.connections().open_connection(&network).await.unwrap();
    drain(&previous, &mut events).await;
    let stale_sub = previous.subscribe(slot_subscription("net-A")).await.unwrap();
    let request_id = transport.sent_frames()[0]["id"].as_u64().unwrap();
    inbound(&previous, &stale_conn, confirmation(request_id, 9)).await;

    let host = host_on(config(&["net-A"], 0, Duration::from_millis(10)), store, transport.clone()).await;
    assert!(host.subscriptions().get(&stale_sub).await.unwrap().is_some());

    let report = host.handle_lifecycle(LifecycleEvent::Start).await.unwrap();
    drain(&host, &mut events).await;

    assert!(report.is_success());
    assert_eq!(report.opened, vec![network.clone()]);
    assert!(host.subscriptions().list().await.unwrap().is_empty());
    assert_eq!(transport.closed(), vec![stale_conn.clone()]);

    let fresh = host.connections().connection_id(&network).await.unwrap().unwrap();
    assert_ne!(fresh, stale_conn);
    assert_eq!(host.connections().network_of(&stale_conn).await.unwrap(), None);
}

#[tokio::test]
async fn test_every_trigger_resets_and_reconnects() {
    let (transport, mut events) = MockTransport::new();
    let host = common::host(config(&["net-A", "net-B"], 0, Duration::from_millis(10)), transport.clone(), None).await;

    for event in [LifecycleEvent::Start, LifecycleEvent::Install, LifecycleEvent::Update] {
        let report = host.handle_lifecycle(event).await.unwrap();
        drain(&host, &mut events).await;
        assert_eq!(report.opened.len(), 2, "{:?}", event);

        host.subscribe(slot_subscription("net-A")).await.unwrap();
        host.subscribe(slot_subscription("net-B")).await.unwrap();
        assert_eq!(host.subscriptions().list().await.unwrap().len(), 2);
    }

    host.handle_lifecycle(LifecycleEvent::Update).await.unwrap();
    drain(&host, &mut events).await;
    assert!(host.subscriptions().list().await.unwrap().is_empty());
    // Three resets closed both networks' sockets each time
    assert_eq!(transport.closed().len(), 6);
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test]
async fn test_subscribe_right_after_start_is_sent_once() {
    let (transport, mut events) = MockTransport::new();
    let host = common::host(config(&["net-A"], 0, Duration::from_millis(10)), transport.clone(), None).await;
    let network = Network::from("net-A");

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    host.register_notification_handler("signatureSubscribe", network.clone(), move |_| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .await;

    // Connection registered but its Open event not handled yet
    host.handle_lifecycle(LifecycleEvent::Start).await.unwrap();
    let id = host
        .subscribe(
            SubscribeRequest::new("signatureSubscribe", "signatureUnsubscribe", network.clone())
                .with_params(vec![json!("sig")]),
        )
        .await
        .unwrap();
    assert!(transport.sent_frames().is_empty());

    drain(&host, &mut events).await;
    let sent = transport.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["method"], "signatureSubscribe");
    assert_eq!(sent[0]["params"], json!(["sig"]));

    let conn = host.connections().connection_id(&network).await.unwrap().unwrap();
    let request_id = sent[0]["id"].as_u64().unwrap();
    inbound(&host, &conn, confirmation(request_id, 7)).await;
    let record = host.subscriptions().get(&id).await.unwrap().unwrap();
    assert!(record.is_confirmed());
    assert_eq!(record.rpc_subscription_id, Some(7));

    inbound(&host, &conn, notification("signatureNotification", 7, json!({"err": null}))).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    host.unsubscribe(&id).await.unwrap();
    let sent = transport.sent_frames();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1]["method"], "signatureUnsubscribe");
    assert_eq!(sent[1]["params"], json!([7]));
}

#[tokio::test]
async fn test_start_reports_failed_networks() {
    let (transport, mut events) = MockTransport::new();
    transport.refuse_url("ws://mock/net-B");
    let host = common::host(config(&["net-A", "net-B"], 0, Duration::from_millis(10)), transport.clone(), None).await;

    let report = host.handle_lifecycle(LifecycleEvent::Start).await.unwrap();
    drain(&host, &mut events).await;

    assert!(!report.is_success());
    assert_eq!(report.opened, vec![Network::from("net-A")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, Network::from("net-B"));
}

#[test]
fn test_lifecycle_event_names() {
    let event: LifecycleEvent = serde_json::from_value(json!("install")).unwrap();
    assert_eq!(event, LifecycleEvent::Install);
    assert_eq!(serde_json::to_value(LifecycleEvent::Update).unwrap(), json!("update"));
}
