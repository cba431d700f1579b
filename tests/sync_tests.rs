mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;

use common::{sync_over, wait_until, FakeGateway};
use queueboard::gateway::QueueGateway;
use queueboard::error::QueueError;
use queueboard::models::{CounterId, EntryStatus, NewCounter};
use queueboard::realtime::events::{counter_channel, COUNTERS_CHANNEL, COUNTER_UPDATED, ENTRY_UPDATED, LIST_UPDATED};
use queueboard::realtime::{ChannelClient, MemoryTransport, RealtimeEvent};
use queueboard::reconciler::PatchOutcome;
use queueboard::sync::FetchScope;

fn c1() -> CounterId {
    CounterId::new("1")
}

fn realtime() -> (ChannelClient, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    (ChannelClient::new(transport.clone()), transport)
}

// ---------------------------------------------------------------------------
// Throttling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_burst_of_throttled_refreshes_fetches_once() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    let sync = sync_over(&gw);

    let mut ran = 0;
    for _ in 0..10 {
        if sync.request_refresh(FetchScope::Queue(Some(c1()))).await.unwrap() {
            ran += 1;
        }
    }
    assert_eq!(ran, 1);
    assert_eq!(gw.list_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_burst_fetches_once() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    let sync = sync_over(&gw);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let sync = sync.clone();
            tokio::spawn(async move { sync.request_refresh(FetchScope::Queue(None)).await })
        })
        .collect();
    for h in handles {
        tokio_test::assert_ok!(h.await.unwrap());
    }
    assert_eq!(gw.list_calls(), 1);
}

#[tokio::test]
async fn test_gates_are_per_resource() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1"), ("2", "Counter 2")]));
    let sync = sync_over(&gw);

    assert!(sync.request_refresh(FetchScope::Queue(Some(c1()))).await.unwrap());
    assert!(sync.request_refresh(FetchScope::Queue(Some(CounterId::new("2")))).await.unwrap());
    assert!(sync.request_refresh(FetchScope::Counters).await.unwrap());
    assert_eq!(gw.list_calls(), 2);
    assert_eq!(gw.counter_list_calls(), 1);
}

#[tokio::test]
async fn test_forced_refresh_ignores_cooldown() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    let sync = sync_over(&gw);

    assert!(sync.request_refresh(FetchScope::Queue(Some(c1()))).await.unwrap());
    assert!(!sync.request_refresh(FetchScope::Queue(Some(c1()))).await.unwrap());
    assert!(sync.refresh_now(FetchScope::Queue(Some(c1()))).await.unwrap());
    assert_eq!(gw.list_calls(), 2);
}

#[tokio::test]
async fn test_refresh_bumps_change_version() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    gw.seed("1", "Ana", EntryStatus::Waiting);
    let sync = sync_over(&gw);
    let changes = sync.changes();

    sync.refresh_now(FetchScope::Queue(Some(c1()))).await.unwrap();
    assert!(changes.has_changed().unwrap());
    let waiting = sync.read(|r| r.view(&c1()).map(|v| v.waiting_queue.len()));
    assert_eq!(waiting, Some(1));
}

#[tokio::test]
async fn test_counter_fetch_feeds_meta_and_list() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Front desk"), ("2", "Pharmacy")]));
    let sync = sync_over(&gw);
    sync.refresh_now(FetchScope::Counters).await.unwrap();
    assert_eq!(sync.counters().len(), 2);
    let name = sync.read(|r| r.view(&CounterId::new("2")).map(|v| v.display_name()));
    assert_eq!(name.as_deref(), Some("Pharmacy"));
}

// ---------------------------------------------------------------------------
// Realtime
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_entry_push_patches_known_entry() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    let ana = gw.seed("1", "Ana", EntryStatus::Waiting);
    let sync = sync_over(&gw);
    sync.refresh_now(FetchScope::Queue(Some(c1()))).await.unwrap();

    let (client, transport) = realtime();
    let _subs = sync.attach(&client, &[c1()]).unwrap();

    let mut serving = ana.clone();
    serving.status = EntryStatus::Serving;
    transport.emit(&counter_channel(&c1()), ENTRY_UPDATED, serde_json::to_value(&serving).unwrap());

    wait_until(|| sync.read(|r| r.view(&c1()).and_then(|v| v.serving().map(|e| e.id.clone()))) == Some(ana.id.clone()))
        .await;
    assert_eq!(gw.list_calls(), 1, "a known entry needs no re-fetch");
}

#[tokio::test]
async fn test_push_for_unknown_entry_refetches_counter() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    let sync = sync_over(&gw);
    let (client, transport) = realtime();
    let _subs = sync.attach(&client, &[c1()]).unwrap();

    // Added elsewhere; this client has never fetched it.
    let ben = gw.seed("1", "Ben", EntryStatus::Waiting);
    transport.emit(&counter_channel(&c1()), ENTRY_UPDATED, json!({ "entry": ben }));

    wait_until(|| gw.list_calls() == 1).await;
    wait_until(|| sync.read(|r| r.find_entry(&ben.id).is_some())).await;
}

#[tokio::test]
async fn test_handle_event_reports_stale_and_refetches() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    let ghost = gw.seed("1", "Ghost", EntryStatus::Serving);
    let sync = sync_over(&gw);

    let outcome = sync.handle_event(RealtimeEvent::EntryUpdated(ghost.clone())).await.unwrap();
    assert_eq!(outcome, PatchOutcome::Stale(c1()));
    assert_eq!(gw.list_calls(), 1);
    assert!(sync.read(|r| r.find_entry(&ghost.id).is_some()));
}

#[tokio::test]
async fn test_list_push_replaces_counter() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    let sync = sync_over(&gw);
    let (client, transport) = realtime();
    let _subs = sync.attach(&client, &[c1()]).unwrap();

    let a = gw.seed("1", "Ana", EntryStatus::Waiting);
    let b = gw.seed("1", "Ben", EntryStatus::Waiting);
    transport.emit(
        &counter_channel(&c1()),
        LIST_UPDATED,
        json!({ "counter_id": 1, "queue": [a, b] }),
    );

    wait_until(|| sync.read(|r| r.view(&c1()).map_or(0, |v| v.waiting_queue.len())) == 2).await;
    let view = sync.read(|r| r.view(&c1()).cloned()).unwrap();
    assert!(view.current_serving.unwrap().is_next);
    assert_eq!(gw.list_calls(), 0);
}

#[tokio::test]
async fn test_counter_push_updates_meta() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    let sync = sync_over(&gw);
    let (client, transport) = realtime();
    let _subs = sync.attach(&client, &[c1()]).unwrap();

    transport.emit(COUNTERS_CHANNEL, COUNTER_UPDATED, json!({ "id": 1, "waiting_count": 7 }));
    wait_until(|| sync.read(|r| r.view(&c1()).map(|v| v.meta.waiting_count)) == Some(7)).await;
}

#[tokio::test]
async fn test_malformed_push_is_dropped() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    gw.seed("1", "Ana", EntryStatus::Waiting);
    let sync = sync_over(&gw);
    sync.refresh_now(FetchScope::Queue(Some(c1()))).await.unwrap();
    let before = sync.read(|r| r.view(&c1()).cloned());

    let (client, transport) = realtime();
    let _subs = sync.attach(&client, &[c1()]).unwrap();
    transport.emit(&counter_channel(&c1()), ENTRY_UPDATED, json!({ "id": 1, "status": "teleported" }));
    tokio::task::yield_now().await;

    assert_eq!(sync.read(|r| r.view(&c1()).cloned()), before);
    assert_eq!(gw.list_calls(), 1);
}

#[tokio::test]
async fn test_counters_listed_later_get_attached() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    let sync = sync_over(&gw);
    sync.refresh_now(FetchScope::Counters).await.unwrap();
    let (client, transport) = realtime();
    let mut subs = sync.attach(&client, &[c1()]).unwrap();
    let mut attached: BTreeSet<CounterId> = [c1()].into_iter().collect();

    let pharmacy = sync
        .gateway()
        .create_counter(&NewCounter { name: "Pharmacy".to_string(), prefix: "PH".to_string() })
        .await
        .unwrap();
    sync.refresh_now(FetchScope::Counters).await.unwrap();

    subs.extend(sync.attach_new_counters(&client, &mut attached).unwrap());
    assert!(transport.is_subscribed(&counter_channel(&pharmacy.id)));
    assert!(attached.contains(&pharmacy.id));
    assert_eq!(transport.subscribe_calls(COUNTERS_CHANNEL), 1);
    assert!(sync.attach_new_counters(&client, &mut attached).unwrap().is_empty());

    let ana = gw.seed(pharmacy.id.as_str(), "Ana", EntryStatus::Waiting);
    transport.emit(
        &counter_channel(&pharmacy.id),
        LIST_UPDATED,
        json!({ "counter_id": pharmacy.id, "queue": [ana] }),
    );
    wait_until(|| sync.read(|r| r.find_entry(&ana.id).is_some())).await;
}

#[tokio::test]
async fn test_attach_outside_runtime_is_refused() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    let sync = sync_over(&gw);
    let (client, transport) = realtime();
    let result = std::thread::spawn(move || sync.attach(&client, &[c1()]).map(|subs| subs.len()))
        .join()
        .unwrap();
    assert!(matches!(result, Err(QueueError::Realtime(_))));
    assert!(!transport.is_subscribed(&counter_channel(&c1())));
}

#[tokio::test]
async fn test_two_views_share_one_channel() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Counter 1")]));
    let display = sync_over(&gw);
    let controller = sync_over(&gw);
    let (client, transport) = realtime();

    let display_subs = display.attach(&client, &[c1()]).unwrap();
    let controller_subs = controller.attach(&client, &[c1()]).unwrap();
    let channel = counter_channel(&c1());
    assert_eq!(transport.subscribe_calls(&channel), 1);
    assert_eq!(transport.subscribe_calls(COUNTERS_CHANNEL), 1);

    // The display goes away; the controller keeps receiving.
    for sub in display_subs {
        sub.unsubscribe();
    }
    assert!(transport.is_subscribed(&channel));
    transport.emit(COUNTERS_CHANNEL, COUNTER_UPDATED, json!({ "id": 1, "name": "Renamed" }));
    wait_until(|| controller.read(|r| r.view(&c1()).map(|v| v.meta.name.clone())).as_deref() == Some("Renamed"))
        .await;
    assert!(display.read(|r| r.view(&c1()).is_none()));

    for sub in controller_subs {
        sub.unsubscribe();
    }
    assert!(!transport.is_subscribed(&channel));
    assert_eq!(client.channel_count(), 0);
}
