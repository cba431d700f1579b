mod common;

use std::sync::Arc;

use common::{sync_over, FakeGateway};
use queueboard::counters::CounterManager;
use queueboard::error::QueueError;
use queueboard::models::CounterId;

fn manager(gw: &Arc<FakeGateway>) -> CounterManager<FakeGateway> {
    CounterManager::new(sync_over(gw))
}

#[tokio::test]
async fn test_create_normalizes_prefix_and_reloads() {
    let gw = Arc::new(FakeGateway::new());
    let m = manager(&gw);

    let created = m.create(" Pharmacy ", "ph").await.unwrap();
    assert_eq!(created.name, "Pharmacy");
    assert_eq!(created.prefix, "PH");
    assert_eq!(gw.calls(), ["create-counter:Pharmacy:PH"]);
    assert_eq!(gw.counter_list_calls(), 1);
}

#[tokio::test]
async fn test_create_rejects_long_prefix_without_calling() {
    let gw = Arc::new(FakeGateway::new());
    let m = manager(&gw);

    let err = m.create("Pharmacy", "PHAR").await.unwrap_err();
    assert!(matches!(err, QueueError::Precondition(_)));
    assert!(gw.calls().is_empty());
}

#[tokio::test]
async fn test_update_requires_a_field() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Front")]));
    let m = manager(&gw);
    let err = m.update(&CounterId::new("1"), None, None).await.unwrap_err();
    assert!(matches!(err, QueueError::Precondition(_)));

    let updated = m.update(&CounterId::new("1"), Some("Front desk"), Some("f")).await.unwrap();
    assert_eq!(updated.name, "Front desk");
    assert_eq!(updated.prefix, "F");
}

#[tokio::test]
async fn test_toggle_flips_known_state() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Front")]));
    let m = manager(&gw);

    let off = m.toggle(&CounterId::new("1")).await.unwrap();
    assert!(!off.active);
    let on = m.toggle(&CounterId::new("1")).await.unwrap();
    assert!(on.active);
    assert_eq!(gw.calls(), ["toggle-counter:1:false", "toggle-counter:1:true"]);
}

#[tokio::test]
async fn test_toggle_unknown_counter() {
    let gw = Arc::new(FakeGateway::new());
    let m = manager(&gw);
    let err = m.toggle(&CounterId::new("9")).await.unwrap_err();
    assert!(matches!(err, QueueError::Precondition(_)));
}

#[tokio::test]
async fn test_delete_reloads_list() {
    let gw = Arc::new(FakeGateway::with_counters(&[("1", "Front"), ("2", "Back")]));
    let m = manager(&gw);
    assert_eq!(m.list().await.unwrap().len(), 2);

    m.delete(&CounterId::new("2")).await.unwrap();
    let left = m.list().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, CounterId::new("1"));
}
