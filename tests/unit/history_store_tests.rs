//! Session history snapshot store.

use agent_tether::models::session::{Message, Role, SessionRecord};
use agent_tether::persistence::HistoryStore;
use agent_tether::AppError;
use chrono::Duration;
use serde_json::json;

#[test]
fn missing_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::open(dir.path().join("sessions.json")).unwrap();
    assert!(store.is_empty());
    assert_eq!(store.max_id(), 0);
}

#[test]
fn upsert_persists_and_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");

    let store = HistoryStore::open(&path).unwrap();
    let mut record = SessionRecord::new(Some(5));
    record.append(Message::new(Role::User, json!("hello")));
    store.upsert(7, record.clone()).unwrap();
    store.upsert(3, SessionRecord::new(None)).unwrap();

    let reloaded = HistoryStore::open(&path).unwrap();
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded.max_id(), 7);
    assert_eq!(reloaded.get(7), Some(record));
}

#[test]
fn file_is_keyed_by_decimal_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let store = HistoryStore::open(&path).unwrap();
    store.upsert(42, SessionRecord::new(None)).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(raw["42"]["messages"].is_array());
    assert!(raw["42"]["createdAt"].is_string());
}

#[test]
fn remove_reports_existence() {
    let store = HistoryStore::in_memory();
    store.upsert(1, SessionRecord::new(None)).unwrap();
    assert!(store.remove(1).unwrap());
    assert!(!store.remove(1).unwrap());
    assert!(!store.contains(1));
}

#[test]
fn list_filters_by_project_and_sorts_newest_first() {
    let store = HistoryStore::in_memory();
    let base = SessionRecord::new(None);

    let mut older = base.clone();
    older.updated_at = base.updated_at - Duration::minutes(10);
    let mut newer = base.clone();
    newer.updated_at = base.updated_at + Duration::minutes(10);
    let mut bound = base.clone();
    bound.project_id = Some(77);

    store.upsert(1, older).unwrap();
    store.upsert(2, newer).unwrap();
    store.upsert(3, bound).unwrap();

    let unbound: Vec<u64> = store.list(None).iter().map(|s| s.id).collect();
    assert_eq!(unbound, vec![2, 1]);

    let project: Vec<u64> = store.list(Some(77)).iter().map(|s| s.id).collect();
    assert_eq!(project, vec![3]);
    assert!(store.list(Some(1)).is_empty());
}

#[test]
fn malformed_snapshot_is_a_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    std::fs::write(&path, "{ not json").unwrap();
    let err = HistoryStore::open(&path).expect_err("must fail");
    assert!(matches!(err, AppError::Storage(_)));
}

#[test]
fn stage_outside_a_runtime_writes_inline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let store = std::sync::Arc::new(HistoryStore::open(&path).unwrap());

    let mut record = SessionRecord::new(None);
    record.append(Message::new(Role::Assistant, json!("done")));
    store.stage(4, record.clone());

    assert_eq!(store.get(4), Some(record.clone()));
    assert_eq!(HistoryStore::open(&path).unwrap().get(4), Some(record));
}

#[tokio::test]
async fn staged_bursts_reach_disk_with_the_latest_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let store = std::sync::Arc::new(HistoryStore::open(&path).unwrap());

    let mut record = SessionRecord::new(None);
    for n in 0..20 {
        record.append(Message::new(Role::Assistant, json!(n)));
        store.stage(1, record.clone());
    }
    assert_eq!(store.get(1).map(|r| r.messages.len()), Some(20));

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        let on_disk = HistoryStore::open(&path)
            .ok()
            .and_then(|reloaded| reloaded.get(1))
            .map(|r| r.messages.len());
        if on_disk == Some(20) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "snapshot never caught up");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    store.sync().unwrap();
    assert_eq!(HistoryStore::open(&path).unwrap().get(1), Some(record));
}
