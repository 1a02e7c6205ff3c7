//! Offline Queue Integration Tests
//!
//! Queue durability across backends, corrupt storage handling and
//! tempId ordering.

mod common;

use std::sync::Arc;

use common::FlakyStore;
use tempfile::TempDir;
use voiceform::core::QUEUE_KEY;
use voiceform::storage::UpdateFn;
use voiceform::{
    FileStore, FormData, KeyValueStore, MemoryStore, OfflineQueue, SqliteStore, StorageError,
};

/// Wraps a store and stalls inside every read-modify-write, widening the
/// window between read and write
struct SlowUpdates<S> {
    inner: S,
}

#[async_trait::async_trait]
impl<S: KeyValueStore> KeyValueStore for SlowUpdates<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key).await
    }

    async fn update<'a>(&self, key: &str, apply: UpdateFn<'a>) -> Result<(), StorageError> {
        self.inner
            .update(
                key,
                Box::new(move |current| {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    apply(current)
                }),
            )
            .await
    }
}

async fn save_concurrently(first: OfflineQueue, second: OfflineQueue) {
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.save(FormData::new("Ravi", "Patient")).await }),
        tokio::spawn(async move { second.save(FormData::new("Asha", "Patient")).await }),
    );
    a.unwrap().unwrap();
    b.unwrap().unwrap();
}

#[tokio::test]
async fn test_offline_submit_is_queued_with_role_intact() {
    let queue = OfflineQueue::new(Arc::new(MemoryStore::new()));

    queue.save(FormData::new("Ravi", "Patient")).await.unwrap();

    let items = queue.get_all().await;
    assert_eq!(items.len(), 1);
    assert!(!items[0].temp_id.is_empty());
    assert_eq!(items[0].form.name, "Ravi");
    assert_eq!(items[0].form.role, "Patient");
}

#[tokio::test]
async fn test_stored_json_keeps_role_field() {
    let store = Arc::new(MemoryStore::new());
    let queue = OfflineQueue::new(store.clone());

    queue
        .save(FormData::new("Ravi", "Patient").with_phone("98140 00000"))
        .await
        .unwrap();

    let raw = store.get(QUEUE_KEY).await.unwrap().unwrap();
    let entries: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
    assert_eq!(entries[0]["role"], "Patient");
    assert_eq!(entries[0]["phone"], "98140 00000");
    assert!(entries[0]["tempId"].is_string());
    assert!(entries[0].get("email").is_none());
}

#[tokio::test]
async fn test_malformed_storage_reads_as_empty() {
    let store = MemoryStore::new().with_value(QUEUE_KEY, "{not json");
    let queue = OfflineQueue::new(Arc::new(store));

    assert!(queue.get_all().await.is_empty());
    assert_eq!(queue.len().await, 0);

    // A save over corrupt data starts a fresh queue
    queue.save(FormData::new("Ravi", "Patient")).await.unwrap();
    assert_eq!(queue.len().await, 1);
}

#[tokio::test]
async fn test_wrong_shape_reads_as_empty() {
    let store = MemoryStore::new().with_value(QUEUE_KEY, r#"{"tempId":"1"}"#);
    let queue = OfflineQueue::new(Arc::new(store));

    assert!(queue.get_all().await.is_empty());
}

#[tokio::test]
async fn test_save_order_and_unique_ids() {
    let queue = OfflineQueue::new(Arc::new(MemoryStore::new()));

    let mut ids = Vec::new();
    for i in 0..20 {
        let queued = queue
            .save(FormData::new(format!("person {}", i), "Patient"))
            .await
            .unwrap();
        ids.push(queued.temp_id);
    }

    let items = queue.get_all().await;
    assert_eq!(items.len(), 20);
    for (i, item) in items.iter().enumerate() {
        assert_eq!(item.form.name, format!("person {}", i));
        assert_eq!(item.temp_id, ids[i]);
    }

    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());
}

#[tokio::test]
async fn test_concurrent_saves_lose_nothing() {
    let queue = Arc::new(OfflineQueue::new(Arc::new(MemoryStore::new())));

    let mut handles = Vec::new();
    for i in 0..10 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            queue
                .save(FormData::new(format!("p{}", i), "Patient"))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(queue.len().await, 10);
}

#[tokio::test]
async fn test_remove_unknown_id_is_noop() {
    let queue = OfflineQueue::new(Arc::new(MemoryStore::new()));
    queue.save(FormData::new("Ravi", "Patient")).await.unwrap();

    assert!(!queue.remove("does-not-exist").await.unwrap());
    assert_eq!(queue.len().await, 1);
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();

    let last_id = {
        let queue = OfflineQueue::new(Arc::new(FileStore::new(temp_dir.path())));
        queue.save(FormData::new("Ravi", "Patient")).await.unwrap();
        queue.save(FormData::new("Asha", "Head of Family")).await.unwrap().temp_id
    };

    // New process, same directory
    let queue = OfflineQueue::new(Arc::new(FileStore::new(temp_dir.path())));
    let items = queue.get_all().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].form.name, "Ravi");
    assert_eq!(items[1].temp_id, last_id);

    // Ids keep increasing past what is already on disk
    let next = queue.save(FormData::new("Dev", "Patient")).await.unwrap();
    assert!(next.temp_id.parse::<u64>().unwrap() > last_id.parse::<u64>().unwrap());
}

#[tokio::test]
async fn test_sqlite_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("queue.db");

    {
        let queue = OfflineQueue::new(Arc::new(SqliteStore::open(&db_path).unwrap()));
        queue.save(FormData::new("Ravi", "Patient")).await.unwrap();
    }

    let queue = OfflineQueue::new(Arc::new(SqliteStore::open(&db_path).unwrap()));
    let items = queue.get_all().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].form.role, "Patient");

    queue.clear().await.unwrap();
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn test_corrupt_file_reads_as_empty() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join(format!("{}.json", QUEUE_KEY)),
        "\u{0}\u{0}garbage",
    )
    .unwrap();

    let queue = OfflineQueue::new(Arc::new(FileStore::new(temp_dir.path())));
    assert!(queue.get_all().await.is_empty());
}

#[tokio::test]
async fn test_read_failure_reads_as_empty() {
    let store = Arc::new(FlakyStore::new());
    let queue = OfflineQueue::new(store.clone());
    queue.save(FormData::new("Ravi", "Patient")).await.unwrap();

    store.fail_reads(true);
    assert!(queue.get_all().await.is_empty());
    assert_eq!(queue.status().await.pending, 0);

    store.fail_reads(false);
    assert_eq!(queue.len().await, 1);
}

#[tokio::test]
async fn test_save_during_read_failure_keeps_existing_entries() {
    let store = Arc::new(FlakyStore::new());
    let queue = OfflineQueue::new(store.clone());
    queue.save(FormData::new("Ravi", "Patient")).await.unwrap();
    queue.save(FormData::new("Asha", "Patient")).await.unwrap();

    store.fail_reads(true);
    assert!(queue.save(FormData::new("Dev", "Patient")).await.is_err());
    assert!(queue.remove("anything").await.is_err());

    store.fail_reads(false);
    let names: Vec<String> = queue.get_all().await.into_iter().map(|i| i.form.name).collect();
    assert_eq!(names, vec!["Ravi", "Asha"]);

    queue.save(FormData::new("Dev", "Patient")).await.unwrap();
    assert_eq!(queue.len().await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_queues_sharing_a_directory_keep_both_saves() {
    let temp_dir = TempDir::new().unwrap();
    let open = || {
        OfflineQueue::new(Arc::new(SlowUpdates {
            inner: FileStore::new(temp_dir.path()),
        }))
    };

    save_concurrently(open(), open()).await;

    let queue = OfflineQueue::new(Arc::new(FileStore::new(temp_dir.path())));
    assert_eq!(queue.len().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_queues_sharing_a_database_keep_both_saves() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("queue.db");
    let open = || {
        OfflineQueue::new(Arc::new(SlowUpdates {
            inner: SqliteStore::open(&db_path).unwrap(),
        }))
    };

    save_concurrently(open(), open()).await;

    let queue = OfflineQueue::new(Arc::new(SqliteStore::open(&db_path).unwrap()));
    assert_eq!(queue.len().await, 2);
}

#[tokio::test]
async fn test_legacy_entry_with_role_and_email_is_kept() {
    let raw = r#"[
        {"name": "Ravi", "role": "Patient", "email": "ravi@example.org",
         "tempId": "1700000000000", "created_at": "2023-11-14T22:13:20.000Z"},
        {"name": "Old", "email": "Head of Family",
         "tempId": "1700000000001", "created_at": "2023-11-14T22:13:21.000Z"}
    ]"#;
    let queue = OfflineQueue::new(Arc::new(MemoryStore::new().with_value(QUEUE_KEY, raw)));

    let roles: Vec<String> = queue.get_all().await.into_iter().map(|i| i.form.role).collect();
    assert_eq!(roles, vec!["Patient", "Head of Family"]);
}

#[tokio::test]
async fn test_unreadable_entry_survives_save() {
    let raw = r#"[{"tempId": "7", "note": "not a submission"}]"#;
    let store = Arc::new(MemoryStore::new().with_value(QUEUE_KEY, raw));
    let queue = OfflineQueue::new(store.clone());

    queue.save(FormData::new("Ravi", "Patient")).await.unwrap();

    let stored = store.get(QUEUE_KEY).await.unwrap().unwrap();
    assert!(stored.contains("not a submission"));
    assert_eq!(queue.len().await, 1);
    assert_eq!(queue.status().await.unreadable, 1);
}

#[tokio::test]
async fn test_save_after_maximal_stored_id() {
    let raw = format!(
        r#"[{{"name": "Ravi", "role": "Patient", "tempId": "{}", "created_at": "2024-01-01T00:00:00Z"}}]"#,
        u64::MAX
    );
    let queue = OfflineQueue::new(Arc::new(MemoryStore::new().with_value(QUEUE_KEY, &raw)));

    queue.save(FormData::new("Asha", "Patient")).await.unwrap();
    assert_eq!(queue.len().await, 2);
}
