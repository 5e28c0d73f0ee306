use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use poem_gen_engine::config::{EngineConfig, AUDIO_TTL, INSIGHT_TTL};
use poem_gen_engine::model::{ContentClass, ContentId, Metadata, Payload};
use poem_gen_engine::store::{Clock, ContentStore, FsBackend, ManualClock, MemoryBackend, StoreBackend};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn memory_store() -> (ContentStore, Arc<MemoryBackend>, Arc<ManualClock>) {
    let backend = Arc::new(MemoryBackend::new());
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let store = ContentStore::new(backend.clone(), clock.clone());
    (store, backend, clock)
}

#[tokio::test]
async fn test_set_then_get_returns_payload() {
    let (store, _backend, clock) = memory_store();
    let key = ContentId::from("poem-1");
    let wav = Bytes::from_static(b"RIFF....WAVE");
    let meta = Metadata::from([("voice".to_string(), "Charon".to_string())]);

    store
        .set(ContentClass::Audio, &key, Payload::Blob(wav.clone()), meta.clone())
        .await;

    let record = store.get(ContentClass::Audio, &key).await.unwrap();
    assert_eq!(record.payload, Payload::Blob(wav));
    assert_eq!(record.metadata, meta);
    assert_eq!(record.stored_at, clock.now_ms());

    // Same key in another class is a different record.
    assert!(store.get(ContentClass::Insight, &key).await.is_none());
}

#[tokio::test]
async fn test_expired_audio_is_evicted_on_read() {
    let (store, backend, clock) = memory_store();
    let key = ContentId::from("poem-2");
    store
        .set(ContentClass::Audio, &key, Payload::Blob(Bytes::from_static(b"pcm")), Metadata::new())
        .await;

    // Exactly at the TTL the record is still served.
    clock.advance(AUDIO_TTL);
    assert!(store.get(ContentClass::Audio, &key).await.is_some());
    assert!(backend.contains("audio", "poem-2"));

    clock.advance(Duration::from_millis(1));
    assert!(store.get(ContentClass::Audio, &key).await.is_none());
    assert!(!backend.contains("audio", "poem-2"));
}

#[tokio::test]
async fn test_insight_ttl_is_thirty_days() {
    let (store, backend, clock) = memory_store();
    let key = ContentId::from("poem-3");
    store
        .set(ContentClass::Insight, &key, Payload::Text("imagery".into()), Metadata::new())
        .await;

    clock.advance(8 * DAY);
    assert!(store.get(ContentClass::Insight, &key).await.is_some());

    clock.advance(INSIGHT_TTL);
    assert!(store.get(ContentClass::Insight, &key).await.is_none());
    assert_eq!(backend.len("insight"), 0);
}

#[tokio::test]
async fn test_poems_never_expire() {
    let (store, _backend, clock) = memory_store();
    let key = ContentId::from("poem-4");
    store
        .set(ContentClass::Poem, &key, Payload::Text("{}".into()), Metadata::new())
        .await;

    clock.advance(10_000 * DAY);
    assert!(store.get(ContentClass::Poem, &key).await.is_some());
}

#[tokio::test]
async fn test_set_overwrites_and_restamps() {
    let (store, _backend, clock) = memory_store();
    let key = ContentId::from("poem-5");
    store
        .set(ContentClass::Audio, &key, Payload::Blob(Bytes::from_static(b"old")), Metadata::new())
        .await;

    clock.advance(6 * DAY);
    store
        .set(ContentClass::Audio, &key, Payload::Blob(Bytes::from_static(b"new")), Metadata::new())
        .await;

    // Six more days: past the first write's TTL, within the second's.
    clock.advance(6 * DAY);
    let record = store.get(ContentClass::Audio, &key).await.unwrap();
    assert_eq!(record.payload, Payload::Blob(Bytes::from_static(b"new")));
}

#[tokio::test]
async fn test_delete_and_clear() {
    let (store, backend, _clock) = memory_store();
    for id in ["a", "b", "c"] {
        store
            .set(ContentClass::Insight, &ContentId::from(id), Payload::Text(id.into()), Metadata::new())
            .await;
    }
    store
        .set(ContentClass::Poem, &ContentId::from("a"), Payload::Text("p".into()), Metadata::new())
        .await;

    store.delete(ContentClass::Insight, &ContentId::from("a")).await;
    assert!(store.get(ContentClass::Insight, &ContentId::from("a")).await.is_none());
    assert_eq!(backend.len("insight"), 2);

    store.clear(ContentClass::Insight).await;
    assert_eq!(backend.len("insight"), 0);
    assert!(store.get(ContentClass::Poem, &ContentId::from("a")).await.is_some());
}

#[tokio::test]
async fn test_corrupt_record_is_a_miss() {
    let (store, backend, _clock) = memory_store();
    backend
        .put("audio", "bad", Bytes::from_static(b"\x00\x01garbage"))
        .await
        .unwrap();

    assert!(store.get(ContentClass::Audio, &ContentId::from("bad")).await.is_none());
    assert!(!backend.contains("audio", "bad"));
}

#[tokio::test]
async fn test_fs_backend_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let key = ContentId::from("poem/with spaces");

    {
        let backend = FsBackend::open(dir.path()).await.unwrap();
        let store = ContentStore::new(Arc::new(backend), Arc::new(ManualClock::new(0)));
        store
            .set(ContentClass::Insight, &key, Payload::Text("أبيات".into()), Metadata::new())
            .await;
    }

    let clock = Arc::new(ManualClock::new(0));
    let backend = FsBackend::open(dir.path()).await.unwrap();
    let store = ContentStore::new(Arc::new(backend), clock.clone());
    let record = store.get(ContentClass::Insight, &key).await.unwrap();
    assert_eq!(record.payload, Payload::Text("أبيات".into()));

    clock.advance(INSIGHT_TTL + Duration::from_secs(1));
    assert!(store.get(ContentClass::Insight, &key).await.is_none());

    let raw = FsBackend::open(dir.path()).await.unwrap();
    assert!(raw.get("insight", key.as_str()).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fs_backend_concurrent_writes_to_one_key() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FsBackend::open(dir.path()).await.unwrap());
    const LEN: usize = 256 * 1024;

    let mut tasks = Vec::new();
    for i in 0..16u8 {
        let writer = Arc::clone(&backend);
        tasks.push(tokio::spawn(async move {
            writer.put("audio", "same", Bytes::from(vec![i; LEN])).await
        }));
        let reader = Arc::clone(&backend);
        tasks.push(tokio::spawn(async move {
            // Any record a reader sees is one whole write.
            if let Some(seen) = reader.get("audio", "same").await.unwrap() {
                assert_eq!(seen.len(), LEN);
                assert!(seen.iter().all(|b| *b == seen[0]));
            }
            Ok(())
        }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let last = backend.get("audio", "same").await.unwrap().unwrap();
    assert_eq!(last.len(), LEN);
    assert!(last.iter().all(|b| *b == last[0]));

    // Only the record itself is left in the partition.
    let names: Vec<_> = std::fs::read_dir(dir.path().join("audio"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("same.rec")]);
}

#[tokio::test]
async fn test_fs_backend_clear_missing_partition_is_ok() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FsBackend::open(dir.path()).await.unwrap();
    backend.clear("audio").await.unwrap();
    backend.delete("audio", "nothing").await.unwrap();
    assert!(backend.get("audio", "nothing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unavailable_backend_disables_caching() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, b"x").unwrap();

    let config = EngineConfig {
        cache_dir: file.join("cache").to_string_lossy().into_owned(),
        ..EngineConfig::default()
    };
    let store = ContentStore::open(&config).await;
    assert!(!store.is_enabled());

    let key = ContentId::from("k");
    store
        .set(ContentClass::Audio, &key, Payload::Text("x".into()), Metadata::new())
        .await;
    assert!(store.get(ContentClass::Audio, &key).await.is_none());
}

#[tokio::test]
async fn test_empty_cache_dir_uses_memory() {
    let store = ContentStore::open(&EngineConfig::default()).await;
    assert!(store.is_enabled());
}
