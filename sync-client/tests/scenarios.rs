//! End-to-end engine scenarios against the mock transport.
//!
//! All tests run on a paused tokio clock, so retry backoff elapses
//! instantly while keeping its ordering.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;
use backsync_client::{
    DispatchOutcome, EngineConfig, MockTransport, SyncEngine, SyncEvent, TransportError,
};
use sync_core::{Chunker, SourceFile};
use sync_store::{MemoryTaskStore, TaskStore};
use sync_types::{
    DataRecordPayload, FieldValue, PreferencesPayload, Priority, RecordBody, RemoteRecord,
    SyncTask, TaskId, TaskPayload, TaskStatus,
};
use tokio::sync::broadcast;

// ============================================================================
// Helpers
// ============================================================================

fn config() -> EngineConfig {
    EngineConfig::default()
        .with_chunk_size(4)
        .with_fixed_backoff(Duration::from_secs(1), Duration::from_secs(60))
}

fn engine(
    transport: &MockTransport,
    store: &MemoryTaskStore,
    config: EngineConfig,
) -> SyncEngine<MockTransport, MemoryTaskStore> {
    SyncEngine::new(transport.clone(), store.clone(), config).unwrap()
}

fn file(name: &str, len: usize) -> SourceFile {
    SourceFile::new(name, 1_700_000_000_000, (0..len).map(|i| i as u8).collect())
}

fn prefs(device: &str) -> TaskPayload {
    let mut values = BTreeMap::new();
    values.insert("theme".to_string(), json!("dark"));
    TaskPayload::Preferences(PreferencesPayload {
        device_id: device.into(),
        values,
        updated_at: 1,
    })
}

fn record(id: &str, version: u64, fields: &[(&str, serde_json::Value, u64)]) -> DataRecordPayload {
    let body: RecordBody = fields
        .iter()
        .map(|(k, v, t)| (k.to_string(), FieldValue::new(v.clone(), *t)))
        .collect();
    DataRecordPayload {
        record_id: id.into(),
        local_version: version,
        body,
        client_timestamp: 1,
    }
}

/// Collect events until one for `id` satisfies `done`.
async fn events_until(
    rx: &mut broadcast::Receiver<SyncEvent>,
    id: TaskId,
    done: impl Fn(&SyncEvent) -> bool,
) -> Vec<SyncEvent> {
    let collect = async {
        let mut seen = Vec::new();
        loop {
            let event = rx.recv().await.expect("event bus closed or lagged");
            if event.task_id() != id {
                continue;
            }
            let finished = done(&event);
            seen.push(event);
            if finished {
                return seen;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(3600), collect)
        .await
        .expect("timed out waiting for event")
}

fn is_terminal(event: &SyncEvent) -> bool {
    event.is_terminal()
}

fn count_retries(events: &[SyncEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SyncEvent::Retry { .. }))
        .count()
}

fn count_dispatches(events: &[SyncEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SyncEvent::Progress { percent: 0, .. }))
        .count()
}

// ============================================================================
// Upload scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn chunk_failing_twice_completes_after_two_retries() {
    let transport = MockTransport::new();
    let store = MemoryTaskStore::new();
    let engine = engine(&transport, &store, config());
    let mut rx = engine.subscribe();

    // 12 bytes at 4 bytes per chunk: chunks 0, 1, 2
    transport.fail_chunk(1, 2, TransportError::Timeout);
    let id = engine
        .enqueue_upload(&[file("scan.bin", 12)], Priority::Medium)
        .await
        .unwrap();

    let events = events_until(&mut rx, id, is_terminal).await;

    assert_eq!(events.last(), Some(&SyncEvent::Completed { task_id: id }));
    assert_eq!(count_retries(&events), 2);
    assert_eq!(transport.uploaded_chunks(&id), vec![0, 1, 2]);
    let chunk0_attempts = transport
        .chunk_attempts()
        .iter()
        .filter(|(task, index)| *task == id && *index == 0)
        .count();
    assert_eq!(chunk0_attempts, 1);
    assert_eq!(transport.finalize_count(&id), 1);
    assert!(store.load(&id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn progress_reports_each_acknowledged_chunk() {
    let transport = MockTransport::new();
    let store = MemoryTaskStore::new();
    let engine = engine(&transport, &store, config());
    let mut rx = engine.subscribe();

    let id = engine
        .enqueue_upload(&[file("a.bin", 8), file("b.bin", 8)], Priority::High)
        .await
        .unwrap();
    let events = events_until(&mut rx, id, is_terminal).await;

    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![0, 25, 50, 75, 100]);
}

#[tokio::test(start_paused = true)]
async fn restarted_engine_uploads_only_unacknowledged_chunks() {
    let store = MemoryTaskStore::new();

    // First process: chunks 0 and 1 land, chunk 2 fails, then the process dies.
    let first = MockTransport::new();
    first.fail_chunk(2, 1, TransportError::ConnectionFailed("reset".into()));
    let engine1 = engine(&first, &store, config());
    let mut rx = engine1.subscribe();
    let id = engine1
        .enqueue_upload(&[file("video.bin", 20)], Priority::Medium)
        .await
        .unwrap();
    events_until(&mut rx, id, |e| matches!(e, SyncEvent::Retry { .. })).await;
    engine1.shutdown();

    let persisted = store.load(&id).await.unwrap().unwrap();
    match &persisted.payload {
        TaskPayload::FileUpload(upload) => {
            assert_eq!(upload.acknowledged.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
        }
        other => panic!("unexpected payload {:?}", other),
    }

    // Second process over the same store.
    let second = MockTransport::new();
    let engine2 = engine(&second, &store, config());
    let mut rx = engine2.subscribe();
    assert_eq!(engine2.resume().await.unwrap(), vec![id]);
    let events = events_until(&mut rx, id, is_terminal).await;

    assert_eq!(events.last(), Some(&SyncEvent::Completed { task_id: id }));
    assert_eq!(second.uploaded_chunks(&id), vec![2, 3, 4]);
    assert_eq!(second.finalize_count(&id), 1);
}

#[tokio::test(start_paused = true)]
async fn task_left_syncing_by_a_crash_is_recovered() {
    let store = MemoryTaskStore::new();
    let chunker = Chunker::new(4).unwrap();
    let mut payload = chunker.prepare(&[file("a.bin", 12)]).unwrap();
    payload.acknowledged.insert(0);
    let mut task = SyncTask::new(TaskPayload::FileUpload(payload), Priority::Medium, 5);
    task.status = TaskStatus::Syncing;
    store.save(&task).await.unwrap();

    let transport = MockTransport::new();
    let engine = engine(&transport, &store, config());
    let mut rx = engine.subscribe();
    assert_eq!(engine.resume().await.unwrap(), vec![task.id]);

    events_until(&mut rx, task.id, is_terminal).await;
    assert_eq!(transport.uploaded_chunks(&task.id), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn finalize_is_called_once_even_when_retried() {
    let transport = MockTransport::new();
    let store = MemoryTaskStore::new();
    let engine = engine(&transport, &store, config());
    let mut rx = engine.subscribe();

    transport.fail_next_finalize(TransportError::Status {
        status: 503,
        body: "busy".into(),
    });
    let id = engine
        .enqueue_upload(&[file("a.bin", 8)], Priority::Medium)
        .await
        .unwrap();
    events_until(&mut rx, id, is_terminal).await;

    assert_eq!(transport.finalize_count(&id), 1);
    assert_eq!(transport.uploaded_chunks(&id), vec![0, 1]);

    // A late trigger for the completed task does nothing.
    assert_eq!(
        engine.dispatch(id).await.unwrap(),
        DispatchOutcome::Missing
    );
    assert_eq!(transport.finalize_count(&id), 1);
}

// ============================================================================
// Retry ceiling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn attempts_never_exceed_the_ceiling() {
    let transport = MockTransport::new();
    let store = MemoryTaskStore::new();
    let engine = engine(&transport, &store, config());
    let mut rx = engine.subscribe();

    for _ in 0..10 {
        transport.fail_next_push_record(TransportError::Timeout);
    }
    let id = engine
        .enqueue(
            TaskPayload::DataRecord(record("r1", 0, &[("a", json!(1), 1)])),
            Priority::Low,
        )
        .await
        .unwrap();
    let events = events_until(&mut rx, id, is_terminal).await;

    // DataRecord ceiling is 3
    assert!(matches!(events.last(), Some(SyncEvent::Failed { .. })));
    assert_eq!(count_dispatches(&events), 3);
    assert_eq!(count_retries(&events), 2);

    let failed = store.load(&id).await.unwrap().expect("failed task is kept");
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.retry_count, 3);
    assert!(failed.last_error.unwrap().message.contains("timeout"));
    assert!(!engine.has_pending_retry(&id));
}

#[tokio::test(start_paused = true)]
async fn retry_delays_follow_the_backoff() {
    let transport = MockTransport::new();
    let store = MemoryTaskStore::new();
    let engine = engine(&transport, &store, config());
    let mut rx = engine.subscribe();

    for _ in 0..4 {
        transport.fail_next_upload(TransportError::Timeout);
    }
    let id = engine
        .enqueue_upload(&[file("a.bin", 4)], Priority::Medium)
        .await
        .unwrap();
    let events = events_until(&mut rx, id, is_terminal).await;

    let delays: Vec<Duration> = events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::Retry { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8)
        ]
    );
    assert_eq!(events.last(), Some(&SyncEvent::Completed { task_id: id }));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_dispatches_run_one_transport_sequence() {
    let transport = MockTransport::new();
    transport.set_latency(Duration::from_millis(200));
    let store = MemoryTaskStore::new();
    let engine = engine(&transport, &store, config());

    let task = SyncTask::new(prefs("phone"), Priority::Medium, 2);
    store.save(&task).await.unwrap();

    let (a, b) = tokio::join!(engine.run_task(task.id), engine.run_task(task.id));
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| format!("{:?}", o));

    assert_eq!(
        outcomes,
        vec![DispatchOutcome::AlreadyInFlight, DispatchOutcome::Completed]
    );
    assert_eq!(transport.pushed_preferences().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn overlapping_triggers_upload_each_chunk_once() {
    let transport = MockTransport::new();
    transport.set_latency(Duration::from_millis(50));
    let store = MemoryTaskStore::new();
    let engine = engine(&transport, &store, config().with_start_online(false));
    let mut rx = engine.subscribe();

    let id = engine
        .enqueue_upload(&[file("a.bin", 16)], Priority::Medium)
        .await
        .unwrap();

    // A connectivity flap and a manual retry firing together.
    engine.on_connectivity_change(true).await.unwrap();
    let manual = engine.dispatch(id);
    engine.on_connectivity_change(true).await.unwrap();

    assert_eq!(manual.await.unwrap(), DispatchOutcome::AlreadyInFlight);
    events_until(&mut rx, id, is_terminal).await;

    assert_eq!(transport.uploaded_chunks(&id), vec![0, 1, 2, 3]);
    assert_eq!(transport.chunk_attempts().len(), 4);
    assert_eq!(transport.finalize_count(&id), 1);
}

// ============================================================================
// Connectivity
// ============================================================================

#[tokio::test(start_paused = true)]
async fn offline_preferences_push_once_when_back_online() {
    let transport = MockTransport::new();
    let store = MemoryTaskStore::new();
    let engine = engine(&transport, &store, config().with_start_online(false));
    let mut rx = engine.subscribe();

    let id = engine.enqueue(prefs("laptop"), Priority::Medium).await.unwrap();
    assert_eq!(
        rx.recv().await.unwrap(),
        SyncEvent::Deferred { task_id: id }
    );
    assert!(transport.pushed_preferences().is_empty());
    assert_eq!(
        store.load(&id).await.unwrap().unwrap().status,
        TaskStatus::Pending
    );

    assert_eq!(engine.on_connectivity_change(true).await.unwrap(), vec![id]);
    let events = events_until(&mut rx, id, is_terminal).await;

    assert_eq!(events.last(), Some(&SyncEvent::Completed { task_id: id }));
    assert_eq!(transport.pushed_preferences().len(), 1);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn reconnect_dispatches_high_priority_first() {
    let transport = MockTransport::new();
    let store = MemoryTaskStore::new();
    let engine = engine(&transport, &store, config().with_start_online(false));

    let low = engine.enqueue(prefs("low"), Priority::Low).await.unwrap();
    let high = engine.enqueue(prefs("high"), Priority::High).await.unwrap();
    let medium = engine.enqueue(prefs("medium"), Priority::Medium).await.unwrap();

    let order = engine.on_connectivity_change(true).await.unwrap();
    assert_eq!(order, vec![high, medium, low]);
}
