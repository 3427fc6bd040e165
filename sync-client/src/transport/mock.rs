//! Mock transport for testing.
//!
//! Records every call, serves records from an in-memory "server", and lets
//! tests script failures per operation or per chunk index.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_types::{
    now_millis, Chunk, DataRecordPayload, FileDescriptor, PreferencesPayload, RemoteRecord, TaskId,
};

/// Mock transport for testing.
///
/// Clones share state, so a test can keep a handle after giving one to the
/// engine.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    latency: Option<Duration>,
    chunk_attempts: Vec<(TaskId, u32)>,
    uploaded_chunks: Vec<(TaskId, u32)>,
    finalized: Vec<(TaskId, Vec<FileDescriptor>)>,
    pushed_records: Vec<DataRecordPayload>,
    fetched_records: Vec<String>,
    pushed_preferences: Vec<PreferencesPayload>,
    remote_records: HashMap<String, RemoteRecord>,
    chunk_failures: HashMap<u32, VecDeque<TransportError>>,
    fail_next_upload: VecDeque<TransportError>,
    fail_next_finalize: VecDeque<TransportError>,
    fail_next_push_record: VecDeque<TransportError>,
    fail_next_fetch: VecDeque<TransportError>,
    fail_next_preferences: VecDeque<TransportError>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency` before it takes effect.
    pub fn set_latency(&self, latency: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.latency = Some(latency);
    }

    /// Fail uploads of chunk `index` the next `times` attempts with `error`.
    pub fn fail_chunk(&self, index: u32, times: usize, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        let queue = inner.chunk_failures.entry(index).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Cause the next upload_chunk() to fail with the given error.
    pub fn fail_next_upload(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_upload.push_back(error);
    }

    /// Cause the next finalize_upload() to fail with the given error.
    pub fn fail_next_finalize(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_finalize.push_back(error);
    }

    /// Cause the next push_record() to fail with the given error.
    pub fn fail_next_push_record(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_push_record.push_back(error);
    }

    /// Cause the next fetch_record() to fail with the given error.
    pub fn fail_next_fetch(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_fetch.push_back(error);
    }

    /// Cause the next push_preferences() to fail with the given error.
    pub fn fail_next_preferences(&self, error: TransportError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_preferences.push_back(error);
    }

    /// Place a record on the mock server.
    pub fn put_remote_record(&self, record: RemoteRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.remote_records.insert(record.record_id.clone(), record);
    }

    /// The mock server's copy of a record.
    pub fn remote_record(&self, record_id: &str) -> Option<RemoteRecord> {
        let inner = self.inner.lock().unwrap();
        inner.remote_records.get(record_id).cloned()
    }

    /// Every upload attempt (successful or not), in call order.
    pub fn chunk_attempts(&self) -> Vec<(TaskId, u32)> {
        let inner = self.inner.lock().unwrap();
        inner.chunk_attempts.clone()
    }

    /// Chunk indices successfully uploaded for a task, in call order.
    pub fn uploaded_chunks(&self, task_id: &TaskId) -> Vec<u32> {
        let inner = self.inner.lock().unwrap();
        inner
            .uploaded_chunks
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, index)| *index)
            .collect()
    }

    /// Number of successful finalize calls for a task.
    pub fn finalize_count(&self, task_id: &TaskId) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.finalized.iter().filter(|(id, _)| id == task_id).count()
    }

    /// Descriptors sent with the last finalize call for a task.
    pub fn finalized_files(&self, task_id: &TaskId) -> Option<Vec<FileDescriptor>> {
        let inner = self.inner.lock().unwrap();
        inner
            .finalized
            .iter()
            .rev()
            .find(|(id, _)| id == task_id)
            .map(|(_, files)| files.clone())
    }

    /// Records accepted by push_record(), in call order.
    pub fn pushed_records(&self) -> Vec<DataRecordPayload> {
        let inner = self.inner.lock().unwrap();
        inner.pushed_records.clone()
    }

    /// Record ids passed to fetch_record(), in call order.
    pub fn fetched_records(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.fetched_records.clone()
    }

    /// Preferences accepted by push_preferences(), in call order.
    pub fn pushed_preferences(&self) -> Vec<PreferencesPayload> {
        let inner = self.inner.lock().unwrap();
        inner.pushed_preferences.clone()
    }

    /// Clear all state (logs, scripted failures, remote records).
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockTransportInner::default();
    }

    async fn simulate_latency(&self) {
        let latency = self.inner.lock().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn upload_chunk(&self, chunk: &Chunk, task_id: &TaskId) -> Result<(), TransportError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap();
        inner.chunk_attempts.push((*task_id, chunk.index));

        // Check for forced failure
        if let Some(error) = inner.fail_next_upload.pop_front() {
            return Err(error);
        }
        if let Some(error) = inner
            .chunk_failures
            .get_mut(&chunk.index)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        inner.uploaded_chunks.push((*task_id, chunk.index));
        Ok(())
    }

    async fn finalize_upload(
        &self,
        task_id: &TaskId,
        files: &[FileDescriptor],
    ) -> Result<(), TransportError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_finalize.pop_front() {
            return Err(error);
        }

        inner.finalized.push((*task_id, files.to_vec()));
        Ok(())
    }

    async fn push_record(&self, record: &DataRecordPayload) -> Result<u64, TransportError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_push_record.pop_front() {
            return Err(error);
        }

        let version = inner
            .remote_records
            .get(&record.record_id)
            .map(|r| r.version + 1)
            .unwrap_or(1);
        inner.remote_records.insert(
            record.record_id.clone(),
            RemoteRecord {
                record_id: record.record_id.clone(),
                version,
                body: record.body.clone(),
                updated_at: now_millis(),
            },
        );
        inner.pushed_records.push(record.clone());
        Ok(version)
    }

    async fn fetch_record(&self, record_id: &str) -> Result<Option<RemoteRecord>, TransportError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap();
        inner.fetched_records.push(record_id.to_string());

        if let Some(error) = inner.fail_next_fetch.pop_front() {
            return Err(error);
        }

        Ok(inner.remote_records.get(record_id).cloned())
    }

    async fn push_preferences(&self, prefs: &PreferencesPayload) -> Result<(), TransportError> {
        self.simulate_latency().await;
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.fail_next_preferences.pop_front() {
            return Err(error);
        }

        inner.pushed_preferences.push(prefs.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use sync_types::{FieldValue, RecordBody};

    fn chunk(index: u32) -> Chunk {
        Chunk {
            index,
            source_file: "a.bin".into(),
            offset: index as u64 * 4,
            size: 4,
            data: vec![index as u8; 4],
        }
    }

    fn record(id: &str) -> DataRecordPayload {
        let mut body = RecordBody::new();
        body.insert("n".into(), FieldValue::new(json!(1), 1));
        DataRecordPayload {
            record_id: id.into(),
            local_version: 0,
            body,
            client_timestamp: 1,
        }
    }

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn records_uploaded_chunks_per_task() {
        let transport = MockTransport::new();
        let a = TaskId::new();
        let b = TaskId::new();

        transport.upload_chunk(&chunk(0), &a).await.unwrap();
        transport.upload_chunk(&chunk(0), &b).await.unwrap();
        transport.upload_chunk(&chunk(1), &a).await.unwrap();

        assert_eq!(transport.uploaded_chunks(&a), vec![0, 1]);
        assert_eq!(transport.uploaded_chunks(&b), vec![0]);
    }

    #[tokio::test]
    async fn scripted_chunk_failures_are_consumed_in_order() {
        let transport = MockTransport::new();
        let id = TaskId::new();
        transport.fail_chunk(1, 2, TransportError::Timeout);

        assert!(transport.upload_chunk(&chunk(0), &id).await.is_ok());
        assert_eq!(
            transport.upload_chunk(&chunk(1), &id).await,
            Err(TransportError::Timeout)
        );
        assert_eq!(
            transport.upload_chunk(&chunk(1), &id).await,
            Err(TransportError::Timeout)
        );
        assert!(transport.upload_chunk(&chunk(1), &id).await.is_ok());

        assert_eq!(transport.chunk_attempts().len(), 4);
        assert_eq!(transport.uploaded_chunks(&id), vec![0, 1]);
    }

    #[tokio::test]
    async fn push_record_assigns_increasing_versions() {
        let transport = MockTransport::new();

        assert_eq!(transport.push_record(&record("r1")).await.unwrap(), 1);
        assert_eq!(transport.push_record(&record("r1")).await.unwrap(), 2);
        assert_eq!(transport.remote_record("r1").unwrap().version, 2);
    }

    #[tokio::test]
    async fn fetch_returns_placed_records() {
        let transport = MockTransport::new();
        assert!(transport.fetch_record("missing").await.unwrap().is_none());

        transport.put_remote_record(RemoteRecord {
            record_id: "r1".into(),
            version: 7,
            body: RecordBody::new(),
            updated_at: 0,
        });
        let fetched = transport.fetch_record("r1").await.unwrap().unwrap();
        assert_eq!(fetched.version, 7);
        assert_eq!(transport.fetched_records(), vec!["missing", "r1"]);
    }

    #[tokio::test]
    async fn fail_next_applies_once() {
        let transport = MockTransport::new();
        let prefs = PreferencesPayload {
            device_id: "d".into(),
            values: BTreeMap::new(),
            updated_at: 0,
        };
        transport.fail_next_preferences(TransportError::Offline);

        assert!(transport.push_preferences(&prefs).await.is_err());
        assert!(transport.push_preferences(&prefs).await.is_ok());
        assert_eq!(transport.pushed_preferences().len(), 1);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let transport = MockTransport::new();
        let handle = transport.clone();
        let id = TaskId::new();

        transport.finalize_upload(&id, &[]).await.unwrap();
        assert_eq!(handle.finalize_count(&id), 1);

        handle.reset();
        assert_eq!(transport.finalize_count(&id), 0);
    }
}
