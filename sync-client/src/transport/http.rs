//! HTTP transport (reqwest).
//!
//! Endpoints, relative to the base URL:
//!
//! | Call                | Request                                             |
//! |---------------------|-----------------------------------------------------|
//! | `upload_chunk`      | `POST /uploads/{task}/chunks/{index}?source={file}` |
//! | `finalize_upload`   | `POST /uploads/{task}/finalize`                     |
//! | `fetch_record`      | `GET /records/{id}` (404 = absent)                  |
//! | `push_record`       | `PUT /records/{id}` → `{"version": n}`              |
//! | `push_preferences`  | `PUT /preferences`                                  |
//!
//! Record ids and file names are opaque: each is percent-encoded as a single
//! path segment or query value.

use super::{Transport, TransportError};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sync_types::{
    Chunk, DataRecordPayload, FileDescriptor, PreferencesPayload, RemoteRecord, TaskId,
};

/// Header carrying the chunk's byte offset within its file.
pub const CHUNK_OFFSET_HEADER: &str = "x-chunk-offset";

/// Query parameter carrying the chunk's source file name.
pub const CHUNK_SOURCE_PARAM: &str = "source";

/// Transport over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

#[derive(Serialize)]
struct FinalizeRequest<'a> {
    files: &'a [FileDescriptor],
}

#[derive(Deserialize)]
struct VersionResponse {
    version: u64,
}

impl HttpTransport {
    /// Create a transport for the given base URL with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid base URL: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::ConnectionFailed(format!(
                "base URL {} cannot carry a path",
                base
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base,
        })
    }

    /// The base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Base URL plus path segments, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Turn a non-success response into a classified error.
    async fn check(response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::from_status(status.as_u16(), &body))
    }
}

fn map_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() {
        TransportError::InvalidResponse(err.to_string())
    } else {
        TransportError::ConnectionFailed(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn upload_chunk(&self, chunk: &Chunk, task_id: &TaskId) -> Result<(), TransportError> {
        let task = task_id.to_string();
        let index = chunk.index.to_string();
        let mut url = self.url(&["uploads", &task, "chunks", &index]);
        url.query_pairs_mut().append_pair(CHUNK_SOURCE_PARAM, &chunk.source_file);

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(CHUNK_OFFSET_HEADER, chunk.offset.to_string())
            .body(chunk.data.clone())
            .send()
            .await
            .map_err(map_reqwest)?;

        Self::check(response).await?;
        tracing::debug!("Uploaded chunk {} of task {}", chunk.index, task_id);
        Ok(())
    }

    async fn finalize_upload(
        &self,
        task_id: &TaskId,
        files: &[FileDescriptor],
    ) -> Result<(), TransportError> {
        let task = task_id.to_string();
        let url = self.url(&["uploads", &task, "finalize"]);
        let response = self
            .client
            .post(url)
            .json(&FinalizeRequest { files })
            .send()
            .await
            .map_err(map_reqwest)?;

        Self::check(response).await?;
        Ok(())
    }

    async fn push_record(&self, record: &DataRecordPayload) -> Result<u64, TransportError> {
        let url = self.url(&["records", &record.record_id]);
        let response = self
            .client
            .put(url)
            .json(record)
            .send()
            .await
            .map_err(map_reqwest)?;

        let response = Self::check(response).await?;
        let ack: VersionResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(ack.version)
    }

    async fn fetch_record(&self, record_id: &str) -> Result<Option<RemoteRecord>, TransportError> {
        let url = self.url(&["records", record_id]);
        let response = self.client.get(url).send().await.map_err(map_reqwest)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = Self::check(response).await?;
        let record = response
            .json::<RemoteRecord>()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(Some(record))
    }

    async fn push_preferences(&self, prefs: &PreferencesPayload) -> Result<(), TransportError> {
        let response = self
            .client
            .put(self.url(&["preferences"]))
            .json(prefs)
            .send()
            .await
            .map_err(map_reqwest)?;

        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex};
    use sync_types::{FieldValue, RecordBody};

    #[derive(Default)]
    struct Server {
        chunks: Vec<(String, u32, u64, String, usize)>,
        finalized: Vec<Value>,
        preferences: Vec<Value>,
        pushed_ids: Vec<String>,
    }

    type Shared = Arc<Mutex<Server>>;

    async fn upload_chunk(
        State(state): State<Shared>,
        Path((task, index)): Path<(String, u32)>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> AxumStatus {
        let offset = headers[CHUNK_OFFSET_HEADER].to_str().unwrap().parse().unwrap();
        let source = query[CHUNK_SOURCE_PARAM].clone();
        state
            .lock()
            .unwrap()
            .chunks
            .push((task, index, offset, source, body.len()));
        AxumStatus::OK
    }

    async fn finalize(State(state): State<Shared>, Json(body): Json<Value>) -> AxumStatus {
        state.lock().unwrap().finalized.push(body);
        AxumStatus::OK
    }

    async fn get_record(Path(id): Path<String>) -> Result<Json<Value>, AxumStatus> {
        match id.as_str() {
            "known" => Ok(Json(json!({
                "record_id": "known",
                "version": 4,
                "body": { "title": { "value": "remote", "updated_at": 9 } },
                "updated_at": 9
            }))),
            "garbled" => Ok(Json(json!({ "unexpected": true }))),
            "flaky" => Err(AxumStatus::SERVICE_UNAVAILABLE),
            _ => Err(AxumStatus::NOT_FOUND),
        }
    }

    async fn put_record(
        State(state): State<Shared>,
        Path(id): Path<String>,
    ) -> Result<Json<Value>, (AxumStatus, String)> {
        state.lock().unwrap().pushed_ids.push(id.clone());
        if id == "invalid" {
            return Err((AxumStatus::UNPROCESSABLE_ENTITY, "body rejected".into()));
        }
        Ok(Json(json!({ "version": 5 })))
    }

    async fn put_preferences(State(state): State<Shared>, Json(body): Json<Value>) -> AxumStatus {
        state.lock().unwrap().preferences.push(body);
        AxumStatus::NO_CONTENT
    }

    async fn spawn_server() -> (String, Shared) {
        let state: Shared = Arc::default();
        let app = Router::new()
            .route("/uploads/:task/chunks/:index", post(upload_chunk))
            .route("/uploads/:task/finalize", post(finalize))
            .route("/records/:id", get(get_record).put(put_record))
            .route("/preferences", put(put_preferences))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/", addr), state)
    }

    fn transport(base: &str) -> HttpTransport {
        HttpTransport::new(base, Duration::from_secs(5)).unwrap()
    }

    fn record(id: &str) -> DataRecordPayload {
        let mut body = RecordBody::new();
        body.insert("title".into(), FieldValue::new(json!("local"), 3));
        DataRecordPayload {
            record_id: id.into(),
            local_version: 3,
            body,
            client_timestamp: 3,
        }
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let t = transport("http://localhost:9000/api/");
        assert_eq!(t.base_url(), "http://localhost:9000/api");
    }

    #[tokio::test]
    async fn upload_chunk_sends_bytes_and_headers() {
        let (base, state) = spawn_server().await;
        let t = transport(&base);
        let task_id = TaskId::new();
        let chunk = Chunk {
            index: 2,
            source_file: "scan.dcm".into(),
            offset: 2048,
            size: 3,
            data: vec![1, 2, 3],
        };

        t.upload_chunk(&chunk, &task_id).await.unwrap();

        let server = state.lock().unwrap();
        assert_eq!(
            server.chunks,
            vec![(task_id.to_string(), 2, 2048, "scan.dcm".to_string(), 3)]
        );
    }

    #[tokio::test]
    async fn finalize_posts_descriptors() {
        let (base, state) = spawn_server().await;
        let t = transport(&base);
        let files = vec![FileDescriptor::describe("a.txt", 1, b"hello")];

        t.finalize_upload(&TaskId::new(), &files).await.unwrap();

        let server = state.lock().unwrap();
        assert_eq!(server.finalized[0]["files"][0]["name"], "a.txt");
        assert_eq!(server.finalized[0]["files"][0]["size"], 5);
    }

    #[tokio::test]
    async fn fetch_record_handles_found_and_missing() {
        let (base, _) = spawn_server().await;
        let t = transport(&base);

        let found = t.fetch_record("known").await.unwrap().unwrap();
        assert_eq!(found.version, 4);
        assert_eq!(found.body["title"].value, json!("remote"));

        assert!(t.fetch_record("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_record_classifies_failures() {
        let (base, _) = spawn_server().await;
        let t = transport(&base);

        let flaky = t.fetch_record("flaky").await.unwrap_err();
        assert!(flaky.is_retryable());

        let garbled = t.fetch_record("garbled").await.unwrap_err();
        assert!(matches!(garbled, TransportError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn push_record_returns_server_version() {
        let (base, _) = spawn_server().await;
        let t = transport(&base);
        assert_eq!(t.push_record(&record("known")).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn rejected_record_is_terminal() {
        let (base, _) = spawn_server().await;
        let t = transport(&base);

        let err = t.push_record(&record("invalid")).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Rejected {
                status: 422,
                reason: "body rejected".into()
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn push_preferences_sends_values() {
        let (base, state) = spawn_server().await;
        let t = transport(&base);
        let mut values = BTreeMap::new();
        values.insert("theme".to_string(), json!("dark"));

        t.push_preferences(&PreferencesPayload {
            device_id: "tablet".into(),
            values,
            updated_at: 42,
        })
        .await
        .unwrap();

        let server = state.lock().unwrap();
        assert_eq!(server.preferences[0]["device_id"], "tablet");
        assert_eq!(server.preferences[0]["values"]["theme"], "dark");
    }

    #[tokio::test]
    async fn non_ascii_file_name_is_sent_intact() {
        let (base, state) = spawn_server().await;
        let t = transport(&base);
        let task_id = TaskId::new();
        let chunk = Chunk {
            index: 0,
            source_file: "résumé & notes=1.pdf".into(),
            offset: 0,
            size: 2,
            data: vec![7, 8],
        };

        t.upload_chunk(&chunk, &task_id).await.unwrap();

        let server = state.lock().unwrap();
        assert_eq!(server.chunks[0].3, "résumé & notes=1.pdf");
    }

    #[tokio::test]
    async fn record_id_is_one_path_segment() {
        let (base, state) = spawn_server().await;
        let t = transport(&base);

        // Would normalize to /records/known if spliced in raw.
        assert!(t.fetch_record("known/../known").await.unwrap().is_none());
        assert!(t.fetch_record("known?x=1#frag").await.unwrap().is_none());
        assert!(t.fetch_record("known").await.unwrap().is_some());

        t.push_record(&record("a/b?c#d e")).await.unwrap();
        assert_eq!(state.lock().unwrap().pushed_ids, vec!["a/b?c#d e"]);
    }

    #[test]
    fn url_keeps_base_path() {
        let t = transport("http://localhost:9000/api/v1/");
        assert_eq!(
            t.url(&["records", "x/y"]).as_str(),
            "http://localhost:9000/api/v1/records/x%2Fy"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(HttpTransport::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpTransport::new("mailto:ops@example.org", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn unreachable_server_is_retryable() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let t = transport(&format!("http://{}", addr));
        let err = t.push_preferences(&PreferencesPayload {
            device_id: "d".into(),
            values: BTreeMap::new(),
            updated_at: 0,
        })
        .await
        .unwrap_err();
        assert!(err.is_retryable(), "got {:?}", err);
    }
}
