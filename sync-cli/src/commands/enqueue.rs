//! Queue uploads, records and preferences.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use sync_client::{SyncEngine, Transport};
use sync_core::SourceFile;
use sync_store::TaskStore;
use sync_types::{
    now_millis, DataRecordPayload, FieldValue, PreferencesPayload, Priority, RecordBody, TaskId,
    TaskPayload,
};

/// Read files from disk and queue them as one upload task.
pub async fn upload<T: Transport, S: TaskStore + 'static>(
    engine: &SyncEngine<T, S>,
    paths: &[PathBuf],
    priority: Priority,
) -> Result<TaskId> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?;
        let modified_at = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or_else(now_millis);
        files.push(SourceFile::new(&name, modified_at, content));
    }

    let bytes: usize = files.iter().map(|f| f.content.len()).sum();
    let id = engine.enqueue_upload(&files, priority).await?;
    println!(
        "Queued upload {} ({} file(s), {} bytes, priority {})",
        id,
        files.len(),
        bytes,
        priority
    );
    Ok(id)
}

/// Queue a record push. Every field is stamped with the current time.
pub async fn record<T: Transport, S: TaskStore + 'static>(
    engine: &SyncEngine<T, S>,
    record_id: &str,
    body_json: &str,
    base_version: u64,
    priority: Priority,
) -> Result<TaskId> {
    let body = parse_body(body_json, now_millis())?;
    let fields = body.len();
    let payload = DataRecordPayload {
        record_id: record_id.to_string(),
        local_version: base_version,
        body,
        client_timestamp: now_millis(),
    };

    let id = engine
        .enqueue(TaskPayload::DataRecord(payload), priority)
        .await?;
    println!(
        "Queued record {} as task {} ({} field(s), base version {})",
        record_id, id, fields, base_version
    );
    Ok(id)
}

/// Queue a preferences push from `key=value` pairs.
pub async fn preferences<T: Transport, S: TaskStore + 'static>(
    engine: &SyncEngine<T, S>,
    device_id: &str,
    pairs: &[String],
    priority: Priority,
) -> Result<TaskId> {
    let mut values = BTreeMap::new();
    for pair in pairs {
        let (key, value) = parse_pair(pair)?;
        values.insert(key, value);
    }
    let count = values.len();
    let payload = PreferencesPayload {
        device_id: device_id.to_string(),
        values,
        updated_at: now_millis(),
    };

    let id = engine
        .enqueue(TaskPayload::Preferences(payload), priority)
        .await?;
    println!("Queued {} preference(s) for {} as task {}", count, device_id, id);
    Ok(id)
}

fn parse_body(json: &str, updated_at: u64) -> Result<RecordBody> {
    let value: serde_json::Value =
        serde_json::from_str(json).context("Record body is not valid JSON")?;
    let serde_json::Value::Object(fields) = value else {
        bail!("Record body must be a JSON object");
    };
    Ok(fields
        .into_iter()
        .map(|(name, value)| (name, FieldValue::new(value, updated_at)))
        .collect())
}

fn parse_pair(pair: &str) -> Result<(String, serde_json::Value)> {
    let Some((key, raw)) = pair.split_once('=') else {
        bail!("Expected key=value, got '{}'", pair);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Empty preference key in '{}'", pair);
    }
    let value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
