//! Inspect and prune the queue.

use anyhow::Result;
use sync_client::{SyncEngine, Transport};
use sync_store::TaskStore;
use sync_types::{SyncTask, TaskId, TaskPayload};

/// Print every queued task, in dispatch order.
pub async fn list<T: Transport, S: TaskStore + 'static>(engine: &SyncEngine<T, S>) -> Result<()> {
    let tasks = engine.tasks().await?;
    if tasks.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<11}  {:<9}  {:<6}  {:<7}  DETAIL",
        "TASK", "KIND", "STATUS", "PRIO", "TRIES"
    );
    for task in &tasks {
        println!("{}", format_row(task));
    }
    println!();
    println!("{} task(s)", tasks.len());
    Ok(())
}

/// Cancel a task.
pub async fn cancel<T: Transport, S: TaskStore + 'static>(
    engine: &SyncEngine<T, S>,
    id: TaskId,
) -> Result<bool> {
    let existed = engine.cancel(id).await?;
    if existed {
        println!("Cancelled {}", id);
    } else {
        println!("No task {}", id);
    }
    Ok(existed)
}

/// Clear a failed task.
pub async fn dismiss<T: Transport, S: TaskStore + 'static>(
    engine: &SyncEngine<T, S>,
    id: TaskId,
) -> Result<bool> {
    let existed = engine.dismiss(id).await?;
    if existed {
        println!("Dismissed {}", id);
    } else {
        println!("No task {}", id);
    }
    Ok(existed)
}

fn format_row(task: &SyncTask) -> String {
    format!(
        "{:<36}  {:<11}  {:<9}  {:<6}  {:<7}  {}",
        task.id.to_string(),
        task.kind().as_str(),
        task.status.as_str(),
        task.priority.to_string(),
        format!("{}/{}", task.retry_count, task.max_retries),
        detail(task)
    )
}

fn detail(task: &SyncTask) -> String {
    let summary = match &task.payload {
        TaskPayload::FileUpload(upload) => format!(
            "{} file(s), {}/{} chunks ({}%)",
            upload.files.len(),
            upload.acknowledged_count(),
            upload.total_chunks(),
            upload.percent()
        ),
        TaskPayload::DataRecord(record) => {
            format!("record {} (base v{})", record.record_id, record.local_version)
        }
        TaskPayload::Preferences(prefs) => {
            format!("{} preference(s) for {}", prefs.values.len(), prefs.device_id)
        }
    };
    match &task.last_error {
        Some(error) => format!("{}; last error: {}", summary, error.message),
        None => summary,
    }
}
