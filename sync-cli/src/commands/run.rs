//! Drain the queue against the remote.

use anyhow::Result;
use sync_client::{SyncEngine, SyncEvent, Transport};
use sync_store::TaskStore;
use sync_types::TaskStatus;
use tokio::sync::broadcast::error::RecvError;

/// Counts of terminal events seen during a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Tasks that reached `Completed`.
    pub completed: usize,
    /// Tasks that exhausted their retries or hit a terminal error.
    pub failed: usize,
    /// Tasks removed by the user mid-run.
    pub cancelled: usize,
}

impl RunSummary {
    fn record(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::Completed { .. } => self.completed += 1,
            SyncEvent::Failed { .. } => self.failed += 1,
            SyncEvent::Cancelled { .. } => self.cancelled += 1,
            _ => {}
        }
    }
}

/// Resume the queue and print lifecycle events until nothing is left to do
/// (or until Ctrl-C with `watch`).
pub async fn run<T: Transport, S: TaskStore + 'static>(
    engine: &SyncEngine<T, S>,
    watch: bool,
) -> Result<RunSummary> {
    let mut events = engine.subscribe();
    let picked = engine.resume().await?;
    println!("Processing {} queued task(s)", picked.len());

    let mut summary = RunSummary::default();
    if !watch && !has_outstanding(engine).await? {
        print_summary(&summary);
        return Ok(summary);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("Interrupted; unfinished tasks stay queued");
                break;
            }
            received = events.recv() => match received {
                Ok(event) => {
                    println!("{}", describe(&event));
                    summary.record(&event);
                    if event.is_terminal() && !watch && !has_outstanding(engine).await? {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} event(s)", missed);
                    if !watch && !has_outstanding(engine).await? {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    print_summary(&summary);
    Ok(summary)
}

/// True while any task could still make progress. Failed tasks are left for
/// inspection and do not keep the run alive.
async fn has_outstanding<T: Transport, S: TaskStore + 'static>(
    engine: &SyncEngine<T, S>,
) -> Result<bool> {
    Ok(engine
        .tasks()
        .await?
        .iter()
        .any(|t| t.status != TaskStatus::Failed))
}

fn describe(event: &SyncEvent) -> String {
    match event {
        SyncEvent::Progress { task_id, percent } => format!("{}  {:>3}%", task_id, percent),
        SyncEvent::Retry {
            task_id,
            retry_count,
            delay,
        } => format!(
            "{}  retry #{} in {:.1}s",
            task_id,
            retry_count,
            delay.as_secs_f64()
        ),
        SyncEvent::Completed { task_id } => format!("{}  completed", task_id),
        SyncEvent::Failed { task_id, error } => format!("{}  FAILED: {}", task_id, error),
        SyncEvent::Cancelled { task_id } => format!("{}  cancelled", task_id),
        SyncEvent::Deferred { task_id } => format!("{}  waiting for connectivity", task_id),
        SyncEvent::RecordPushed {
            task_id,
            record_id,
            version,
        } => format!("{}  record {} stored at v{}", task_id, record_id, version),
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "Done: {} completed, {} failed, {} cancelled",
        summary.completed, summary.failed, summary.cancelled
    );
}
