use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};

use crate::error::ExtractionError;

/// Runs `work` on its own task and calls `heartbeat` every `interval` until
/// it finishes. The join handle is polled before the timer, so no heartbeat
/// fires once the work is done.
pub async fn run_with_heartbeat<T, F, H, HF>(
    work: F,
    heartbeat: H,
    interval: Duration,
) -> Result<T, ExtractionError>
where
    T: Send + 'static,
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    H: FnMut() -> HF,
    HF: Future<Output = ()>,
{
    let handle = tokio::spawn(work);
    join_with_heartbeat(handle, heartbeat, interval).await
}

/// Same as [`run_with_heartbeat`] for closures that block the thread.
pub async fn run_blocking_with_heartbeat<T, F, H, HF>(
    work: F,
    heartbeat: H,
    interval: Duration,
) -> Result<T, ExtractionError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    H: FnMut() -> HF,
    HF: Future<Output = ()>,
{
    let handle = tokio::task::spawn_blocking(work);
    join_with_heartbeat(handle, heartbeat, interval).await
}

async fn join_with_heartbeat<T, H, HF>(
    mut handle: JoinHandle<anyhow::Result<T>>,
    mut heartbeat: H,
    interval: Duration,
) -> Result<T, ExtractionError>
where
    H: FnMut() -> HF,
    HF: Future<Output = ()>,
{
    let mut beats: u32 = 0;
    let joined = loop {
        tokio::select! {
            biased;
            joined = &mut handle => break joined,
            _ = tokio::time::sleep(interval) => {
                beats += 1;
                heartbeat().await;
            }
        }
    };
    tracing::debug!("[bridge] work finished after {} heartbeats", beats);

    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ExtractionError::Failed(format!("{:#}", e))),
        Err(e) => Err(join_failure(e)),
    }
}

fn join_failure(e: JoinError) -> ExtractionError {
    if e.is_cancelled() {
        return ExtractionError::Cancelled;
    }
    let payload = e.into_panic();
    let text = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ExtractionError::Panicked(text)
}
