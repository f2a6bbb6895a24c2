//! The execution lane.
//!
//! One dedicated task runs UI-affecting jobs one at a time, in submission
//! order, so concurrent requests never interleave their effects on the
//! same target. A job still queued when its cancellation token fires is
//! skipped; a job that has started runs to completion.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::errors::ExecutorError;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Clone)]
pub struct ExecutionLane {
    jobs: mpsc::Sender<Job>,
}

impl ExecutionLane {
    /// Spawn the lane task. Must be called inside a tokio runtime.
    pub fn spawn(capacity: usize) -> Self {
        let (jobs, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                    tracing::error!("execution lane job panicked");
                }
            }
            tracing::debug!("execution lane stopped");
        });
        Self { jobs }
    }

    /// Run `work` on the lane and wait for its output.
    ///
    /// Returns `Cancelled` without running `work` if `cancel` fires before
    /// the lane reaches it.
    pub async fn run<F, T>(&self, work: F, cancel: &CancellationToken) -> Result<T, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cancel = cancel.clone();
        let job: Job = Box::pin(async move {
            if cancel.is_cancelled() {
                let _ = reply_tx.send(None);
                return;
            }
            let _ = reply_tx.send(Some(work.await));
        });
        self.jobs
            .send(job)
            .await
            .map_err(|_| ExecutorError::internal("execution lane closed", "lane task is not running"))?;
        match reply_rx.await {
            Ok(Some(output)) => Ok(output),
            Ok(None) => Err(ExecutorError::Cancelled),
            Err(_) => Err(ExecutorError::internal(
                "execution lane job failed",
                "job ended without a result",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_jobs_never_interleave() {
        let lane = ExecutionLane::spawn(8);
        let cancel = CancellationToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3u64 {
            let lane = lane.clone();
            let log = log.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let work = async move {
                    log.lock().unwrap().push(format!("start {i}"));
                    tokio::time::sleep(Duration::from_millis(30 - i * 10)).await;
                    log.lock().unwrap().push(format!("end {i}"));
                    i
                };
                lane.run(work, &cancel).await
            }));
            tokio::task::yield_now().await;
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap().unwrap(), i as u64);
        }

        let log = log.lock().unwrap();
        for pair in log.chunks(2) {
            let start = pair[0].strip_prefix("start ").unwrap();
            let end = pair[1].strip_prefix("end ").unwrap();
            assert_eq!(start, end);
        }
    }

    #[tokio::test]
    async fn test_panicking_job_reports_internal_and_lane_survives() {
        let lane = ExecutionLane::spawn(4);
        let cancel = CancellationToken::new();
        let err = lane
            .run(
                async {
                    panic!("provider blew up");
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Internal { .. }));
        assert_eq!(lane.run(async { 5 }, &cancel).await.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_job_is_skipped_after_cancel() {
        let lane = ExecutionLane::spawn(4);
        let cancel = CancellationToken::new();
        let ran = Arc::new(AtomicBool::new(false));

        let busy = {
            let lane = lane.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let work = tokio::time::sleep(Duration::from_secs(5));
                lane.run(work, &cancel).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let queued = {
            let lane = lane.clone();
            let cancel = cancel.clone();
            let ran = ran.clone();
            tokio::spawn(async move {
                let work = async move { ran.store(true, Ordering::SeqCst) };
                lane.run(work, &cancel).await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        assert!(busy.await.unwrap().is_ok());
        assert!(matches!(queued.await.unwrap(), Err(ExecutorError::Cancelled)));
        assert!(!ran.load(Ordering::SeqCst));
    }
}
