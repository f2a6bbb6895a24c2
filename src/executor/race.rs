//! Run a unit of work against a timer.
//!
//! Both branches are spawned into one `JoinSet`. The first to finish wins;
//! the set is then shut down, which aborts the loser and waits for it to be
//! dropped before the result is returned.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RaceError {
    #[error("timed out after {}ms", .after.as_millis())]
    TimedOut { after: Duration },

    #[error("task failed: {reason}")]
    Panicked { reason: String },
}

enum Branch<T> {
    Finished(T),
    Expired,
}

pub async fn race_with_timeout<F, T>(work: F, limit: Duration) -> Result<T, RaceError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut set = JoinSet::new();
    set.spawn(async move { Branch::Finished(work.await) });
    set.spawn(async move {
        tokio::time::sleep(limit).await;
        Branch::Expired
    });

    let first = set.join_next().await;
    set.shutdown().await;

    match first {
        Some(Ok(Branch::Finished(value))) => Ok(value),
        Some(Ok(Branch::Expired)) => {
            tracing::debug!(limit_ms = limit.as_millis() as u64, "race lost to timer");
            Err(RaceError::TimedOut { after: limit })
        }
        Some(Err(e)) => Err(RaceError::Panicked {
            reason: e.to_string(),
        }),
        None => Err(RaceError::Panicked {
            reason: "no branch completed".into(),
        }),
    }
}
