//! Race-with-grace-window fan-out.
//!
//! Every call runs as its own task. The first success arms a single grace deadline; calls
//! still outstanding when it fires are aborted. Worst-case latency is therefore the latency
//! of the first success plus the grace window, while any call that answers inside the window
//! still contributes to the tally.

use futures_util::{future::BoxFuture, stream::FuturesUnordered, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::{task::AbortHandle, time::Instant};

/// Why a raced call produced no value.
#[derive(Error, Debug)]
pub enum RaceError<E> {
    /// The call itself failed.
    #[error("call failed: {0}")]
    Call(E),

    /// Another call succeeded and this one did not finish within the grace window.
    #[error("cancelled after another call responded")]
    TimeoutAfterOtherResponse,

    /// The task panicked or was cancelled from outside.
    #[error("call aborted")]
    Aborted,
}

impl<E> RaceError<E> {
    /// Underlying call error, if the call failed on its own.
    pub fn into_call_error(self) -> Option<E> {
        match self {
            Self::Call(e) => Some(e),
            _ => None,
        }
    }
}

/// Aborts every spawned call when dropped, including when the race itself is cancelled.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Runs `calls` concurrently and collects one outcome per call, in call order.
///
/// After the first success, the remaining calls get `grace` to finish; the rest are aborted
/// and reported as [`RaceError::TimeoutAfterOtherResponse`]. If nothing succeeds the function
/// waits for every call to resolve.
pub async fn race_all<T, E>(
    calls: Vec<BoxFuture<'static, Result<T, E>>>,
    grace: Duration,
) -> Vec<Result<T, RaceError<E>>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let mut outcomes: Vec<Option<Result<T, RaceError<E>>>> =
        (0..calls.len()).map(|_| None).collect();
    let mut spawned = AbortOnDrop(Vec::with_capacity(calls.len()));
    let mut pending = FuturesUnordered::new();

    for (index, call) in calls.into_iter().enumerate() {
        let handle = tokio::spawn(call);
        spawned.0.push(handle.abort_handle());
        pending.push(async move { (index, handle.await) });
    }

    let mut deadline: Option<Instant> = None;

    loop {
        let next = match deadline {
            None => pending.next().await,
            Some(at) => tokio::select! {
                next = pending.next() => next,
                () = tokio::time::sleep_until(at) => break,
            },
        };

        let Some((index, joined)) = next else { break };

        outcomes[index] = Some(match joined {
            Ok(Ok(value)) => {
                deadline.get_or_insert_with(|| Instant::now() + grace);
                Ok(value)
            }
            Ok(Err(e)) => Err(RaceError::Call(e)),
            Err(_) => Err(RaceError::Aborted),
        });
    }

    // Stragglers are aborted when `spawned` drops on return.
    outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or(Err(RaceError::TimeoutAfterOtherResponse)))
        .collect()
}
