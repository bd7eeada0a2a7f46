// Single-flight credential refresh.
//
// Concurrent callers that hit an expired credential all funnel through
// `coordinate_refresh`. The first caller of a round starts the refresh; the
// rest attach to it and observe the same token or the same failure.
//
// Rounds are numbered by an epoch counter and their outcomes are published
// on one long-lived broadcast channel, so a waiter only ever listens for the
// outcome tagged with its own epoch:
//
//   Idle --call--> Refreshing(epoch) --success/failure/timeout--> Idle
//   (any) --force_reset--> Idle

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use parlance_common::types::AuthToken;

use crate::error::ClientError;

/// Default bound on a refresh round.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

const OUTCOME_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
struct RefreshOutcome {
    epoch: u64,
    result: Result<AuthToken, ClientError>,
}

#[derive(Debug, Default)]
struct RefreshState {
    epoch: u64,
    in_progress: bool,
    task: Option<AbortHandle>,
}

struct Inner {
    timeout: Duration,
    state: Mutex<RefreshState>,
    outcomes: broadcast::Sender<RefreshOutcome>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        // State is plain data and every critical section leaves it
        // consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Close round `epoch` with `result`. No-op if the round was already
    /// closed (by a forced reset).
    fn settle(&self, epoch: u64, result: Result<AuthToken, ClientError>) {
        let mut state = self.lock();
        if state.epoch != epoch || !state.in_progress {
            debug!(epoch, "refresh outcome discarded, round already closed");
            return;
        }
        state.in_progress = false;
        state.task = None;
        match &result {
            Ok(_) => info!(epoch, "token refresh succeeded"),
            Err(error) => warn!(epoch, error = %error, "token refresh failed"),
        }
        let _ = self.outcomes.send(RefreshOutcome { epoch, result });
    }
}

/// Closes its round with a failure if dropped before `finish`, which covers
/// a panicking `perform` or an aborted refresh task.
struct RoundGuard {
    inner: Arc<Inner>,
    epoch: u64,
    settled: bool,
}

impl RoundGuard {
    fn finish(mut self, result: Result<AuthToken, ClientError>) {
        self.settled = true;
        self.inner.settle(self.epoch, result);
    }
}

impl Drop for RoundGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.settle(
                self.epoch,
                Err(ClientError::RefreshRejected("refresh ended without a result".into())),
            );
        }
    }
}

/// Process-wide refresh coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_TIMEOUT)
    }
}

impl RefreshCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                timeout,
                state: Mutex::new(RefreshState::default()),
                outcomes,
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.lock().in_progress
    }

    /// Number of rounds started so far.
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Refresh the credential, or join the refresh already in flight.
    ///
    /// `perform` is only invoked when no round is in progress. The round is
    /// bounded by the coordinator's timeout; on timeout the `perform` future
    /// is dropped, which aborts the underlying request.
    pub async fn coordinate_refresh<F, Fut>(&self, perform: F) -> Result<AuthToken, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AuthToken, ClientError>> + Send + 'static,
    {
        let (epoch, rx) = {
            let mut state = self.inner.lock();
            // Subscribe under the lock so the outcome cannot be published
            // before this receiver exists.
            let rx = self.inner.outcomes.subscribe();
            if state.in_progress {
                debug!(epoch = state.epoch, "joining in-flight token refresh");
                (state.epoch, rx)
            } else {
                state.epoch += 1;
                state.in_progress = true;
                let epoch = state.epoch;
                drop(state);

                let guard = RoundGuard { inner: self.inner.clone(), epoch, settled: false };
                debug!(epoch, "starting token refresh");
                let operation = perform();
                let timeout = self.inner.timeout;
                let task = tokio::spawn(async move {
                    let result = match tokio::time::timeout(timeout, operation).await {
                        Ok(result) => result,
                        Err(_) => Err(ClientError::RefreshTimeout { after: timeout }),
                    };
                    guard.finish(result);
                });

                let mut state = self.inner.lock();
                if state.epoch == epoch && state.in_progress {
                    state.task = Some(task.abort_handle());
                }
                (epoch, rx)
            }
        };

        wait_for_outcome(&self.inner, epoch, rx).await
    }

    /// Return to idle unconditionally.
    ///
    /// Callers still waiting on the discarded round receive
    /// [`ClientError::RefreshAbandoned`] and the refresh task is aborted.
    pub fn force_reset(&self) {
        let mut state = self.inner.lock();
        if !state.in_progress {
            return;
        }
        let epoch = state.epoch;
        state.in_progress = false;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        warn!(epoch, "token refresh forcibly reset");
        let _ = self
            .inner
            .outcomes
            .send(RefreshOutcome { epoch, result: Err(ClientError::RefreshAbandoned) });
    }
}

async fn wait_for_outcome(
    inner: &Inner,
    epoch: u64,
    mut rx: broadcast::Receiver<RefreshOutcome>,
) -> Result<AuthToken, ClientError> {
    loop {
        match rx.recv().await {
            Ok(outcome) if outcome.epoch == epoch => return outcome.result,
            // Outcomes arrive in epoch order, so a later epoch means ours
            // was skipped.
            Ok(outcome) if outcome.epoch > epoch => return Err(ClientError::RefreshAbandoned),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(epoch, skipped, "refresh waiter lagged behind outcomes");
                let state = inner.lock();
                if state.epoch != epoch || !state.in_progress {
                    return Err(ClientError::RefreshAbandoned);
                }
            }
            Err(RecvError::Closed) => return Err(ClientError::RefreshAbandoned),
        }
    }
}
