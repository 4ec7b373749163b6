use std::future;
use std::time::{Duration, Instant};

use backon::Retryable;
use tracing::{debug, warn};

use super::error::StoreError;
use super::txn::Transaction;
use super::Store;

impl Store {
    /// Run `body` atomically, retrying the whole body on transient conflicts.
    ///
    /// The body may run several times and must not have side effects outside the
    /// transaction handle. Any error it returns aborts the attempt and is surfaced
    /// unchanged. The whole call, retries included, is bounded by the configured
    /// ceiling and by `deadline` when that is earlier; on expiry nothing is written
    /// and the error converts from `StoreError::DeadlineExceeded`.
    pub async fn run_transaction<T, E, F>(&self, deadline: Option<Instant>, mut body: F) -> Result<T, E>
    where
        F: FnMut(&mut Transaction) -> Result<T, E>,
        E: From<StoreError>,
    {
        let policy = &self.settings.transactions;
        let ceiling = Instant::now() + policy.timeout();
        let deadline = deadline.map(|d| d.min(ceiling)).unwrap_or(ceiling);
        let mut attempt: u32 = 0;

        // Body errors ride in the Ok side so only store errors reach the retry predicate.
        let once = || {
            attempt += 1;
            future::ready(self.attempt_once(deadline, attempt, &mut body))
        };
        let outcome = once
            .retry(policy.backoff())
            .sleep(move |pause: Duration| tokio::time::sleep(pause.min(deadline.saturating_duration_since(Instant::now()))))
            .when(StoreError::is_transient)
            .notify(|e: &StoreError, pause: Duration| {
                debug!(target: "accountd::storage", backoff_ms = pause.as_millis() as u64, error = %e, "retrying transaction");
            })
            .await;
        match outcome {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        }
    }

    fn attempt_once<T, E, F>(&self, deadline: Instant, attempt: u32, body: &mut F) -> Result<Result<T, E>, StoreError>
    where
        F: FnMut(&mut Transaction) -> Result<T, E>,
    {
        if Instant::now() >= deadline {
            warn!(target: "accountd::storage", attempts = attempt - 1, "transaction deadline exceeded");
            return Err(StoreError::DeadlineExceeded { attempts: attempt - 1 });
        }
        let mut txn = self.begin();
        let value = match body(&mut txn) {
            Ok(v) => v,
            Err(e) => return Ok(Err(e)),
        };
        match txn.commit(Some(deadline)) {
            Ok(()) => Ok(Ok(value)),
            Err(StoreError::DeadlineExceeded { .. }) => {
                warn!(target: "accountd::storage", attempts = attempt, "transaction deadline exceeded at commit");
                Err(StoreError::DeadlineExceeded { attempts: attempt })
            }
            Err(e) => Err(e),
        }
    }
}
