//! Session revocation outbox.
//! --------------------------
//! Credential changes and account deletion write a `SessionRevocation` record in
//! the same transaction as the change itself. The `OutboxDispatcher` delivers
//! pending records to a `SessionRevoker` after commit, at least once: a failed
//! delivery stays pending with its attempt count, error and next retry time.
//! Pending records carry an indexed `pending` marker that delivery removes, and
//! delivered records are pruned once they are older than the retention window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::serde::{ts_microseconds, ts_microseconds_option};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::ids::ObjectId;
use crate::storage::{
    compare_values, from_document, to_document, Filter, FindOptions, Sort, Store, StoreError, StoreResult, Transaction,
    Update, ID_FIELD,
};

use super::collections::{fields, REVOCATION_OUTBOX};
use super::model::{now, ts_value, AccountId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("session revocation failed: {0}")]
pub struct RevokeError(pub String);

/// External authority that invalidates every active session of an account.
pub trait SessionRevoker: Send + Sync {
    fn revoke_sessions<'a>(&'a self, account_id: &'a AccountId) -> BoxFuture<'a, Result<(), RevokeError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    CredentialChanged,
    AccountDeleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRevocation {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub account_id: AccountId,
    pub reason: RevocationReason,
    #[serde(with = "ts_microseconds")]
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    #[serde(with = "ts_microseconds")]
    pub next_attempt_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "ts_microseconds_option")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Present only while undelivered; the pending index covers exactly these.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
}

impl SessionRevocation {
    pub fn is_delivered(&self) -> bool { self.delivered_at.is_some() }
}

/// Record a pending revocation inside the caller's transaction.
pub fn enqueue(txn: &mut Transaction, account_id: &AccountId, reason: RevocationReason, at: DateTime<Utc>) -> StoreResult<ObjectId> {
    let rec = SessionRevocation {
        id: ObjectId::new(),
        account_id: *account_id,
        reason,
        created_at: at,
        attempts: 0,
        next_attempt_at: at,
        delivered_at: None,
        last_error: None,
        pending: true,
    };
    txn.insert(REVOCATION_OUTBOX, to_document(&rec)?)?;
    Ok(rec.id)
}

/// All revocation records for an account, oldest first.
pub fn records_for(store: &Store, account_id: &AccountId) -> StoreResult<Vec<SessionRevocation>> {
    let opts = FindOptions::default().sort(Sort::asc(fields::CREATED_AT));
    store.find(REVOCATION_OUTBOX, &Filter::eq(fields::ACCOUNT_ID, account_id), &opts)?.into_iter().map(from_document).collect()
}

/// Wakes the dispatcher after a commit that enqueued work.
#[derive(Clone, Default)]
pub struct OutboxSignal(Arc<Notify>);

impl OutboxSignal {
    pub fn new() -> Self { Self::default() }
    pub fn notify(&self) { self.0.notify_one(); }
    pub async fn notified(&self) { self.0.notified().await }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxSettings {
    /// Poll interval when nothing wakes the dispatcher.
    #[serde(default = "OutboxSettings::default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "OutboxSettings::default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "OutboxSettings::default_retry_initial_ms")]
    pub retry_initial_ms: u64,
    #[serde(default = "OutboxSettings::default_retry_max_ms")]
    pub retry_max_ms: u64,
    /// How long delivered records are kept before pruning.
    #[serde(default = "OutboxSettings::default_retention_ms")]
    pub retention_ms: u64,
    #[serde(default = "OutboxSettings::default_prune_interval_ms")]
    pub prune_interval_ms: u64,
}

impl OutboxSettings {
    fn default_interval_ms() -> u64 { 1_000 }
    fn default_batch_size() -> usize { 64 }
    fn default_retry_initial_ms() -> u64 { 500 }
    fn default_retry_max_ms() -> u64 { 60_000 }
    fn default_retention_ms() -> u64 { 24 * 60 * 60 * 1_000 }
    fn default_prune_interval_ms() -> u64 { 60_000 }

    /// Redelivery schedule: the n-th delay applies after the n-th failed attempt.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.retry_initial_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_ms))
            .with_factor(2.0)
            .with_max_times(usize::MAX)
    }

    pub(crate) fn delay_after(&self, attempts: u32) -> Duration {
        // The schedule has reached its cap well before 64 steps.
        let step = attempts.saturating_sub(1).min(64) as usize;
        self.backoff().build().nth(step).unwrap_or(Duration::from_millis(self.retry_max_ms))
    }
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval_ms(),
            batch_size: Self::default_batch_size(),
            retry_initial_ms: Self::default_retry_initial_ms(),
            retry_max_ms: Self::default_retry_max_ms(),
            retention_ms: Self::default_retention_ms(),
            prune_interval_ms: Self::default_prune_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct OutboxDispatcher {
    store: Store,
    revoker: Arc<dyn SessionRevoker>,
    signal: OutboxSignal,
    settings: OutboxSettings,
}

impl OutboxDispatcher {
    pub fn new(store: Store, revoker: Arc<dyn SessionRevoker>, signal: OutboxSignal, settings: OutboxSettings) -> Self {
        Self { store, revoker, signal, settings }
    }

    /// Records that are undelivered and due, oldest first.
    pub fn due(&self, at: DateTime<Utc>) -> StoreResult<Vec<SessionRevocation>> {
        let pending = self.store.find(REVOCATION_OUTBOX, &pending_filter(), &FindOptions::default())?;
        let cutoff = ts_value(at);
        let mut due: Vec<_> = pending
            .into_iter()
            .filter(|d| compare_values(d.get(fields::NEXT_ATTEMPT_AT), Some(&cutoff)).is_le())
            .collect();
        let by_created = Sort::asc(fields::CREATED_AT);
        due.sort_by(|a, b| by_created.compare(a, b));
        due.truncate(self.settings.batch_size);
        due.into_iter().map(from_document).collect()
    }

    /// One delivery pass over the due records.
    pub async fn dispatch_pending(&self) -> StoreResult<DispatchReport> {
        let mut report = DispatchReport::default();
        for rec in self.due(now())? {
            match self.revoker.revoke_sessions(&rec.account_id).await {
                Ok(()) => {
                    self.mark_delivered(&rec).await?;
                    report.delivered += 1;
                    info!(target: "accountd::outbox", account = %rec.account_id, reason = ?rec.reason, "sessions revoked");
                }
                Err(e) => {
                    let attempts = rec.attempts + 1;
                    let delay = self.settings.delay_after(attempts);
                    self.mark_failed(&rec, attempts, &e, delay).await?;
                    report.failed += 1;
                    warn!(
                        target: "accountd::outbox",
                        account = %rec.account_id,
                        attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "session revocation failed; will retry"
                    );
                }
            }
        }
        Ok(report)
    }

    async fn mark_delivered(&self, rec: &SessionRevocation) -> StoreResult<()> {
        let at = now();
        let update = Update::new()
            .set(fields::DELIVERED_AT, ts_value(at))
            .set(fields::ATTEMPTS, rec.attempts + 1)
            .unset(fields::LAST_ERROR)
            .unset(fields::PENDING);
        self.store
            .run_transaction(None, |txn| -> Result<(), StoreError> {
                txn.update_one(REVOCATION_OUTBOX, &undelivered(rec), &update)?;
                Ok(())
            })
            .await
    }

    async fn mark_failed(&self, rec: &SessionRevocation, attempts: u32, err: &RevokeError, delay: Duration) -> StoreResult<()> {
        let next = now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
        let update = Update::new()
            .set(fields::ATTEMPTS, attempts)
            .set(fields::LAST_ERROR, err.0.clone())
            .set(fields::NEXT_ATTEMPT_AT, ts_value(next));
        self.store
            .run_transaction(None, |txn| -> Result<(), StoreError> {
                txn.update_one(REVOCATION_OUTBOX, &undelivered(rec), &update)?;
                Ok(())
            })
            .await
    }

    /// Delete delivered records whose delivery time is at or before `cutoff`.
    /// Returns the number removed.
    pub async fn prune_delivered(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let limit = ts_value(cutoff);
        let expired: Vec<String> = self
            .store
            .find(REVOCATION_OUTBOX, &Filter::exists(fields::DELIVERED_AT), &FindOptions::default())?
            .into_iter()
            .filter(|d| compare_values(d.get(fields::DELIVERED_AT), Some(&limit)).is_le())
            .filter_map(|d| d.get(ID_FIELD).and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        let removed = self
            .store
            .run_transaction(None, |txn| -> Result<usize, StoreError> {
                let mut n = 0;
                for id in &expired {
                    n += txn.delete_many(REVOCATION_OUTBOX, &Filter::id(id.clone()).and(Filter::exists(fields::DELIVERED_AT)))?;
                }
                Ok(n)
            })
            .await?;
        debug!(target: "accountd::outbox", removed, "pruned delivered revocations");
        Ok(removed)
    }

    fn retention_cutoff(&self) -> DateTime<Utc> {
        let keep = i64::try_from(self.settings.retention_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .unwrap_or(chrono::Duration::MAX);
        now().checked_sub_signed(keep).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Dispatch until `shutdown` flips to true, waking early on new records.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_millis(self.settings.interval_ms.max(1));
        let prune_every = Duration::from_millis(self.settings.prune_interval_ms.max(1));
        let mut last_prune = Instant::now();
        info!(target: "accountd::outbox", interval_ms = interval.as_millis() as u64, "outbox dispatcher started");
        loop {
            if *shutdown.borrow() { break; }
            match self.dispatch_pending().await {
                Ok(r) if r.delivered + r.failed > 0 => {
                    debug!(target: "accountd::outbox", delivered = r.delivered, failed = r.failed, "dispatch pass");
                }
                Ok(_) => {}
                Err(e) => warn!(target: "accountd::outbox", error = %e, "dispatch pass failed"),
            }
            if last_prune.elapsed() >= prune_every {
                last_prune = Instant::now();
                if let Err(e) = self.prune_delivered(self.retention_cutoff()).await {
                    warn!(target: "accountd::outbox", error = %e, "outbox prune failed");
                }
            }
            tokio::select! {
                _ = self.signal.notified() => {}
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => { if changed.is_err() { break; } }
            }
        }
        info!(target: "accountd::outbox", "outbox dispatcher stopped");
    }
}

fn pending_filter() -> Filter { Filter::eq(fields::PENDING, true) }

fn undelivered(rec: &SessionRevocation) -> Filter {
    Filter::id(rec.id.to_hex()).and(pending_filter())
}
