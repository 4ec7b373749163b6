//! Session revocation through the outbox: the account change commits even when
//! the session authority is down, and delivery catches up later.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::future::{self, BoxFuture};
use tokio::sync::watch;

use accountd::accounts::{
    revocation_records, AccountId, AccountRepository, NewAccount, OutboxDispatcher, OutboxSettings, OutboxSignal,
    RevokeError, SessionRevoker, ensure_schema,
};
use accountd::config::AppConfig;
use accountd::identity::{RequestContext, SessionManager};
use accountd::runtime::App;
use accountd::security::Argon2Hasher;
use accountd::storage::{Store, StoreSettings};

/// Session authority that can be switched off.
struct Switchable {
    sessions: SessionManager,
    down: AtomicBool,
}

impl SessionRevoker for Switchable {
    fn revoke_sessions<'a>(&'a self, account_id: &'a AccountId) -> BoxFuture<'a, Result<(), RevokeError>> {
        if self.down.load(Ordering::SeqCst) {
            return Box::pin(future::ready(Err(RevokeError("session authority down".into()))));
        }
        self.sessions.revoke_account(account_id);
        Box::pin(future::ready(Ok(())))
    }
}

fn account() -> NewAccount {
    NewAccount {
        username: "ana".into(),
        first_name: "Ana".into(),
        last_name: "Silva".into(),
        birth_date: None,
        email: "a@x.com".into(),
        phone: "555".into(),
    }
}

#[tokio::test]
async fn credential_change_commits_while_authority_is_down() -> Result<()> {
    let store = Store::in_memory(StoreSettings::default());
    ensure_schema(&store)?;
    let signal = OutboxSignal::new();
    let repo = AccountRepository::new(store.clone(), signal.clone());
    let authority = Arc::new(Switchable { sessions: SessionManager::new(Duration::from_secs(60)), down: AtomicBool::new(true) });
    let settings = OutboxSettings { retry_initial_ms: 0, ..OutboxSettings::default() };
    let dispatcher = OutboxDispatcher::new(store.clone(), authority.clone(), signal, settings);

    let ctx = RequestContext::new("t-outbox");
    let id = repo.create_account(&ctx, &account(), "h1").await?;
    let s1 = authority.sessions.issue(id)?;
    let s2 = authority.sessions.issue(id)?;
    assert_eq!(authority.sessions.active_sessions(&id), 2);

    repo.change_credential(&ctx, &id, "h2").await?;
    assert_eq!(repo.get_credential_hash(&id)?, "h2");

    let report = dispatcher.dispatch_pending().await?;
    assert_eq!(report.failed, 1);
    assert_eq!(authority.sessions.active_sessions(&id), 2);
    let pending = revocation_records(&store, &id)?;
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].is_delivered());
    assert_eq!(pending[0].attempts, 1);

    authority.down.store(false, Ordering::SeqCst);
    let report = dispatcher.dispatch_pending().await?;
    assert_eq!(report.delivered, 1);
    assert_eq!(authority.sessions.active_sessions(&id), 0);
    assert!(authority.sessions.validate(&s1.token).is_none());
    assert!(authority.sessions.validate(&s2.token).is_none());
    assert!(revocation_records(&store, &id)?[0].is_delivered());
    Ok(())
}

#[tokio::test]
async fn running_app_revokes_sessions_after_delete() -> Result<()> {
    let mut config = AppConfig::default();
    config.outbox.interval_ms = 20;
    let store = Store::in_memory(config.store.clone());
    let app = App::assemble(config, store, Arc::new(Argon2Hasher::with_params(8, 1, 1)?))?;

    let ctx = RequestContext::default();
    let id = app.repository.create_account(&ctx, &account(), "h1").await?;
    let session = app.sessions.issue(id)?;
    assert_eq!(app.sessions.validate(&session.token), Some(id));

    let (tx, rx) = watch::channel(false);
    let handles = app.spawn_background(rx);
    app.repository.soft_delete_account(&ctx, &id).await?;

    let mut revoked = false;
    for _ in 0..100 {
        if app.sessions.validate(&session.token).is_none() {
            revoked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(revoked, "session still valid after account deletion");

    tx.send(true)?;
    for h in handles {
        h.await?;
    }
    let records = revocation_records(&app.store, &id)?;
    assert_eq!(records.len(), 1);
    assert!(records[0].is_delivered());
    Ok(())
}

#[tokio::test]
async fn run_until_stops_cleanly() -> Result<()> {
    let store = Store::in_memory(StoreSettings::default());
    let app = App::assemble(AppConfig::default(), store, Arc::new(Argon2Hasher::with_params(8, 1, 1)?))?;
    app.run_until(tokio::time::sleep(Duration::from_millis(30))).await
}
