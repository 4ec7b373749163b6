use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use futures_util::future::{self, BoxFuture};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::error;

use crate::accounts::{AccountId, RevokeError, SessionRevoker};
use crate::tprintln;

pub type SessionToken = String;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no entropy available for session tokens: {0}")]
    Entropy(getrandom::Error),
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub token: SessionToken,
    pub account_id: AccountId,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

#[derive(Debug, Default)]
struct SessionTable {
    sessions: HashMap<SessionToken, Session>,
    by_account: HashMap<AccountId, HashSet<SessionToken>>,
    revoked: HashSet<SessionToken>,
}

fn gen_id() -> Result<String, SessionError> {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(SessionError::Entropy)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// In-process session authority. Clones share one session table.
#[derive(Clone)]
pub struct SessionManager {
    pub ttl: Duration,
    table: Arc<RwLock<SessionTable>>,
}

impl Default for SessionManager {
    fn default() -> Self { Self::new(Duration::from_secs(60 * 60)) }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self { Self { ttl, table: Arc::new(RwLock::new(SessionTable::default())) } }

    /// Issue a session, refusing when the OS random source fails.
    pub fn issue(&self, account_id: AccountId) -> Result<Session, SessionError> {
        let ids = gen_id().and_then(|sid| Ok((sid, gen_id()?)));
        let (session_id, token) = match ids {
            Ok(pair) => pair,
            Err(e) => {
                error!(target: "accountd::sessions", account = %account_id, error = %e, "refusing to issue session");
                return Err(e);
            }
        };
        let now = Instant::now();
        let sess = Session {
            session_id,
            token,
            account_id,
            issued_at: now,
            expires_at: now + self.ttl,
        };
        {
            let mut t = self.table.write();
            t.sessions.insert(sess.token.clone(), sess.clone());
            t.by_account.entry(account_id).or_default().insert(sess.token.clone());
        }
        tprintln!("session.issue account={} sid={} ttl_secs={}", account_id, sess.session_id, self.ttl.as_secs());
        Ok(sess)
    }

    pub fn validate(&self, token: &str) -> Option<AccountId> {
        let now = Instant::now();
        {
            let t = self.table.read();
            if t.revoked.contains(token) { return None; }
            match t.sessions.get(token) {
                Some(s) if s.expires_at > now => return Some(s.account_id),
                Some(_) => {}
                None => return None,
            }
        }
        // expired: drop it
        let mut t = self.table.write();
        if let Some(s) = t.sessions.remove(token) {
            if let Some(set) = t.by_account.get_mut(&s.account_id) { set.remove(token); }
        }
        None
    }

    pub fn logout(&self, token: &str) -> bool {
        let mut t = self.table.write();
        let Some(s) = t.sessions.remove(token) else { return false };
        if let Some(set) = t.by_account.get_mut(&s.account_id) { set.remove(token); }
        t.revoked.insert(token.to_string());
        true
    }

    /// Revoke every session of an account. Returns how many were live.
    pub fn revoke_account(&self, account_id: &AccountId) -> usize {
        let mut count = 0usize;
        let mut t = self.table.write();
        if let Some(tokens) = t.by_account.remove(account_id) {
            for tok in tokens {
                if t.sessions.remove(&tok).is_some() { count += 1; }
                t.revoked.insert(tok);
            }
        }
        tprintln!("session.revoke account={} count={}", account_id, count);
        count
    }

    pub fn active_sessions(&self, account_id: &AccountId) -> usize {
        let now = Instant::now();
        let t = self.table.read();
        t.by_account
            .get(account_id)
            .map(|set| set.iter().filter(|tok| t.sessions.get(*tok).map(|s| s.expires_at > now).unwrap_or(false)).count())
            .unwrap_or(0)
    }
}

impl SessionRevoker for SessionManager {
    fn revoke_sessions<'a>(&'a self, account_id: &'a AccountId) -> BoxFuture<'a, Result<(), RevokeError>> {
        self.revoke_account(account_id);
        Box::pin(future::ready(Ok(())))
    }
}
