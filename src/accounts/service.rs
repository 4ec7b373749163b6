//! Use cases that need the credential hasher in front of the repository:
//! sign-up, credential checks, password change and confirmed deletion.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::identity::RequestContext;
use crate::security::CredentialHasher;

use super::error::{AccountError, AccountResult};
use super::model::{AccountId, NewAccount};
use super::repository::AccountRepository;
use super::resolver::CredentialView;

/// Sign-up request as received from the transport layer.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: Option<NaiveDate>,
    pub email: String,
    pub phone: String,
}

#[derive(Clone)]
pub struct AccountService {
    repo: AccountRepository,
    hasher: Arc<dyn CredentialHasher>,
}

impl AccountService {
    pub fn new(repo: AccountRepository, hasher: Arc<dyn CredentialHasher>) -> Self { Self { repo, hasher } }

    pub fn repository(&self) -> &AccountRepository { &self.repo }

    pub async fn sign_up(&self, ctx: &RequestContext, req: SignUp) -> AccountResult<AccountId> {
        let hash = self.hasher.hash(&req.password)?;
        let new = NewAccount {
            username: req.username,
            first_name: req.first_name,
            last_name: req.last_name,
            birth_date: req.birth_date,
            email: req.email,
            phone: req.phone,
        };
        self.repo.create_account(ctx, &new, &hash).await
    }

    /// True when `password` matches the stored credential of `username`.
    pub fn is_password_correct(&self, username: &str, password: &str) -> AccountResult<bool> {
        let view: CredentialView = self.repo.resolver().find_by_username(username)?.ok_or(AccountError::AccountNotFound)?;
        Ok(self.hasher.verify(&view.credential_hash, password))
    }

    /// Verify the current password, then store a hash of the new one.
    pub async fn change_password(&self, ctx: &RequestContext, account_id: &AccountId, old: &str, new: &str) -> AccountResult<()> {
        let current = self.repo.get_credential_hash(account_id)?;
        if !self.hasher.verify(&current, old) {
            warn!(target: "accountd::accounts", request_id = ctx.request_id(), account = %account_id, "password change rejected: wrong current password");
            return Err(AccountError::CredentialMismatch);
        }
        if self.hasher.verify(&current, new) {
            return Err(AccountError::SameCredential);
        }
        let hash = self.hasher.hash(new)?;
        self.repo.change_credential(ctx, account_id, &hash).await
    }

    /// Soft-delete after confirming the password.
    pub async fn delete_account(&self, ctx: &RequestContext, account_id: &AccountId, password: &str) -> AccountResult<()> {
        let current = self.repo.get_credential_hash(account_id)?;
        if !self.hasher.verify(&current, password) {
            warn!(target: "accountd::accounts", request_id = ctx.request_id(), account = %account_id, "deletion rejected: wrong password");
            return Err(AccountError::CredentialMismatch);
        }
        self.repo.soft_delete_account(ctx, account_id).await?;
        info!(target: "accountd::accounts", request_id = ctx.request_id(), account = %account_id, "account deleted on request");
        Ok(())
    }
}
