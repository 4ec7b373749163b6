//! Account repository: one atomic operation per use case.
//!
//! Each mutation is exactly one `run_transaction` that writes the profile change,
//! its audit entry, any primary-email flip and any revocation outbox record
//! together. Reads go straight to committed state.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::identity::RequestContext;
use crate::ids::ObjectId;
use crate::storage::{from_document, to_document, Filter, FindOptions, Projection, Sort, Store, Transaction, Update};

use super::audit;
use super::collections::{fields, ACCOUNTS, EMAILS, PHONES, SHARED_IDS};
use super::error::{AccountError, AccountResult};
use super::model::{
    now, ts_value, Account, AccountId, CredentialLogEntry, EmailIdentifier, FullProfile, NewAccount, PhoneIdentifier,
    Profile, ProfilePatch, SharedIdentifier, UsernameLogEntry,
};
use super::outbox::{self, OutboxSignal, RevocationReason};
use super::primary_email::{self, Promotion};
use super::resolver::{AccountRef, AccountView, CredentialView, IdentifierResolver, UsernameView};

#[derive(Clone)]
pub struct AccountRepository {
    store: Store,
    resolver: IdentifierResolver,
    signal: OutboxSignal,
}

fn require_live<V: AccountView>(txn: &mut Transaction, id: &AccountId) -> AccountResult<V> {
    IdentifierResolver::find_by_account_id_in::<V>(txn, id)?.ok_or(AccountError::AccountNotFound)
}

fn active_for(account_id: &AccountId) -> Filter {
    Filter::eq(fields::ACCOUNT_ID, account_id).and(Filter::missing(fields::REVOKED_AT))
}

impl AccountRepository {
    pub fn new(store: Store, signal: OutboxSignal) -> Self {
        let resolver = IdentifierResolver::new(store.clone());
        Self { store, resolver, signal }
    }

    pub fn store(&self) -> &Store { &self.store }

    pub fn resolver(&self) -> &IdentifierResolver { &self.resolver }

    fn deadline(ctx: &RequestContext) -> Option<Instant> { ctx.deadline }

    /// Create the account with its shared id, primary email, phone and the first
    /// entry of both logs. A taken username surfaces from the unique index.
    pub async fn create_account(&self, ctx: &RequestContext, new: &NewAccount, credential_hash: &str) -> AccountResult<AccountId> {
        let id = self
            .store
            .run_transaction(Self::deadline(ctx), |txn| -> AccountResult<AccountId> {
                let at = now();
                let account = Account {
                    id: ObjectId::new(),
                    username: new.username.clone(),
                    first_name: new.first_name.clone(),
                    last_name: new.last_name.clone(),
                    credential_hash: credential_hash.to_string(),
                    birth_date: new.birth_date,
                    joined_at: at,
                    deleted_at: None,
                };
                txn.insert(ACCOUNTS, to_document(&account)?)?;
                let shared = SharedIdentifier { id: ObjectId::new(), account_id: account.id, uuid: Uuid::new_v4() };
                txn.insert(SHARED_IDS, to_document(&shared)?)?;
                primary_email::initial_primary(txn, &account.id, &new.email, at)?;
                insert_phone(txn, &account.id, &new.phone, at)?;
                audit::append_username(txn, &account.id, &new.username, at)?;
                audit::append_credential(txn, &account.id, credential_hash, at)?;
                Ok(account.id)
            })
            .await
            .map_err(|e| e.for_username(&new.username))?;
        info!(target: "accountd::accounts", request_id = ctx.request_id(), account = %id, username = %new.username, "account created");
        Ok(id)
    }

    pub async fn change_username(&self, ctx: &RequestContext, account_id: &AccountId, username: &str) -> AccountResult<()> {
        self.require_account(account_id)?;
        // Cheap pre-check for the common case; the unique index stays authoritative.
        if let Some(holder) = self.resolver.find_by_username::<AccountRef>(username)? {
            if holder.id != *account_id {
                return Err(AccountError::DuplicateUsername(username.to_string()));
            }
        }
        let changed = self
            .store
            .run_transaction(Self::deadline(ctx), |txn| -> AccountResult<bool> {
                let current: UsernameView = require_live(txn, account_id)?;
                if current.username == username {
                    return Ok(false);
                }
                let at = now();
                txn.update_one(ACCOUNTS, &Filter::id(account_id.to_hex()), &Update::new().set(fields::USERNAME, username))?;
                audit::append_username(txn, account_id, username, at)?;
                Ok(true)
            })
            .await
            .map_err(|e| e.for_username(username))?;
        if changed {
            info!(target: "accountd::accounts", request_id = ctx.request_id(), account = %account_id, username, "username changed");
        }
        Ok(())
    }

    /// Replace the stored credential hash. The old credential is not re-verified
    /// here; sessions are revoked through the outbox after commit.
    pub async fn change_credential(&self, ctx: &RequestContext, account_id: &AccountId, credential_hash: &str) -> AccountResult<()> {
        self.store
            .run_transaction(Self::deadline(ctx), |txn| -> AccountResult<()> {
                let current: CredentialView = require_live(txn, account_id)?;
                if current.credential_hash == credential_hash {
                    return Err(AccountError::SameCredential);
                }
                let at = now();
                txn.update_one(
                    ACCOUNTS,
                    &Filter::id(account_id.to_hex()),
                    &Update::new().set(fields::CREDENTIAL_HASH, credential_hash),
                )?;
                audit::append_credential(txn, account_id, credential_hash, at)?;
                outbox::enqueue(txn, account_id, RevocationReason::CredentialChanged, at)?;
                Ok(())
            })
            .await?;
        self.signal.notify();
        info!(target: "accountd::accounts", request_id = ctx.request_id(), account = %account_id, "credential changed");
        Ok(())
    }

    /// Revoke the active phone (if any) and make `phone` the active one.
    pub async fn rotate_phone_number(&self, ctx: &RequestContext, account_id: &AccountId, phone: &str) -> AccountResult<()> {
        let revoked = self
            .store
            .run_transaction(Self::deadline(ctx), |txn| -> AccountResult<usize> {
                require_live::<AccountRef>(txn, account_id)?;
                let at = now();
                let n = txn.update_many(PHONES, &active_for(account_id), &Update::new().set(fields::REVOKED_AT, ts_value(at)))?;
                insert_phone(txn, account_id, phone, at)?;
                Ok(n)
            })
            .await?;
        info!(target: "accountd::accounts", request_id = ctx.request_id(), account = %account_id, revoked, "phone number rotated");
        Ok(())
    }

    /// Add a non-primary active email.
    pub async fn add_email(&self, ctx: &RequestContext, account_id: &AccountId, email: &str) -> AccountResult<ObjectId> {
        let id = self
            .store
            .run_transaction(Self::deadline(ctx), |txn| -> AccountResult<ObjectId> {
                require_live::<AccountRef>(txn, account_id)?;
                if txn.find_one(EMAILS, &primary_email::active_email(account_id, email), &Projection::Fields(Vec::new()))?.is_some() {
                    return Err(AccountError::EmailAlreadyExists(email.to_string()));
                }
                let row = EmailIdentifier {
                    id: ObjectId::new(),
                    account_id: *account_id,
                    email: email.to_string(),
                    assigned_at: now(),
                    revoked_at: None,
                    is_primary: false,
                };
                txn.insert(EMAILS, to_document(&row)?)?;
                Ok(row.id)
            })
            .await?;
        info!(target: "accountd::accounts", request_id = ctx.request_id(), account = %account_id, email, "email added");
        Ok(id)
    }

    pub async fn change_primary_email(&self, ctx: &RequestContext, account_id: &AccountId, email: &str) -> AccountResult<()> {
        let outcome = self
            .store
            .run_transaction(Self::deadline(ctx), |txn| -> AccountResult<Promotion> {
                require_live::<AccountRef>(txn, account_id)?;
                primary_email::promote(txn, account_id, email)
            })
            .await?;
        match outcome {
            Promotion::Promoted => {
                info!(target: "accountd::accounts", request_id = ctx.request_id(), account = %account_id, email, "primary email changed")
            }
            Promotion::AlreadyPrimary => {
                debug!(target: "accountd::accounts", request_id = ctx.request_id(), account = %account_id, email, "email already primary")
            }
        }
        Ok(())
    }

    /// Revoke an active, non-primary email.
    pub async fn delete_email(&self, ctx: &RequestContext, account_id: &AccountId, email: &str) -> AccountResult<()> {
        self.store
            .run_transaction(Self::deadline(ctx), |txn| -> AccountResult<()> {
                require_live::<AccountRef>(txn, account_id)?;
                let row: EmailIdentifier = match txn.find_one(EMAILS, &primary_email::active_email(account_id, email), &Projection::All)? {
                    Some(doc) => from_document(doc)?,
                    None => return Err(AccountError::EmailNotFound(email.to_string())),
                };
                if row.is_primary {
                    return Err(AccountError::CannotDeletePrimaryEmail(email.to_string()));
                }
                txn.update_one(EMAILS, &Filter::id(row.id.to_hex()), &Update::new().set(fields::REVOKED_AT, ts_value(now())))?;
                Ok(())
            })
            .await?;
        info!(target: "accountd::accounts", request_id = ctx.request_id(), account = %account_id, email, "email deleted");
        Ok(())
    }

    /// Mark the account deleted. Child rows and logs are left as they are.
    pub async fn soft_delete_account(&self, ctx: &RequestContext, account_id: &AccountId) -> AccountResult<()> {
        self.store
            .run_transaction(Self::deadline(ctx), |txn| -> AccountResult<()> {
                require_live::<AccountRef>(txn, account_id)?;
                let at = now();
                txn.update_one(ACCOUNTS, &Filter::id(account_id.to_hex()), &Update::new().set(fields::DELETED_AT, ts_value(at)))?;
                outbox::enqueue(txn, account_id, RevocationReason::AccountDeleted, at)?;
                Ok(())
            })
            .await?;
        self.signal.notify();
        info!(target: "accountd::accounts", request_id = ctx.request_id(), account = %account_id, "account deleted");
        Ok(())
    }

    /// Patch first name, last name and birth date. An empty patch only checks
    /// that the account exists.
    pub async fn update_profile(&self, ctx: &RequestContext, account_id: &AccountId, patch: &ProfilePatch) -> AccountResult<()> {
        let update = patch.to_update();
        self.store
            .run_transaction(Self::deadline(ctx), |txn| -> AccountResult<()> {
                require_live::<AccountRef>(txn, account_id)?;
                if !update.is_empty() {
                    txn.update_one(ACCOUNTS, &Filter::id(account_id.to_hex()), &update)?;
                }
                Ok(())
            })
            .await?;
        debug!(target: "accountd::accounts", request_id = ctx.request_id(), account = %account_id, ops = update.ops().len(), "profile updated");
        Ok(())
    }

    /// Fails with `AccountNotFound` unless the account exists and is not soft-deleted.
    fn require_account(&self, account_id: &AccountId) -> AccountResult<()> {
        self.resolver.find_by_account_id::<AccountRef>(account_id)?.ok_or(AccountError::AccountNotFound)?;
        Ok(())
    }

    pub fn get_profile(&self, account_id: &AccountId) -> AccountResult<Profile> {
        self.resolver.find_by_account_id::<Profile>(account_id)?.ok_or(AccountError::AccountNotFound)
    }

    /// Profile, active emails and active phone from independent reads.
    pub fn get_full_profile(&self, account_id: &AccountId) -> AccountResult<FullProfile> {
        let profile = self.get_profile(account_id)?;
        let emails = self.get_active_emails(account_id)?;
        let phone = self.get_phone_number(account_id)?;
        Ok(FullProfile { profile, emails, phone })
    }

    pub fn username_exists(&self, username: &str) -> AccountResult<bool> {
        Ok(self.resolver.find_by_username::<AccountRef>(username)?.is_some())
    }

    pub fn get_account_id_by_username(&self, username: &str) -> AccountResult<AccountId> {
        Ok(self.resolver.find_by_username::<AccountRef>(username)?.ok_or(AccountError::AccountNotFound)?.id)
    }

    pub fn get_username_by_account_id(&self, account_id: &AccountId) -> AccountResult<String> {
        Ok(self.resolver.find_by_account_id::<UsernameView>(account_id)?.ok_or(AccountError::AccountNotFound)?.username)
    }

    pub fn get_account_id_by_shared_id(&self, shared: &Uuid) -> AccountResult<AccountId> {
        Ok(self.resolver.find_by_shared_id::<AccountRef>(shared)?.ok_or(AccountError::AccountNotFound)?.id)
    }

    pub fn get_shared_id_by_account_id(&self, account_id: &AccountId) -> AccountResult<Uuid> {
        self.require_account(account_id)?;
        let doc = self
            .store
            .find_one(SHARED_IDS, &Filter::eq(fields::ACCOUNT_ID, account_id), &Projection::All)?
            .ok_or(AccountError::AccountNotFound)?;
        let link: SharedIdentifier = from_document(doc)?;
        Ok(link.uuid)
    }

    pub fn get_credential_hash(&self, account_id: &AccountId) -> AccountResult<String> {
        Ok(self.resolver.find_by_account_id::<CredentialView>(account_id)?.ok_or(AccountError::AccountNotFound)?.credential_hash)
    }

    pub fn get_active_emails(&self, account_id: &AccountId) -> AccountResult<Vec<EmailIdentifier>> {
        self.require_account(account_id)?;
        let opts = FindOptions::default().sort(Sort::asc(fields::ASSIGNED_AT));
        Ok(self
            .store
            .find(EMAILS, &active_for(account_id), &opts)?
            .into_iter()
            .map(from_document)
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_primary_email(&self, account_id: &AccountId) -> AccountResult<Option<EmailIdentifier>> {
        self.require_account(account_id)?;
        let doc = self.store.find_one(EMAILS, &primary_email::active_primary(account_id), &Projection::All)?;
        Ok(doc.map(from_document).transpose()?)
    }

    /// Most recently assigned active phone, if any.
    pub fn get_phone_number(&self, account_id: &AccountId) -> AccountResult<Option<PhoneIdentifier>> {
        self.require_account(account_id)?;
        let opts = FindOptions::default().sort(Sort::desc(fields::ASSIGNED_AT)).limit(1);
        let doc = self.store.find(PHONES, &active_for(account_id), &opts)?.into_iter().next();
        Ok(doc.map(from_document).transpose()?)
    }

    /// Every phone row ever assigned, oldest first.
    pub fn phone_history(&self, account_id: &AccountId) -> AccountResult<Vec<PhoneIdentifier>> {
        let opts = FindOptions::default().sort(Sort::asc(fields::ASSIGNED_AT));
        Ok(self
            .store
            .find(PHONES, &Filter::eq(fields::ACCOUNT_ID, account_id), &opts)?
            .into_iter()
            .map(from_document)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Every email row ever assigned, revoked ones included.
    pub fn email_history(&self, account_id: &AccountId) -> AccountResult<Vec<EmailIdentifier>> {
        let opts = FindOptions::default().sort(Sort::asc(fields::ASSIGNED_AT));
        Ok(self
            .store
            .find(EMAILS, &Filter::eq(fields::ACCOUNT_ID, account_id), &opts)?
            .into_iter()
            .map(from_document)
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub fn username_history(&self, account_id: &AccountId) -> AccountResult<Vec<UsernameLogEntry>> {
        Ok(audit::username_history(&self.store, account_id)?)
    }

    pub fn credential_history(&self, account_id: &AccountId) -> AccountResult<Vec<CredentialLogEntry>> {
        Ok(audit::credential_history(&self.store, account_id)?)
    }
}

fn insert_phone(txn: &mut Transaction, account_id: &AccountId, phone: &str, at: DateTime<Utc>) -> AccountResult<ObjectId> {
    let row = PhoneIdentifier { id: ObjectId::new(), account_id: *account_id, phone: phone.to_string(), assigned_at: at, revoked_at: None };
    txn.insert(PHONES, to_document(&row)?)?;
    Ok(row.id)
}
