//! Append-only username and credential history.
//!
//! Entries are only ever written through a `Transaction`, so a log entry exists
//! if and only if the change it records was committed.

use chrono::{DateTime, Utc};

use crate::ids::ObjectId;
use crate::storage::{from_document, to_document, Filter, FindOptions, Sort, Store, StoreResult, Transaction};

use super::collections::{fields, CREDENTIAL_LOG, USERNAME_LOG};
use super::model::{AccountId, CredentialLogEntry, UsernameLogEntry};

pub fn append_username(txn: &mut Transaction, account_id: &AccountId, username: &str, at: DateTime<Utc>) -> StoreResult<ObjectId> {
    let entry = UsernameLogEntry { id: ObjectId::new(), account_id: *account_id, username: username.to_string(), assigned_at: at };
    txn.insert(USERNAME_LOG, to_document(&entry)?)?;
    Ok(entry.id)
}

pub fn append_credential(txn: &mut Transaction, account_id: &AccountId, credential_hash: &str, at: DateTime<Utc>) -> StoreResult<ObjectId> {
    let entry = CredentialLogEntry {
        id: ObjectId::new(),
        account_id: *account_id,
        credential_hash: credential_hash.to_string(),
        assigned_at: at,
    };
    txn.insert(CREDENTIAL_LOG, to_document(&entry)?)?;
    Ok(entry.id)
}

/// Oldest first. Readable for soft-deleted accounts too.
pub fn username_history(store: &Store, account_id: &AccountId) -> StoreResult<Vec<UsernameLogEntry>> {
    history(store, USERNAME_LOG, account_id)
}

pub fn credential_history(store: &Store, account_id: &AccountId) -> StoreResult<Vec<CredentialLogEntry>> {
    history(store, CREDENTIAL_LOG, account_id)
}

fn history<T: serde::de::DeserializeOwned>(store: &Store, collection: &str, account_id: &AccountId) -> StoreResult<Vec<T>> {
    let opts = FindOptions::default().sort(Sort::asc(fields::ASSIGNED_AT));
    store
        .find(collection, &Filter::eq(fields::ACCOUNT_ID, account_id), &opts)?
        .into_iter()
        .map(from_document)
        .collect()
}
