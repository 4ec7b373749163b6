//! The only code that sets `is_primary`.
//!
//! Invariant: an account with at least one active email has exactly one active
//! email flagged primary. Account creation establishes it via `initial_primary`;
//! `promote` moves the flag inside the caller's transaction.

use chrono::{DateTime, Utc};

use crate::ids::ObjectId;
use crate::storage::{from_document, to_document, Filter, Projection, Transaction, Update};

use super::collections::{fields, EMAILS};
use super::error::{AccountError, AccountResult};
use super::model::{AccountId, EmailIdentifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    Promoted,
    AlreadyPrimary,
}

pub(crate) fn active_email(account_id: &AccountId, email: &str) -> Filter {
    Filter::eq(fields::ACCOUNT_ID, account_id)
        .and(Filter::eq(fields::EMAIL, email))
        .and(Filter::missing(fields::REVOKED_AT))
}

pub(crate) fn active_primary(account_id: &AccountId) -> Filter {
    Filter::eq(fields::ACCOUNT_ID, account_id)
        .and(Filter::eq(fields::IS_PRIMARY, true))
        .and(Filter::missing(fields::REVOKED_AT))
}

/// First email of a new account; primary from the start.
pub fn initial_primary(txn: &mut Transaction, account_id: &AccountId, email: &str, at: DateTime<Utc>) -> AccountResult<ObjectId> {
    let row = EmailIdentifier {
        id: ObjectId::new(),
        account_id: *account_id,
        email: email.to_string(),
        assigned_at: at,
        revoked_at: None,
        is_primary: true,
    };
    txn.insert(EMAILS, to_document(&row)?)?;
    Ok(row.id)
}

/// Make `email` the account's primary. The target must be an active row; the
/// current primary is demoted in the same transaction. Nothing changes when the
/// target is missing.
pub fn promote(txn: &mut Transaction, account_id: &AccountId, email: &str) -> AccountResult<Promotion> {
    let target: EmailIdentifier = match txn.find_one(EMAILS, &active_email(account_id, email), &Projection::All)? {
        Some(doc) => from_document(doc)?,
        None => return Err(AccountError::EmailNotFound(email.to_string())),
    };
    if target.is_primary {
        return Ok(Promotion::AlreadyPrimary);
    }
    txn.update_many(EMAILS, &active_primary(account_id), &Update::new().set(fields::IS_PRIMARY, false))?;
    txn.update_one(EMAILS, &Filter::id(target.id.to_hex()), &Update::new().set(fields::IS_PRIMARY, true))?;
    Ok(Promotion::Promoted)
}
