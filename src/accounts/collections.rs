//! Persisted layout of the account aggregate: collection names, field names and
//! the indexes each collection carries.

use crate::storage::{Filter, IndexSpec, Store, StoreResult};

pub const ACCOUNTS: &str = "Account";
pub const EMAILS: &str = "EmailIdentifier";
pub const PHONES: &str = "PhoneIdentifier";
pub const SHARED_IDS: &str = "SharedIdentifier";
pub const USERNAME_LOG: &str = "UsernameLog";
pub const CREDENTIAL_LOG: &str = "CredentialLog";
pub const REVOCATION_OUTBOX: &str = "SessionRevocationOutbox";

/// Unique among accounts that are not soft-deleted.
pub const USERNAME_INDEX: &str = "account_username_live";
pub const SHARED_ID_INDEX: &str = "shared_identifier_uuid";
pub const OUTBOX_PENDING_INDEX: &str = "revocation_outbox_pending";

pub mod fields {
    pub const ID: &str = "_id";
    pub const USERNAME: &str = "username";
    pub const FIRST_NAME: &str = "first_name";
    pub const LAST_NAME: &str = "last_name";
    pub const BIRTH_DATE: &str = "birth_date";
    pub const CREDENTIAL_HASH: &str = "credential_hash";
    pub const DELETED_AT: &str = "deleted_at";
    pub const ACCOUNT_ID: &str = "account_id";
    pub const EMAIL: &str = "email";
    pub const PHONE: &str = "phone";
    pub const IS_PRIMARY: &str = "is_primary";
    pub const ASSIGNED_AT: &str = "assigned_at";
    pub const REVOKED_AT: &str = "revoked_at";
    pub const UUID: &str = "uuid";
    pub const CREATED_AT: &str = "created_at";
    pub const ATTEMPTS: &str = "attempts";
    pub const NEXT_ATTEMPT_AT: &str = "next_attempt_at";
    pub const DELIVERED_AT: &str = "delivered_at";
    pub const LAST_ERROR: &str = "last_error";
    pub const PENDING: &str = "pending";
}

fn by_account(collection: &str) -> IndexSpec {
    IndexSpec::new(format!("{}_account_id", collection.to_lowercase()), [fields::ACCOUNT_ID])
}

/// Create every collection and its indexes. Safe to call on a restored store.
pub fn ensure_schema(store: &Store) -> StoreResult<()> {
    store.ensure_collection(
        ACCOUNTS,
        &[IndexSpec::new(USERNAME_INDEX, [fields::USERNAME]).unique().partial(Filter::missing(fields::DELETED_AT))],
    )?;
    store.ensure_collection(
        SHARED_IDS,
        &[IndexSpec::new(SHARED_ID_INDEX, [fields::UUID]).unique(), by_account(SHARED_IDS)],
    )?;
    for c in [EMAILS, PHONES, USERNAME_LOG, CREDENTIAL_LOG] {
        store.ensure_collection(c, &[by_account(c)])?;
    }
    store.ensure_collection(
        REVOCATION_OUTBOX,
        &[by_account(REVOCATION_OUTBOX), IndexSpec::new(OUTBOX_PENDING_INDEX, [fields::PENDING])],
    )?;
    Ok(())
}
