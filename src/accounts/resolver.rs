//! Account lookups by username, internal id or public shared id.
//!
//! Every lookup excludes soft-deleted accounts; callers choose what to fetch
//! through an `AccountView`, which pairs a projection with the type it decodes to.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use uuid::Uuid;

use crate::storage::{from_document, Filter, Projection, Store, StoreResult, Transaction};

use super::collections::{fields, ACCOUNTS, SHARED_IDS};
use super::model::{Account, AccountId, Profile, SharedIdentifier};

pub trait AccountView: DeserializeOwned {
    fn projection() -> Projection;
}

/// Just the id; enough for existence checks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountRef {
    #[serde(rename = "_id")]
    pub id: AccountId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CredentialView {
    #[serde(rename = "_id")]
    pub id: AccountId,
    pub credential_hash: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UsernameView {
    #[serde(rename = "_id")]
    pub id: AccountId,
    pub username: String,
}

impl AccountView for Account {
    fn projection() -> Projection { Projection::All }
}
impl AccountView for AccountRef {
    fn projection() -> Projection { Projection::Fields(Vec::new()) }
}
impl AccountView for CredentialView {
    fn projection() -> Projection { Projection::fields([fields::CREDENTIAL_HASH]) }
}
impl AccountView for UsernameView {
    fn projection() -> Projection { Projection::fields([fields::USERNAME]) }
}
impl AccountView for Profile {
    fn projection() -> Projection {
        Projection::fields([fields::USERNAME, fields::FIRST_NAME, fields::LAST_NAME, fields::BIRTH_DATE])
    }
}

/// Adds the soft-delete exclusion every account read must carry.
pub fn live(filter: Filter) -> Filter { filter.and(Filter::missing(fields::DELETED_AT)) }

fn decode<V: AccountView>(doc: Option<crate::storage::Document>) -> StoreResult<Option<V>> {
    doc.map(from_document).transpose()
}

#[derive(Clone)]
pub struct IdentifierResolver {
    store: Store,
}

impl IdentifierResolver {
    pub fn new(store: Store) -> Self { Self { store } }

    pub fn find_by_username<V: AccountView>(&self, username: &str) -> StoreResult<Option<V>> {
        decode(self.store.find_one(ACCOUNTS, &live(Filter::eq(fields::USERNAME, username)), &V::projection())?)
    }

    pub fn find_by_account_id<V: AccountView>(&self, id: &AccountId) -> StoreResult<Option<V>> {
        decode(self.store.find_one(ACCOUNTS, &live(Filter::id(id.to_hex())), &V::projection())?)
    }

    pub fn find_by_shared_id<V: AccountView>(&self, shared: &Uuid) -> StoreResult<Option<V>> {
        let link = self.store.find_one(SHARED_IDS, &Filter::eq(fields::UUID, shared.to_string()), &Projection::All)?;
        let Some(link) = decode_link(link)? else { return Ok(None) };
        self.find_by_account_id(&link.account_id)
    }

    pub fn find_by_username_in<V: AccountView>(txn: &mut Transaction, username: &str) -> StoreResult<Option<V>> {
        decode(txn.find_one(ACCOUNTS, &live(Filter::eq(fields::USERNAME, username)), &V::projection())?)
    }

    pub fn find_by_account_id_in<V: AccountView>(txn: &mut Transaction, id: &AccountId) -> StoreResult<Option<V>> {
        decode(txn.find_one(ACCOUNTS, &live(Filter::id(id.to_hex())), &V::projection())?)
    }

    pub fn find_by_shared_id_in<V: AccountView>(txn: &mut Transaction, shared: &Uuid) -> StoreResult<Option<V>> {
        let link = txn.find_one(SHARED_IDS, &Filter::eq(fields::UUID, shared.to_string()), &Projection::All)?;
        let Some(link) = decode_link(link)? else { return Ok(None) };
        Self::find_by_account_id_in(txn, &link.account_id)
    }
}

fn decode_link(doc: Option<crate::storage::Document>) -> StoreResult<Option<SharedIdentifier>> {
    doc.map(from_document).transpose()
}
