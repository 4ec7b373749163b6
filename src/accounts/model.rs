//! Persisted records of the account aggregate and the inputs/outputs of the
//! repository operations.

use chrono::serde::{ts_microseconds, ts_microseconds_option};
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::ObjectId;
use crate::storage::Update;

use super::collections::fields;

pub type AccountId = ObjectId;

/// Current time at the precision timestamps are stored with.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

/// Stored form of a timestamp, for building filters and updates.
pub fn ts_value(at: DateTime<Utc>) -> serde_json::Value { serde_json::Value::from(at.timestamp_micros()) }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: AccountId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub credential_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(with = "ts_microseconds")]
    pub joined_at: DateTime<Utc>,
    /// Present once the account is soft-deleted.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "ts_microseconds_option")]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailIdentifier {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub account_id: AccountId,
    pub email: String,
    #[serde(with = "ts_microseconds")]
    pub assigned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "ts_microseconds_option")]
    pub revoked_at: Option<DateTime<Utc>>,
    pub is_primary: bool,
}

impl EmailIdentifier {
    pub fn is_active(&self) -> bool { self.revoked_at.is_none() }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneIdentifier {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub account_id: AccountId,
    pub phone: String,
    #[serde(with = "ts_microseconds")]
    pub assigned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "ts_microseconds_option")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl PhoneIdentifier {
    pub fn is_active(&self) -> bool { self.revoked_at.is_none() }
}

/// Public, never-changing handle for an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedIdentifier {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub account_id: AccountId,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsernameLogEntry {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub account_id: AccountId,
    pub username: String,
    #[serde(with = "ts_microseconds")]
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialLogEntry {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub account_id: AccountId,
    pub credential_hash: String,
    #[serde(with = "ts_microseconds")]
    pub assigned_at: DateTime<Utc>,
}

/// Input for account creation. Fields are expected to be validated by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub birth_date: Option<NaiveDate>,
    pub email: String,
    pub phone: String,
}

/// Explicit partial update of the profile fields. Only fields that were set are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilePatch {
    first_name: Option<String>,
    last_name: Option<String>,
    birth_date: Option<Option<NaiveDate>>,
}

impl ProfilePatch {
    pub fn new() -> Self { Self::default() }

    pub fn first_name(mut self, v: impl Into<String>) -> Self { self.first_name = Some(v.into()); self }

    pub fn last_name(mut self, v: impl Into<String>) -> Self { self.last_name = Some(v.into()); self }

    pub fn birth_date(mut self, v: NaiveDate) -> Self { self.birth_date = Some(Some(v)); self }

    pub fn clear_birth_date(mut self) -> Self { self.birth_date = Some(None); self }

    pub fn is_empty(&self) -> bool {
        self.first_name.is_none() && self.last_name.is_none() && self.birth_date.is_none()
    }

    pub(crate) fn to_update(&self) -> Update {
        let mut u = Update::new();
        if let Some(v) = &self.first_name { u = u.set(fields::FIRST_NAME, v.clone()); }
        if let Some(v) = &self.last_name { u = u.set(fields::LAST_NAME, v.clone()); }
        match &self.birth_date {
            Some(Some(d)) => u = u.set(fields::BIRTH_DATE, d.to_string()),
            Some(None) => u = u.unset(fields::BIRTH_DATE),
            None => {}
        }
        u
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "_id")]
    pub id: AccountId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
}

/// Profile plus the currently active contact identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct FullProfile {
    pub profile: Profile,
    pub emails: Vec<EmailIdentifier>,
    pub phone: Option<PhoneIdentifier>,
}

impl FullProfile {
    pub fn primary_email(&self) -> Option<&EmailIdentifier> { self.emails.iter().find(|e| e.is_primary) }
}
