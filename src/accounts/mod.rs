//! Account aggregate consistency engine.
//!
//! An account is one `Account` document plus its email, phone and shared-id rows
//! and two append-only logs. The repository keeps them consistent with one
//! store transaction per use case; session revocation follows through the
//! outbox once the transaction has committed.

mod audit;
mod collections;
mod error;
mod model;
mod outbox;
mod primary_email;
mod repository;
mod resolver;
mod service;

pub use audit::{append_credential, append_username, credential_history, username_history};
pub use collections::{ensure_schema, fields, ACCOUNTS, CREDENTIAL_LOG, EMAILS, PHONES, REVOCATION_OUTBOX, SHARED_IDS, USERNAME_INDEX, USERNAME_LOG};
pub use error::{AccountError, AccountResult, ErrorKind};
pub use model::{
    now, Account, AccountId, CredentialLogEntry, EmailIdentifier, FullProfile, NewAccount, PhoneIdentifier, Profile,
    ProfilePatch, SharedIdentifier, UsernameLogEntry,
};
pub use outbox::{
    enqueue as enqueue_revocation, records_for as revocation_records, DispatchReport, OutboxDispatcher, OutboxSettings,
    OutboxSignal, RevocationReason, RevokeError, SessionRevocation, SessionRevoker,
};
pub use primary_email::{initial_primary, promote, Promotion};
pub use repository::AccountRepository;
pub use resolver::{live, AccountRef, AccountView, CredentialView, IdentifierResolver, UsernameView};
pub use service::{AccountService, SignUp};
