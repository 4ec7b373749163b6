use thiserror::Error;

use crate::security::HashError;
use crate::storage::StoreError;

use super::collections::USERNAME_INDEX;

/// Closed classification every account error maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidState,
    Internal,
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account not found")]
    AccountNotFound,
    #[error("username '{0}' is already taken")]
    DuplicateUsername(String),
    #[error("email '{0}' is already registered for this account")]
    EmailAlreadyExists(String),
    #[error("email '{0}' not found")]
    EmailNotFound(String),
    #[error("email '{0}' is the primary email and cannot be deleted")]
    CannotDeletePrimaryEmail(String),
    #[error("new credential matches the current one")]
    SameCredential,
    #[error("credential does not match")]
    CredentialMismatch,
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccountError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccountError::AccountNotFound | AccountError::EmailNotFound(_) => ErrorKind::NotFound,
            AccountError::DuplicateUsername(_) | AccountError::EmailAlreadyExists(_) => ErrorKind::Conflict,
            AccountError::CannotDeletePrimaryEmail(_) | AccountError::SameCredential | AccountError::CredentialMismatch => {
                ErrorKind::InvalidState
            }
            AccountError::Hash(_) | AccountError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Translate the username index's duplicate-key signal.
    pub(crate) fn for_username(self, username: &str) -> Self {
        match self {
            AccountError::Store(e) if e.is_duplicate_key(USERNAME_INDEX) => AccountError::DuplicateUsername(username.to_string()),
            other => other,
        }
    }
}

pub type AccountResult<T> = Result<T, AccountError>;
