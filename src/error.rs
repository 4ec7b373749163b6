//! User-visible error model.
//! Every account error collapses onto one of four classes with a stable code,
//! mapped to HTTP and RPC status codes. Internal failures never carry their
//! detail to the caller; it is logged instead.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::error;

use crate::accounts::{AccountError, ErrorKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Internal { .. } => 500,
        }
    }

    /// RPC mapping: (numeric status, status name)
    pub fn rpc_status(&self) -> (u32, &'static str) {
        match self {
            AppError::UserInput { .. } => (3, "INVALID_ARGUMENT"),
            AppError::NotFound { .. } => (5, "NOT_FOUND"),
            AppError::Conflict { .. } => (6, "ALREADY_EXISTS"),
            AppError::Internal { .. } => (13, "INTERNAL"),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

fn account_code(err: &AccountError) -> &'static str {
    match err {
        AccountError::AccountNotFound => "account_not_found",
        AccountError::DuplicateUsername(_) => "username_taken",
        AccountError::EmailAlreadyExists(_) => "email_exists",
        AccountError::EmailNotFound(_) => "email_not_found",
        AccountError::CannotDeletePrimaryEmail(_) => "primary_email",
        AccountError::SameCredential => "same_credential",
        AccountError::CredentialMismatch => "credential_mismatch",
        AccountError::Hash(_) | AccountError::Store(_) => "internal",
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        let code = account_code(&err);
        match err.kind() {
            ErrorKind::NotFound => AppError::not_found(code.to_string(), err.to_string()),
            ErrorKind::Conflict => AppError::conflict(code.to_string(), err.to_string()),
            ErrorKind::InvalidState => AppError::user(code.to_string(), err.to_string()),
            ErrorKind::Internal => {
                error!(target: "accountd::accounts", error = %err, "internal error");
                AppError::internal("internal", "internal error")
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(target: "accountd", error = %err, "unclassified error");
        AppError::internal("internal", "internal error")
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
