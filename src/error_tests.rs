use super::*;
use crate::storage::StoreError;

#[test]
fn http_status_mapping() {
    assert_eq!(AppError::user("bad_input", "oops").http_status(), 400);
    assert_eq!(AppError::not_found("not_found", "missing").http_status(), 404);
    assert_eq!(AppError::conflict("conflict", "dup").http_status(), 409);
    assert_eq!(AppError::internal("internal", "panic").http_status(), 500);
}

#[test]
fn rpc_status_mapping() {
    assert_eq!(AppError::conflict("c", "dup").rpc_status(), (6, "ALREADY_EXISTS"));
    assert_eq!(AppError::not_found("n", "x").rpc_status(), (5, "NOT_FOUND"));
    assert_eq!(AppError::user("u", "x").rpc_status(), (3, "INVALID_ARGUMENT"));
    assert_eq!(AppError::internal("i", "x").rpc_status(), (13, "INTERNAL"));
}

#[test]
fn account_errors_map_to_classes() {
    let e: AppError = AccountError::DuplicateUsername("ana".into()).into();
    assert_eq!(e.code_str(), "username_taken");
    assert_eq!(e.http_status(), 409);

    let e: AppError = AccountError::CannotDeletePrimaryEmail("a@x.com".into()).into();
    assert_eq!(e.http_status(), 400);

    let e: AppError = AccountError::CredentialMismatch.into();
    assert_eq!(e.rpc_status().0, 3);

    let e: AppError = AccountError::EmailNotFound("b@x.com".into()).into();
    assert_eq!(e.http_status(), 404);
}

#[test]
fn internal_detail_is_not_exposed() {
    let e: AppError = AccountError::Store(StoreError::UnknownCollection("Account".into())).into();
    assert_eq!(e, AppError::internal("internal", "internal error"));
    assert!(!e.to_string().contains("Account"));
}

#[test]
fn serializes_with_type_tag() {
    let v = serde_json::to_value(AppError::not_found("account_not_found", "account not found")).unwrap();
    assert_eq!(v["type"], "not_found");
    assert_eq!(v["code"], "account_not_found");
}
