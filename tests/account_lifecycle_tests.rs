//! Account lifecycle integration tests: creation, identifier changes, audit logs,
//! soft delete and the password-level service on top of the repository.

use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use accountd::accounts::{AccountError, ErrorKind, NewAccount, ProfilePatch, SignUp};
use accountd::config::AppConfig;
use accountd::identity::RequestContext;
use accountd::runtime::App;
use accountd::security::Argon2Hasher;
use accountd::storage::{Store, StoreSettings, SNAPSHOT_FILE};

fn app() -> Result<App> {
    let store = Store::in_memory(StoreSettings::default());
    // cheap parameters; the default cost is too slow for unoptimized test builds
    let hasher = Arc::new(Argon2Hasher::with_params(8, 1, 1)?);
    App::assemble(AppConfig::default(), store, hasher)
}

fn ana() -> NewAccount {
    NewAccount {
        username: "ana".into(),
        first_name: "Ana".into(),
        last_name: "Silva".into(),
        birth_date: None,
        email: "a@x.com".into(),
        phone: "555".into(),
    }
}

#[tokio::test]
async fn created_account_has_full_profile() -> Result<()> {
    let app = app()?;
    let ctx = RequestContext::new("t-create");
    let repo = &app.repository;
    let id = repo.create_account(&ctx, &ana(), "h1").await?;

    let full = repo.get_full_profile(&id)?;
    assert_eq!(full.profile.username, "ana");
    assert_eq!(full.emails.len(), 1);
    let primary = full.primary_email().expect("primary email");
    assert_eq!(primary.email, "a@x.com");
    assert_eq!(full.phone.as_ref().map(|p| p.phone.as_str()), Some("555"));

    assert!(repo.username_exists("ana")?);
    assert_eq!(repo.get_account_id_by_username("ana")?, id);
    assert_eq!(repo.get_username_by_account_id(&id)?, "ana");
    let shared = repo.get_shared_id_by_account_id(&id)?;
    assert_eq!(repo.get_account_id_by_shared_id(&shared)?, id);
    assert_eq!(repo.username_history(&id)?.len(), 1);
    assert_eq!(repo.credential_history(&id)?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_username_is_conflict_and_writes_nothing() -> Result<()> {
    let app = app()?;
    let ctx = RequestContext::default();
    app.repository.create_account(&ctx, &ana(), "h1").await?;
    let commits = app.store.commit_count();

    let mut dup = ana();
    dup.email = "other@x.com".into();
    let err = app.repository.create_account(&ctx, &dup, "h2").await.unwrap_err();
    assert!(matches!(err, AccountError::DuplicateUsername(ref u) if u == "ana"));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(app.store.commit_count(), commits);
    Ok(())
}

#[tokio::test]
async fn primary_email_moves_and_old_one_becomes_deletable() -> Result<()> {
    let app = app()?;
    let ctx = RequestContext::default();
    let repo = &app.repository;
    let id = repo.create_account(&ctx, &ana(), "h1").await?;

    repo.add_email(&ctx, &id, "b@x.com").await?;
    let err = repo.delete_email(&ctx, &id, "a@x.com").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(repo.get_active_emails(&id)?.len(), 2);

    repo.change_primary_email(&ctx, &id, "b@x.com").await?;
    let emails = repo.get_active_emails(&id)?;
    assert_eq!(emails.iter().filter(|e| e.is_primary).count(), 1);
    assert_eq!(repo.get_primary_email(&id)?.map(|e| e.email), Some("b@x.com".to_string()));

    repo.delete_email(&ctx, &id, "a@x.com").await?;
    let active: Vec<_> = repo.get_active_emails(&id)?.into_iter().map(|e| e.email).collect();
    assert_eq!(active, vec!["b@x.com"]);
    // history keeps the revoked row
    let history = repo.email_history(&id)?;
    assert_eq!(history.len(), 2);
    assert!(history.iter().any(|e| e.email == "a@x.com" && e.revoked_at.is_some()));

    // choosing the current primary again is accepted and changes nothing
    let commits = app.store.commit_count();
    repo.change_primary_email(&ctx, &id, "b@x.com").await?;
    assert_eq!(app.store.commit_count(), commits);
    Ok(())
}

#[tokio::test]
async fn deleting_unknown_email_is_not_found() -> Result<()> {
    let app = app()?;
    let ctx = RequestContext::default();
    let id = app.repository.create_account(&ctx, &ana(), "h1").await?;
    let err = app.repository.delete_email(&ctx, &id, "ghost@x.com").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn logs_grow_by_one_per_change() -> Result<()> {
    let app = app()?;
    let ctx = RequestContext::default();
    let repo = &app.repository;
    let id = repo.create_account(&ctx, &ana(), "h0").await?;

    for n in 1..=3 {
        repo.change_username(&ctx, &id, &format!("ana{}", n)).await?;
        repo.change_credential(&ctx, &id, &format!("h{}", n)).await?;
    }
    let names: Vec<_> = repo.username_history(&id)?.into_iter().map(|e| e.username).collect();
    assert_eq!(names, vec!["ana", "ana1", "ana2", "ana3"]);
    let hashes: Vec<_> = repo.credential_history(&id)?.into_iter().map(|e| e.credential_hash).collect();
    assert_eq!(hashes, vec!["h0", "h1", "h2", "h3"]);
    assert_eq!(repo.get_username_by_account_id(&id)?, "ana3");
    assert!(!repo.username_exists("ana")?);
    Ok(())
}

#[tokio::test]
async fn username_taken_by_another_account_is_rejected() -> Result<()> {
    let app = app()?;
    let ctx = RequestContext::default();
    let repo = &app.repository;
    repo.create_account(&ctx, &ana(), "h1").await?;
    let mut bob = ana();
    bob.username = "bob".into();
    let bob_id = repo.create_account(&ctx, &bob, "h2").await?;

    let err = repo.change_username(&ctx, &bob_id, "ana").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(repo.username_history(&bob_id)?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn phone_rotation_keeps_one_active_number() -> Result<()> {
    let app = app()?;
    let ctx = RequestContext::default();
    let repo = &app.repository;
    let id = repo.create_account(&ctx, &ana(), "h1").await?;
    repo.rotate_phone_number(&ctx, &id, "556").await?;
    repo.rotate_phone_number(&ctx, &id, "557").await?;

    assert_eq!(repo.get_phone_number(&id)?.map(|p| p.phone), Some("557".to_string()));
    let history = repo.phone_history(&id)?;
    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().filter(|p| p.is_active()).count(), 1);
    Ok(())
}

#[tokio::test]
async fn soft_delete_hides_account_but_keeps_history() -> Result<()> {
    let app = app()?;
    let ctx = RequestContext::default();
    let repo = &app.repository;
    let id = repo.create_account(&ctx, &ana(), "h1").await?;
    let shared = repo.get_shared_id_by_account_id(&id)?;

    repo.soft_delete_account(&ctx, &id).await?;

    assert!(matches!(repo.get_account_id_by_username("ana"), Err(AccountError::AccountNotFound)));
    assert!(matches!(repo.get_username_by_account_id(&id), Err(AccountError::AccountNotFound)));
    assert!(matches!(repo.get_account_id_by_shared_id(&shared), Err(AccountError::AccountNotFound)));
    assert!(matches!(repo.get_profile(&id), Err(AccountError::AccountNotFound)));
    assert_eq!(repo.username_history(&id)?.len(), 1);
    assert_eq!(repo.email_history(&id)?.len(), 1);

    // mutations on a deleted account fail
    let err = repo.rotate_phone_number(&ctx, &id, "556").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = repo.soft_delete_account(&ctx, &id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // the username is free again
    let again = repo.create_account(&ctx, &ana(), "h2").await?;
    assert_ne!(again, id);
    assert_eq!(repo.get_account_id_by_username("ana")?, again);
    Ok(())
}

#[tokio::test]
async fn identifier_reads_treat_deleted_account_as_missing() -> Result<()> {
    let app = app()?;
    let ctx = RequestContext::default();
    let repo = &app.repository;
    let id = repo.create_account(&ctx, &ana(), "h1").await?;
    assert_eq!(repo.get_active_emails(&id)?.len(), 1);
    assert!(repo.get_phone_number(&id)?.is_some());

    repo.soft_delete_account(&ctx, &id).await?;

    assert!(matches!(repo.get_active_emails(&id), Err(AccountError::AccountNotFound)));
    assert!(matches!(repo.get_primary_email(&id), Err(AccountError::AccountNotFound)));
    assert!(matches!(repo.get_phone_number(&id), Err(AccountError::AccountNotFound)));
    assert!(matches!(repo.get_full_profile(&id), Err(AccountError::AccountNotFound)));
    assert!(matches!(repo.get_shared_id_by_account_id(&id), Err(AccountError::AccountNotFound)));
    // history stays readable
    assert_eq!(repo.email_history(&id)?.len(), 1);
    assert_eq!(repo.phone_history(&id)?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn renaming_a_deleted_account_is_not_found_even_when_name_is_taken() -> Result<()> {
    let app = app()?;
    let ctx = RequestContext::default();
    let repo = &app.repository;
    let gone = repo.create_account(&ctx, &ana(), "h1").await?;
    let bob = NewAccount { username: "bob".into(), email: "b@x.com".into(), ..ana() };
    repo.create_account(&ctx, &bob, "h2").await?;
    repo.soft_delete_account(&ctx, &gone).await?;

    let err = repo.change_username(&ctx, &gone, "bob").await.unwrap_err();
    assert!(matches!(err, AccountError::AccountNotFound), "{}", err);
    let unknown = accountd::accounts::AccountId::new();
    let err = repo.change_username(&ctx, &unknown, "bob").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn profile_updates_apply_only_given_fields() -> Result<()> {
    let app = app()?;
    let ctx = RequestContext::default();
    let repo = &app.repository;
    let id = repo.create_account(&ctx, &ana(), "h1").await?;
    repo.update_profile(&ctx, &id, &ProfilePatch::new().first_name("Ana Maria")).await?;
    let p = repo.get_profile(&id)?;
    assert_eq!(p.first_name, "Ana Maria");
    assert_eq!(p.last_name, "Silva");
    assert_eq!(p.username, "ana");
    Ok(())
}

#[tokio::test]
async fn service_password_flow() -> Result<()> {
    let app = app()?;
    let ctx = RequestContext::new("t-service");
    let svc = &app.service;
    let id = svc
        .sign_up(
            &ctx,
            SignUp {
                username: "ana".into(),
                password: "correct horse".into(),
                first_name: "Ana".into(),
                last_name: "Silva".into(),
                birth_date: None,
                email: "a@x.com".into(),
                phone: "555".into(),
            },
        )
        .await?;

    // stored value is a hash, not the password
    assert_ne!(app.repository.get_credential_hash(&id)?, "correct horse");
    assert!(svc.is_password_correct("ana", "correct horse")?);
    assert!(!svc.is_password_correct("ana", "battery staple")?);
    assert!(matches!(svc.is_password_correct("nobody", "x"), Err(AccountError::AccountNotFound)));

    let err = svc.change_password(&ctx, &id, "wrong", "battery staple").await.unwrap_err();
    assert!(matches!(err, AccountError::CredentialMismatch));
    let err = svc.change_password(&ctx, &id, "correct horse", "correct horse").await.unwrap_err();
    assert!(matches!(err, AccountError::SameCredential));
    assert_eq!(app.repository.credential_history(&id)?.len(), 1);

    svc.change_password(&ctx, &id, "correct horse", "battery staple").await?;
    assert!(svc.is_password_correct("ana", "battery staple")?);
    assert_eq!(app.repository.credential_history(&id)?.len(), 2);

    assert!(matches!(svc.delete_account(&ctx, &id, "correct horse").await, Err(AccountError::CredentialMismatch)));
    svc.delete_account(&ctx, &id, "battery staple").await?;
    assert!(!app.repository.username_exists("ana")?);
    Ok(())
}

#[tokio::test]
async fn accounts_survive_snapshot_reopen() -> Result<()> {
    let tmp = tempdir()?;
    let mut config = AppConfig::default();
    config.data_dir = tmp.path().to_path_buf();
    config.store.persistence.enabled = true;
    let ctx = RequestContext::default();

    let id = {
        let store = Store::open(tmp.path(), config.store.clone())?;
        let app = App::assemble(config.clone(), store, Arc::new(Argon2Hasher::with_params(8, 1, 1)?))?;
        let id = app.repository.create_account(&ctx, &ana(), "h1").await?;
        app.repository.add_email(&ctx, &id, "b@x.com").await?;
        app.store.save_snapshot()?;
        id
    };

    let store = Store::open(tmp.path(), config.store.clone())?;
    let app = App::assemble(config, store, Arc::new(Argon2Hasher::with_params(8, 1, 1)?))?;
    assert_eq!(app.repository.get_account_id_by_username("ana")?, id);
    assert_eq!(app.repository.get_active_emails(&id)?.len(), 2);
    // the unique index is rebuilt on restore
    let err = app.repository.create_account(&ctx, &ana(), "h2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    Ok(())
}

#[tokio::test]
async fn disabled_persistence_neither_restores_nor_writes_snapshots() -> Result<()> {
    let tmp = tempdir()?;
    let mut config = AppConfig::default();
    config.data_dir = tmp.path().to_path_buf();
    config.store.persistence.enabled = true;
    let ctx = RequestContext::default();

    {
        let store = Store::open(tmp.path(), config.store.clone())?;
        let app = App::assemble(config.clone(), store, Arc::new(Argon2Hasher::with_params(8, 1, 1)?))?;
        app.repository.create_account(&ctx, &ana(), "h1").await?;
        app.store.save_snapshot()?;
    }
    let snapshot = tmp.path().join(SNAPSHOT_FILE);
    let written = std::fs::read(&snapshot)?;

    config.store.persistence.enabled = false;
    let app = App::open(config)?;
    assert!(matches!(app.repository.get_account_id_by_username("ana"), Err(AccountError::AccountNotFound)));
    let bob = NewAccount { username: "bob".into(), email: "b@x.com".into(), ..ana() };
    app.repository.create_account(&ctx, &bob, "h2").await?;
    app.run_until(tokio::time::sleep(std::time::Duration::from_millis(20))).await?;

    assert_eq!(std::fs::read(&snapshot)?, written);
    Ok(())
}

#[tokio::test]
async fn disabled_persistence_leaves_empty_data_dir_untouched() -> Result<()> {
    let tmp = tempdir()?;
    let mut config = AppConfig::default();
    config.data_dir = tmp.path().join("data");
    config.store.persistence.enabled = false;
    let app = App::open(config)?;
    app.run_until(async {}).await?;
    assert!(!tmp.path().join("data").join(SNAPSHOT_FILE).exists());
    Ok(())
}
