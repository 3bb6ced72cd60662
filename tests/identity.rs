use anyhow::Result;
use messmate::{Error, Identity, SignUp};

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn duplicate_email_or_handle_is_rejected_atomically() -> Result<()> {
    let pool = util::memory_pool().await;
    let identity = Identity::new(pool.clone());
    util::signup(&identity, "a@example.com", "Ana", "ana").await;

    let err = identity
        .sign_up(SignUp {
            email: "a@example.com".into(),
            password: util::PASSWORD.into(),
            name: "Imposter".into(),
            unique_id: "imposter".into(),
        })
        .await
        .expect_err("duplicate email");
    assert!(matches!(err, Error::DuplicateName { .. }));

    let err = identity
        .sign_up(SignUp {
            email: "b@example.com".into(),
            password: util::PASSWORD.into(),
            name: "Ben".into(),
            unique_id: "ana".into(),
        })
        .await
        .expect_err("duplicate handle");
    assert!(matches!(err, Error::DuplicateName { .. }));

    // The failed second sign-up must not leave a half-created account.
    let accounts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
        .fetch_one(&pool)
        .await?;
    let profiles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles")
        .fetch_one(&pool)
        .await?;
    assert_eq!(accounts, 1);
    assert_eq!(profiles, 1);
    Ok(())
}

#[tokio::test]
async fn sign_in_accepts_email_or_handle_and_rejects_bad_credentials() -> Result<()> {
    let pool = util::memory_pool().await;
    let identity = Identity::new(pool.clone());
    let a = util::signup(&identity, "a@example.com", "Ana", "ana").await;

    let by_email = identity.sign_in("a@example.com", util::PASSWORD).await?;
    assert_eq!(by_email.id, a.id);
    let by_handle = identity.sign_in("ana", util::PASSWORD).await?;
    assert_eq!(by_handle.id, a.id);

    for (who, pw) in [
        ("a@example.com", "wrong"),
        ("nobody@example.com", util::PASSWORD),
        ("not-a-handle", util::PASSWORD),
    ] {
        let err = identity.sign_in(who, pw).await.expect_err("bad credentials");
        assert!(matches!(err, Error::Authentication), "{who}");
    }
    Ok(())
}

#[tokio::test]
async fn weak_sign_up_input_is_rejected() -> Result<()> {
    let pool = util::memory_pool().await;
    let identity = Identity::new(pool.clone());

    for (email, password, handle) in [
        ("no-at-sign", util::PASSWORD, "x1"),
        ("ok@example.com", "short", "x2"),
        ("ok@example.com", util::PASSWORD, "  "),
    ] {
        let err = identity
            .sign_up(SignUp {
                email: email.into(),
                password: password.into(),
                name: "X".into(),
                unique_id: handle.into(),
            })
            .await
            .expect_err("invalid input");
        assert!(matches!(err, Error::Validation(_)), "{email}/{handle}");
    }
    Ok(())
}

#[tokio::test]
async fn passwords_are_never_stored_in_clear() -> Result<()> {
    let pool = util::memory_pool().await;
    let identity = Identity::new(pool.clone());
    util::signup(&identity, "a@example.com", "Ana", "ana").await;

    let stored: String = sqlx::query_scalar("SELECT password_hash FROM accounts")
        .fetch_one(&pool)
        .await?;
    assert_ne!(stored, util::PASSWORD);
    assert_eq!(stored.len(), 64); // hex sha-256
    Ok(())
}

#[tokio::test]
async fn only_the_owner_updates_their_profile() -> Result<()> {
    let pool = util::memory_pool().await;
    let identity = Identity::new(pool.clone());
    let a = util::signup(&identity, "a@example.com", "Ana", "ana").await;
    let b = util::signup(&identity, "b@example.com", "Ben", "ben").await;

    identity.sign_in("a@example.com", util::PASSWORD).await?;
    identity.update_profile(&a.id, "Ana Maria").await?;
    assert_eq!(identity.profile(&a.id).await?.name, "Ana Maria");

    let err = identity
        .update_profile(&b.id, "Hijacked")
        .await
        .expect_err("not the owner");
    assert!(matches!(err, Error::Authorization { .. }));
    assert_eq!(identity.profile(&b.id).await?.name, "Ben");
    Ok(())
}
