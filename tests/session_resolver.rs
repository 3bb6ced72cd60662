use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use messmate::{Error, Identity, Navigator, Resolver, Role, StoreHandle};

#[path = "util.rs"]
mod util;

#[derive(Default)]
struct RecordingNavigator {
    redirects: AtomicUsize,
}

impl Navigator for RecordingNavigator {
    fn redirect_to_login(&self) {
        self.redirects.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn initialize_is_idempotent_and_resolves_the_live_session() -> Result<()> {
    let pool = util::memory_pool().await;
    let identity = Identity::new(pool.clone());
    let a = util::signup(&identity, "a@example.com", "Ana", "ana").await;
    identity.sign_in("a@example.com", util::PASSWORD).await?;

    let resolver = Resolver::new(pool.clone(), identity.clone(), StoreHandle::in_memory());
    assert!(resolver.initialize().await);
    assert!(resolver.initialize().await);

    let account = resolver.current_account().expect("session resolved");
    assert_eq!(account.id, a.id);
    assert!(resolver.current_membership().is_none());
    Ok(())
}

#[tokio::test]
async fn membership_falls_back_to_the_mirror_before_initialize() -> Result<()> {
    let pool = util::memory_pool().await;
    let identity = Identity::new(pool.clone());
    util::signup(&identity, "a@example.com", "Ana", "ana").await;
    identity.sign_in("a@example.com", util::PASSWORD).await?;

    let mirror = StoreHandle::in_memory();
    let first = Resolver::new(pool.clone(), identity.clone(), mirror.clone());
    first.initialize().await;
    first.create_household("Sunrise", "abc123").await?;

    // A second resolver sharing the mirror models the next page load:
    // before initialize() it reports the persisted hint.
    let second = Resolver::new(pool.clone(), identity.clone(), mirror.clone());
    let hinted = second.current_membership().expect("mirror hint");
    assert_eq!(hinted.household_name, "Sunrise");
    assert_eq!(hinted.role, Role::Manager);
    assert!(second.current_account().is_none());
    Ok(())
}

#[tokio::test]
async fn create_household_sets_current_and_mirror_together() -> Result<()> {
    let pool = util::memory_pool().await;
    let identity = Identity::new(pool.clone());
    util::signup(&identity, "a@example.com", "Ana", "ana").await;
    identity.sign_in("a@example.com", util::PASSWORD).await?;

    let mirror = StoreHandle::in_memory();
    let resolver = Resolver::new(pool.clone(), identity.clone(), mirror.clone());
    resolver.initialize().await;

    let household = resolver.create_household("Sunrise", "abc123").await?;
    let current = resolver.current_membership().expect("current set");
    assert_eq!(current.household_id, household.id);
    assert_eq!(current.role, Role::Manager);
    assert_eq!(
        mirror.snapshot().expect("mirror written").household_id,
        household.id
    );

    let caller = resolver.caller()?;
    assert_eq!(caller.household_id, household.id);
    assert_eq!(caller.role, Role::Manager);
    Ok(())
}

#[tokio::test]
async fn sign_out_clears_memory_and_mirror() -> Result<()> {
    let pool = util::memory_pool().await;
    let identity = Identity::new(pool.clone());
    util::signup(&identity, "a@example.com", "Ana", "ana").await;
    identity.sign_in("a@example.com", util::PASSWORD).await?;

    let mirror = StoreHandle::in_memory();
    let resolver = Resolver::new(pool.clone(), identity.clone(), mirror.clone());
    resolver.initialize().await;
    resolver.create_household("Sunrise", "abc123").await?;

    resolver.sign_out().await?;
    assert!(resolver.current_account().is_none());
    assert!(resolver.current_membership().is_none());
    assert!(mirror.snapshot().is_none());
    assert!(identity.session().is_none());
    Ok(())
}

#[tokio::test]
async fn resolver_reacts_to_external_auth_events() -> Result<()> {
    let pool = util::memory_pool().await;
    let identity = Identity::new(pool.clone());
    let a = util::signup(&identity, "a@example.com", "Ana", "ana").await;

    let resolver = Resolver::new(pool.clone(), identity.clone(), StoreHandle::in_memory());
    resolver.initialize().await;
    assert!(resolver.current_account().is_none());

    // Sign-in happens through the shared identity handle, not the
    // resolver; the event listener must pick it up.
    identity.sign_in("ana", util::PASSWORD).await?;
    {
        let resolver = resolver.clone();
        util::wait_for(move || resolver.current_account().is_some()).await;
    }
    assert_eq!(resolver.current_account().unwrap().id, a.id);

    identity.sign_out().await?;
    {
        let resolver = resolver.clone();
        util::wait_for(move || resolver.current_account().is_none()).await;
    }
    assert!(resolver.current_membership().is_none());
    Ok(())
}

#[tokio::test]
async fn gates_redirect_only_when_unsatisfied() -> Result<()> {
    let pool = util::memory_pool().await;
    let identity = Identity::new(pool.clone());
    util::signup(&identity, "a@example.com", "Ana", "ana").await;

    let navigator = Arc::new(RecordingNavigator::default());
    let resolver = Resolver::with_navigator(
        pool.clone(),
        identity.clone(),
        StoreHandle::in_memory(),
        navigator.clone(),
    );
    resolver.initialize().await;

    assert!(!resolver.require_session());
    assert!(!resolver.require_session());
    assert_eq!(navigator.redirects.load(Ordering::SeqCst), 2);

    identity.sign_in("a@example.com", util::PASSWORD).await?;
    resolver.refresh().await?;
    assert!(resolver.require_session());
    assert!(!resolver.require_session_and_membership());
    assert_eq!(navigator.redirects.load(Ordering::SeqCst), 3);

    resolver.create_household("Sunrise", "abc123").await?;
    assert!(resolver.require_session_and_membership());
    assert_eq!(navigator.redirects.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn caller_without_session_reports_authentication() -> Result<()> {
    let pool = util::memory_pool().await;
    let identity = Identity::new(pool.clone());
    let resolver = Resolver::new(pool.clone(), identity, StoreHandle::in_memory());
    resolver.initialize().await;

    let err = resolver.caller().expect_err("no session");
    assert!(matches!(err, Error::Authentication));
    Ok(())
}
