//! The end-to-end walkthrough: two "tabs" (identity handles + resolvers)
//! over one shared store, from sign-up to settled ledger.

use anyhow::Result;
use chrono::NaiveDate;
use messmate::{deposits, settlement, Identity, RequestStatus, Resolver, Role, StoreHandle};

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn sunrise_settlement_walkthrough() -> Result<()> {
    let pool = util::memory_pool().await;

    // Tab A: Ana signs up, signs in, founds "Sunrise".
    let identity_a = Identity::new(pool.clone());
    let ana = util::signup(&identity_a, "ana@example.com", "Ana", "ana").await;
    identity_a.sign_in("ana@example.com", util::PASSWORD).await?;
    let tab_a = Resolver::new(pool.clone(), identity_a.clone(), StoreHandle::in_memory());
    tab_a.initialize().await;
    let sunrise = tab_a.create_household("Sunrise", "abc123").await?;
    assert_eq!(tab_a.current_membership().unwrap().role, Role::Manager);

    // Tab B: Ben signs up and joins with the shared secret.
    let identity_b = Identity::new(pool.clone());
    let ben = util::signup(&identity_b, "ben@example.com", "Ben", "ben").await;
    identity_b.sign_in("ben@example.com", util::PASSWORD).await?;
    let tab_b = Resolver::new(pool.clone(), identity_b.clone(), StoreHandle::in_memory());
    tab_b.initialize().await;
    let joined = tab_b.join_household("Sunrise", "abc123").await?;
    assert_eq!(joined.id, sunrise.id);
    assert_eq!(tab_b.current_membership().unwrap().role, Role::Member);

    // The two tabs hold independent sessions over the same store.
    assert_eq!(tab_a.current_account().unwrap().id, ana.id);
    assert_eq!(tab_b.current_account().unwrap().id, ben.id);

    // Ben is owed 500 by Ana.
    let date = NaiveDate::parse_from_str("2024-01-10", "%Y-%m-%d")?;
    let caller_b = tab_b.caller()?;
    let request =
        settlement::create_request(&pool, &caller_b, &ana.id, 500, Some(date)).await?;
    assert_eq!(
        settlement::pending_for(&pool, &sunrise.id, &ana.id).await?[0].id,
        request.id
    );

    // Ana accepts from her tab; the transfer lands as one unit.
    let caller_a = tab_a.caller()?;
    settlement::accept(&pool, &caller_a, &request.id).await?;

    let decided = settlement::fetch(&pool, &request.id).await?.unwrap();
    assert_eq!(decided.status, RequestStatus::Accepted);
    assert_eq!(deposits::balance_for(&pool, &sunrise.id, &ben.id).await?, 500);
    assert_eq!(deposits::balance_for(&pool, &sunrise.id, &ana.id).await?, -500);
    assert!(settlement::pending_for(&pool, &sunrise.id, &ana.id)
        .await?
        .is_empty());

    // Ana signs out; her tab forgets everything, Ben's is untouched.
    tab_a.sign_out().await?;
    assert!(tab_a.current_account().is_none());
    assert!(tab_a.current_membership().is_none());
    assert_eq!(tab_b.current_account().unwrap().id, ben.id);
    Ok(())
}
