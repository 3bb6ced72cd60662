//! Append-only deposit ledger. Positive amounts are credits, negative are
//! debits; rows are never updated or deleted.

use chrono::NaiveDate;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::household::Role;
use crate::id::new_uuid_v7;
use crate::session::Caller;
use crate::time::{now_ms, today};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEntry {
    pub id: String,
    pub household_id: String,
    pub member_id: String,
    pub amount_cents: i64,
    pub entry_date: NaiveDate,
    pub created_by: String,
    pub created_at: i64,
}

/// Manual ledger entry; manager only. Settlement postings bypass this and
/// go through [`insert_entry_tx`] inside the accept transaction.
pub async fn add_entry(
    pool: &SqlitePool,
    caller: &Caller,
    member_id: &str,
    amount_cents: i64,
    entry_date: Option<NaiveDate>,
) -> Result<DepositEntry> {
    if caller.role != Role::Manager {
        return Err(Error::Authorization {
            action: "record deposits",
        });
    }
    if amount_cents == 0 {
        return Err(Error::validation("deposit amount must not be zero"));
    }
    if !crate::household::is_member(pool, &caller.household_id, member_id).await? {
        return Err(Error::NotFound { entity: "member" });
    }

    let entry = DepositEntry {
        id: new_uuid_v7(),
        household_id: caller.household_id.clone(),
        member_id: member_id.to_string(),
        amount_cents,
        entry_date: entry_date.unwrap_or_else(today),
        created_by: caller.account_id.clone(),
        created_at: now_ms(),
    };
    let mut conn = pool.acquire().await.map_err(Error::from)?;
    insert_entry_tx(&mut conn, &entry).await?;
    tracing::info!(
        target: "messmate",
        event = "deposit_recorded",
        household_id = %entry.household_id,
        member_id = %entry.member_id,
        amount_cents = entry.amount_cents
    );
    Ok(entry)
}

pub(crate) async fn insert_entry_tx(
    conn: &mut SqliteConnection,
    entry: &DepositEntry,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO deposits (id, household_id, member_id, amount_cents, entry_date, created_by, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(&entry.household_id)
    .bind(&entry.member_id)
    .bind(entry.amount_cents)
    .bind(entry.entry_date.format("%Y-%m-%d").to_string())
    .bind(&entry.created_by)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Ledger for a household, newest entry date first.
pub async fn entries_for(pool: &SqlitePool, household_id: &str) -> Result<Vec<DepositEntry>> {
    let rows = sqlx::query(
        "SELECT id, household_id, member_id, amount_cents, entry_date, created_by, created_at \
         FROM deposits WHERE household_id = ? \
         ORDER BY entry_date DESC, created_at DESC, id DESC",
    )
    .bind(household_id)
    .fetch_all(pool)
    .await
    .map_err(Error::from)?;
    rows.into_iter().map(entry_from_row).collect()
}

pub async fn balance_for(pool: &SqlitePool, household_id: &str, member_id: &str) -> Result<i64> {
    let sum: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(amount_cents) FROM deposits WHERE household_id = ? AND member_id = ?",
    )
    .bind(household_id)
    .bind(member_id)
    .fetch_one(pool)
    .await
    .map_err(Error::from)?;
    Ok(sum.unwrap_or(0))
}

fn entry_from_row(row: sqlx::sqlite::SqliteRow) -> Result<DepositEntry> {
    let raw_date: String = row.try_get("entry_date").map_err(Error::from)?;
    let entry_date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
        .map_err(|e| Error::validation(format!("bad ledger date \"{raw_date}\": {e}")))?;
    Ok(DepositEntry {
        id: row.try_get("id").map_err(Error::from)?,
        household_id: row.try_get("household_id").map_err(Error::from)?,
        member_id: row.try_get("member_id").map_err(Error::from)?,
        amount_cents: row.try_get("amount_cents").map_err(Error::from)?,
        entry_date,
        created_by: row.try_get("created_by").map_err(Error::from)?,
        created_at: row.try_get("created_at").map_err(Error::from)?,
    })
}
