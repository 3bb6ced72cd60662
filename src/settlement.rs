//! Debt settlement workflow: pending → accepted | denied, nothing after.
//! Acceptance posts the offsetting ledger pair in the same transaction as
//! the status transition, so the ledger and the request can never disagree.

use chrono::NaiveDate;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::db::run_in_tx;
use crate::deposits::{insert_entry_tx, DepositEntry};
use crate::error::{Error, Result};
use crate::id::new_uuid_v7;
use crate::session::Caller;
use crate::time::{now_ms, today};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Denied,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Denied => "denied",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "denied" => Ok(RequestStatus::Denied),
            other => Err(Error::validation(format!(
                "unknown request status \"{other}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebtRequest {
    pub id: String,
    pub household_id: String,
    /// Profile that owes and must confirm; debited on acceptance.
    pub from_id: String,
    /// Profile that is owed; always the creator of the request.
    pub to_id: String,
    pub amount_cents: i64,
    pub request_date: NaiveDate,
    pub status: RequestStatus,
    pub created_at: i64,
    pub decided_at: Option<i64>,
}

/// New reimbursement request from the caller against `from_id`.
pub async fn create_request(
    pool: &SqlitePool,
    caller: &Caller,
    from_id: &str,
    amount_cents: i64,
    request_date: Option<NaiveDate>,
) -> Result<DebtRequest> {
    if amount_cents <= 0 {
        return Err(Error::validation("requested amount must be positive"));
    }
    if from_id == caller.account_id {
        return Err(Error::validation("cannot request settlement from yourself"));
    }
    if !crate::household::is_member(pool, &caller.household_id, from_id).await? {
        return Err(Error::NotFound { entity: "member" });
    }

    let request = DebtRequest {
        id: new_uuid_v7(),
        household_id: caller.household_id.clone(),
        from_id: from_id.to_string(),
        to_id: caller.account_id.clone(),
        amount_cents,
        request_date: request_date.unwrap_or_else(today),
        status: RequestStatus::Pending,
        created_at: now_ms(),
        decided_at: None,
    };
    sqlx::query(
        "INSERT INTO debt_requests (id, household_id, from_id, to_id, amount_cents, request_date, status, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)",
    )
    .bind(&request.id)
    .bind(&request.household_id)
    .bind(&request.from_id)
    .bind(&request.to_id)
    .bind(request.amount_cents)
    .bind(request.request_date.format("%Y-%m-%d").to_string())
    .bind(request.created_at)
    .execute(pool)
    .await
    .map_err(Error::from)?;

    tracing::info!(
        target: "messmate",
        event = "debt_request_created",
        request_id = %request.id,
        from_id = %request.from_id,
        to_id = %request.to_id,
        amount_cents = request.amount_cents
    );
    Ok(request)
}

/// Accept as the owing party: flip to accepted and post the offsetting
/// ledger pair, all in one unit of work.
pub async fn accept(pool: &SqlitePool, caller: &Caller, request_id: &str) -> Result<()> {
    let request = fetch(pool, request_id).await?.ok_or(Error::NotFound {
        entity: "debt request",
    })?;
    if request.from_id != caller.account_id {
        return Err(Error::Authorization {
            action: "accept a request addressed to another member",
        });
    }
    if request.status != RequestStatus::Pending {
        return Err(Error::Conflict("request is already decided"));
    }

    let decided_at = now_ms();
    let credit = DepositEntry {
        id: new_uuid_v7(),
        household_id: request.household_id.clone(),
        member_id: request.to_id.clone(),
        amount_cents: request.amount_cents,
        entry_date: request.request_date,
        created_by: caller.account_id.clone(),
        created_at: decided_at,
    };
    let debit = DepositEntry {
        id: new_uuid_v7(),
        household_id: request.household_id.clone(),
        member_id: request.from_id.clone(),
        amount_cents: -request.amount_cents,
        entry_date: request.request_date,
        created_by: caller.account_id.clone(),
        created_at: decided_at,
    };

    let id = request.id.clone();
    run_in_tx::<_, Error, _>(pool, move |conn| {
        async move {
            let res = sqlx::query(
                "UPDATE debt_requests SET status = 'accepted', decided_at = ? \
                 WHERE id = ? AND status = 'pending'",
            )
            .bind(decided_at)
            .bind(&id)
            .execute(&mut *conn)
            .await?;
            if res.rows_affected() == 0 {
                // Another session decided it between our read and this write.
                return Err(Error::Conflict("request is already decided"));
            }
            insert_entry_tx(&mut *conn, &credit).await?;
            insert_entry_tx(&mut *conn, &debit).await?;
            Ok(())
        }
        .boxed()
    })
    .await?;

    tracing::info!(
        target: "messmate",
        event = "debt_request_accepted",
        request_id = %request_id,
        amount_cents = request.amount_cents
    );
    Ok(())
}

/// Deny as the owing party. No ledger effect.
pub async fn deny(pool: &SqlitePool, caller: &Caller, request_id: &str) -> Result<()> {
    let request = fetch(pool, request_id).await?.ok_or(Error::NotFound {
        entity: "debt request",
    })?;
    if request.from_id != caller.account_id {
        return Err(Error::Authorization {
            action: "deny a request addressed to another member",
        });
    }
    if request.status != RequestStatus::Pending {
        return Err(Error::Conflict("request is already decided"));
    }

    let res = sqlx::query(
        "UPDATE debt_requests SET status = 'denied', decided_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(now_ms())
    .bind(request_id)
    .execute(pool)
    .await
    .map_err(Error::from)?;
    if res.rows_affected() == 0 {
        return Err(Error::Conflict("request is already decided"));
    }

    tracing::info!(
        target: "messmate",
        event = "debt_request_denied",
        request_id = %request_id
    );
    Ok(())
}

/// Pending requests where the profile is either party, newest first.
pub async fn pending_for(
    pool: &SqlitePool,
    household_id: &str,
    profile_id: &str,
) -> Result<Vec<DebtRequest>> {
    let rows = sqlx::query(
        "SELECT id, household_id, from_id, to_id, amount_cents, request_date, status, created_at, decided_at \
         FROM debt_requests \
         WHERE household_id = ? AND status = 'pending' AND (from_id = ? OR to_id = ?) \
         ORDER BY created_at DESC, id DESC",
    )
    .bind(household_id)
    .bind(profile_id)
    .bind(profile_id)
    .fetch_all(pool)
    .await
    .map_err(Error::from)?;
    rows.into_iter().map(request_from_row).collect()
}

pub async fn fetch(pool: &SqlitePool, request_id: &str) -> Result<Option<DebtRequest>> {
    let row = sqlx::query(
        "SELECT id, household_id, from_id, to_id, amount_cents, request_date, status, created_at, decided_at \
         FROM debt_requests WHERE id = ?",
    )
    .bind(request_id)
    .fetch_optional(pool)
    .await
    .map_err(Error::from)?;
    row.map(request_from_row).transpose()
}

fn request_from_row(row: sqlx::sqlite::SqliteRow) -> Result<DebtRequest> {
    let raw_status: String = row.try_get("status").map_err(Error::from)?;
    let raw_date: String = row.try_get("request_date").map_err(Error::from)?;
    let request_date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d")
        .map_err(|e| Error::validation(format!("bad request date \"{raw_date}\": {e}")))?;
    Ok(DebtRequest {
        id: row.try_get("id").map_err(Error::from)?,
        household_id: row.try_get("household_id").map_err(Error::from)?,
        from_id: row.try_get("from_id").map_err(Error::from)?,
        to_id: row.try_get("to_id").map_err(Error::from)?,
        amount_cents: row.try_get("amount_cents").map_err(Error::from)?,
        request_date,
        status: RequestStatus::parse(&raw_status)?,
        created_at: row.try_get("created_at").map_err(Error::from)?,
        decided_at: row.try_get("decided_at").map_err(Error::from)?,
    })
}
