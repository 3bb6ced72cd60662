//! One-time email codes, issued and checked server-side. The clear code
//! exists only in the delivery path; storage sees a salted hash, a TTL,
//! and an attempt counter.

use std::sync::Mutex;

use rand::Rng;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::{Error, Result};
use crate::id::{new_uuid_v4, new_uuid_v7};
use crate::time::now_ms;
use crate::util::salted_sha256;

const CODE_TTL_MS: i64 = 15 * 60 * 1000;
const RESEND_COOLDOWN_MS: i64 = 60 * 1000;
const MAX_ATTEMPTS: i64 = 5;

/// Out-of-band delivery collaborator. Real deployments wire a mailer;
/// tests record what would have been sent.
pub trait CodeSender: Send + Sync {
    fn deliver(&self, email: &str, code: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code)
    }
}

impl CodeSender for RecordingSender {
    fn deliver(&self, email: &str, code: &str) -> anyhow::Result<()> {
        if let Ok(mut guard) = self.sent.lock() {
            guard.push((email.to_string(), code.to_string()));
        }
        Ok(())
    }
}

/// Issue a fresh six-digit code for `email`, honouring the resend
/// cooldown. Delivery happens before the row lands so a failed send
/// never blocks the next request.
pub async fn issue(pool: &SqlitePool, sender: &dyn CodeSender, email: &str) -> Result<()> {
    if !email.contains('@') {
        return Err(Error::validation("email address is malformed"));
    }

    let now = now_ms();
    let last_issued: Option<i64> = sqlx::query_scalar(
        "SELECT created_at FROM verification_codes WHERE email = ? AND consumed_at IS NULL \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .map_err(Error::from)?;
    if let Some(issued_at) = last_issued {
        if now - issued_at < RESEND_COOLDOWN_MS {
            return Err(Error::validation(
                "a code was sent recently; wait a minute before requesting another",
            ));
        }
    }

    let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
    let salt = new_uuid_v4();
    sender
        .deliver(email, &code)
        .map_err(|err| Error::BackendUnavailable(format!("code delivery failed: {err}")))?;

    sqlx::query(
        "INSERT INTO verification_codes (id, email, code_hash, code_salt, expires_at, attempts, consumed_at, created_at) \
         VALUES (?, ?, ?, ?, ?, 0, NULL, ?)",
    )
    .bind(new_uuid_v7())
    .bind(email)
    .bind(salted_sha256(&salt, &code))
    .bind(&salt)
    .bind(now + CODE_TTL_MS)
    .bind(now)
    .execute(pool)
    .await
    .map_err(Error::from)?;

    info!(target: "messmate", event = "verification_code_issued", email = %email);
    Ok(())
}

/// Check `code` against the latest unconsumed issue for `email`. A match
/// consumes the code; a miss burns an attempt, and five misses burn the
/// code.
pub async fn confirm(pool: &SqlitePool, email: &str, code: &str) -> Result<()> {
    let row = sqlx::query(
        "SELECT id, code_hash, code_salt, expires_at, attempts FROM verification_codes \
         WHERE email = ? AND consumed_at IS NULL \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await
    .map_err(Error::from)?
    .ok_or(Error::Authentication)?;

    let id: String = row.try_get("id").map_err(Error::from)?;
    let expires_at: i64 = row.try_get("expires_at").map_err(Error::from)?;
    let attempts: i64 = row.try_get("attempts").map_err(Error::from)?;
    let salt: String = row.try_get("code_salt").map_err(Error::from)?;
    let stored: String = row.try_get("code_hash").map_err(Error::from)?;

    if now_ms() > expires_at || attempts >= MAX_ATTEMPTS {
        return Err(Error::Authentication);
    }

    if salted_sha256(&salt, code) != stored {
        sqlx::query("UPDATE verification_codes SET attempts = attempts + 1 WHERE id = ?")
            .bind(&id)
            .execute(pool)
            .await
            .map_err(Error::from)?;
        return Err(Error::Authentication);
    }

    // Conditional consume keeps the code single-use under concurrent
    // confirms.
    let res = sqlx::query(
        "UPDATE verification_codes SET consumed_at = ? WHERE id = ? AND consumed_at IS NULL",
    )
    .bind(now_ms())
    .bind(&id)
    .execute(pool)
    .await
    .map_err(Error::from)?;
    if res.rows_affected() == 0 {
        return Err(Error::Authentication);
    }

    info!(target: "messmate", event = "verification_code_confirmed", email = %email);
    Ok(())
}
