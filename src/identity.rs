//! Local identity backend: accounts, profiles, and a process-local session.
//!
//! One `Identity` handle models one browser tab of the original design —
//! the session lives on the handle, the rows live in SQLite. Auth state
//! changes (sign-in, sign-out) fan out over a broadcast channel so the
//! resolver can react to events it did not itself trigger.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tracing::info;

use crate::error::{is_unique_violation, Error, Result};
use crate::id::{new_uuid_v4, new_uuid_v7};
use crate::time::now_ms;
use crate::util::salted_sha256;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub account_id: String,
    pub unique_id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn { account_id: String },
    SignedOut,
}

#[derive(Debug, Clone)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub name: String,
    pub unique_id: String,
}

#[derive(Clone)]
pub struct Identity {
    pool: SqlitePool,
    session: Arc<Mutex<Option<AuthSession>>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Identity {
    pub fn new(pool: SqlitePool) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            pool,
            session: Arc::new(Mutex::new(None)),
            events,
        }
    }

    /// Readiness probe. Resolves once the store answers a trivial query;
    /// the resolver awaits this instead of polling on an interval.
    pub async fn ready(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> Option<AuthSession> {
        self.session.lock().ok().and_then(|guard| guard.clone())
    }

    pub async fn sign_up(&self, input: SignUp) -> Result<Account> {
        if !input.email.contains('@') {
            return Err(Error::validation("email address is malformed"));
        }
        if input.password.len() < MIN_PASSWORD_LEN {
            return Err(Error::validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if input.unique_id.trim().is_empty() {
            return Err(Error::validation("unique id must not be empty"));
        }

        let id = new_uuid_v7();
        let salt = new_uuid_v4();
        let hash = salted_sha256(&salt, &input.password);
        let now = now_ms();

        let mut tx = self.pool.begin().await.map_err(Error::from)?;
        let inserted = sqlx::query(
            "INSERT INTO accounts (id, email, display_name, password_hash, password_salt, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&input.email)
        .bind(&input.name)
        .bind(&hash)
        .bind(&salt)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;
        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                return Err(Error::DuplicateName {
                    name: input.email.clone(),
                });
            }
            return Err(err.into());
        }

        let inserted = sqlx::query(
            "INSERT INTO profiles (account_id, unique_id, name, email, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&input.unique_id)
        .bind(&input.name)
        .bind(&input.email)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await;
        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                return Err(Error::DuplicateName {
                    name: input.unique_id.clone(),
                });
            }
            return Err(err.into());
        }
        tx.commit().await.map_err(Error::from)?;

        info!(target: "messmate", event = "account_created", account_id = %id);
        Ok(Account {
            id,
            email: input.email,
            display_name: input.name,
        })
    }

    /// Sign in with an email address or, when the input carries no `@`,
    /// a profile handle that resolves to one.
    pub async fn sign_in(&self, email_or_handle: &str, password: &str) -> Result<Account> {
        let email = if email_or_handle.contains('@') {
            email_or_handle.to_string()
        } else {
            sqlx::query_scalar::<_, String>("SELECT email FROM profiles WHERE unique_id = ?")
                .bind(email_or_handle)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::from)?
                .ok_or(Error::Authentication)?
        };

        let row = sqlx::query(
            "SELECT id, email, display_name, password_hash, password_salt FROM accounts WHERE email = ?",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)?
        .ok_or(Error::Authentication)?;

        let salt: String = row.try_get("password_salt").map_err(Error::from)?;
        let stored: String = row.try_get("password_hash").map_err(Error::from)?;
        if salted_sha256(&salt, password) != stored {
            return Err(Error::Authentication);
        }

        let account = Account {
            id: row.try_get("id").map_err(Error::from)?,
            email: row.try_get("email").map_err(Error::from)?,
            display_name: row.try_get("display_name").map_err(Error::from)?,
        };

        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(AuthSession {
                account_id: account.id.clone(),
            });
        }
        info!(target: "messmate", event = "signed_in", account_id = %account.id);
        let _ = self.events.send(AuthEvent::SignedIn {
            account_id: account.id.clone(),
        });
        Ok(account)
    }

    pub async fn sign_out(&self) -> Result<()> {
        let had_session = self
            .session
            .lock()
            .map(|mut guard| guard.take().is_some())
            .unwrap_or(false);
        if had_session {
            info!(target: "messmate", event = "signed_out");
        }
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    pub async fn account(&self, account_id: &str) -> Result<Account> {
        let row = sqlx::query("SELECT id, email, display_name FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from)?
            .ok_or(Error::NotFound { entity: "account" })?;
        Ok(Account {
            id: row.try_get("id").map_err(Error::from)?,
            email: row.try_get("email").map_err(Error::from)?,
            display_name: row.try_get("display_name").map_err(Error::from)?,
        })
    }

    pub async fn profile(&self, account_id: &str) -> Result<Profile> {
        profile_for(&self.pool, account_id)
            .await?
            .ok_or(Error::NotFound { entity: "profile" })
    }

    /// Owners may change their visible name; the handle and address stay.
    pub async fn update_profile(&self, account_id: &str, name: &str) -> Result<()> {
        let session = self.session().ok_or(Error::Authentication)?;
        if session.account_id != account_id {
            return Err(Error::Authorization {
                action: "update another member's profile",
            });
        }
        let now = now_ms();
        let res = sqlx::query(
            "UPDATE profiles SET name = ?, updated_at = ? WHERE account_id = ?",
        )
        .bind(name)
        .bind(now)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound { entity: "profile" });
        }
        sqlx::query("UPDATE accounts SET display_name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(now)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
        Ok(())
    }
}

pub(crate) async fn profile_for(pool: &SqlitePool, account_id: &str) -> Result<Option<Profile>> {
    let row = sqlx::query(
        "SELECT account_id, unique_id, name, email FROM profiles WHERE account_id = ?",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await
    .map_err(Error::from)?;
    match row {
        None => Ok(None),
        Some(row) => Ok(Some(Profile {
            account_id: row.try_get("account_id").map_err(Error::from)?,
            unique_id: row.try_get("unique_id").map_err(Error::from)?,
            name: row.try_get("name").map_err(Error::from)?,
            email: row.try_get("email").map_err(Error::from)?,
        })),
    }
}
