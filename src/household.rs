//! Households and memberships. The join secret is stored as a salted hash;
//! a lookup with the wrong secret is indistinguishable from a missing
//! household.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::db::run_in_tx;
use crate::error::{is_unique_violation, Error, Result};
use crate::id::{new_uuid_v4, new_uuid_v7};
use crate::time::now_ms;
use crate::util::salted_sha256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Manager,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::Member => "member",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "manager" => Ok(Role::Manager),
            "member" => Ok(Role::Member),
            other => Err(Error::validation(format!("unknown role \"{other}\""))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Household {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub id: String,
    pub household_id: String,
    pub account_id: String,
    pub role: Role,
    pub joined_at: i64,
}

/// The mirror payload: what survives a restart. Field names match the
/// original persisted shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentHousehold {
    pub household_id: String,
    pub household_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRow {
    pub account_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub joined_at: i64,
}

/// Household plus manager membership in one transaction; a failure after
/// the household insert rolls the household back too.
pub async fn create_household(
    pool: &SqlitePool,
    account_id: &str,
    name: &str,
    secret: &str,
) -> Result<(Household, Membership)> {
    if name.trim().is_empty() {
        return Err(Error::validation("household name must not be empty"));
    }
    if secret.is_empty() {
        return Err(Error::validation("household secret must not be empty"));
    }

    let household_id = new_uuid_v7();
    let membership_id = new_uuid_v7();
    let salt = new_uuid_v4();
    let hash = salted_sha256(&salt, secret);
    let now = now_ms();

    let hid = household_id.clone();
    let mid = membership_id.clone();
    let account = account_id.to_string();
    let household_name = name.to_string();
    run_in_tx::<_, Error, _>(pool, move |conn| {
        async move {
            let inserted = sqlx::query(
                "INSERT INTO households (id, name, secret_hash, secret_salt, created_by, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&hid)
            .bind(&household_name)
            .bind(&hash)
            .bind(&salt)
            .bind(&account)
            .bind(now)
            .bind(now)
            .execute(&mut *conn)
            .await;
            if let Err(err) = inserted {
                if is_unique_violation(&err) {
                    return Err(Error::DuplicateName {
                        name: household_name,
                    });
                }
                return Err(err.into());
            }

            sqlx::query(
                "INSERT INTO memberships (id, household_id, account_id, role, joined_at) \
                 VALUES (?, ?, ?, 'manager', ?)",
            )
            .bind(&mid)
            .bind(&hid)
            .bind(&account)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            Ok(())
        }
        .boxed()
    })
    .await?;

    tracing::info!(
        target: "messmate",
        event = "household_created",
        household_id = %household_id,
        name = %name
    );
    Ok((
        Household {
            id: household_id.clone(),
            name: name.to_string(),
            created_by: account_id.to_string(),
            created_at: now,
        },
        Membership {
            id: membership_id,
            household_id,
            account_id: account_id.to_string(),
            role: Role::Manager,
            joined_at: now,
        },
    ))
}

/// Exact name + secret match, or `NotFound`.
pub async fn find_by_credentials(
    pool: &SqlitePool,
    name: &str,
    secret: &str,
) -> Result<Household> {
    let row = sqlx::query(
        "SELECT id, name, secret_hash, secret_salt, created_by, created_at FROM households WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await
    .map_err(Error::from)?
    .ok_or(Error::NotFound {
        entity: "household",
    })?;

    let salt: String = row.try_get("secret_salt").map_err(Error::from)?;
    let stored: String = row.try_get("secret_hash").map_err(Error::from)?;
    if salted_sha256(&salt, secret) != stored {
        return Err(Error::NotFound {
            entity: "household",
        });
    }

    Ok(Household {
        id: row.try_get("id").map_err(Error::from)?,
        name: row.try_get("name").map_err(Error::from)?,
        created_by: row.try_get("created_by").map_err(Error::from)?,
        created_at: row.try_get("created_at").map_err(Error::from)?,
    })
}

/// Join (or re-join) by name + secret. An existing membership keeps its
/// role and no second row is ever created.
pub async fn join_household(
    pool: &SqlitePool,
    account_id: &str,
    name: &str,
    secret: &str,
) -> Result<(Household, Membership)> {
    let household = find_by_credentials(pool, name, secret).await?;

    if let Some(existing) = membership_for(pool, &household.id, account_id).await? {
        return Ok((household, existing));
    }

    let id = new_uuid_v7();
    let now = now_ms();
    let inserted = sqlx::query(
        "INSERT INTO memberships (id, household_id, account_id, role, joined_at) \
         VALUES (?, ?, ?, 'member', ?)",
    )
    .bind(&id)
    .bind(&household.id)
    .bind(account_id)
    .bind(now)
    .execute(pool)
    .await;
    match inserted {
        Ok(_) => {}
        // Lost a race against another join of the same account; the row
        // that won is just as good.
        Err(err) if is_unique_violation(&err) => {
            let existing = membership_for(pool, &household.id, account_id)
                .await?
                .ok_or(Error::NotFound {
                    entity: "membership",
                })?;
            return Ok((household, existing));
        }
        Err(err) => return Err(err.into()),
    }

    tracing::info!(
        target: "messmate",
        event = "household_joined",
        household_id = %household.id,
        account_id = %account_id
    );
    Ok((
        household.clone(),
        Membership {
            id,
            household_id: household.id,
            account_id: account_id.to_string(),
            role: Role::Member,
            joined_at: now,
        },
    ))
}

pub async fn membership_for(
    pool: &SqlitePool,
    household_id: &str,
    account_id: &str,
) -> Result<Option<Membership>> {
    let row = sqlx::query(
        "SELECT id, household_id, account_id, role, joined_at FROM memberships \
         WHERE household_id = ? AND account_id = ?",
    )
    .bind(household_id)
    .bind(account_id)
    .fetch_optional(pool)
    .await
    .map_err(Error::from)?;
    row.map(membership_from_row).transpose()
}

/// The single surfaced membership for an account. When direct store
/// manipulation leaves more than one, the most recently joined wins
/// (joined_at, then id, descending).
pub async fn current_membership_for(
    pool: &SqlitePool,
    account_id: &str,
) -> Result<Option<CurrentHousehold>> {
    let row = sqlx::query(
        "SELECT m.household_id, m.role, h.name AS household_name FROM memberships m \
         JOIN households h ON h.id = m.household_id \
         WHERE m.account_id = ? \
         ORDER BY m.joined_at DESC, m.id DESC LIMIT 1",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await
    .map_err(Error::from)?;
    match row {
        None => Ok(None),
        Some(row) => {
            let role: String = row.try_get("role").map_err(Error::from)?;
            Ok(Some(CurrentHousehold {
                household_id: row.try_get("household_id").map_err(Error::from)?,
                household_name: row.try_get("household_name").map_err(Error::from)?,
                role: Role::parse(&role)?,
            }))
        }
    }
}

pub async fn is_member(pool: &SqlitePool, household_id: &str, account_id: &str) -> Result<bool> {
    Ok(membership_for(pool, household_id, account_id)
        .await?
        .is_some())
}

/// Roster of a household, managers first, then join order.
pub async fn members_of(pool: &SqlitePool, household_id: &str) -> Result<Vec<MemberRow>> {
    let rows = sqlx::query(
        "SELECT m.account_id, m.role, m.joined_at, p.name, p.email FROM memberships m \
         JOIN profiles p ON p.account_id = m.account_id \
         WHERE m.household_id = ? \
         ORDER BY CASE m.role WHEN 'manager' THEN 0 ELSE 1 END, m.joined_at ASC",
    )
    .bind(household_id)
    .fetch_all(pool)
    .await
    .map_err(Error::from)?;

    rows.into_iter()
        .map(|row| {
            let role: String = row.try_get("role").map_err(Error::from)?;
            Ok(MemberRow {
                account_id: row.try_get("account_id").map_err(Error::from)?,
                name: row.try_get("name").map_err(Error::from)?,
                email: row.try_get("email").map_err(Error::from)?,
                role: Role::parse(&role)?,
                joined_at: row.try_get("joined_at").map_err(Error::from)?,
            })
        })
        .collect()
}

fn membership_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Membership> {
    let role: String = row.try_get("role").map_err(Error::from)?;
    Ok(Membership {
        id: row.try_get("id").map_err(Error::from)?,
        household_id: row.try_get("household_id").map_err(Error::from)?,
        account_id: row.try_get("account_id").map_err(Error::from)?,
        role: Role::parse(&role)?,
        joined_at: row.try_get("joined_at").map_err(Error::from)?,
    })
}
