#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use messmate::{Account, Identity, SignUp};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub const PASSWORD: &str = "correct-horse";

pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    messmate::migrate::apply_migrations(&pool)
        .await
        .expect("apply migrations");
    pool
}

pub async fn signup(identity: &Identity, email: &str, name: &str, handle: &str) -> Account {
    identity
        .sign_up(SignUp {
            email: email.to_string(),
            password: PASSWORD.to_string(),
            name: name.to_string(),
            unique_id: handle.to_string(),
        })
        .await
        .expect("sign up")
}

/// Await a condition updated by a background task, bounded.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 1s");
}
