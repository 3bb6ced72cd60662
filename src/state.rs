use std::path::Path;

use sqlx::SqlitePool;

use crate::db::open_sqlite_pool;
use crate::identity::Identity;
use crate::migrate::apply_migrations;
use crate::mirror::StoreHandle;
use crate::session::Resolver;

/// Everything a front-end needs, wired in dependency order:
/// pool → migrations → identity → resolver.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub identity: Identity,
    pub resolver: Resolver,
    pub mirror: StoreHandle,
}

impl AppState {
    pub async fn open(db_path: &Path, mirror: StoreHandle) -> anyhow::Result<Self> {
        let pool = open_sqlite_pool(db_path).await?;
        apply_migrations(&pool).await?;
        let identity = Identity::new(pool.clone());
        let resolver = Resolver::new(pool.clone(), identity.clone(), mirror.clone());
        Ok(Self {
            pool,
            identity,
            resolver,
            mirror,
        })
    }
}
