pub mod models;

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::DbSettings;

/// Open a bounded pool against `settings`. Requests beyond the connection
/// limit queue for a free connection rather than failing.
pub async fn create_pool(settings: &DbSettings, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let options = PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .password(&settings.password)
        .database(&settings.database);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Db — the current backend handle
// ---------------------------------------------------------------------------

struct Active {
    pool: PgPool,
    settings: DbSettings,
}

/// The current backend handle: a pool plus the settings it was opened with,
/// swappable at runtime by `PUT /api/settings/db`.
///
/// Readers clone the pool (itself a cheap `Arc`) out of the lock, so the lock
/// is never held across a query. A swap only commits after the candidate pool
/// passes a liveness check; the old pool is closed afterwards, which waits for
/// checked-out connections to drain.
#[derive(Clone)]
pub struct Db {
    inner: Arc<RwLock<Active>>,
    max_connections: u32,
}

impl Db {
    pub fn new(pool: PgPool, settings: DbSettings, max_connections: u32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Active { pool, settings })),
            max_connections,
        }
    }

    pub async fn pool(&self) -> PgPool {
        self.inner.read().await.pool.clone()
    }

    pub async fn settings(&self) -> DbSettings {
        self.inner.read().await.settings.clone()
    }

    /// Connect to `settings`, run the liveness query, and only then swap the
    /// handle. On any error the previous pool remains authoritative and this
    /// returns the failure.
    pub async fn switch(&self, settings: DbSettings) -> Result<(), sqlx::Error> {
        let candidate = create_pool(&settings, self.max_connections).await?;
        sqlx::query("SELECT 1").execute(&candidate).await?;

        let old = {
            let mut guard = self.inner.write().await;
            std::mem::replace(
                &mut *guard,
                Active {
                    pool: candidate,
                    settings: settings.clone(),
                },
            )
        };

        info!(host = %settings.host, database = %settings.database, "Database pool swapped");
        old.pool.close().await;
        Ok(())
    }
}
