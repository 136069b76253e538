//! Postgres-backed repository implementations.
//!
//! Schema creation and migration belong to the host application; everything
//! here only reads and appends. Queries use the runtime API so the crate
//! builds without a live database.

mod changes;
mod nodes;
mod settings;
mod users;
mod util;

pub use changes::{CHANGE_CHANNEL, PgChangeSignal, append_change_in_tx};
pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    /// A push channel over this pool, for the change tracker.
    pub fn change_signal(&self) -> PgChangeSignal {
        PgChangeSignal::new(self.pool.as_ref().clone())
    }
}
