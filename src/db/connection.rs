//! Connection factory handed to every repository.
//!
//! Each call opens its own connection and drops it when the closure returns,
//! on success and on error alike. Nothing holds a connection for the lifetime
//! of a run.

use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{error, info};

use crate::db::error::StoreError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug, Clone)]
pub struct Database {
    url: String,
}

impl Database {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn connect(&self) -> Result<PgConnection, StoreError> {
        PgConnection::establish(&self.url).map_err(|e| {
            error!("Opening database connection failed: {}", e);
            StoreError::Connection(e)
        })
    }

    /// Run `f` on a fresh connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError>,
    {
        let mut conn = self.connect()?;
        f(&mut conn)
    }

    /// Run `f` inside a single transaction on a fresh connection; any error rolls back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError>,
    {
        self.with_conn(|conn| conn.transaction(f))
    }

    pub fn run_migrations(&self) -> Result<(), String> {
        let mut conn = self.connect().map_err(|e| e.to_string())?;
        match conn.run_pending_migrations(MIGRATIONS) {
            Ok(applied) if applied.is_empty() => {
                info!("Database schema is up to date; no migrations were applied");
                Ok(())
            }
            Ok(applied) => {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
                Ok(())
            }
            Err(e) => Err(format!("Applying database migrations failed: {}", e)),
        }
    }
}

/// Shared helper for the Postgres-backed tests. `None` when no test database is configured.
#[cfg(test)]
pub fn test_database() -> Option<Database> {
    let url = std::env::var("TEST_DATABASE_URL").ok().filter(|s| !s.trim().is_empty())?;
    let db = Database::new(url);
    db.run_migrations().expect("migrations apply to test database");
    Some(db)
}
