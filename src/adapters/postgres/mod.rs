//! Postgres implementation of every repository port.
//!
//! Each port lives in its own submodule with a private row type and an
//! `into_domain` conversion. Status columns are stored as their string form
//! and parsed back on read; an unknown value is an integrity error.

mod listings;
mod notifications;
mod payments;
mod reconciliation;
mod reservations;
mod tracking;
mod wallets;

use async_trait::async_trait;
use sqlx::PgPool;
use std::str::FromStr;

use crate::ports::{RepositoryError, RepositoryResult, Store};

/// Postgres-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }
}

fn parse_column<T>(column: &str, value: &str) -> RepositoryResult<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse::<T>()
        .map_err(|e| RepositoryError::Integrity(format!("{}: {}", column, e)))
}

/// Map a unique violation on `constraint` to `Conflict`; anything else goes
/// through the usual conversion.
fn unique_violation(err: sqlx::Error, constraint: &str, message: String) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() && db.constraint() == Some(constraint) {
            return RepositoryError::Conflict(message);
        }
    }
    RepositoryError::from(err)
}
