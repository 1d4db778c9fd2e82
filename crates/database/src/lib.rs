//! Storage for invocation logs and trained model bundles.
//!
//! - [`LogStore`] is the record store: Postgres in production, in memory in tests.
//! - [`read_records_csv`] and [`write_records_csv`] move training data to and from disk.
//! - [`ArtifactStore`] keeps versioned model bundles on any `object_store` backend.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

mod artifacts;
mod csv_source;
mod models;
mod repositories;

pub use artifacts::*;
pub use csv_source::*;
pub use models::*;
pub use repositories::*;

/// Creates a connection pool to the `PostgreSQL` database.
///
/// # Errors
///
/// Returns an error if the connection to the database fails.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
}

/// Runs all pending migrations.
///
/// # Errors
///
/// Returns an error if running migrations fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
