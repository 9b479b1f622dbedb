//! Error types for PostgreSQL operations.

use deadpool_postgres::{BuildError, PoolError};
use tokio_postgres::Error as TokioPgError;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

#[derive(thiserror::Error, Debug)]
pub enum PgError {
    /// Invalid libpq-style connection parameters.
    #[error("Invalid connection parameters: {0}")]
    BadConnectionParams(#[source] TokioPgError),

    /// Cannot build the connection pool.
    #[error("Unable to build a Postgres connection pool for {1}: {0}")]
    PoolBuild(#[source] BuildError, String),

    /// Cannot get a connection from the pool.
    #[error("Unable to get a Postgres connection from the pool {1}: {0}")]
    PoolConn(#[source] PoolError, String),

    /// Database error, annotated with what was being done.
    #[error("Postgres error while {1}: {0}")]
    Query(#[source] TokioPgError, &'static str),

    /// The sub-query does not project the mandatory geometry column.
    #[error("Sub-query does not expose a __geometry__ column")]
    MissingGeometryColumn,
}
