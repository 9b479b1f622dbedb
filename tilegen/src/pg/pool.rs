//! `PostgreSQL` connection pool.

use std::collections::BTreeMap;

use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::debug;

use super::{PgError, PgResult};

const DEFAULT_POOL_SIZE: usize = 8;

/// Pool of read-only autocommit `PostgreSQL` sessions.
///
/// Every session runs with `default_transaction_read_only=on` and issues
/// plain statements outside explicit transactions, so tile rendering can
/// never write.
#[derive(Clone, Debug)]
pub struct PgPool {
    id: String,
    pool: Pool,
}

impl PgPool {
    /// Build a pool from libpq-style parameters (`host`, `port`, `user`,
    /// `password`, `dbname`, ...). The pool connects lazily.
    pub fn new(dbinfo: &BTreeMap<String, String>, pool_size: Option<usize>) -> PgResult<Self> {
        let conn_str = dbinfo
            .iter()
            .map(|(key, value)| format!("{key}='{}'", value.replace('\\', r"\\").replace('\'', r"\'")))
            .collect::<Vec<_>>()
            .join(" ");

        let mut pg_cfg: PgConfig = conn_str.parse().map_err(PgError::BadConnectionParams)?;
        pg_cfg.options("-c default_transaction_read_only=on");

        let id = pg_cfg
            .get_dbname()
            .map_or_else(|| "postgres".to_string(), ToString::to_string);
        debug!("Configured connection pool for database {id}");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_cfg, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(pool_size.unwrap_or(DEFAULT_POOL_SIZE))
            .build()
            .map_err(|e| PgError::PoolBuild(e, id.clone()))?;

        Ok(Self { id, pool })
    }

    /// Retrieves a connection from the pool or waits for one to become available.
    pub async fn get(&self) -> PgResult<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| PgError::PoolConn(e, self.id.clone()))
    }

    /// ID under which this pool is identified in logs and errors.
    #[must_use]
    pub fn get_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_id_comes_from_dbname() {
        let dbinfo: BTreeMap<String, String> = [
            ("host".to_string(), "localhost".to_string()),
            ("dbname".to_string(), "gis".to_string()),
            ("user".to_string(), "postgres".to_string()),
        ]
        .into_iter()
        .collect();
        let pool = PgPool::new(&dbinfo, None).unwrap();
        assert_eq!(pool.get_id(), "gis");
    }

    #[test]
    fn quoting_survives_awkward_passwords() {
        let dbinfo: BTreeMap<String, String> = [
            ("host".to_string(), "localhost".to_string()),
            ("password".to_string(), "it's complicated".to_string()),
        ]
        .into_iter()
        .collect();
        assert!(PgPool::new(&dbinfo, Some(2)).is_ok());
    }
}
