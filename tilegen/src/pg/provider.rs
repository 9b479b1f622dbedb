//! Query-based tile provider: the pool plus per-template column knowledge.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::query::{ColumnSet, probe_query};
use super::{PgError, PgPool, PgResult};

/// A provider backed by user-supplied SQL templates.
///
/// Column sets are probed from the database once per template and memoized,
/// so the composer knows whether to synthesize `__id__` without touching
/// the database again.
#[derive(Debug)]
pub struct PgProvider {
    pool: PgPool,
    columns: Mutex<HashMap<String, Arc<ColumnSet>>>,
}

impl PgProvider {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            columns: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The projected column set of a sub-query.
    pub async fn columns_for(&self, subquery: &str, srid: i32) -> PgResult<Arc<ColumnSet>> {
        if let Some(columns) = self
            .columns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(subquery)
        {
            return Ok(columns.clone());
        }

        let conn = self.pool.get().await?;
        let statement = conn
            .prepare(&probe_query(subquery, srid))
            .await
            .map_err(|e| PgError::Query(e, "probing sub-query columns"))?;
        let columns = Arc::new(ColumnSet::new(
            statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        ));
        debug!("Probed {} column(s) for a sub-query", statement.columns().len());

        self.columns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subquery.to_string(), columns.clone());
        Ok(columns)
    }
}
