//! PostGIS access: connection pool, SQL composition and the feature reader.

mod errors;
pub use errors::{PgError, PgResult};

mod pool;
pub use pool::PgPool;

mod query;
pub use query::{BBOX_TOKEN, ColumnSet, GEOMETRY_COLUMN, ID_COLUMN, build_query, probe_query};

mod provider;
pub use provider::PgProvider;

mod features;
pub use features::query_features;
