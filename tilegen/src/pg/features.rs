//! Streams rows of a composed tile query into feature records.

use serde_json::Value;
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, Type};
use tracing::{debug, trace};

use super::query::{GEOMETRY_COLUMN, ID_COLUMN};
use super::{PgError, PgPool};
use crate::error::TilegenResult;
use crate::feature::{Feature, Properties, decode_shape, shape_type_name};
use crate::layer::Layer;

/// Execute a composed tile query and post-process every row into a feature:
/// decode the geometry, filter by type, drop null properties, run the
/// layer's transform chain and finally its sort hook. Row order is
/// preserved otherwise.
pub async fn query_features(pool: &PgPool, sql: &str, layer: &Layer) -> TilegenResult<Vec<Feature>> {
    let conn = pool.get().await?;
    debug!("SQL: {sql}");
    let rows = conn
        .query(sql, &[])
        .await
        .map_err(|e| PgError::Query(e, "querying tile features"))?;

    let mut features = Vec::with_capacity(rows.len());
    for row in &rows {
        if !row.columns().iter().any(|c| c.name() == GEOMETRY_COLUMN) {
            return Err(PgError::MissingGeometryColumn.into());
        }

        let mut wkb: Option<Vec<u8>> = None;
        let mut id = Value::Null;
        let mut properties = Properties::new();

        for (idx, column) in row.columns().iter().enumerate() {
            match column.name() {
                GEOMETRY_COLUMN => wkb = get_value(row, idx),
                ID_COLUMN => {
                    id = column_value(row, idx, column.type_()).unwrap_or(Value::Null);
                }
                name => {
                    // null property values are dropped here
                    if let Some(value) = column_value(row, idx, column.type_()) {
                        properties.insert(name.to_string(), value);
                    }
                }
            }
        }

        let Some(wkb) = wkb else {
            // clipping can null the geometry out entirely
            trace!("Skipping a feature with no geometry");
            continue;
        };

        let shape = decode_shape(&wkb)?;
        if let Some(types) = &layer.geometry_types {
            if !types.contains(shape_type_name(&shape)) {
                continue;
            }
        }

        let feature = match &layer.transform_fn {
            Some(transform) => {
                let (shape, properties, id) = transform(shape, properties, id);
                Feature::from_shape(&shape, properties, id)?
            }
            None => Feature::new(wkb, properties, id),
        };
        features.push(feature);
    }

    Ok(match &layer.sort_fn {
        Some(sort) => sort(features),
        None => features,
    })
}

fn get_value<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

/// Convert a row cell into a property value. Types with no reasonable
/// scalar mapping are skipped.
fn column_value(row: &Row, idx: usize, ty: &Type) -> Option<Value> {
    if *ty == Type::TEXT
        || *ty == Type::VARCHAR
        || *ty == Type::BPCHAR
        || *ty == Type::CHAR
        || *ty == Type::NAME
    {
        get_value::<String>(row, idx).map(Value::from)
    } else if *ty == Type::INT2 {
        get_value::<i16>(row, idx).map(Value::from)
    } else if *ty == Type::INT4 {
        get_value::<i32>(row, idx).map(Value::from)
    } else if *ty == Type::INT8 {
        get_value::<i64>(row, idx).map(Value::from)
    } else if *ty == Type::FLOAT4 {
        get_value::<f32>(row, idx).map(Value::from)
    } else if *ty == Type::FLOAT8 {
        get_value::<f64>(row, idx).map(Value::from)
    } else if *ty == Type::BOOL {
        get_value::<bool>(row, idx).map(Value::from)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        get_value::<Value>(row, idx)
    } else {
        trace!("Skipping column of unsupported type {ty}");
        None
    }
}
