//! Tile rendering: per-format SQL routing, feature collection and encoding.

pub mod geojson;
pub mod mvt;
pub mod topojson;

use serde_json::Value;
use tilegen_tile_utils::{Bounds, Format, Projection, TileCoord, pixel_tolerance, webmercator_to_wgs84};

use crate::error::TilegenResult;
use crate::feature::{Feature, FeatureError};
use crate::layer::Layer;
use crate::pg::{PgError, PgProvider, build_query, query_features};

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Unable to serialize tile document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rendered sub-layer is not a JSON document of the expected shape")]
    MalformedLayerDocument,

    #[error(transparent)]
    Feature(#[from] FeatureError),
}

/// A named bundle of features, the unit the MVT multi-layer merge operates on.
pub struct FeatureLayer {
    pub name: String,
    pub features: Vec<Feature>,
}

/// Render one layer at a coordinate into the requested format.
///
/// A zoom with no query renders a valid empty tile without touching the
/// database.
pub async fn render_tile(
    provider: &PgProvider,
    layer: &Layer,
    coord: TileCoord,
    format: Format,
) -> TilegenResult<Vec<u8>> {
    let bounds = layer.projection.tile_bounds(coord);
    let mut out = Vec::new();
    match layer_features(provider, layer, coord, &bounds, format).await? {
        Some(features) => match format {
            Format::Mvt => mvt::encode(&mut out, &layer.name, &features)?,
            Format::Json => geojson::encode(&mut out, &features, coord.z)?,
            Format::TopoJson => {
                topojson::encode(&mut out, &features, lonlat_bounds(layer.projection, &bounds))?;
            }
        },
        None => match format {
            Format::Mvt => mvt::encode_empty(&mut out),
            Format::Json => geojson::encode(&mut out, &[], coord.z)?,
            Format::TopoJson => {
                topojson::encode(&mut out, &[], lonlat_bounds(layer.projection, &bounds))?;
            }
        },
    }
    Ok(out)
}

/// Render several layers into one multi-layer tile.
///
/// MVT merges at the feature level: one protobuf with a sibling layer per
/// input layer, in the given order. The JSON formats render each layer
/// independently and merge the parsed documents under their layer names.
pub async fn render_tiles(
    provider: &PgProvider,
    layers: &[std::sync::Arc<Layer>],
    coord: TileCoord,
    format: Format,
) -> TilegenResult<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        Format::Mvt => {
            let mut feature_layers = Vec::new();
            for layer in layers {
                let bounds = layer.projection.tile_bounds(coord);
                // layers with no query at this zoom contribute nothing
                if let Some(features) =
                    layer_features(provider, layer, coord, &bounds, format).await?
                {
                    feature_layers.push(FeatureLayer {
                        name: layer.name.clone(),
                        features,
                    });
                }
            }
            mvt::merge(&mut out, &feature_layers)?;
        }
        Format::Json => {
            let documents = layer_documents(provider, layers, coord, format).await?;
            geojson::merge(&mut out, documents)?;
        }
        Format::TopoJson => {
            let documents = layer_documents(provider, layers, coord, format).await?;
            topojson::merge(&mut out, documents)?;
        }
    }
    Ok(out)
}

/// Render every layer on its own and parse the result back for merging.
async fn layer_documents(
    provider: &PgProvider,
    layers: &[std::sync::Arc<Layer>],
    coord: TileCoord,
    format: Format,
) -> TilegenResult<Vec<(String, Value)>> {
    let mut documents = Vec::with_capacity(layers.len());
    for layer in layers {
        let bytes = render_tile(provider, layer, coord, format).await?;
        let document = serde_json::from_slice(&bytes).map_err(RenderError::Json)?;
        documents.push((layer.name.clone(), document));
    }
    Ok(documents)
}

/// Compose and run the layer's query for this tile, or `None` when the
/// zoom has no query.
async fn layer_features(
    provider: &PgProvider,
    layer: &Layer,
    coord: TileCoord,
    bounds: &Bounds,
    format: Format,
) -> TilegenResult<Option<Vec<Feature>>> {
    let Some(subquery) = layer.query_for_zoom(coord.z) else {
        return Ok(None);
    };

    let columns = provider.columns_for(&subquery, layer.srid).await?;
    if !columns.has_geometry() {
        return Err(PgError::MissingGeometryColumn.into());
    }

    let tolerance = layer.tolerance(coord.z);
    let sql = match format {
        Format::Json | Format::TopoJson => build_query(
            layer.srid, &subquery, &columns, bounds, tolerance, true, layer.clip, 0.0, None,
        ),
        Format::Mvt => build_query(
            layer.srid,
            &subquery,
            &columns,
            bounds,
            tolerance,
            false,
            layer.clip,
            mvt::PADDING * pixel_tolerance(coord.z),
            Some(f64::from(mvt::EXTENTS)),
        ),
    };

    let features = query_features(provider.pool(), &sql, layer).await?;
    Ok(Some(features))
}

/// Lon/lat extents of a tile's projected bounds.
fn lonlat_bounds(projection: Projection, bounds: &Bounds) -> [f64; 4] {
    match projection {
        Projection::WebMercator => {
            let (west, south) = webmercator_to_wgs84(bounds.xmin, bounds.ymin);
            let (east, north) = webmercator_to_wgs84(bounds.xmax, bounds.ymax);
            [west, south, east, north]
        }
        Projection::Wgs84 => [bounds.xmin, bounds.ymin, bounds.xmax, bounds.ymax],
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use tilegen_tile_utils::EARTH_CIRCUMFERENCE;

    use super::*;

    #[test]
    fn lonlat_bounds_inverts_the_mercator_tile() {
        let half = EARTH_CIRCUMFERENCE / 2.0;
        let bounds = Bounds::new(-half, -half, half, half);
        let [west, south, east, north] = lonlat_bounds(Projection::WebMercator, &bounds);
        assert_relative_eq!(west, -180.0, epsilon = 1e-9);
        assert_relative_eq!(east, 180.0, epsilon = 1e-9);
        assert_relative_eq!(south, -85.051_128_779_806_6, epsilon = 1e-6);
        assert_relative_eq!(north, 85.051_128_779_806_6, epsilon = 1e-6);
    }

    #[test]
    fn lonlat_bounds_passes_wgs84_through() {
        let bounds = Bounds::new(-90.0, -45.0, 0.0, 45.0);
        assert_eq!(
            lonlat_bounds(Projection::Wgs84, &bounds),
            [-90.0, -45.0, 0.0, 45.0]
        );
    }
}
