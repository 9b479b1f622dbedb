//! GeoJSON tile encoding.
//!
//! Output coordinates are rounded to a per-zoom digit count worth about a
//! quarter pixel, so tiles stay byte-deterministic and small.

use geojson::feature::Id;
use geojson::{Feature as GeoJsonFeature, FeatureCollection, Geometry as GeoJsonGeometry};
use serde_json::{Map, Value};

use super::RenderError;
use crate::feature::Feature;

/// Fractional lon/lat digits worth keeping at a zoom.
#[must_use]
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn precision(zoom: u8) -> u32 {
    let digits = f64::powi(2.0, i32::from(zoom) + 10).log10().ceil() - 2.0;
    digits.max(0.0) as u32
}

/// Encode features as a `FeatureCollection`.
pub fn encode(out: &mut Vec<u8>, features: &[Feature], zoom: u8) -> Result<(), RenderError> {
    let collection = feature_collection(features, zoom)?;
    serde_json::to_writer(out, &collection).map_err(RenderError::Json)
}

/// Compose independently rendered per-layer documents into one object
/// keyed by layer name, in input order.
pub fn merge(out: &mut Vec<u8>, documents: Vec<(String, Value)>) -> Result<(), RenderError> {
    let mut merged = Map::new();
    for (name, document) in documents {
        merged.insert(name, document);
    }
    serde_json::to_writer(out, &Value::Object(merged)).map_err(RenderError::Json)
}

fn feature_collection(features: &[Feature], zoom: u8) -> Result<FeatureCollection, RenderError> {
    let digits = precision(zoom);
    let mut collection = Vec::with_capacity(features.len());
    for feature in features {
        let shape = feature.shape()?;
        let mut value = geojson::Value::from(&shape);
        round_value(&mut value, digits);
        collection.push(GeoJsonFeature {
            bbox: None,
            geometry: Some(GeoJsonGeometry::new(value)),
            id: feature_id(&feature.id),
            properties: Some(feature.properties.clone()),
            foreign_members: None,
        });
    }
    Ok(FeatureCollection {
        bbox: None,
        features: collection,
        foreign_members: None,
    })
}

fn feature_id(id: &Value) -> Option<Id> {
    match id {
        Value::String(s) => Some(Id::String(s.clone())),
        Value::Number(n) => Some(Id::Number(n.clone())),
        _ => None,
    }
}

fn round_value(value: &mut geojson::Value, digits: u32) {
    match value {
        geojson::Value::Point(position) => round_position(position, digits),
        geojson::Value::MultiPoint(positions) | geojson::Value::LineString(positions) => {
            for position in positions {
                round_position(position, digits);
            }
        }
        geojson::Value::MultiLineString(lines) | geojson::Value::Polygon(lines) => {
            for line in lines {
                for position in line {
                    round_position(position, digits);
                }
            }
        }
        geojson::Value::MultiPolygon(polygons) => {
            for polygon in polygons {
                for ring in polygon {
                    for position in ring {
                        round_position(position, digits);
                    }
                }
            }
        }
        geojson::Value::GeometryCollection(geometries) => {
            for geometry in geometries {
                round_value(&mut geometry.value, digits);
            }
        }
    }
}

#[expect(clippy::cast_possible_wrap)]
fn round_position(position: &mut [f64], digits: u32) {
    let factor = f64::powi(10.0, digits as i32);
    for v in position {
        *v = (*v * factor).round() / factor;
    }
}
