//! The feature record flowing from the database reader into the encoders.

use geo_types::Geometry;
use geozero::wkb::Wkb;
use geozero::{CoordDimensions, ToGeo as _, ToWkb as _};
use serde_json::{Map, Value};

/// Feature properties: column name to scalar value, nulls already removed.
pub type Properties = Map<String, Value>;

/// One feature of a tile: geometry as WKB, a property map and an id.
///
/// The id is either the value of the sub-query's `__id__` column or the
/// hex digest synthesized by the SQL composer.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub wkb: Vec<u8>,
    pub properties: Properties,
    pub id: Value,
}

#[derive(thiserror::Error, Debug)]
pub enum FeatureError {
    #[error("Invalid feature geometry: {0}")]
    Wkb(geozero::error::GeozeroError),
}

impl Feature {
    #[must_use]
    pub fn new(wkb: Vec<u8>, properties: Properties, id: Value) -> Self {
        Self {
            wkb,
            properties,
            id,
        }
    }

    /// Build a feature from a decoded shape, re-encoding it to WKB.
    pub fn from_shape(
        shape: &Geometry<f64>,
        properties: Properties,
        id: Value,
    ) -> Result<Self, FeatureError> {
        let wkb = shape
            .to_wkb(CoordDimensions::xy())
            .map_err(FeatureError::Wkb)?;
        Ok(Self {
            wkb,
            properties,
            id,
        })
    }

    /// Decode the WKB payload.
    pub fn shape(&self) -> Result<Geometry<f64>, FeatureError> {
        decode_shape(&self.wkb)
    }
}

pub fn decode_shape(wkb: &[u8]) -> Result<Geometry<f64>, FeatureError> {
    Wkb(wkb).to_geo().map_err(FeatureError::Wkb)
}

/// Geometry type name as matched by the `geometry_types` layer filter.
#[must_use]
pub fn shape_type_name(shape: &Geometry<f64>) -> &'static str {
    match shape {
        Geometry::Point(_) => "Point",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::Line(_) | Geometry::LineString(_) => "LineString",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "Polygon",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
    }
}

#[cfg(test)]
mod tests {
    use geo_types::{point, polygon};
    use serde_json::json;

    use super::*;

    #[test]
    fn wkb_round_trip() {
        let shape = Geometry::Point(point! { x: 10.5, y: -3.25 });
        let mut properties = Properties::new();
        properties.insert("kind".to_string(), json!("peak"));

        let feature = Feature::from_shape(&shape, properties.clone(), json!(7)).unwrap();
        assert_eq!(feature.shape().unwrap(), shape);
        assert_eq!(feature.properties, properties);
        assert_eq!(feature.id, json!(7));
    }

    #[test]
    fn type_names_match_wkt_spelling() {
        let point = Geometry::Point(point! { x: 0.0, y: 0.0 });
        assert_eq!(shape_type_name(&point), "Point");

        let poly: Geometry<f64> = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
        ]);
        assert_eq!(shape_type_name(&poly), "Polygon");
    }

    #[test]
    fn invalid_wkb_is_an_error() {
        assert!(decode_shape(&[0x01, 0x02, 0x03]).is_err());
    }
}
