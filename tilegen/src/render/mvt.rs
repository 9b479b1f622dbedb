//! Mapbox Vector Tile encoding.
//!
//! Features arrive with geometry already scaled to the tile extent by the
//! composed SQL. This module quantizes coordinates to the integer grid,
//! flips the y axis (tile rows grow downward) and writes the MoveTo /
//! LineTo / ClosePath command stream.

use geo_types::{Coord, Geometry, LineString, Polygon};
use geozero::mvt::{Message as _, TagsBuilder, Tile, TileValue, tile};
use serde_json::Value;
use tracing::trace;

use super::{FeatureLayer, RenderError};
use crate::feature::Feature;
use mvt_commands::{Command, CommandInteger, ParameterInteger};

/// MVT command/parameter integer encoding per the vector tile spec
/// (<https://github.com/mapbox/vector-tile-spec/tree/master/2.1#43-geometry-encoding>).
/// `geozero::mvt` implements the same encoding internally but does not export it.
mod mvt_commands {
    pub struct CommandInteger(pub u32);

    pub enum Command {
        MoveTo = 1,
        LineTo = 2,
        ClosePath = 7,
    }

    impl CommandInteger {
        pub fn from(id: Command, count: u32) -> u32 {
            ((id as u32) & 0x7) | (count << 3)
        }
    }

    pub struct ParameterInteger(pub u32);

    impl ParameterInteger {
        pub fn from(value: i32) -> u32 {
            ((value << 1) ^ (value >> 31)) as u32
        }
    }
}

/// coordinates are scaled to this range within a tile
pub const EXTENTS: u32 = 4096;

/// extra rendering margin around a tile, in pixels
pub const PADDING: f64 = 0.0;

/// Encode a single named layer.
pub fn encode(out: &mut Vec<u8>, name: &str, features: &[Feature]) -> Result<(), RenderError> {
    let mvt_tile = Tile {
        layers: vec![build_layer(name, features)?],
    };
    out.extend_from_slice(&mvt_tile.encode_to_vec());
    Ok(())
}

/// A well-formed tile with no layers at all.
pub fn encode_empty(out: &mut Vec<u8>) {
    let mvt_tile = Tile { layers: Vec::new() };
    out.extend_from_slice(&mvt_tile.encode_to_vec());
}

/// Encode several feature layers as siblings of one tile, in input order.
pub fn merge(out: &mut Vec<u8>, feature_layers: &[FeatureLayer]) -> Result<(), RenderError> {
    let layers = feature_layers
        .iter()
        .map(|l| build_layer(&l.name, &l.features))
        .collect::<Result<Vec<_>, _>>()?;
    let mvt_tile = Tile { layers };
    out.extend_from_slice(&mvt_tile.encode_to_vec());
    Ok(())
}

fn build_layer(name: &str, features: &[Feature]) -> Result<tile::Layer, RenderError> {
    let mut builder = LayerBuilder::new(name.to_string());
    for feature in features {
        builder.add_feature(feature)?;
    }
    Ok(builder.build())
}

struct LayerBuilder {
    name: String,
    tag_builder: TagsBuilder<String>,
    features: Vec<tile::Feature>,
}

impl LayerBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            tag_builder: TagsBuilder::new(),
            features: Vec::new(),
        }
    }

    fn add_feature(&mut self, feature: &Feature) -> Result<(), RenderError> {
        let shape = feature.shape()?;
        let Some((geom_type, geometry)) = encode_shape(&shape) else {
            trace!("Skipping a feature whose geometry is empty or unrepresentable");
            return Ok(());
        };

        let mut tags = Vec::with_capacity(feature.properties.len() * 2);
        for (key, value) in &feature.properties {
            let Some(tile_value) = tile_value(value) else {
                continue;
            };
            let (key_idx, value_idx) = self.tag_builder.insert(key.clone(), tile_value);
            tags.push(key_idx);
            tags.push(value_idx);
        }

        self.features.push(tile::Feature {
            // the protobuf id field is unsigned; other id shapes stay in the
            // JSON formats only
            id: feature.id.as_u64(),
            tags,
            r#type: Some(geom_type as i32),
            geometry,
        });
        Ok(())
    }

    fn build(self) -> tile::Layer {
        let (keys, values) = self.tag_builder.into_tags();
        let values = values.into_iter().map(Into::into).collect();
        tile::Layer {
            name: self.name,
            features: self.features,
            version: 2,
            extent: Some(EXTENTS),
            keys,
            values,
        }
    }
}

fn tile_value(value: &Value) -> Option<TileValue> {
    match value {
        Value::String(s) => Some(TileValue::Str(s.clone())),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Some(TileValue::Int(v))
            } else if let Some(v) = n.as_u64() {
                Some(TileValue::Uint(v))
            } else {
                n.as_f64().map(TileValue::Double)
            }
        }
        Value::Bool(b) => Some(TileValue::Bool(*b)),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Quantize a tile-space coordinate onto the integer grid with y pointing
/// down.
#[expect(clippy::cast_possible_truncation)]
fn screen(coord: Coord<f64>) -> (i32, i32) {
    (
        coord.x.round() as i32,
        (f64::from(EXTENTS) - coord.y).round() as i32,
    )
}

fn encode_shape(shape: &Geometry<f64>) -> Option<(tile::GeomType, Vec<u32>)> {
    match shape {
        Geometry::Point(point) => Some((tile::GeomType::Point, encode_point(screen(point.0)))),
        Geometry::MultiPoint(points) => {
            if points.0.is_empty() {
                return None;
            }
            let screen_points: Vec<_> = points.iter().map(|p| screen(p.0)).collect();
            Some((tile::GeomType::Point, encode_multipoint(&screen_points)))
        }
        Geometry::LineString(line) => {
            let lines = prepare_lines(std::slice::from_ref(line));
            (!lines.is_empty()).then(|| (tile::GeomType::Linestring, encode_lines(&lines)))
        }
        Geometry::MultiLineString(multi) => {
            let lines = prepare_lines(&multi.0);
            (!lines.is_empty()).then(|| (tile::GeomType::Linestring, encode_lines(&lines)))
        }
        Geometry::Polygon(polygon) => {
            let rings = polygon_rings(polygon);
            (!rings.is_empty()).then(|| (tile::GeomType::Polygon, encode_rings(&rings)))
        }
        Geometry::MultiPolygon(polygons) => {
            let rings: Vec<_> = polygons.iter().flat_map(|p| polygon_rings(p)).collect();
            (!rings.is_empty()).then(|| (tile::GeomType::Polygon, encode_rings(&rings)))
        }
        _ => None,
    }
}

fn prepare_lines(lines: &[LineString<f64>]) -> Vec<Vec<(i32, i32)>> {
    lines
        .iter()
        .map(|line| line.0.iter().map(|c| screen(*c)).collect::<Vec<_>>())
        .filter(|points| points.len() >= 2)
        .collect()
}

/// Exterior ring first, then the holes, each with MVT winding and without
/// the closing point (a ClosePath command stands in for it).
fn polygon_rings(polygon: &Polygon<f64>) -> Vec<Vec<(i32, i32)>> {
    let Some(exterior) = prepare_ring(polygon.exterior(), true) else {
        return Vec::new();
    };
    let mut rings = Vec::with_capacity(1 + polygon.interiors().len());
    rings.push(exterior);
    rings.extend(
        polygon
            .interiors()
            .iter()
            .filter_map(|ring| prepare_ring(ring, false)),
    );
    rings
}

fn prepare_ring(ring: &LineString<f64>, exterior: bool) -> Option<Vec<(i32, i32)>> {
    let mut points: Vec<(i32, i32)> = ring.0.iter().map(|c| screen(*c)).collect();
    if points.len() >= 2 && points.first() == points.last() {
        points.pop();
    }
    if points.len() < 3 {
        return None;
    }
    // Surveyor's formula over screen coordinates: positive area is a
    // clockwise ring on screen, which is what exterior rings must be.
    if (signed_area(&points) > 0) != exterior {
        points.reverse();
    }
    Some(points)
}

fn signed_area(points: &[(i32, i32)]) -> i64 {
    let mut sum = 0_i64;
    for (i, &(x1, y1)) in points.iter().enumerate() {
        let (x2, y2) = points[(i + 1) % points.len()];
        sum += i64::from(x1) * i64::from(y2) - i64::from(x2) * i64::from(y1);
    }
    sum
}

fn encode_point((x, y): (i32, i32)) -> Vec<u32> {
    vec![
        CommandInteger::from(Command::MoveTo, 1),
        ParameterInteger::from(x),
        ParameterInteger::from(y),
    ]
}

#[expect(clippy::cast_possible_truncation)]
fn encode_multipoint(points: &[(i32, i32)]) -> Vec<u32> {
    let mut encoded = Vec::with_capacity(points.len() * 2 + 1);
    encoded.push(CommandInteger::from(Command::MoveTo, points.len() as u32));

    let mut cursor = (0, 0);
    for &(x, y) in points {
        encoded.push(ParameterInteger::from(x - cursor.0));
        encoded.push(ParameterInteger::from(y - cursor.1));
        cursor = (x, y);
    }
    encoded
}

#[expect(clippy::cast_possible_truncation)]
fn encode_lines(lines: &[Vec<(i32, i32)>]) -> Vec<u32> {
    let mut encoded = Vec::new();
    let mut cursor = (0, 0);
    for line in lines {
        encoded.push(CommandInteger::from(Command::MoveTo, 1));
        encoded.push(ParameterInteger::from(line[0].0 - cursor.0));
        encoded.push(ParameterInteger::from(line[0].1 - cursor.1));
        cursor = line[0];

        encoded.push(CommandInteger::from(Command::LineTo, line.len() as u32 - 1));
        for &(x, y) in &line[1..] {
            encoded.push(ParameterInteger::from(x - cursor.0));
            encoded.push(ParameterInteger::from(y - cursor.1));
            cursor = (x, y);
        }
    }
    encoded
}

#[expect(clippy::cast_possible_truncation)]
fn encode_rings(rings: &[Vec<(i32, i32)>]) -> Vec<u32> {
    let mut encoded = Vec::new();
    let mut cursor = (0, 0);
    for ring in rings {
        encoded.push(CommandInteger::from(Command::MoveTo, 1));
        encoded.push(ParameterInteger::from(ring[0].0 - cursor.0));
        encoded.push(ParameterInteger::from(ring[0].1 - cursor.1));
        cursor = ring[0];

        encoded.push(CommandInteger::from(Command::LineTo, ring.len() as u32 - 1));
        for &(x, y) in &ring[1..] {
            encoded.push(ParameterInteger::from(x - cursor.0));
            encoded.push(ParameterInteger::from(y - cursor.1));
            cursor = (x, y);
        }
        encoded.push(CommandInteger::from(Command::ClosePath, 1));
    }
    encoded
}
