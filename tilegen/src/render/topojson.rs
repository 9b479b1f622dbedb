//! TopoJSON tile encoding.
//!
//! Geometries are quantized to a fixed grid over the tile's lon/lat bounds
//! and written as delta-encoded arcs. Arcs are per feature; nothing is
//! shared across features.

use geo_types::{Coord, Geometry, LineString, Polygon};
use serde_json::{Map, Value, json};

use super::RenderError;
use crate::feature::Feature;

/// quantization grid for arc coordinates
const QUANTIZATION: u32 = 4096;

/// Key of the single object written by the one-layer encoder; the merge
/// path re-keys objects by layer name.
pub const OBJECT_KEY: &str = "vectile";

/// Encode features as a Topology over the given lon/lat bounds.
pub fn encode(out: &mut Vec<u8>, features: &[Feature], bounds: [f64; 4]) -> Result<(), RenderError> {
    let mut arcs = Arcs::new(Transform::new(bounds));
    let object = layer_object(features, &mut arcs)?;
    let mut objects = Map::new();
    objects.insert(OBJECT_KEY.to_string(), object);
    write_topology(out, &objects, &arcs, bounds)
}

/// Compose independently rendered per-layer topologies into one: objects
/// are re-keyed by layer name and arc indexes rebased onto the
/// concatenated arc table. All inputs describe the same tile, so the first
/// document's transform and bbox carry over.
#[expect(clippy::cast_possible_wrap)]
pub fn merge(out: &mut Vec<u8>, documents: Vec<(String, Value)>) -> Result<(), RenderError> {
    let mut objects = Map::new();
    let mut arcs: Vec<Value> = Vec::new();
    let mut transform = Value::Null;
    let mut bbox = Value::Null;

    for (name, mut document) in documents {
        let doc = document
            .as_object_mut()
            .ok_or(RenderError::MalformedLayerDocument)?;
        if transform.is_null() {
            transform = doc.get("transform").cloned().unwrap_or(Value::Null);
            bbox = doc.get("bbox").cloned().unwrap_or(Value::Null);
        }

        let mut object = doc
            .get_mut("objects")
            .and_then(Value::as_object_mut)
            .and_then(|objects| objects.remove(OBJECT_KEY))
            .ok_or(RenderError::MalformedLayerDocument)?;
        let document_arcs = match doc.remove("arcs") {
            Some(Value::Array(arcs)) => arcs,
            _ => return Err(RenderError::MalformedLayerDocument),
        };

        rebase_arc_indexes(&mut object, arcs.len() as i64);
        arcs.extend(document_arcs);
        objects.insert(name, object);
    }

    let topology = json!({
        "type": "Topology",
        "bbox": bbox,
        "transform": transform,
        "objects": objects,
        "arcs": arcs,
    });
    serde_json::to_writer(out, &topology).map_err(RenderError::Json)
}

struct Transform {
    scale: (f64, f64),
    translate: (f64, f64),
}

impl Transform {
    fn new(bounds: [f64; 4]) -> Self {
        let grid = f64::from(QUANTIZATION - 1);
        Self {
            scale: ((bounds[2] - bounds[0]) / grid, (bounds[3] - bounds[1]) / grid),
            translate: (bounds[0], bounds[1]),
        }
    }

    #[expect(clippy::cast_possible_truncation)]
    fn quantize(&self, coord: Coord<f64>) -> (i64, i64) {
        (
            ((coord.x - self.translate.0) / self.scale.0).round() as i64,
            ((coord.y - self.translate.1) / self.scale.1).round() as i64,
        )
    }
}

struct Arcs {
    transform: Transform,
    arcs: Vec<Value>,
}

impl Arcs {
    fn new(transform: Transform) -> Self {
        Self {
            transform,
            arcs: Vec::new(),
        }
    }

    /// Store one arc: first position absolute on the grid, the rest deltas.
    fn add(&mut self, points: &[Coord<f64>]) -> usize {
        let mut encoded = Vec::with_capacity(points.len());
        let (mut px, mut py) = self.transform.quantize(points[0]);
        encoded.push(json!([px, py]));
        for point in &points[1..] {
            let (qx, qy) = self.transform.quantize(*point);
            encoded.push(json!([qx - px, qy - py]));
            px = qx;
            py = qy;
        }
        self.arcs.push(Value::Array(encoded));
        self.arcs.len() - 1
    }
}

fn layer_object(features: &[Feature], arcs: &mut Arcs) -> Result<Value, RenderError> {
    let mut geometries = Vec::with_capacity(features.len());
    for feature in features {
        let shape = feature.shape()?;
        if let Some(mut geometry) = topo_geometry(&shape, arcs) {
            if !feature.id.is_null() {
                geometry.insert("id".to_string(), feature.id.clone());
            }
            geometry.insert(
                "properties".to_string(),
                Value::Object(feature.properties.clone()),
            );
            geometries.push(Value::Object(geometry));
        }
    }
    Ok(json!({
        "type": "GeometryCollection",
        "geometries": geometries,
    }))
}

fn topo_geometry(shape: &Geometry<f64>, arcs: &mut Arcs) -> Option<Map<String, Value>> {
    let mut geometry = Map::new();
    match shape {
        Geometry::Point(point) => {
            let (qx, qy) = arcs.transform.quantize(point.0);
            geometry.insert("type".to_string(), json!("Point"));
            geometry.insert("coordinates".to_string(), json!([qx, qy]));
        }
        Geometry::MultiPoint(points) => {
            if points.0.is_empty() {
                return None;
            }
            let coordinates: Vec<_> = points
                .iter()
                .map(|p| {
                    let (qx, qy) = arcs.transform.quantize(p.0);
                    json!([qx, qy])
                })
                .collect();
            geometry.insert("type".to_string(), json!("MultiPoint"));
            geometry.insert("coordinates".to_string(), json!(coordinates));
        }
        Geometry::LineString(line) => {
            geometry.insert("type".to_string(), json!("LineString"));
            geometry.insert("arcs".to_string(), json!([line_arc(line, arcs)?]));
        }
        Geometry::MultiLineString(lines) => {
            let indexes: Vec<_> = lines
                .iter()
                .filter_map(|line| line_arc(line, arcs))
                .map(|i| json!([i]))
                .collect();
            if indexes.is_empty() {
                return None;
            }
            geometry.insert("type".to_string(), json!("MultiLineString"));
            geometry.insert("arcs".to_string(), json!(indexes));
        }
        Geometry::Polygon(polygon) => {
            let rings = polygon_arcs(polygon, arcs)?;
            geometry.insert("type".to_string(), json!("Polygon"));
            geometry.insert("arcs".to_string(), json!(rings));
        }
        Geometry::MultiPolygon(polygons) => {
            let rings: Vec<_> = polygons
                .iter()
                .filter_map(|polygon| polygon_arcs(polygon, arcs))
                .collect();
            if rings.is_empty() {
                return None;
            }
            geometry.insert("type".to_string(), json!("MultiPolygon"));
            geometry.insert("arcs".to_string(), json!(rings));
        }
        _ => return None,
    }
    Some(geometry)
}

fn line_arc(line: &LineString<f64>, arcs: &mut Arcs) -> Option<usize> {
    (line.0.len() >= 2).then(|| arcs.add(&line.0))
}

fn polygon_arcs(polygon: &Polygon<f64>, arcs: &mut Arcs) -> Option<Vec<Value>> {
    if polygon.exterior().0.len() < 2 {
        return None;
    }
    let mut rings = vec![json!([arcs.add(&polygon.exterior().0)])];
    rings.extend(
        polygon
            .interiors()
            .iter()
            .filter_map(|ring| line_arc(ring, arcs))
            .map(|i| json!([i])),
    );
    Some(rings)
}

fn write_topology(
    out: &mut Vec<u8>,
    objects: &Map<String, Value>,
    arcs: &Arcs,
    bounds: [f64; 4],
) -> Result<(), RenderError> {
    let topology = json!({
        "type": "Topology",
        "bbox": bounds,
        "transform": {
            "scale": [arcs.transform.scale.0, arcs.transform.scale.1],
            "translate": [arcs.transform.translate.0, arcs.transform.translate.1],
        },
        "objects": objects,
        "arcs": arcs.arcs,
    });
    serde_json::to_writer(out, &topology).map_err(RenderError::Json)
}

/// Shift every arc index in a geometry tree by `offset`. Only non-negative
/// indexes exist here; the encoder never writes reversed-arc references.
fn rebase_arc_indexes(value: &mut Value, offset: i64) {
    if let Some(object) = value.as_object_mut() {
        if let Some(geometries) = object.get_mut("geometries").and_then(Value::as_array_mut) {
            for geometry in geometries {
                rebase_arc_indexes(geometry, offset);
            }
        }
        if let Some(arcs) = object.get_mut("arcs") {
            bump_indexes(arcs, offset);
        }
    }
}

fn bump_indexes(value: &mut Value, offset: i64) {
    match value {
        Value::Array(items) => {
            for item in items {
                bump_indexes(item, offset);
            }
        }
        Value::Number(n) => {
            if let Some(index) = n.as_i64() {
                *value = json!(index + offset);
            }
        }
        _ => {}
    }
}
