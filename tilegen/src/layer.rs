//! The layer model: what to query per zoom and how to post-process it.

use std::collections::{BTreeMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use geo_types::Geometry;
use serde_json::Value;
use tilegen_tile_utils::{Projection, pixel_tolerance};

use crate::feature::{Feature, Properties};

/// Transform applied to every feature: shape, properties and id in, the
/// same shape of tuple out.
pub type TransformFn =
    Arc<dyn Fn(Geometry<f64>, Properties, Value) -> (Geometry<f64>, Properties, Value) + Send + Sync>;

/// Reorders the fully read feature list before encoding.
pub type SortFn = Arc<dyn Fn(Vec<Feature>) -> Vec<Feature> + Send + Sync>;

/// Produces the SQL template for a zoom level. Takes precedence over the
/// static query list when both are configured.
pub type QueryFn = Arc<dyn Fn(u8) -> Option<String> + Send + Sync>;

/// Per-layer simplification amount.
#[derive(Debug, Clone, PartialEq)]
pub enum Simplify {
    /// Tolerance in pixels, scaled by the ground resolution of the
    /// requested zoom.
    Pixels(f64),
    /// Tolerance in projected units per zoom. The entry at the largest key
    /// not above the requested zoom wins; no such entry disables
    /// simplification.
    PerZoom(BTreeMap<u8, f64>),
}

impl Default for Simplify {
    fn default() -> Self {
        Self::Pixels(1.0)
    }
}

impl Simplify {
    #[must_use]
    pub fn tolerance(&self, zoom: u8) -> f64 {
        match self {
            Self::Pixels(pixels) => pixels * pixel_tolerance(zoom),
            Self::PerZoom(map) => map.range(..=zoom).next_back().map_or(0.0, |(_, t)| *t),
        }
    }
}

/// A configured layer. Immutable once the config is resolved.
pub struct Layer {
    pub name: String,
    /// SQL templates indexed by zoom. A null entry means an empty tile at
    /// that zoom; zooms past the end reuse the last non-null entry.
    pub queries: Vec<Option<String>>,
    pub query_fn: Option<QueryFn>,
    /// SRID spelled into generated SQL; 900913 is kept as configured.
    pub srid: i32,
    pub projection: Projection,
    /// Tile edge in pixels.
    pub dim: u32,
    /// Whether geometries are cut to the tile boundary.
    pub clip: bool,
    pub simplify: Simplify,
    /// Geometry type names to keep; `None` keeps everything.
    pub geometry_types: Option<HashSet<String>>,
    pub transform_fn: Option<TransformFn>,
    pub sort_fn: Option<SortFn>,
}

impl Debug for Layer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name)
            .field("srid", &self.srid)
            .field("queries", &self.queries.len())
            .finish()
    }
}

impl Layer {
    /// A layer with defaults for everything but the name. `None` when the
    /// SRID is not one of the supported tile schemes.
    #[must_use]
    pub fn new(name: impl Into<String>, srid: i32) -> Option<Self> {
        let projection = Projection::from_srid(srid)?;
        Some(Self {
            name: name.into(),
            queries: Vec::new(),
            query_fn: None,
            srid,
            projection,
            dim: 256,
            clip: true,
            simplify: Simplify::default(),
            geometry_types: None,
            transform_fn: None,
            sort_fn: None,
        })
    }

    /// The SQL template serving a zoom, if any.
    #[must_use]
    pub fn query_for_zoom(&self, zoom: u8) -> Option<String> {
        if let Some(query_fn) = &self.query_fn {
            return query_fn(zoom);
        }
        if usize::from(zoom) < self.queries.len() {
            self.queries[usize::from(zoom)].clone()
        } else {
            // past the end of the list, the last non-null entry is reused
            self.queries.iter().rev().find_map(Clone::clone)
        }
    }

    #[must_use]
    pub fn tolerance(&self, zoom: u8) -> f64 {
        self.simplify.tolerance(zoom)
    }
}

/// Compose a transform chain into a single function, applied left to right.
#[must_use]
pub fn compose_transforms(fns: Vec<TransformFn>) -> Option<TransformFn> {
    if fns.is_empty() {
        return None;
    }
    Some(Arc::new(move |mut shape, mut properties, mut id| {
        for f in &fns {
            let (s, p, i) = f(shape, properties, id);
            shape = s;
            properties = p;
            id = i;
        }
        (shape, properties, id)
    }))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn per_zoom(entries: &[(u8, f64)]) -> Simplify {
        Simplify::PerZoom(entries.iter().copied().collect())
    }

    #[rstest]
    #[case(0, 50.0)]
    #[case(3, 50.0)]
    #[case(4, 25.0)]
    #[case(18, 25.0)]
    fn per_zoom_tolerance_picks_largest_key_not_above(#[case] zoom: u8, #[case] expected: f64) {
        let simplify = per_zoom(&[(0, 50.0), (4, 25.0)]);
        assert_relative_eq!(simplify.tolerance(zoom), expected);
    }

    #[test]
    fn empty_per_zoom_map_disables_simplification() {
        assert_relative_eq!(per_zoom(&[]).tolerance(10), 0.0);
    }

    #[test]
    fn pixel_simplify_scales_with_ground_resolution() {
        let simplify = Simplify::Pixels(2.0);
        assert_relative_eq!(simplify.tolerance(3), 2.0 * pixel_tolerance(3));
    }

    #[test]
    fn query_selection_per_zoom() {
        let mut layer = Layer::new("roads", 3857).unwrap();
        layer.queries = vec![
            Some("SELECT 1".to_string()),
            None,
            Some("SELECT 2".to_string()),
        ];

        assert_eq!(layer.query_for_zoom(0).as_deref(), Some("SELECT 1"));
        // a null entry at a zoom means an empty tile at that zoom
        assert_eq!(layer.query_for_zoom(1), None);
        assert_eq!(layer.query_for_zoom(2).as_deref(), Some("SELECT 2"));
        // past the end of the list, the last non-null entry is reused
        assert_eq!(layer.query_for_zoom(5).as_deref(), Some("SELECT 2"));
    }

    #[test]
    fn all_null_queries_render_empty_everywhere() {
        let mut layer = Layer::new("empty", 3857).unwrap();
        layer.queries = vec![None, None];
        assert_eq!(layer.query_for_zoom(0), None);
        assert_eq!(layer.query_for_zoom(9), None);
    }

    #[test]
    fn query_fn_takes_precedence() {
        let mut layer = Layer::new("fn", 3857).unwrap();
        layer.queries = vec![Some("unused".to_string())];
        layer.query_fn = Some(Arc::new(|zoom| Some(format!("SELECT {zoom}"))));
        assert_eq!(layer.query_for_zoom(7).as_deref(), Some("SELECT 7"));
    }

    #[test]
    fn unsupported_srid_is_rejected() {
        assert!(Layer::new("bad", 2154).is_none());
        assert!(Layer::new("legacy", 900_913).is_some());
    }

    #[test]
    fn transforms_compose_left_to_right() {
        let add = |key: &'static str| -> TransformFn {
            Arc::new(move |shape, mut properties, id| {
                let next = properties.len();
                properties.insert(key.to_string(), json!(next));
                (shape, properties, id)
            })
        };
        let composed = compose_transforms(vec![add("first"), add("second")]).unwrap();

        let shape = Geometry::Point(geo_types::point! { x: 0.0, y: 0.0 });
        let (_, properties, _) = composed(shape, Properties::new(), Value::Null);
        assert_eq!(properties["first"], json!(0));
        assert_eq!(properties["second"], json!(1));
    }

    #[test]
    fn no_transforms_compose_to_none() {
        assert!(compose_transforms(Vec::new()).is_none());
    }
}
