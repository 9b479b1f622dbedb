//! The JSON configuration document and its resolution into a service.
//!
//! Plugin references (`transform_fns`, `sort_fn`, `query_fn`, external
//! cache classes) are names resolved against a [`Registry`] the embedding
//! host filled beforehand.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{Cache, DirScheme, DiskCache};
use crate::error::{TilegenError, TilegenResult};
use crate::layer::{Layer, Simplify, compose_transforms};
use crate::pg::{PgPool, PgProvider};
use crate::plugin::Registry;
use crate::service::{LayerSet, TileService};

#[derive(Debug, Deserialize)]
pub struct ConfigDocument {
    pub provider: ProviderDocument,
    pub cache: CacheDocument,
    /// Layer definitions; object order is the merge order of `all` tiles.
    #[serde(default)]
    pub layers: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderDocument {
    /// libpq-style connection parameters (`host`, `port`, `user`, ...).
    #[serde(default)]
    pub dbinfo: BTreeMap<String, Value>,
    pub pool_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CacheDocument {
    Builtin(BuiltinCacheDocument),
    External(ExternalCacheDocument),
}

#[derive(Debug, Deserialize)]
pub struct BuiltinCacheDocument {
    pub name: String,
    pub path: PathBuf,
    /// Octal permission mask string, e.g. `"0022"`.
    pub umask: Option<String>,
    pub dirs: Option<DirScheme>,
    pub gzip: Option<Vec<String>>,
    /// Seconds after which an abandoned lock may be broken.
    pub stale_lock_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ExternalCacheDocument {
    pub class: String,
    #[serde(default)]
    pub kwargs: Value,
}

#[derive(Debug, Deserialize)]
pub struct LayerDocument {
    #[serde(default)]
    pub queries: Vec<Option<String>>,
    pub query_fn: Option<String>,
    #[serde(default = "default_srid")]
    pub srid: i32,
    #[serde(default = "default_dim")]
    pub dim: u32,
    #[serde(default = "default_clip")]
    pub clip: bool,
    pub simplify: Option<SimplifyDocument>,
    pub geometry_types: Option<Vec<String>>,
    #[serde(default)]
    pub transform_fns: Vec<String>,
    pub sort_fn: Option<String>,
}

fn default_srid() -> i32 {
    3857
}

fn default_dim() -> u32 {
    256
}

fn default_clip() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SimplifyDocument {
    /// Tolerance in pixels, applied at every zoom.
    Pixels(f64),
    /// Zoom to tolerance-in-projected-units, keys as JSON strings.
    PerZoom(BTreeMap<String, f64>),
}

impl ConfigDocument {
    pub fn from_path(path: &Path) -> TilegenResult<Self> {
        let text =
            fs::read(path).map_err(|e| TilegenError::ConfigLoad(e, path.to_path_buf()))?;
        serde_json::from_slice(&text).map_err(|e| TilegenError::ConfigParse(e, path.to_path_buf()))
    }
}

/// Resolve a parsed document against a plugin registry into a service.
///
/// `base_dir` anchors query file references, usually the config file's
/// directory.
pub fn build_service(
    document: ConfigDocument,
    registry: &Registry,
    base_dir: &Path,
) -> TilegenResult<TileService> {
    let dbinfo = stringify_dbinfo(document.provider.dbinfo)?;
    let pool = PgPool::new(&dbinfo, document.provider.pool_size)?;
    let provider = PgProvider::new(pool);
    let cache = build_cache(document.cache, registry)?;
    let layers = build_layers(document.layers, registry, base_dir)?;
    if layers.is_empty() {
        warn!("No layers configured; every tile request will fail");
    } else {
        info!("Configured {} layer(s)", layers.len());
    }
    Ok(TileService::new(provider, cache, LayerSet::new(layers)))
}

fn stringify_dbinfo(dbinfo: BTreeMap<String, Value>) -> TilegenResult<BTreeMap<String, String>> {
    dbinfo
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(TilegenError::InvalidConfig(format!(
                        "dbinfo parameter {key} has unsupported value {other}"
                    )));
                }
            };
            Ok((key, value))
        })
        .collect()
}

fn build_cache(document: CacheDocument, registry: &Registry) -> TilegenResult<Box<dyn Cache>> {
    match document {
        CacheDocument::Builtin(doc) => {
            if !doc.name.eq_ignore_ascii_case("disk") {
                return Err(TilegenError::UnknownCache(doc.name));
            }
            let mut cache = DiskCache::new(doc.path);
            if let Some(umask) = &doc.umask {
                cache = cache.with_umask(parse_umask(umask)?);
            }
            if let Some(dirs) = doc.dirs {
                cache = cache.with_dirs(dirs);
            }
            if let Some(gzip) = doc.gzip {
                cache = cache.with_gzip(gzip);
            }
            if let Some(seconds) = doc.stale_lock_timeout {
                cache = cache.with_stale_lock_timeout(Duration::from_secs(seconds));
            }
            Ok(Box::new(cache))
        }
        CacheDocument::External(doc) => {
            let ctor = registry
                .cache(&doc.class)
                .ok_or_else(|| TilegenError::UnknownPlugin(doc.class.clone()))?;
            Ok(ctor(&doc.kwargs)?)
        }
    }
}

fn parse_umask(text: &str) -> TilegenResult<u32> {
    u32::from_str_radix(text, 8).map_err(|_| TilegenError::InvalidUmask(text.to_string()))
}

fn build_layers(
    documents: serde_json::Map<String, Value>,
    registry: &Registry,
    base_dir: &Path,
) -> TilegenResult<Vec<Arc<Layer>>> {
    let mut layers = Vec::with_capacity(documents.len());
    for (name, value) in documents {
        let document: LayerDocument = serde_json::from_value(value)
            .map_err(|e| TilegenError::InvalidConfig(format!("layer {name}: {e}")))?;
        layers.push(Arc::new(build_layer(name, document, registry, base_dir)?));
    }
    Ok(layers)
}

fn build_layer(
    name: String,
    document: LayerDocument,
    registry: &Registry,
    base_dir: &Path,
) -> TilegenResult<Layer> {
    let srid = document.srid;
    let mut layer = Layer::new(name.clone(), srid)
        .ok_or(TilegenError::UnsupportedSrid(name.clone(), srid))?;

    layer.queries = document
        .queries
        .into_iter()
        .map(|entry| entry.map(|entry| load_query(entry, base_dir)).transpose())
        .collect::<TilegenResult<_>>()?;
    layer.dim = document.dim;
    layer.clip = document.clip;

    if let Some(simplify) = document.simplify {
        layer.simplify = match simplify {
            SimplifyDocument::Pixels(pixels) => Simplify::Pixels(pixels),
            SimplifyDocument::PerZoom(map) => {
                let mut tolerances = BTreeMap::new();
                for (zoom, tolerance) in map {
                    let zoom = zoom.parse::<u8>().map_err(|_| {
                        TilegenError::InvalidConfig(format!(
                            "layer {name}: simplify zoom key {zoom:?} is not a zoom level"
                        ))
                    })?;
                    tolerances.insert(zoom, tolerance);
                }
                Simplify::PerZoom(tolerances)
            }
        };
    }

    layer.geometry_types = document
        .geometry_types
        .map(|types| types.into_iter().collect());

    if let Some(query_fn) = document.query_fn {
        layer.query_fn = Some(
            registry
                .query(&query_fn)
                .ok_or(TilegenError::UnknownPlugin(query_fn))?,
        );
    }

    let transforms = document
        .transform_fns
        .into_iter()
        .map(|fn_name| {
            registry
                .transform(&fn_name)
                .ok_or(TilegenError::UnknownPlugin(fn_name))
        })
        .collect::<TilegenResult<Vec<_>>>()?;
    layer.transform_fn = compose_transforms(transforms);

    if let Some(sort_fn) = document.sort_fn {
        layer.sort_fn = Some(
            registry
                .sort(&sort_fn)
                .ok_or(TilegenError::UnknownPlugin(sort_fn))?,
        );
    }

    Ok(layer)
}

/// A query entry may name a SQL file resolved against the config location;
/// anything else is used verbatim as SQL.
fn load_query(entry: String, base_dir: &Path) -> TilegenResult<String> {
    let candidate = base_dir.join(&entry);
    if candidate.is_file() {
        fs::read_to_string(&candidate).map_err(|e| TilegenError::ConfigLoad(e, candidate))
    } else {
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::layer::Simplify;

    fn registry() -> Registry {
        Registry::new()
    }

    fn parse_document(value: Value) -> ConfigDocument {
        serde_json::from_value(value).unwrap()
    }

    fn sample_document() -> Value {
        json!({
            "provider": { "dbinfo": { "host": "localhost", "port": 5432, "dbname": "gis" } },
            "cache": { "name": "disk", "path": "/tmp/tilegen-test-cache", "umask": "0022" },
            "layers": {
                "water": { "queries": ["SELECT way AS __geometry__ FROM water"] },
                "land": { "queries": [null, "SELECT way AS __geometry__ FROM land"],
                          "srid": 900913, "clip": false,
                          "simplify": {"0": 50.0, "4": 25.0},
                          "geometry_types": ["Polygon", "MultiPolygon"] },
                "roads": { "queries": ["SELECT way AS __geometry__ FROM roads"], "simplify": 0.5 }
            }
        })
    }

    #[test]
    fn layers_keep_config_insertion_order() {
        let document = parse_document(sample_document());
        let service = build_service(document, &registry(), Path::new(".")).unwrap();
        assert_eq!(service.layers().names(), vec!["water", "land", "roads"]);
    }

    #[test]
    fn layer_fields_resolve_with_defaults() {
        let document = parse_document(sample_document());
        let service = build_service(document, &registry(), Path::new(".")).unwrap();

        let water = service.layers().get("water").unwrap();
        assert_eq!(water.srid, 3857);
        assert!(water.clip);
        assert_eq!(water.simplify, Simplify::Pixels(1.0));

        let land = service.layers().get("land").unwrap();
        assert_eq!(land.srid, 900_913);
        assert!(!land.clip);
        assert_eq!(
            land.simplify,
            Simplify::PerZoom([(0, 50.0), (4, 25.0)].into_iter().collect())
        );
        assert!(land.geometry_types.as_ref().unwrap().contains("Polygon"));
        assert_eq!(land.query_for_zoom(0), None);

        let roads = service.layers().get("roads").unwrap();
        assert_eq!(roads.simplify, Simplify::Pixels(0.5));
    }

    #[test]
    fn unknown_plugin_names_are_rejected() {
        let document = parse_document(json!({
            "provider": { "dbinfo": {} },
            "cache": { "name": "disk", "path": "/tmp/c" },
            "layers": { "bad": { "queries": [], "sort_fn": "not_registered" } }
        }));
        let result = build_service(document, &registry(), Path::new("."));
        assert!(matches!(result, Err(TilegenError::UnknownPlugin(name)) if name == "not_registered"));
    }

    #[test]
    fn unknown_cache_name_is_rejected() {
        let document = parse_document(json!({
            "provider": { "dbinfo": {} },
            "cache": { "name": "memcache", "path": "/tmp/c" },
            "layers": {}
        }));
        assert!(matches!(
            build_service(document, &registry(), Path::new(".")),
            Err(TilegenError::UnknownCache(_))
        ));
    }

    #[test]
    fn bad_umask_is_rejected() {
        let document = parse_document(json!({
            "provider": { "dbinfo": {} },
            "cache": { "name": "disk", "path": "/tmp/c", "umask": "rw-r--r--" },
            "layers": {}
        }));
        assert!(matches!(
            build_service(document, &registry(), Path::new(".")),
            Err(TilegenError::InvalidUmask(_))
        ));
    }

    #[test]
    fn bad_srid_is_rejected() {
        let document = parse_document(json!({
            "provider": { "dbinfo": {} },
            "cache": { "name": "disk", "path": "/tmp/c" },
            "layers": { "utm": { "queries": [], "srid": 32633 } }
        }));
        assert!(matches!(
            build_service(document, &registry(), Path::new(".")),
            Err(TilegenError::UnsupportedSrid(name, 32_633)) if name == "utm"
        ));
    }

    #[test]
    fn query_files_are_loaded_relative_to_the_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("water.sql"), "SELECT way AS __geometry__ FROM w").unwrap();

        let loaded = load_query("water.sql".to_string(), dir.path()).unwrap();
        assert_eq!(loaded, "SELECT way AS __geometry__ FROM w");

        let verbatim = load_query("SELECT 1 AS __geometry__".to_string(), dir.path()).unwrap();
        assert_eq!(verbatim, "SELECT 1 AS __geometry__");
    }

    #[test]
    fn external_cache_goes_through_the_registry() {
        let mut registry = Registry::new();
        registry.register_cache(
            "memory",
            Arc::new(|_kwargs| {
                Ok(Box::new(DiskCache::new(std::env::temp_dir())) as Box<dyn Cache>)
            }),
        );
        let document = parse_document(json!({
            "provider": { "dbinfo": {} },
            "cache": { "class": "memory", "kwargs": {"capacity": 100} },
            "layers": {}
        }));
        assert!(build_service(document, &registry, Path::new(".")).is_ok());
    }
}
