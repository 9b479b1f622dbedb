//! The tile service: cache-or-render with per-key locking.

use std::sync::Arc;

use tilegen_tile_utils::{Format, TileCoord};
use tracing::{error, warn};

use crate::cache::{Cache, CacheKey};
use crate::error::{TilegenError, TilegenResult};
use crate::layer::Layer;
use crate::pg::PgProvider;
use crate::render;

/// Sentinel layer name rendering every configured layer into one tile.
pub const ALL_LAYERS: &str = "all";

/// Configured layers, kept in config insertion order.
pub struct LayerSet {
    layers: Vec<Arc<Layer>>,
}

impl LayerSet {
    #[must_use]
    pub fn new(layers: Vec<Arc<Layer>>) -> Self {
        Self { layers }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Layer>> {
        self.layers.iter().find(|layer| layer.name == name)
    }

    #[must_use]
    pub fn all(&self) -> &[Arc<Layer>] {
        &self.layers
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Everything a request needs: the database provider, the cache and the
/// layer catalog. Read-only after construction.
pub struct TileService {
    provider: PgProvider,
    cache: Box<dyn Cache>,
    layers: LayerSet,
}

enum Target<'a> {
    One(&'a Arc<Layer>),
    All,
}

impl TileService {
    #[must_use]
    pub fn new(provider: PgProvider, cache: Box<dyn Cache>, layers: LayerSet) -> Self {
        Self {
            provider,
            cache,
            layers,
        }
    }

    #[must_use]
    pub fn layers(&self) -> &LayerSet {
        &self.layers
    }

    #[must_use]
    pub fn cache(&self) -> &dyn Cache {
        self.cache.as_ref()
    }

    /// Fetch or render one tile; returns the content type and the bytes.
    ///
    /// The cache lock for the key is held for the whole read-render-save
    /// span and released on every exit path. A failing cache read degrades
    /// to a fresh render; a failing save degrades to an uncached response.
    pub async fn get_tile(
        &self,
        layer_name: &str,
        coord: TileCoord,
        ext: &str,
        ignore_cached: bool,
    ) -> TilegenResult<(&'static str, Vec<u8>)> {
        let format = Format::parse(ext)
            .ok_or_else(|| TilegenError::UnsupportedExtension(ext.to_string()))?;
        let target = if layer_name == ALL_LAYERS {
            Target::All
        } else {
            Target::One(
                self.layers
                    .get(layer_name)
                    .ok_or_else(|| TilegenError::UnknownLayer(layer_name.to_string()))?,
            )
        };

        let key = CacheKey {
            layer: layer_name,
            coord,
            format,
        };
        self.cache.lock(&key)?;
        let _guard = UnlockGuard {
            cache: self.cache.as_ref(),
            key: &key,
        };

        let cached = if ignore_cached {
            None
        } else {
            match self.cache.read(&key) {
                Ok(body) => body,
                Err(e) => {
                    warn!("Cache read failed for {layer_name}/{coord:#}.{format}: {e}");
                    None
                }
            }
        };

        let body = match cached {
            Some(body) => body,
            None => {
                let body = match target {
                    Target::One(layer) => {
                        render::render_tile(&self.provider, layer, coord, format).await?
                    }
                    Target::All => {
                        render::render_tiles(&self.provider, self.layers.all(), coord, format)
                            .await?
                    }
                };
                if let Err(e) = self.cache.save(&body, &key) {
                    // the render is still good, it just will not be cached
                    error!("Cache save failed for {layer_name}/{coord:#}.{format}: {e}");
                }
                body
            }
        };

        Ok((format.content_type(), body))
    }
}

/// Releases the cache lock on every exit path.
struct UnlockGuard<'a> {
    cache: &'a dyn Cache,
    key: &'a CacheKey<'a>,
}

impl Drop for UnlockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.cache.unlock(self.key) {
            error!("Failed to release cache lock: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn layer(name: &str) -> Arc<Layer> {
        Arc::new(Layer::new(name, 3857).expect("srid"))
    }

    #[test]
    fn layer_set_is_ordered_and_searchable() {
        let set = LayerSet::new(vec![layer("water"), layer("land"), layer("roads")]);
        assert_eq!(set.names(), vec!["water", "land", "roads"]);
        assert_eq!(set.len(), 3);
        assert!(set.get("land").is_some());
        assert!(set.get("rails").is_none());
    }
}
