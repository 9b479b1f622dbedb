//! Tile caches: the storage trait and the built-in disk implementation.

mod disk;
pub use disk::{DirScheme, DiskCache};

use std::path::PathBuf;

use tilegen_tile_utils::{Format, TileCoord};

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O failure at {1}: {0}")]
    Io(#[source] std::io::Error, PathBuf),

    #[error("Invalid cache configuration: {0}")]
    Config(String),
}

/// Identity of a cached tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey<'a> {
    pub layer: &'a str,
    pub coord: TileCoord,
    pub format: Format,
}

/// A tile byte store shared by every worker and process.
///
/// `lock`/`unlock` bracket a potential render so at most one writer builds
/// a given tile at a time; for file-backed implementations the exclusion
/// holds across processes.
pub trait Cache: Send + Sync {
    /// Block until this key's lock is held by the caller.
    fn lock(&self, key: &CacheKey<'_>) -> CacheResult<()>;

    /// Release a lock taken by [`Cache::lock`].
    fn unlock(&self, key: &CacheKey<'_>) -> CacheResult<()>;

    /// Cached bytes, or `None` when the tile has not been stored.
    fn read(&self, key: &CacheKey<'_>) -> CacheResult<Option<Vec<u8>>>;

    /// Store rendered bytes. Concurrent readers observe either the previous
    /// complete entry or the new one, never a partial write.
    fn save(&self, body: &[u8], key: &CacheKey<'_>) -> CacheResult<()>;

    /// Drop a stored entry; absence is not an error.
    fn remove(&self, key: &CacheKey<'_>) -> CacheResult<()>;
}
