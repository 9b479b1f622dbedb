use std::io;
use std::path::PathBuf;

use crate::cache::CacheError;
use crate::feature::FeatureError;
use crate::pg::PgError;
use crate::render::RenderError;

/// A convenience [`Result`] for the tilegen crate.
pub type TilegenResult<T> = Result<T, TilegenError>;

#[derive(thiserror::Error, Debug)]
pub enum TilegenError {
    #[error("Layer not found: {0}")]
    UnknownLayer(String),

    #[error("Unsupported tile extension: {0}")]
    UnsupportedExtension(String),

    #[error("Unknown cache: {0}")]
    UnknownCache(String),

    #[error("Unknown plugin referenced from config: {0}")]
    UnknownPlugin(String),

    #[error("Invalid umask {0:?}: expected an octal string like \"0022\"")]
    InvalidUmask(String),

    #[error("Layer {0} uses SRID {1}, which is not a supported tile scheme (3857, 900913 or 4326)")]
    UnsupportedSrid(String, i32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unable to load config file {1}: {0}")]
    ConfigLoad(#[source] io::Error, PathBuf),

    #[error("Unable to parse config file {1}: {0}")]
    ConfigParse(#[source] serde_json::Error, PathBuf),

    #[error("Unable to bind to {1}: {0}")]
    Binding(#[source] io::Error, String),

    #[error(transparent)]
    Postgres(#[from] PgError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Io(#[from] io::Error),
}
