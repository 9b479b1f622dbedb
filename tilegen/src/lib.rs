#![doc = include_str!("../README.md")]

pub mod cache;
pub mod config;
pub mod feature;
pub mod layer;
pub mod logging;
pub mod pg;
pub mod plugin;
pub mod render;
pub mod service;
pub mod srv;

mod error;
pub use error::{TilegenError, TilegenResult};
