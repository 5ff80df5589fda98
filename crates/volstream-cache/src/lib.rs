//! Streaming of volume blocks into a fixed-size GPU texture cache.
//!
//! Blocks of multi-resolution volumes are filled on worker threads, written into pipelined staging buffers, and
//! uploaded into the tiles of a 3D atlas texture managed by [`TextureCache`].

mod block_key;
mod cache_spec;
mod config;
mod fill;
mod staging;
mod texture_cache;
mod tile_access;
mod worker_pool;

pub mod source;

pub use block_key::*;
pub use cache_spec::*;
pub use config::*;
pub use fill::*;
pub use staging::*;
pub use texture_cache::*;
pub use tile_access::*;
pub use worker_pool::*;

// Re-exports.
pub use rayon::ThreadPoolBuildError;
pub use volstream_core;
