//! Interactive rendering of very large multi-resolution volumes.
//!
//! Only the blocks needed for the current view are kept on the GPU, in a fixed-size texture cache. Missing blocks are
//! filled in parallel within a per-frame time budget, and the remaining latency is hidden by progressive, dithered
//! accumulation of samples across frames. See [`VolumeRenderer`] for the per-frame protocol.

mod admission;
mod config;
mod dither;
mod error;
mod gpu;
mod headless;
mod lookup_table;
mod program;
mod renderer;
mod repaint;
mod simple_stacks;
mod volume_blocks;

pub use admission::{admit, AdmissionReport};
pub use config::{DitherConfig, RendererConfig};
pub use dither::{DitherPattern, DitherProgress, DitherSample, DitherWeights, RenderPass};
pub use error::{ConfigError, RenderError};
pub use gpu::{CachedBinding, FrameBindings, GpuContext, NumVolumes, SimpleBinding};
pub use headless::{BoundVolumes, HeadlessContext, HeadlessFence, HeadlessTarget, HeadlessTexture};
pub use lookup_table::{LookupTable, LutEntry};
pub use program::ProgramCache;
pub use renderer::{FrameStats, VolumeRenderer};
pub use repaint::{Repaint, RepaintType};
pub use simple_stacks::{SimpleStackManager, SimpleVolume};
pub use volume_blocks::{RequiredBlock, VolumeBlocks};

// Re-exports.
pub use volstream_cache;
pub use volstream_core;
