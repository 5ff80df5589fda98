//! The boundary between the renderer and a graphics API.
//!
//! Only the render thread calls into a [`GpuContext`]. Tile uploads go through its [`UploadQueue`] half, everything
//! else (lookup textures, simple volumes, shader programs and draws) through the methods below.

use crate::dither::{DitherWeights, RenderPass};
use crate::lookup_table::LookupTable;

use volstream_cache::source::{ResolutionLevel, SourceError};
use volstream_cache::{UploadQueue, VolumeId};
use volstream_core::glam::Mat4;

/// The number of volumes a shader program is generated for.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NumVolumes {
    /// Multi-resolution volumes sampled through the cache.
    pub cached: usize,
    /// Volumes sampled from their own texture.
    pub simple: usize,
}

impl NumVolumes {
    pub fn is_empty(&self) -> bool {
        self.cached == 0 && self.simple == 0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CachedBinding<'a, C> {
    pub volume: VolumeId,
    /// Index of the lookup texture last uploaded for this volume.
    pub lut_index: usize,
    pub base_level: usize,
    pub converter: &'a C,
}

#[derive(Clone, Copy, Debug)]
pub struct SimpleBinding<'a, T, C> {
    pub volume: VolumeId,
    pub texture: &'a T,
    pub source_to_world: Mat4,
    pub converter: &'a C,
}

/// Everything a program samples for one frame.
#[derive(Clone, Debug)]
pub struct FrameBindings<'a, T, C> {
    pub cached: Vec<CachedBinding<'a, C>>,
    pub simple: Vec<SimpleBinding<'a, T, C>>,
    /// The finest voxel size of all volumes, which sets the ray marching step.
    pub min_world_voxel_size: f32,
    pub pv: Mat4,
}

impl<'a, T, C> FrameBindings<'a, T, C> {
    pub fn num_volumes(&self) -> NumVolumes {
        NumVolumes {
            cached: self.cached.len(),
            simple: self.simple.len(),
        }
    }
}

pub trait GpuContext: UploadQueue {
    type Program;
    type Target;
    type SimpleTexture;

    /// Generates a shader program for the given number of volumes. Never called for zero volumes.
    fn create_program(&mut self, num_volumes: NumVolumes) -> Self::Program;

    /// Replaces lookup texture `index`.
    fn upload_lookup_table(&mut self, index: usize, lut: &LookupTable);

    fn upload_simple_volume(&mut self, level: &dyn ResolutionLevel) -> Result<Self::SimpleTexture, SourceError>;

    fn free_simple_volume(&mut self, texture: Self::SimpleTexture);

    fn bind_volumes<C>(&mut self, program: &Self::Program, bindings: &FrameBindings<'_, Self::SimpleTexture, C>);

    /// Renders one pass. Dithered passes render into the low-resolution buffer `pass.index`, full passes directly into
    /// `target`.
    fn draw_pass(&mut self, program: &Self::Program, target: &mut Self::Target, pass: &RenderPass);

    /// Reconstructs the full-resolution image in `target` from the dither buffers.
    fn composite(&mut self, target: &mut Self::Target, weights: &DitherWeights);

    /// Flushes submitted work, so that elapsed time reflects the work done so far.
    fn finish(&mut self);
}
