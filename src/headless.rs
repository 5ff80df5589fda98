//! A [`GpuContext`] without a GPU.
//!
//! Uploads are copied into host memory and draws are recorded, so the renderer can run in tests and in environments
//! without a graphics device. Upload fences signal only after a configurable number of [`GpuContext::finish`] calls,
//! imitating a device that lags behind the render thread.

use crate::dither::{DitherWeights, RenderPass};
use crate::gpu::{FrameBindings, GpuContext, NumVolumes};
use crate::lookup_table::LookupTable;

use volstream_cache::source::{ResolutionLevel, SourceError};
use volstream_cache::{CacheSpec, TilePlacement, UploadQueue, VolumeId};
use volstream_core::glam::{UVec2, UVec3};
use volstream_core::SmallKeyHashMap;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeadlessFence {
    signals_after: u64,
}

/// A simple volume texture held in host memory.
#[derive(Clone, Debug)]
pub struct HeadlessTexture {
    pub dimensions: UVec3,
    pub data: Vec<u8>,
}

/// A render target that records what was presented into it.
#[derive(Clone, Debug, Default)]
pub struct HeadlessTarget {
    pub size: UVec2,
    /// Full-resolution passes drawn directly into the target.
    pub full_passes: usize,
    /// Step counts of every composite, in order.
    pub composites: Vec<u32>,
}

impl HeadlessTarget {
    pub fn new(size: UVec2) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }
}

/// The state of the last [`GpuContext::bind_volumes`].
#[derive(Clone, Debug, PartialEq)]
pub struct BoundVolumes {
    pub program: NumVolumes,
    pub cached: Vec<VolumeId>,
    pub simple: Vec<VolumeId>,
    pub min_world_voxel_size: f32,
}

pub struct HeadlessContext {
    spec: CacheSpec,
    upload_latency: u64,
    finished: u64,
    tiles: SmallKeyHashMap<UVec3, Vec<u8>>,
    lookup_tables: SmallKeyHashMap<usize, LookupTable>,
    pub programs_created: Vec<NumVolumes>,
    pub bound: Option<BoundVolumes>,
    /// Every pass drawn, in order.
    pub passes: Vec<RenderPass>,
    pub num_tile_uploads: usize,
    pub num_waits: usize,
    pub num_simple_uploads: usize,
    pub num_simple_frees: usize,
}

impl HeadlessContext {
    /// Upload fences signal immediately.
    pub fn new(spec: CacheSpec) -> Self {
        Self::with_upload_latency(spec, 0)
    }

    /// Upload fences signal after `upload_latency` calls of [`GpuContext::finish`].
    pub fn with_upload_latency(spec: CacheSpec, upload_latency: u64) -> Self {
        Self {
            spec,
            upload_latency,
            finished: 0,
            tiles: SmallKeyHashMap::default(),
            lookup_tables: SmallKeyHashMap::default(),
            programs_created: Vec::new(),
            bound: None,
            passes: Vec::new(),
            num_tile_uploads: 0,
            num_waits: 0,
            num_simple_uploads: 0,
            num_simple_frees: 0,
        }
    }

    /// Contents of the atlas tile at `grid_coords`, if anything was uploaded there.
    pub fn tile(&self, grid_coords: UVec3) -> Option<&[u8]> {
        self.tiles.get(&grid_coords).map(Vec::as_slice)
    }

    pub fn lookup_table(&self, index: usize) -> Option<&LookupTable> {
        self.lookup_tables.get(&index)
    }
}

impl UploadQueue for HeadlessContext {
    type Fence = HeadlessFence;

    fn upload_tiles(&mut self, data: &[u8], placements: &[TilePlacement]) -> HeadlessFence {
        let tile_bytes = self.spec.tile_bytes();
        for placement in placements {
            let start = placement.region * tile_bytes;
            self.tiles
                .insert(placement.grid_coords, data[start..start + tile_bytes].to_vec());
        }
        self.num_tile_uploads += placements.len();
        HeadlessFence {
            signals_after: self.finished + self.upload_latency,
        }
    }

    fn is_signaled(&self, fence: &HeadlessFence) -> bool {
        self.finished >= fence.signals_after
    }

    fn wait(&mut self, fence: &HeadlessFence) {
        self.num_waits += 1;
        self.finished = self.finished.max(fence.signals_after);
    }
}

impl GpuContext for HeadlessContext {
    type Program = NumVolumes;
    type Target = HeadlessTarget;
    type SimpleTexture = HeadlessTexture;

    fn create_program(&mut self, num_volumes: NumVolumes) -> NumVolumes {
        self.programs_created.push(num_volumes);
        num_volumes
    }

    fn upload_lookup_table(&mut self, index: usize, lut: &LookupTable) {
        self.lookup_tables.insert(index, lut.clone());
    }

    fn upload_simple_volume(&mut self, level: &dyn ResolutionLevel) -> Result<HeadlessTexture, SourceError> {
        let extent = level.extent();
        let mut data = vec![0; extent.volume() as usize * level.sample_type().bytes()];
        level.read_region(extent, &mut data)?;
        self.num_simple_uploads += 1;
        Ok(HeadlessTexture {
            dimensions: level.dimensions(),
            data,
        })
    }

    fn free_simple_volume(&mut self, _texture: HeadlessTexture) {
        self.num_simple_frees += 1;
    }

    fn bind_volumes<C>(&mut self, program: &NumVolumes, bindings: &FrameBindings<'_, HeadlessTexture, C>) {
        debug_assert_eq!(*program, bindings.num_volumes());
        self.bound = Some(BoundVolumes {
            program: *program,
            cached: bindings.cached.iter().map(|b| b.volume).collect(),
            simple: bindings.simple.iter().map(|b| b.volume).collect(),
            min_world_voxel_size: bindings.min_world_voxel_size,
        });
    }

    fn draw_pass(&mut self, _program: &NumVolumes, target: &mut HeadlessTarget, pass: &RenderPass) {
        if pass.stride == 1 {
            target.full_passes += 1;
        }
        self.passes.push(*pass);
    }

    fn composite(&mut self, target: &mut HeadlessTarget, weights: &DitherWeights) {
        target.composites.push(weights.steps_completed);
    }

    fn finish(&mut self) {
        self.finished += 1;
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
