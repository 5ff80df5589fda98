use crate::source::{ResolutionLevel, SourceError};
use crate::{CacheSpec, SampleType};

use ndshape::{RuntimeShape, Shape};
use std::cell::RefCell;
use thread_local::ThreadLocal;
use volstream_core::extent::Extent3i;
use volstream_core::glam::IVec3;

/// Whether blocks of `sample_type` can be tiled into a cache of `spec`'s format.
pub fn is_supported_type(spec: &CacheSpec, sample_type: SampleType) -> bool {
    spec.format == sample_type
}

/// The voxel region of `level` that is copied into the tile of block `block_coords`, including padding.
pub fn padded_block_extent(spec: &CacheSpec, block_coords: IVec3) -> Extent3i {
    let block_size = spec.block_size.as_ivec3();
    Extent3i::from_min_and_shape(
        block_coords * block_size - spec.padding.as_ivec3(),
        spec.padded_block_size().as_ivec3(),
    )
}

/// Copies the padded region of one block into `tile`.
///
/// Voxels outside the level are zero. Regions that straddle the level bounds are read through a per-thread scratch
/// buffer, so workers never allocate in the steady state.
pub struct TileAccess {
    scratch: ThreadLocal<RefCell<Vec<u8>>>,
}

impl Default for TileAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl TileAccess {
    pub fn new() -> Self {
        Self {
            scratch: ThreadLocal::new(),
        }
    }

    pub fn fill_tile(
        &self,
        spec: &CacheSpec,
        level: &dyn ResolutionLevel,
        block_coords: IVec3,
        tile: &mut [u8],
    ) -> Result<(), SourceError> {
        let sample_bytes = spec.format.bytes();
        if tile.len() != spec.tile_bytes() {
            return Err(SourceError::BufferSize {
                expected: spec.tile_bytes(),
                found: tile.len(),
            });
        }

        let padded = padded_block_extent(spec, block_coords);
        let inside = padded.intersection(&level.extent());

        if inside == padded {
            return level.read_region(padded, tile);
        }

        tile.fill(0);
        if inside.is_empty() {
            return Ok(());
        }

        let mut scratch = self
            .scratch
            .get_or(|| RefCell::new(Vec::new()))
            .borrow_mut();
        scratch.clear();
        scratch.resize(inside.volume() as usize * sample_bytes, 0);
        level.read_region(inside, &mut scratch)?;

        // Scatter rows of the inner region into the padded tile.
        let tile_shape = RuntimeShape::<u32, 3>::new(padded.shape.as_uvec3().to_array());
        let inside_shape = RuntimeShape::<u32, 3>::new(inside.shape.as_uvec3().to_array());
        let row_bytes = inside.shape.x as usize * sample_bytes;
        let offset = inside.minimum - padded.minimum;
        for z in 0..inside.shape.z {
            for y in 0..inside.shape.y {
                let src = inside_shape.linearize([0, y as u32, z as u32]) as usize * sample_bytes;
                let dst = tile_shape.linearize([
                    offset.x as u32,
                    (offset.y + y) as u32,
                    (offset.z + z) as u32,
                ]) as usize
                    * sample_bytes;
                tile[dst..dst + row_bytes].copy_from_slice(&scratch[src..src + row_bytes]);
            }
        }
        Ok(())
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
