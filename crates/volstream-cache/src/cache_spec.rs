use serde::{Deserialize, Serialize};
use volstream_core::glam::UVec3;

/// The element type of source samples, which is also the texel format of the cache atlas.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum SampleType {
    U8,
    U16,
    F32,
}

impl SampleType {
    pub const fn bytes(self) -> usize {
        match self {
            SampleType::U8 => 1,
            SampleType::U16 => 2,
            SampleType::F32 => 4,
        }
    }
}

/// Describes the tiles of a [`TextureCache`](crate::TextureCache).
///
/// Every tile holds one block plus `padding` voxels of its neighbours on each side, so that the shader can
/// interpolate across block borders without touching another tile.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CacheSpec {
    pub format: SampleType,
    pub block_size: UVec3,
    pub padding: UVec3,
}

impl CacheSpec {
    pub fn new(format: SampleType, block_size: UVec3) -> Self {
        Self {
            format,
            block_size,
            padding: UVec3::ONE,
        }
    }

    pub fn padded_block_size(&self) -> UVec3 {
        self.block_size + 2 * self.padding
    }

    pub fn voxels_per_tile(&self) -> usize {
        let s = self.padded_block_size();
        s.x as usize * s.y as usize * s.z as usize
    }

    pub fn tile_bytes(&self) -> usize {
        self.voxels_per_tile() * self.format.bytes()
    }
}

/// Finds a grid of tiles that uses at most `max_bytes` of texture memory, with no atlas edge longer than
/// `max_texture_extent` texels.
///
/// The grid is as close to a cube as possible: `z` is filled last, so the result is deterministic for a given input. A
/// budget that does not fit a single tile still yields a `1x1x1` grid.
pub fn find_suitable_grid_size(spec: &CacheSpec, max_bytes: u64, max_texture_extent: u32) -> UVec3 {
    let padded = spec.padded_block_size();
    let max_tiles = (max_bytes / spec.tile_bytes() as u64).max(1);
    let max_dims = (UVec3::splat(max_texture_extent) / padded).max(UVec3::ONE);

    let side = (max_tiles as f64).cbrt().floor().max(1.0) as u32;
    let x = side.min(max_dims.x);
    let y = side.min(max_dims.y).min((max_tiles / x as u64).max(1) as u32);
    let z = ((max_tiles / (x as u64 * y as u64)).max(1) as u32).min(max_dims.z);

    UVec3::new(x, y, z)
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tile_bytes_include_padding() {
        let spec = CacheSpec::new(SampleType::U16, UVec3::splat(32));
        assert_eq!(spec.padded_block_size(), UVec3::splat(34));
        assert_eq!(spec.tile_bytes(), 34 * 34 * 34 * 2);
    }

    #[test]
    fn grid_fits_budget() {
        let spec = CacheSpec::new(SampleType::U16, UVec3::splat(32));
        let budget = 300 * 1024 * 1024;
        let grid = find_suitable_grid_size(&spec, budget, 2048);
        let tiles = grid.x as u64 * grid.y as u64 * grid.z as u64;
        assert!(tiles * spec.tile_bytes() as u64 <= budget);
        assert!((grid * spec.padded_block_size()).cmple(UVec3::splat(2048)).all());
        // Deterministic for identical inputs.
        assert_eq!(grid, find_suitable_grid_size(&spec, budget, 2048));
        // 300 MB holds 4001 tiles of 34^3 u16: 15x15 layers, 17 deep.
        assert_eq!(grid, UVec3::new(15, 15, 17));
    }

    #[test]
    fn tiny_budget_still_has_one_tile() {
        let spec = CacheSpec::new(SampleType::F32, UVec3::splat(64));
        assert_eq!(find_suitable_grid_size(&spec, 10, 2048), UVec3::ONE);
    }
}
