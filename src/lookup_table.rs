use bytemuck::{Pod, Zeroable};
use ndshape::{RuntimeShape, Shape};
use volstream_cache::TextureCache;
use volstream_core::extent::Extent3i;
use volstream_core::glam::{IVec3, UVec3};
use volstream_core::static_assertions::const_assert_eq;

/// One texel of a lookup texture: where the block of a base-level cell lives in the atlas.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Pod, Zeroable)]
pub struct LutEntry {
    /// Atlas grid coordinates of the tile.
    pub tile: [u16; 3],
    /// Resolution level of the block in the tile. [`LutEntry::UNMAPPED_LEVEL`] if there is none.
    pub level: u16,
}

const_assert_eq!(std::mem::size_of::<LutEntry>(), 8);

impl LutEntry {
    pub const UNMAPPED_LEVEL: u16 = u16::MAX;

    pub const UNMAPPED: Self = Self {
        tile: [0; 3],
        level: Self::UNMAPPED_LEVEL,
    };

    pub fn new(tile: UVec3, level: u8) -> Self {
        Self {
            tile: [tile.x as u16, tile.y as u16, tile.z as u16],
            level: level as u16,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.level != Self::UNMAPPED_LEVEL
    }

    pub fn tile(&self) -> UVec3 {
        UVec3::new(self.tile[0] as u32, self.tile[1] as u32, self.tile[2] as u32)
    }
}

/// Maps the base-level block cells of one volume to atlas tiles.
#[derive(Clone, Debug)]
pub struct LookupTable {
    base_level: u8,
    /// Covered base-level block cells.
    cells: Extent3i,
    entries: Vec<LutEntry>,
    cache_generation: u64,
}

impl Default for LookupTable {
    fn default() -> Self {
        Self::empty(0, 0)
    }
}

impl LookupTable {
    pub fn empty(base_level: u8, cache_generation: u64) -> Self {
        Self {
            base_level,
            cells: Extent3i::EMPTY,
            entries: Vec::new(),
            cache_generation,
        }
    }

    pub(crate) fn new_unmapped(base_level: u8, cells: Extent3i, cache_generation: u64) -> Self {
        Self {
            base_level,
            cells,
            entries: vec![LutEntry::UNMAPPED; cells.volume() as usize],
            cache_generation,
        }
    }

    pub fn base_level(&self) -> u8 {
        self.base_level
    }

    pub fn cells(&self) -> Extent3i {
        self.cells
    }

    pub fn size(&self) -> UVec3 {
        self.cells.shape.max(IVec3::ZERO).as_uvec3()
    }

    pub fn entries(&self) -> &[LutEntry] {
        &self.entries
    }

    /// Texel data for upload, in x-fastest order.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.entries)
    }

    fn index(&self, cell: IVec3) -> Option<usize> {
        if !self.cells.contains(cell) {
            return None;
        }
        let shape = RuntimeShape::<u32, 3>::new(self.size().to_array());
        Some(shape.linearize((cell - self.cells.minimum).as_uvec3().to_array()) as usize)
    }

    /// The entry of a base-level block cell. Cells outside the table are unmapped.
    pub fn get(&self, cell: IVec3) -> LutEntry {
        self.index(cell)
            .map_or(LutEntry::UNMAPPED, |i| self.entries[i])
    }

    pub(crate) fn set(&mut self, cell: IVec3, entry: LutEntry) {
        if let Some(i) = self.index(cell) {
            self.entries[i] = entry;
        }
    }

    pub fn cache_generation(&self) -> u64 {
        self.cache_generation
    }

    /// Whether a block was evicted from `cache` since this table was built.
    pub fn is_stale(&self, cache: &TextureCache) -> bool {
        self.cache_generation != cache.generation()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
