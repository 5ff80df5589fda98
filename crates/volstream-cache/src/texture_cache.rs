use crate::{BlockKey, CacheSpec};

use itertools::Itertools;
use ndshape::{RuntimeShape, Shape};
use volstream_core::glam::UVec3;
use volstream_core::SmallKeyHashMap;

/// Index of a tile in the cache atlas.
pub type SlotIndex = u32;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotState {
    /// No block is stored.
    Free,
    /// A fill for the owning block is in flight. The tile is not usable yet.
    Pending,
    /// The owning block is uploaded and can be sampled.
    Resident,
}

/// A resident tile, as seen by lookup tables.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TileRef {
    pub slot: SlotIndex,
    /// Position of the tile in the atlas grid.
    pub grid_coords: UVec3,
}

/// A `Pending` slot handed out for filling one block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TileAssignment {
    pub key: BlockKey,
    pub slot: SlotIndex,
    pub grid_coords: UVec3,
    /// The block whose residency was dropped to make room, if any.
    pub evicted: Option<BlockKey>,
}

#[derive(Clone, Copy, Debug)]
struct Tile {
    key: Option<BlockKey>,
    state: SlotState,
    last_used: u64,
}

/// A fixed grid of equally sized tiles in one 3D atlas texture, holding the blocks currently resident on the GPU.
///
/// Only the render thread mutates the cache. Every frame starts with [`TextureCache::begin_frame`]; tiles touched
/// during the frame cannot be evicted before the next one, so the lookup tables built in a frame never reference a tile
/// that was reassigned in the same frame.
pub struct TextureCache {
    spec: CacheSpec,
    grid: UVec3,
    grid_shape: RuntimeShape<u32, 3>,
    tiles: Vec<Tile>,
    slots_by_key: SmallKeyHashMap<BlockKey, SlotIndex>,
    frame: u64,
    generation: u64,
    num_pending: usize,
}

impl TextureCache {
    pub fn new(grid: UVec3, spec: CacheSpec) -> Self {
        let grid = grid.max(UVec3::ONE);
        let grid_shape = RuntimeShape::<u32, 3>::new(grid.to_array());
        let capacity = grid_shape.size() as usize;
        Self {
            spec,
            grid,
            grid_shape,
            tiles: vec![
                Tile {
                    key: None,
                    state: SlotState::Free,
                    last_used: 0,
                };
                capacity
            ],
            slots_by_key: SmallKeyHashMap::default(),
            frame: 0,
            generation: 0,
            num_pending: 0,
        }
    }

    pub fn spec(&self) -> &CacheSpec {
        &self.spec
    }

    pub fn grid_size(&self) -> UVec3 {
        self.grid
    }

    /// Size of the atlas texture in texels.
    pub fn atlas_size(&self) -> UVec3 {
        self.grid * self.spec.padded_block_size()
    }

    pub fn capacity(&self) -> usize {
        self.tiles.len()
    }

    pub fn num_pending(&self) -> usize {
        self.num_pending
    }

    pub fn num_resident(&self) -> usize {
        self.slots_by_key.len() - self.num_pending
    }

    pub fn num_free(&self) -> usize {
        self.capacity() - self.slots_by_key.len()
    }

    /// Incremented whenever a resident block loses its tile.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn begin_frame(&mut self) -> u64 {
        self.frame += 1;
        self.frame
    }

    pub fn grid_coords(&self, slot: SlotIndex) -> UVec3 {
        UVec3::from(self.grid_shape.delinearize(slot))
    }

    pub fn slot_state(&self, slot: SlotIndex) -> SlotState {
        self.tiles[slot as usize].state
    }

    /// Returns the tile of `key` if it is resident. Pending tiles are never returned.
    pub fn get(&self, key: &BlockKey) -> Option<TileRef> {
        let &slot = self.slots_by_key.get(key)?;
        (self.tiles[slot as usize].state == SlotState::Resident).then(|| TileRef {
            slot,
            grid_coords: self.grid_coords(slot),
        })
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.slots_by_key.contains_key(key)
    }

    /// Marks `key` as used in the current frame. Returns `false` if it is not resident.
    pub fn touch(&mut self, key: &BlockKey) -> bool {
        match self.slots_by_key.get(key) {
            Some(&slot) if self.tiles[slot as usize].state == SlotState::Resident => {
                self.tiles[slot as usize].last_used = self.frame;
                true
            }
            _ => false,
        }
    }

    /// Assigns a `Pending` tile to each key in `keys`, preferring free tiles and then the least recently used
    /// resident tiles that were not touched in the current frame.
    ///
    /// Keys that already own a tile, and keys for which no tile can be freed, get `None`.
    pub fn assign_tiles(&mut self, keys: &[BlockKey]) -> Vec<Option<TileAssignment>> {
        let frame = self.frame;
        let mut candidates = self
            .tiles
            .iter()
            .enumerate()
            .filter(|(_, t)| match t.state {
                SlotState::Free => true,
                SlotState::Resident => t.last_used < frame,
                SlotState::Pending => false,
            })
            .map(|(i, t)| (t.state != SlotState::Free, t.last_used, i as SlotIndex))
            .sorted_unstable()
            .map(|(_, _, slot)| slot);

        keys.iter()
            .map(|&key| {
                if self.slots_by_key.contains_key(&key) {
                    return None;
                }
                let slot = candidates.next()?;
                let evicted = self.take_tile(slot);
                let tile = &mut self.tiles[slot as usize];
                tile.key = Some(key);
                tile.state = SlotState::Pending;
                tile.last_used = frame;
                self.slots_by_key.insert(key, slot);
                self.num_pending += 1;
                Some(TileAssignment {
                    key,
                    slot,
                    grid_coords: self.grid_coords(slot),
                    evicted,
                })
            })
            .collect()
    }

    /// The fill of `slot` completed and its upload was recorded; the block becomes visible to lookups.
    pub fn commit(&mut self, slot: SlotIndex) {
        let tile = &mut self.tiles[slot as usize];
        assert_eq!(tile.state, SlotState::Pending, "commit of a slot that is not pending");
        tile.state = SlotState::Resident;
        self.num_pending -= 1;
    }

    /// The fill of `slot` was abandoned; the tile becomes free again.
    pub fn release(&mut self, slot: SlotIndex) {
        let tile = self.tiles[slot as usize];
        assert_eq!(tile.state, SlotState::Pending, "release of a slot that is not pending");
        if let Some(key) = tile.key {
            self.slots_by_key.remove(&key);
        }
        self.tiles[slot as usize] = Tile {
            key: None,
            state: SlotState::Free,
            last_used: 0,
        };
        self.num_pending -= 1;
    }

    /// Drops the residency of `key`, e.g. because its source data changed. Returns `false` if it was not resident.
    pub fn evict(&mut self, key: &BlockKey) -> bool {
        match self.slots_by_key.get(key) {
            Some(&slot) if self.tiles[slot as usize].state == SlotState::Resident => {
                self.take_tile(slot);
                true
            }
            _ => false,
        }
    }

    /// Empties a free or resident tile, returning the evicted key.
    fn take_tile(&mut self, slot: SlotIndex) -> Option<BlockKey> {
        let tile = &mut self.tiles[slot as usize];
        debug_assert_ne!(tile.state, SlotState::Pending);
        let evicted = tile.key.take();
        tile.state = SlotState::Free;
        if let Some(key) = evicted {
            self.slots_by_key.remove(&key);
            self.generation += 1;
            log::trace!("Evicted {:?} from slot {}", key, slot);
        }
        evicted
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
