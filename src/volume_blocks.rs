use crate::lookup_table::{LookupTable, LutEntry};

use float_ord::FloatOrd;
use smallvec::SmallVec;
use std::sync::Arc;
use volstream_cache::source::{MultiResolutionStack, ResolutionLevel};
use volstream_cache::{BlockKey, CacheSpec, FillTask, TextureCache, VolumeId};
use volstream_core::extent::Extent3i;
use volstream_core::geometry::{Aabb, Frustum, ScreenScale};
use volstream_core::glam::{IVec3, Mat4, Vec3};
use volstream_core::SmallKeyHashSet;

/// Slack for float error when mapping voxel boxes between levels.
const LEVEL_MAPPING_EPSILON: f32 = 1e-3;

/// A block that should be resident for the current view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RequiredBlock {
    pub level: u8,
    pub coords: IVec3,
    /// Conservative view depth of the block. Nearer blocks are loaded first.
    pub priority: f32,
}

#[derive(Clone, Copy, Debug)]
struct View {
    pv: Mat4,
    viewport_width: u32,
}

/// Selects the blocks of one multi-resolution volume that are needed to render it from the current view, and builds
/// the lookup table that addresses them in the cache.
///
/// Starting from the coarsest level, visible blocks are refined into the finer blocks they cover while a voxel would
/// span more than `max_voxel_pixels` on screen, but never below the base level. Admission control raises the base
/// level when the cache cannot hold every required block.
pub struct VolumeBlocks {
    spec: CacheSpec,
    max_voxel_pixels: f32,
    volume: VolumeId,
    levels: Vec<Arc<dyn ResolutionLevel>>,
    view: Option<View>,
    base_level: usize,
    required: Vec<RequiredBlock>,
    lut: LookupTable,
}

impl VolumeBlocks {
    pub fn new(spec: CacheSpec, max_voxel_pixels: f32) -> Self {
        Self {
            spec,
            max_voxel_pixels,
            volume: VolumeId(0),
            levels: Vec::new(),
            view: None,
            base_level: 0,
            required: Vec::new(),
            lut: LookupTable::default(),
        }
    }

    /// Selects blocks for a new view, resetting the base level to the finest level any visible block wants.
    pub fn init(&mut self, stack: &dyn MultiResolutionStack, viewport_width: u32, pv: &Mat4) {
        self.bind(stack, viewport_width, pv);
        self.base_level = 0;
        self.recompute();
        self.base_level = self
            .required
            .iter()
            .map(|b| b.level as usize)
            .min()
            .unwrap_or_else(|| self.max_level());
    }

    /// Selects blocks for `pv`, keeping the current base level.
    pub fn update(&mut self, stack: &dyn MultiResolutionStack, viewport_width: u32, pv: &Mat4) {
        self.bind(stack, viewport_width, pv);
        self.base_level = self.base_level.min(self.max_level());
        self.recompute();
    }

    fn bind(&mut self, stack: &dyn MultiResolutionStack, viewport_width: u32, pv: &Mat4) {
        self.volume = stack.volume_id();
        self.levels = stack.levels().iter().take(u8::MAX as usize).cloned().collect();
        self.view = Some(View {
            pv: *pv,
            viewport_width,
        });
    }

    pub fn volume_id(&self) -> VolumeId {
        self.volume
    }

    /// Whether [`VolumeBlocks::init`] or [`VolumeBlocks::update`] has been called.
    pub fn is_bound(&self) -> bool {
        self.view.is_some()
    }

    pub fn base_level(&self) -> usize {
        self.base_level
    }

    pub fn max_level(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    pub fn can_coarsen(&self) -> bool {
        self.base_level < self.max_level()
    }

    /// Changes the base level and recomputes the required blocks with the last view.
    pub fn set_base_level(&mut self, level: usize) {
        self.base_level = level.min(self.max_level());
        self.recompute();
    }

    pub fn num_required(&self) -> usize {
        self.required.len()
    }

    /// Required blocks, nearest first.
    pub fn required_blocks(&self) -> &[RequiredBlock] {
        &self.required
    }

    /// Keeps only the first `n` required blocks.
    pub fn truncate_required(&mut self, n: usize) {
        self.required.truncate(n);
    }

    pub fn lookup_table(&self) -> &LookupTable {
        &self.lut
    }

    /// The finest voxel edge length in world units at the base level.
    pub fn base_level_voxel_size_in_world(&self) -> f32 {
        self.levels
            .get(self.base_level)
            .map_or(f32::INFINITY, |l| l.voxel_size_in_world())
    }

    pub fn block_key(&self, block: &RequiredBlock) -> BlockKey {
        BlockKey::new(self.volume, block.level, block.coords)
    }

    /// Marks the resident required blocks as used, so they survive this frame's evictions.
    pub fn touch_required(&self, cache: &mut TextureCache) {
        for block in self.required.iter() {
            cache.touch(&self.block_key(block));
        }
    }

    /// One task for every required block that does not own a tile yet.
    pub fn fill_tasks(&self, cache: &TextureCache) -> Vec<FillTask> {
        self.required
            .iter()
            .filter_map(|block| {
                let key = self.block_key(block);
                (!cache.contains(&key)).then(|| FillTask {
                    key,
                    level: self.levels[block.level as usize].clone(),
                    priority: block.priority,
                })
            })
            .collect()
    }

    /// Rebuilds the lookup table from the blocks that are resident now. Each base-level cell is claimed by the finest
    /// required block covering it. Returns `true` if every cell got its claiming block; cells whose block is missing
    /// fall back to a resident coarser block, or stay unmapped.
    pub fn make_lut(&mut self, cache: &mut TextureCache) -> bool {
        let base = self.base_level;
        let cells = self
            .required
            .iter()
            .map(|b| self.claimed_cells(b))
            .fold(Extent3i::EMPTY, |acc, e| acc.union(&e));
        let mut lut = LookupTable::new_unmapped(base as u8, cells, cache.generation());

        // Coarse blocks claim first, so finer blocks overwrite them.
        let mut claimed: Vec<Option<usize>> = vec![None; cells.volume() as usize];
        let mut by_level: Vec<usize> = (0..self.required.len()).collect();
        by_level.sort_by_key(|&i| std::cmp::Reverse(self.required[i].level));
        for i in by_level {
            for cell in self.claimed_cells(&self.required[i]).iter3() {
                claimed[linear_index(&cells, cell)] = Some(i);
            }
        }

        let mut complete = true;
        for (cell, claim) in cells.iter3().zip(claimed.iter()) {
            let block = match claim {
                Some(i) => &self.required[*i],
                None => continue,
            };
            let want = block.level as usize;
            let key = self.block_key(block);
            let found = cache.get(&key).map(|tile| (key, want, tile)).or_else(|| {
                (want + 1..=self.max_level()).find_map(|level| {
                    let key = BlockKey::new(self.volume, level as u8, self.block_containing(cell, base, level));
                    cache.get(&key).map(|tile| (key, level, tile))
                })
            });
            match found {
                Some((key, level, tile)) => {
                    cache.touch(&key);
                    lut.set(cell, LutEntry::new(tile.grid_coords, level as u8));
                    complete &= level == want;
                }
                None => complete = false,
            }
        }

        self.lut = lut;
        complete
    }

    fn recompute(&mut self) {
        let view = match self.view {
            Some(v) if !self.levels.is_empty() => v,
            _ => {
                self.required.clear();
                return;
            }
        };
        let frustum = Frustum::from_projection_view(&view.pv);
        let scale = ScreenScale::new(&view.pv, view.viewport_width);

        let top = self.max_level();
        let top_blocks = self.block_grid(top);
        let mut seen = SmallKeyHashSet::default();
        let mut stack: Vec<(usize, IVec3)> = top_blocks.iter3().map(|c| (top, c)).collect();
        let mut required = Vec::new();

        while let Some((level, coords)) = stack.pop() {
            let voxels = self.block_voxels(level, coords);
            if voxels.is_empty() {
                continue;
            }
            let aabb = voxel_box(&voxels).transformed(&self.levels[level].source_to_world());
            if !frustum.intersects_aabb(&aabb) {
                continue;
            }
            let sphere = aabb.bounding_sphere();
            let voxel_pixels = scale.max_pixels(self.levels[level].voxel_size_in_world(), &sphere);

            if level > self.base_level && voxel_pixels > self.max_voxel_pixels {
                let children: SmallVec<[IVec3; 8]> = self
                    .cells_covered(level, coords, level - 1)
                    .intersection(&self.block_grid(level - 1))
                    .iter3()
                    .collect();
                for child in children {
                    if seen.insert((level - 1, child)) {
                        stack.push((level - 1, child));
                    }
                }
                continue;
            }

            required.push(RequiredBlock {
                level: level as u8,
                coords,
                priority: scale.nearest_w(&sphere),
            });
        }

        required.sort_by_key(|b| {
            (
                FloatOrd(b.priority),
                b.level,
                b.coords.z,
                b.coords.y,
                b.coords.x,
            )
        });
        log::trace!(
            "{:?}: {} blocks required at base level {}",
            self.volume,
            required.len(),
            self.base_level
        );
        self.required = required;
    }

    /// All block coordinates of `level`.
    fn block_grid(&self, level: usize) -> Extent3i {
        let block = self.spec.block_size.as_ivec3();
        let dims = self.levels[level].dimensions().as_ivec3();
        Extent3i::from_min_and_shape(IVec3::ZERO, (dims + block - IVec3::ONE) / block)
    }

    /// The voxels of block `coords` that lie inside `level`.
    fn block_voxels(&self, level: usize, coords: IVec3) -> Extent3i {
        let block = self.spec.block_size.as_ivec3();
        Extent3i::from_min_and_shape(coords * block, block).intersection(&self.levels[level].extent())
    }

    /// Maps voxel space of `from` into voxel space of `to`.
    fn level_to_level(&self, from: usize, to: usize) -> Mat4 {
        self.levels[to].source_to_world().inverse() * self.levels[from].source_to_world()
    }

    /// The block cells of level `to` that overlap block `coords` of level `from`.
    fn cells_covered(&self, from: usize, coords: IVec3, to: usize) -> Extent3i {
        let mapped = voxel_box(&self.block_voxels(from, coords)).transformed(&self.level_to_level(from, to));
        let block = self.spec.block_size.as_vec3();
        let min = ((mapped.min + Vec3::splat(LEVEL_MAPPING_EPSILON)) / block).floor().as_ivec3();
        let lub = ((mapped.max - Vec3::splat(LEVEL_MAPPING_EPSILON)) / block).ceil().as_ivec3();
        Extent3i::from_min_and_lub(min, lub)
    }

    /// The base-level cells that `block` covers, limited to the base level's block grid.
    fn claimed_cells(&self, block: &RequiredBlock) -> Extent3i {
        self.cells_covered(block.level as usize, block.coords, self.base_level)
            .intersection(&self.block_grid(self.base_level))
    }

    /// The block of `level` nearest to the center of block cell `cell` of level `base`.
    fn block_containing(&self, cell: IVec3, base: usize, level: usize) -> IVec3 {
        let block = self.spec.block_size.as_vec3();
        let center = (cell.as_vec3() + Vec3::splat(0.5)) * block;
        let p = self.level_to_level(base, level).transform_point3(center);
        let grid = self.block_grid(level);
        (p / block).floor().as_ivec3().clamp(grid.minimum, grid.max())
    }
}

fn voxel_box(voxels: &Extent3i) -> Aabb {
    Aabb::new(voxels.minimum.as_vec3(), voxels.least_upper_bound().as_vec3())
}

fn linear_index(extent: &Extent3i, p: IVec3) -> usize {
    let d = p - extent.minimum;
    let s = extent.shape;
    (d.x + s.x * (d.y + s.y * d.z)) as usize
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
