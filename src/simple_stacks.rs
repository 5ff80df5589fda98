use crate::gpu::GpuContext;

use volstream_cache::source::{SimpleStack, SourceError};
use volstream_cache::VolumeId;
use volstream_core::glam::Mat4;
use volstream_core::{SmallKeyHashMap, SmallKeyHashSet};

/// A single-resolution volume uploaded as its own texture.
pub struct SimpleVolume<T> {
    pub texture: T,
    pub source_to_world: Mat4,
    pub voxel_size_in_world: f32,
}

/// Keeps the textures of simple volumes between frames. Each volume is uploaded once; textures of volumes that were
/// not used since the last [`SimpleStackManager::free_unused`] are released.
pub struct SimpleStackManager<T> {
    volumes: SmallKeyHashMap<VolumeId, SimpleVolume<T>>,
    used: SmallKeyHashSet<VolumeId>,
}

impl<T> Default for SimpleStackManager<T> {
    fn default() -> Self {
        Self {
            volumes: SmallKeyHashMap::default(),
            used: SmallKeyHashSet::default(),
        }
    }
}

impl<T> SimpleStackManager<T> {
    pub fn upload<G>(&mut self, ctx: &mut G, stack: &dyn SimpleStack) -> Result<&SimpleVolume<T>, SourceError>
    where
        G: GpuContext<SimpleTexture = T>,
    {
        let id = stack.volume_id();
        self.used.insert(id);
        if !self.volumes.contains_key(&id) {
            let level = stack.level();
            let texture = ctx.upload_simple_volume(level)?;
            log::debug!("Uploaded simple volume {:?} of size {}", id, level.dimensions());
            self.volumes.insert(
                id,
                SimpleVolume {
                    texture,
                    source_to_world: level.source_to_world(),
                    voxel_size_in_world: level.voxel_size_in_world(),
                },
            );
        }
        Ok(&self.volumes[&id])
    }

    pub fn get(&self, id: VolumeId) -> Option<&SimpleVolume<T>> {
        self.volumes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Frees the textures of volumes not uploaded or requested since the last call. Returns how many were freed.
    pub fn free_unused<G>(&mut self, ctx: &mut G) -> usize
    where
        G: GpuContext<SimpleTexture = T>,
    {
        let unused: Vec<VolumeId> = self
            .volumes
            .keys()
            .filter(|id| !self.used.contains(id))
            .copied()
            .collect();
        for id in unused.iter() {
            if let Some(volume) = self.volumes.remove(id) {
                ctx.free_simple_volume(volume.texture);
            }
        }
        self.used.clear();
        unused.len()
    }
}
