use super::{MultiResolutionStack, ResolutionLevel, SimpleStack, SourceError};
use crate::{SampleType, VolumeId};

use bytemuck::bytes_of;
use std::sync::Arc;
use std::time::Duration;
use volstream_core::extent::Extent3i;
use volstream_core::glam::{IVec3, Mat4, UVec3, Vec3};

/// Produces a sample value for a voxel given in level-0 coordinates.
pub type Generator = Arc<dyn Fn(IVec3) -> f32 + Send + Sync>;

/// A resolution level whose samples are computed on demand. Level `l` point-samples the generator at every `2^l`-th
/// level-0 voxel.
pub struct ProceduralLevel {
    level: u32,
    dimensions: UVec3,
    source_to_world: Mat4,
    sample_type: SampleType,
    generator: Generator,
    read_delay: Duration,
}

impl ProceduralLevel {
    fn write_sample(&self, value: f32, dst: &mut [u8]) {
        match self.sample_type {
            SampleType::U8 => dst.copy_from_slice(bytes_of(&(value.clamp(0.0, u8::MAX as f32) as u8))),
            SampleType::U16 => {
                dst.copy_from_slice(bytes_of(&(value.clamp(0.0, u16::MAX as f32) as u16)))
            }
            SampleType::F32 => dst.copy_from_slice(bytes_of(&value)),
        }
    }
}

impl ResolutionLevel for ProceduralLevel {
    fn dimensions(&self) -> UVec3 {
        self.dimensions
    }

    fn source_to_world(&self) -> Mat4 {
        self.source_to_world
    }

    fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    fn read_region(&self, region: Extent3i, dst: &mut [u8]) -> Result<(), SourceError> {
        if region.intersection(&self.extent()) != region {
            return Err(SourceError::OutOfBounds {
                region,
                dimensions: self.dimensions,
            });
        }
        let sample_bytes = self.sample_type.bytes();
        let expected = region.volume() as usize * sample_bytes;
        if dst.len() != expected {
            return Err(SourceError::BufferSize {
                expected,
                found: dst.len(),
            });
        }
        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }

        for (p, sample) in region.iter3().zip(dst.chunks_exact_mut(sample_bytes)) {
            let value = (self.generator)(p << self.level as i32);
            self.write_sample(value, sample);
        }
        Ok(())
    }
}

/// A multi-resolution volume backed by a [`Generator`]. It can also act as a [`SimpleStack`] made of its finest level.
pub struct ProceduralStack {
    id: VolumeId,
    levels: Vec<Arc<dyn ResolutionLevel>>,
}

impl ProceduralStack {
    /// Builds `num_levels` levels (at least one). Level 0 has `dimensions` voxels of edge length `voxel_size`,
    /// positioned with their minimum corner at `origin`.
    pub fn new(
        id: VolumeId,
        dimensions: UVec3,
        num_levels: usize,
        voxel_size: f32,
        origin: Vec3,
        sample_type: SampleType,
        generator: Generator,
    ) -> Self {
        Self::with_read_delay(
            id,
            dimensions,
            num_levels,
            voxel_size,
            origin,
            sample_type,
            generator,
            Duration::ZERO,
        )
    }

    /// Like [`ProceduralStack::new`], but every region read sleeps for `read_delay` to imitate slow storage.
    #[allow(clippy::too_many_arguments)]
    pub fn with_read_delay(
        id: VolumeId,
        dimensions: UVec3,
        num_levels: usize,
        voxel_size: f32,
        origin: Vec3,
        sample_type: SampleType,
        generator: Generator,
        read_delay: Duration,
    ) -> Self {
        let levels = (0..num_levels.max(1) as u32)
            .map(|level| {
                let factor = 1u32 << level;
                let level_dims = ((dimensions + UVec3::splat(factor - 1)) / factor).max(UVec3::ONE);
                let source_to_world = Mat4::from_translation(origin)
                    * Mat4::from_scale(Vec3::splat(voxel_size * factor as f32));
                Arc::new(ProceduralLevel {
                    level,
                    dimensions: level_dims,
                    source_to_world,
                    sample_type,
                    generator: generator.clone(),
                    read_delay,
                }) as Arc<dyn ResolutionLevel>
            })
            .collect();

        Self { id, levels }
    }
}

impl MultiResolutionStack for ProceduralStack {
    fn volume_id(&self) -> VolumeId {
        self.id
    }

    fn levels(&self) -> &[Arc<dyn ResolutionLevel>] {
        &self.levels
    }
}

impl SimpleStack for ProceduralStack {
    fn volume_id(&self) -> VolumeId {
        self.id
    }

    fn level(&self) -> &dyn ResolutionLevel {
        self.levels[0].as_ref()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
