//! Contracts for the volume data that feeds the cache.
//!
//! A [`Stack`] is either a [`MultiResolutionStack`], which is streamed block by block through the
//! [`TextureCache`](crate::TextureCache), or a [`SimpleStack`], which is small enough to be uploaded whole.

mod procedural;

pub use procedural::*;

use crate::{BlockKey, SampleType, VolumeId};

use std::sync::Arc;
use thiserror::Error;
use volstream_core::extent::Extent3i;
use volstream_core::glam::{IVec3, Mat4, UVec3, Vec3};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("region {region:?} is not inside the level bounds {dimensions}")]
    OutOfBounds { region: Extent3i, dimensions: UVec3 },
    #[error("destination holds {found} bytes but the region needs {expected}")]
    BufferSize { expected: usize, found: usize },
    #[error("failed to read {key:?}: {message}")]
    Read { key: Option<BlockKey>, message: String },
}

/// One resolution level of a volume.
pub trait ResolutionLevel: Send + Sync {
    /// Size of the level in voxels.
    fn dimensions(&self) -> UVec3;

    /// Maps voxel coordinates of this level into the world space shared by all volumes. Voxel `p` covers the unit cube
    /// `[p, p + 1)` in voxel coordinates.
    fn source_to_world(&self) -> Mat4;

    fn sample_type(&self) -> SampleType;

    /// Writes the samples of `region` into `dst` in x-fastest order, using the native byte layout of
    /// [`ResolutionLevel::sample_type`]. `region` must lie inside the level.
    ///
    /// Called concurrently from worker threads.
    fn read_region(&self, region: Extent3i, dst: &mut [u8]) -> Result<(), SourceError>;

    fn extent(&self) -> Extent3i {
        Extent3i::from_min_and_shape(IVec3::ZERO, self.dimensions().as_ivec3())
    }

    /// The finest edge length of one voxel in world units.
    fn voxel_size_in_world(&self) -> f32 {
        let m = self.source_to_world();
        m.transform_vector3(Vec3::X)
            .length()
            .min(m.transform_vector3(Vec3::Y).length())
            .min(m.transform_vector3(Vec3::Z).length())
    }
}

/// A volume given at several resolutions. Level 0 is the finest, and every level covers the same world region.
pub trait MultiResolutionStack: Send + Sync {
    fn volume_id(&self) -> VolumeId;

    fn levels(&self) -> &[Arc<dyn ResolutionLevel>];

    fn sample_type(&self) -> SampleType {
        self.levels()
            .first()
            .map(|l| l.sample_type())
            .unwrap_or(SampleType::U16)
    }

    fn max_level(&self) -> usize {
        self.levels().len().saturating_sub(1)
    }
}

/// A single-resolution volume that is uploaded as one texture.
pub trait SimpleStack: Send + Sync {
    fn volume_id(&self) -> VolumeId;

    fn level(&self) -> &dyn ResolutionLevel;
}

/// The kinds of volumes the renderer knows how to draw.
#[derive(Clone)]
pub enum Stack {
    MultiResolution(Arc<dyn MultiResolutionStack>),
    Simple(Arc<dyn SimpleStack>),
}

impl Stack {
    pub fn volume_id(&self) -> VolumeId {
        match self {
            Stack::MultiResolution(s) => s.volume_id(),
            Stack::Simple(s) => s.volume_id(),
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            Stack::MultiResolution(s) => s.sample_type(),
            Stack::Simple(s) => s.level().sample_type(),
        }
    }
}
