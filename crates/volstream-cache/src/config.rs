use crate::{find_suitable_grid_size, CacheSpec, SampleType};

use serde::{Deserialize, Serialize};
use volstream_core::glam::UVec3;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Number of staging buffers that can be in flight at once.
    pub num_buffers: usize,
    /// Tiles per staging buffer, which is also the largest fill batch.
    pub tiles_per_buffer: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            num_buffers: 5,
            tiles_per_buffer: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Edge length of a block in voxels.
    pub block_size: u32,
    pub format: SampleType,
    /// Texture memory reserved for the atlas.
    pub max_cache_size_mb: u64,
    /// Largest edge length of a 3D texture supported by the device.
    pub max_texture_extent: u32,
    pub staging: StagingConfig,
    /// Number of fill workers. `None` uses half of the available cores.
    pub worker_threads: Option<usize>,
    /// Initial guess of the time needed to fill one tile, refined from measurements while rendering.
    pub initial_fill_time_estimate_us: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_size: 32,
            format: SampleType::U16,
            max_cache_size_mb: 300,
            max_texture_extent: 2048,
            staging: StagingConfig::default(),
            worker_threads: None,
            // A 34^3 u16 tile read from memory takes roughly this long.
            initial_fill_time_estimate_us: 500,
        }
    }
}

impl CacheConfig {
    pub fn cache_spec(&self) -> CacheSpec {
        CacheSpec::new(self.format, UVec3::splat(self.block_size))
    }

    pub fn max_cache_bytes(&self) -> u64 {
        self.max_cache_size_mb * 1024 * 1024
    }

    pub fn grid_size(&self) -> UVec3 {
        find_suitable_grid_size(&self.cache_spec(), self.max_cache_bytes(), self.max_texture_extent)
    }

    /// Describes the first invalid setting, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.block_size == 0 {
            return Err("cache.block_size must be positive".into());
        }
        if self.block_size + 2 > self.max_texture_extent {
            return Err(format!(
                "cache.block_size {} does not fit in a texture of extent {}",
                self.block_size, self.max_texture_extent
            ));
        }
        if self.staging.num_buffers == 0 || self.staging.tiles_per_buffer == 0 {
            return Err("cache.staging needs at least one buffer of at least one tile".into());
        }
        if self.worker_threads == Some(0) {
            return Err("cache.worker_threads must be positive when given".into());
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

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = CacheConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.grid_size(), UVec3::new(15, 15, 17));
    }

    #[test]
    fn rejects_empty_staging() {
        let config = CacheConfig {
            staging: StagingConfig {
                num_buffers: 0,
                tiles_per_buffer: 10,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
