use crate::dither::DitherPattern;
use crate::ConfigError;

use serde::{Deserialize, Serialize};
use std::path::Path;
use volstream_cache::CacheConfig;
use volstream_core::glam::UVec2;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DitherConfig {
    /// Edge length of the sub-pixel grid. A width of 1 or less disables dithering.
    pub width: u32,
    /// Stride through the `width * width` cells. Must be coprime to the cell count.
    pub step: u32,
    /// Number of completed samples blended into each reconstructed pixel.
    pub num_samples: usize,
}

impl Default for DitherConfig {
    fn default() -> Self {
        Self {
            width: 8,
            step: 3,
            num_samples: 8,
        }
    }
}

impl DitherConfig {
    pub fn is_enabled(&self) -> bool {
        self.width > 1
    }

    /// `None` when dithering is disabled.
    pub fn pattern(&self) -> Result<Option<DitherPattern>, ConfigError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        DitherPattern::new(self.width, self.step, self.num_samples).map(Some)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct RendererConfig {
    pub render_width: u32,
    pub render_height: u32,
    pub dither: DitherConfig,
    /// A block is refined while one of its voxels covers more than this many screen pixels.
    pub max_voxel_pixels: f32,
    pub cache: CacheConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            render_width: 512,
            render_height: 512,
            dither: DitherConfig::default(),
            max_voxel_pixels: 1.0,
            cache: CacheConfig::default(),
        }
    }
}

impl RendererConfig {
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = ron::from_str(&text)?;
        config.validate()?;

        Ok(config)
    }

    pub fn render_size(&self) -> UVec2 {
        UVec2::new(self.render_width, self.render_height)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render_width == 0 || self.render_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "render size {}x{} is empty",
                self.render_width, self.render_height
            )));
        }
        if self.max_voxel_pixels.is_nan() || self.max_voxel_pixels <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "max_voxel_pixels must be positive, got {}",
                self.max_voxel_pixels
            )));
        }
        self.dither.pattern()?;
        self.cache.validate().map_err(ConfigError::Invalid)
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

    use volstream_cache::SampleType;

    #[test]
    fn defaults_are_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dither.pattern().unwrap().unwrap().num_steps(), 64);
    }

    #[test]
    fn parses_partial_ron() {
        let config: RendererConfig = ron::from_str(
            "(render_width: 256, dither: (width: 1), cache: (format: U8, staging: (num_buffers: 2)))",
        )
        .unwrap();
        assert_eq!(config.render_width, 256);
        assert_eq!(config.render_height, 512);
        assert!(!config.dither.is_enabled());
        assert!(config.dither.pattern().unwrap().is_none());
        assert_eq!(config.cache.format, SampleType::U8);
        assert_eq!(config.cache.staging.num_buffers, 2);
        assert_eq!(config.cache.staging.tiles_per_buffer, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_dither_step() {
        let config = RendererConfig {
            dither: DitherConfig {
                width: 4,
                step: 2,
                num_samples: 8,
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn read_file_reports_missing_file() {
        assert!(matches!(
            RendererConfig::read_file("/nonexistent/volstream.ron"),
            Err(ConfigError::Io(_))
        ));
    }
}
