use volstream_cache::source::SourceError;
use volstream_cache::{SampleType, ThreadPoolBuildError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config")]
    Parse(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("volume {index} has samples of type {found:?}, but the cache holds {expected:?}")]
    UnsupportedSampleType {
        index: usize,
        found: SampleType,
        expected: SampleType,
    },
    #[error("volume {index} has no converter")]
    MissingConverter { index: usize },
    #[error("failed to upload a simple volume")]
    SimpleVolume(#[from] SourceError),
    #[error("failed to start fill workers")]
    WorkerPool(#[from] ThreadPoolBuildError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
