//! Frame sources
//!
//! A source is either live (a device paced by its own clock) or a file
//! sequence played back at its declared frame rate. A non-empty
//! `camera.file` always takes precedence over `camera.device_id`.

mod pattern;
mod sequence;

pub use pattern::TestPatternSource;
pub use sequence::ImageSequenceSource;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;

use crate::config::CameraConfig;
use crate::pipeline::types::Frame;

/// Trait for frame producers feeding the capture stage
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted
    async fn read(&mut self) -> Result<Option<Frame>>;

    /// Declared frame rate; zero or implausible values mean "unknown"
    fn fps(&self) -> f64;

    /// Live sources pace themselves, file sources are paced by the consumer
    fn is_live(&self) -> bool;
}

/// Open the source selected by the camera configuration
pub fn open_source(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    match &config.file {
        Some(path) => {
            let source = ImageSequenceSource::open(path, config.fps.unwrap_or(0.0))
                .with_context(|| format!("Failed to open file source {}", path.display()))?;
            info!(
                "Capture: file source {} ({} frames)",
                path.display(),
                source.len()
            );
            Ok(Box::new(source))
        }
        None => {
            info!(
                "Capture: live device {} ({}x{})",
                config.device_id, config.width, config.height
            );
            Ok(Box::new(TestPatternSource::new(
                config.device_id,
                config.width,
                config.height,
            )))
        }
    }
}
