use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use super::FrameSource;
use crate::pipeline::types::Frame;

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// File source: a directory of still images played in file-name order.
///
/// A single image path is a one-frame sequence. Decoding happens on the
/// blocking pool so the capture task never stalls the runtime.
pub struct ImageSequenceSource {
    files: VecDeque<PathBuf>,
    fps: f64,
}

impl ImageSequenceSource {
    pub fn open(path: impl AsRef<Path>, fps: f64) -> Result<Self> {
        let path = path.as_ref();
        let files = if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("Cannot list {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image(p))
                .collect();
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            bail!("{} does not exist", path.display());
        };

        if files.is_empty() {
            bail!("{} contains no images", path.display());
        }

        Ok(Self {
            files: files.into(),
            fps,
        })
    }

    /// Frames left to play
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn decode(path: &Path) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("Cannot decode {}", path.display()))?
        .into_rgb8();
    let (width, height) = image.dimensions();
    Ok(Frame::from_raw(width, height, 3, image.into_raw())?)
}

#[async_trait]
impl FrameSource for ImageSequenceSource {
    async fn read(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.pop_front() else {
            return Ok(None);
        };
        let frame = tokio::task::spawn_blocking(move || decode(&path)).await??;
        Ok(Some(frame))
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn is_live(&self) -> bool {
        false
    }
}
