//! Core types for the pipeline system

use crate::error::FrameError;

/// Frame dimensions and channel layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl Geometry {
    pub fn new(width: u32, height: u32, channels: u8) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Number of bytes a frame with this geometry occupies
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.byte_len() == 0
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {}c", self.width, self.height, self.channels)
    }
}

/// A decoded image buffer travelling through the pipeline
///
/// Pixels are stored row-major and interleaved (`channels` bytes per pixel).
/// Three channel frames are RGB. A frame is owned by exactly one stage at a
/// time; dropping it (or calling [`Frame::release`]) frees the pixel memory.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Frame {
    geometry: Geometry,
    data: Vec<u8>,
}

impl Frame {
    /// Allocate a zeroed frame
    pub fn new(width: u32, height: u32, channels: u8) -> Self {
        Self::with_geometry(Geometry::new(width, height, channels))
    }

    pub fn with_geometry(geometry: Geometry) -> Self {
        Self {
            geometry,
            data: vec![0; geometry.byte_len()],
        }
    }

    /// Wrap an existing pixel buffer
    pub fn from_raw(
        width: u32,
        height: u32,
        channels: u8,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let geometry = Geometry::new(width, height, channels);
        if data.len() != geometry.byte_len() {
            return Err(FrameError::SizeMismatch {
                width,
                height,
                channels,
                actual: data.len(),
            });
        }
        Ok(Self { geometry, data })
    }

    /// A frame without pixels
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.geometry.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn channels(&self) -> u8 {
        self.geometry.channels
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.geometry.width as usize * self.geometry.channels as usize
    }

    /// Change the frame layout in place.
    ///
    /// The existing allocation is reused whenever its capacity suffices; pixel
    /// content is unspecified afterwards.
    pub fn reshape(&mut self, geometry: Geometry) {
        self.geometry = geometry;
        self.data.resize(geometry.byte_len(), 0);
    }

    /// Copy `src` into this frame, taking over its geometry
    pub fn copy_from(&mut self, src: &Frame) {
        self.reshape(src.geometry);
        self.data.copy_from_slice(&src.data);
    }

    /// Fill every byte with `value`
    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    /// Free the pixel memory, leaving an empty frame
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.geometry = Geometry::default();
    }

    /// Bytes currently reserved by the pixel buffer
    pub fn allocation(&self) -> usize {
        self.data.capacity()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.geometry.width)
            .field("height", &self.geometry.height)
            .field("channels", &self.geometry.channels)
            .field("size", &self.data.len())
            .finish()
    }
}
