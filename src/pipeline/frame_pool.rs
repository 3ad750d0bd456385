use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::assets::FRAME_POOL_SIZE;
use crate::pipeline::types::Frame;

/// Pool of frames shared between the present stage and the transform stage.
///
/// # Performance
/// - Frames handed back with [`FramePool::put`] keep their pixel allocation
/// - [`FramePool::take`] reuses a pooled frame before allocating a new one
/// - The pool is bounded, extra frames are simply dropped
#[derive(Clone)]
pub struct FramePool {
    frames: Arc<Mutex<VecDeque<Frame>>>,
    capacity: usize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Put a frame back into the pool after it was used.
    #[inline]
    pub fn put(&self, frame: Frame) {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        if frames.len() < self.capacity {
            frames.push_back(frame);
        }
    }

    /// Take a frame from the pool, or an empty one if the pool is exhausted.
    #[inline]
    pub fn take(&self) -> Frame {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new(FRAME_POOL_SIZE)
    }
}
