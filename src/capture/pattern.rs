use anyhow::Result;
use async_trait::async_trait;
use tokio::time::{Interval, MissedTickBehavior};

use super::FrameSource;
use crate::assets::FRAME_RATE;
use crate::pipeline::types::Frame;

/// Synthetic live source: a moving RGB gradient produced at [`FRAME_RATE`].
///
/// Stands in for a capture device; the device id offsets the pattern so
/// two sources are distinguishable.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    phase: u32,
    produced: u64,
    ticker: Option<Interval>,
}

impl TestPatternSource {
    pub fn new(device_id: u32, width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            phase: device_id.wrapping_mul(64),
            produced: 0,
            ticker: None,
        }
    }

    fn render(&self) -> Frame {
        let mut frame = Frame::new(self.width, self.height, 3);
        let offset = self.phase.wrapping_add(self.produced as u32 * 4);
        let stride = frame.stride();
        for (y, row) in frame.data_mut().chunks_exact_mut(stride).enumerate() {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                px[0] = (x as u32).wrapping_add(offset) as u8;
                px[1] = (y as u32).wrapping_add(offset / 2) as u8;
                px[2] = ((x ^ y) & 0xff) as u8;
            }
        }
        frame
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    async fn read(&mut self) -> Result<Option<Frame>> {
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs_f64(1.0 / FRAME_RATE));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        ticker.tick().await;

        let frame = self.render();
        self.produced += 1;
        Ok(Some(frame))
    }

    fn fps(&self) -> f64 {
        FRAME_RATE
    }

    fn is_live(&self) -> bool {
        true
    }
}
