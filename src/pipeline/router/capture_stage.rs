//! Capture stage for the frame router
//!
//! Pulls frames from the configured [`FrameSource`] and pushes them onto the
//! bounded transform queue.

use anyhow::Result;
use async_trait::async_trait;
use log::{error, info};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capture::FrameSource;
use crate::pipeline::health::RouterHealth;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::types::Frame;

/// Capture stage: source → transform queue
///
/// Dropping the stage closes the transform queue, which lets the transform
/// stage drain and stop.
pub struct CaptureStage {
    source: Box<dyn FrameSource>,
    output: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    health: Arc<RouterHealth>,
    frames: u64,
}

impl CaptureStage {
    pub fn new(
        source: Box<dyn FrameSource>,
        output: mpsc::Sender<Frame>,
        cancel: CancellationToken,
        health: Arc<RouterHealth>,
    ) -> Self {
        Self {
            source,
            output,
            cancel,
            health,
            frames: 0,
        }
    }

    /// Next frame from the source, `None` on end of stream, failure or
    /// cancellation
    async fn next_frame(&mut self) -> Option<Frame> {
        let read = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            read = self.source.read() => read,
        };

        match read {
            Ok(Some(frame)) if !frame.is_empty() => Some(frame),
            Ok(_) => {
                info!("CaptureStage: end of stream");
                None
            }
            Err(e) => {
                error!("CaptureStage: failed to read frame: {e:#}");
                None
            }
        }
    }
}

#[async_trait]
impl PipelineStage for CaptureStage {
    async fn run(&mut self) -> Result<()> {
        while let Some(frame) = self.next_frame().await {
            self.health.record_captured();

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = self.output.reserve() => permit.ok(),
            };
            let Some(permit) = permit else {
                // cancelled or the transform stage is gone
                self.health.record_drop();
                break;
            };
            permit.send(frame);
            self.frames += 1;
        }

        info!("CaptureStage: finished after {} frames", self.frames);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CaptureStage"
    }
}
