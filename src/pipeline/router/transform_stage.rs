//! Transform stage for the frame router
//!
//! Runs each captured frame through whichever executor is active at the
//! moment the frame arrives.

use anyhow::Result;
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pipeline::frame_pool::FramePool;
use crate::pipeline::health::RouterHealth;
use crate::pipeline::reload::ActivePipeline;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::types::Frame;

/// Transform stage: capture queue → executor → present queue
pub struct TransformStage {
    input: mpsc::Receiver<Frame>,
    output: mpsc::Sender<Frame>,
    active: ActivePipeline,
    pool: FramePool,
    cancel: CancellationToken,
    health: Arc<RouterHealth>,
    frames: u64,
}

impl TransformStage {
    pub fn new(
        input: mpsc::Receiver<Frame>,
        output: mpsc::Sender<Frame>,
        active: ActivePipeline,
        pool: FramePool,
        cancel: CancellationToken,
        health: Arc<RouterHealth>,
    ) -> Self {
        Self {
            input,
            output,
            active,
            pool,
            cancel,
            health,
            frames: 0,
        }
    }

    /// Run one frame through the active executor on the blocking pool.
    ///
    /// The read guard is held for exactly one run, so a concurrent swap
    /// either happens before the frame or after it.
    async fn process(&mut self, frame: Frame) -> Option<Frame> {
        let mut output = self.pool.take();
        let executor = self.active.read().await;
        let joined = tokio::task::spawn_blocking(move || {
            let result = executor.run(&frame, &mut output);
            (frame, output, result)
        })
        .await;

        let (frame, output, result) = match joined {
            Ok(parts) => parts,
            Err(e) => {
                error!("TransformStage: executor task failed: {e}");
                self.health.record_pipeline_error();
                return None;
            }
        };
        self.pool.put(frame);

        match result {
            Ok(()) => Some(output),
            Err(e) => {
                if e.is_structural() {
                    error!("TransformStage: {e}");
                } else {
                    warn!("TransformStage: dropping frame: {e}");
                }
                self.health.record_pipeline_error();
                self.pool.put(output);
                None
            }
        }
    }
}

#[async_trait]
impl PipelineStage for TransformStage {
    async fn run(&mut self) -> Result<()> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                frame = self.input.recv() => frame,
            };
            let Some(frame) = frame else {
                break;
            };
            if frame.is_empty() {
                continue;
            }

            let Some(output) = self.process(frame).await else {
                continue;
            };
            self.health.record_processed();

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = self.output.reserve() => permit.ok(),
            };
            let Some(permit) = permit else {
                self.health.record_drop();
                self.pool.put(output);
                break;
            };
            permit.send(output);
            self.frames += 1;
        }

        info!("TransformStage: finished after {} frames", self.frames);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TransformStage"
    }

    /// Refuse further frames from capture and release the queued ones
    async fn shutdown(&mut self) -> Result<()> {
        self.input.close();
        while let Ok(frame) = self.input.try_recv() {
            self.health.record_drop();
            self.pool.put(frame);
        }
        Ok(())
    }
}
