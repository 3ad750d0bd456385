//! Three-stage frame router
//!
//! ```text
//! FrameSource → [capture] → queue → [transform] → queue → [present] → outputs
//! ```
//!
//! Each stage runs in its own task and the queues are bounded. Every stage
//! selects on the shared cancellation token, and a finished stage drops its
//! sending half so the next stage drains and stops: capture, then transform,
//! then present.

mod capture_stage;
mod present_stage;
mod transform_stage;

pub use capture_stage::CaptureStage;
pub use present_stage::{
    FpsMeter, FrameCallback, PresentExit, PresentOutputs, PresentStage, poll_delay, sanitize_fps,
};
pub use transform_stage::TransformStage;

use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::assets::QUEUE_CAPACITY;
use crate::capture::FrameSource;
use crate::display::DisplaySink;
use crate::pipeline::frame_pool::FramePool;
use crate::pipeline::health::RouterHealth;
use crate::pipeline::reload::ActivePipeline;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::types::Frame;
use crate::workers::{BroadcastServer, RecordingSink};

/// Run a stage to completion and give it a chance to release what it holds
async fn drive<S: PipelineStage>(stage: &mut S) -> Result<()> {
    info!("{}: started", stage.name());
    let result = stage.run().await;
    if let Err(e) = &result {
        error!("{}: {e:#}", stage.name());
    }
    if let Err(e) = stage.shutdown().await {
        warn!("{}: shutdown failed: {e:#}", stage.name());
    }
    result
}

pub struct FrameRouter {
    source: Box<dyn FrameSource>,
    display: Box<dyn DisplaySink>,
    active: ActivePipeline,
    outputs: PresentOutputs,
    pool: FramePool,
    cancel: CancellationToken,
    health: Arc<RouterHealth>,
}

impl FrameRouter {
    pub fn new(
        source: Box<dyn FrameSource>,
        display: Box<dyn DisplaySink>,
        active: ActivePipeline,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            display,
            active,
            outputs: PresentOutputs::default(),
            pool: FramePool::default(),
            cancel,
            health: Arc::new(RouterHealth::new()),
        }
    }

    pub fn with_recorder(mut self, recorder: RecordingSink) -> Self {
        self.outputs.recorder = Some(recorder);
        self
    }

    pub fn with_broadcast(mut self, server: Arc<BroadcastServer>, quality: u8) -> Self {
        self.outputs.broadcast = Some((server, quality));
        self
    }

    pub fn with_callback(mut self, callback: FrameCallback) -> Self {
        self.outputs.callback = Some(callback);
        self
    }

    pub fn with_overlay(mut self, overlay: bool) -> Self {
        self.outputs.overlay = overlay;
        self
    }

    pub fn health(&self) -> Arc<RouterHealth> {
        Arc::clone(&self.health)
    }

    /// Run all three stages until the stream ends, a quit key is read or
    /// the token is cancelled.
    pub async fn run(self) -> Result<PresentExit> {
        let delay = poll_delay(self.source.is_live(), self.source.fps());
        info!(
            "Router: {} source, key poll every {:?}",
            if self.source.is_live() { "live" } else { "file" },
            delay
        );

        let (capture_tx, capture_rx) = mpsc::channel::<Frame>(QUEUE_CAPACITY);
        let (present_tx, present_rx) = mpsc::channel::<Frame>(QUEUE_CAPACITY);

        let mut capture = CaptureStage::new(
            self.source,
            capture_tx,
            self.cancel.clone(),
            Arc::clone(&self.health),
        );
        let mut transform = TransformStage::new(
            capture_rx,
            present_tx,
            self.active,
            self.pool.clone(),
            self.cancel.clone(),
            Arc::clone(&self.health),
        );
        let mut present = PresentStage::new(
            present_rx,
            self.display,
            self.outputs,
            delay,
            self.pool,
            self.cancel.clone(),
            Arc::clone(&self.health),
        );

        // stages are dropped, and their queues closed, as soon as they finish
        let capture = tokio::spawn(async move { drive(&mut capture).await });
        let transform = tokio::spawn(async move { drive(&mut transform).await });
        let present = tokio::spawn(async move {
            let result = drive(&mut present).await;
            (present.exit(), result)
        });

        let (capture, transform, present) = tokio::join!(capture, transform, present);

        let joined = (|| -> Result<PresentExit> {
            capture.context("Capture stage panicked")??;
            transform.context("Transform stage panicked")??;
            let (exit, result) = present.context("Present stage panicked")?;
            result?;
            Ok(exit)
        })();

        if joined.is_err() {
            self.cancel.cancel();
        }
        info!("Router: {}", self.health.summary());
        joined
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::display::KeyCode;
    use crate::error::StepError;
    use crate::pipeline::executor::PipelineExecutor;
    use crate::processor::{PipelineDefinition, TransformStep};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    pub(crate) fn numbered_frame(i: u8) -> Frame {
        let mut frame = Frame::new(8, 8, 3);
        frame.fill(i);
        frame
    }

    /// File-like source yielding a fixed list of frames
    pub(crate) struct VecSource {
        frames: VecDeque<Frame>,
        fail_at_end: bool,
        endless: bool,
        next: u8,
    }

    impl VecSource {
        pub(crate) fn numbered(count: u8) -> Self {
            Self {
                frames: (0..count).map(numbered_frame).collect(),
                fail_at_end: false,
                endless: false,
                next: 0,
            }
        }

        pub(crate) fn endless() -> Self {
            Self {
                endless: true,
                ..Self::numbered(0)
            }
        }

        pub(crate) fn failing(mut self) -> Self {
            self.fail_at_end = true;
            self
        }
    }

    #[async_trait]
    impl FrameSource for VecSource {
        async fn read(&mut self) -> Result<Option<Frame>> {
            if self.endless {
                tokio::task::yield_now().await;
                self.next = self.next.wrapping_add(1);
                return Ok(Some(numbered_frame(self.next)));
            }
            match self.frames.pop_front() {
                Some(frame) => Ok(Some(frame)),
                None if self.fail_at_end => Err(anyhow::anyhow!("device unplugged")),
                None => Ok(None),
            }
        }

        fn fps(&self) -> f64 {
            1000.0
        }

        fn is_live(&self) -> bool {
            self.endless
        }
    }

    /// Step failing on frames whose first byte equals the given value
    pub(crate) struct FailOn(pub(crate) u8);

    impl TransformStep for FailOn {
        fn name(&self) -> &str {
            "fail_on"
        }

        fn apply(&mut self, src: &Frame, dst: &mut Frame) -> Result<(), StepError> {
            if src.data()[0] == self.0 {
                return Err(StepError::Other(format!("rejected frame {}", self.0)));
            }
            dst.copy_from(src);
            Ok(())
        }
    }

    /// Display recording what it shows and replaying scripted keys
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedDisplay {
        shown: Arc<Mutex<Vec<u8>>>,
        keys: Arc<Mutex<VecDeque<Option<KeyCode>>>>,
        stall: bool,
    }

    impl ScriptedDisplay {
        fn with_keys(keys: impl IntoIterator<Item = Option<KeyCode>>) -> Self {
            Self {
                keys: Arc::new(Mutex::new(keys.into_iter().collect())),
                ..Default::default()
            }
        }

        /// A display whose key poll never returns on its own
        fn stalled() -> Self {
            Self {
                stall: true,
                ..Default::default()
            }
        }

        fn shown(&self) -> Vec<u8> {
            self.shown.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DisplaySink for ScriptedDisplay {
        fn show(&mut self, frame: &Frame) {
            self.shown.lock().unwrap().push(frame.data()[0]);
        }

        async fn wait_key(&mut self, _delay: Duration) -> Option<KeyCode> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            self.keys.lock().unwrap().pop_front().flatten()
        }
    }

    fn active(steps: Vec<Box<dyn TransformStep>>) -> ActivePipeline {
        ActivePipeline::new(PipelineExecutor::new(PipelineDefinition::new(steps)))
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_frames_arrive_in_capture_order() {
        let display = ScriptedDisplay::default();
        let called = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counter = called.clone();
        let router = FrameRouter::new(
            Box::new(VecSource::numbered(25)),
            Box::new(display.clone()),
            active(vec![]),
            CancellationToken::new(),
        )
        .with_callback(Box::new(move |_frame: &mut Frame| {
            counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
        let health = router.health();

        let exit = tokio::time::timeout(TIMEOUT, router.run())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, PresentExit::EndOfStream);
        assert_eq!(display.shown(), (0..25).collect::<Vec<u8>>());
        assert_eq!(called.load(std::sync::atomic::Ordering::Relaxed), 25);
        assert_eq!(health.frames_captured(), 25);
        assert_eq!(health.frames_presented(), 25);
        assert_eq!(health.frame_drops(), 0);
    }

    #[tokio::test]
    async fn test_per_frame_error_keeps_streaming() {
        let display = ScriptedDisplay::default();
        let router = FrameRouter::new(
            Box::new(VecSource::numbered(5)),
            Box::new(display.clone()),
            active(vec![Box::new(FailOn(2))]),
            CancellationToken::new(),
        );
        let health = router.health();

        let exit = tokio::time::timeout(TIMEOUT, router.run())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, PresentExit::EndOfStream);
        assert_eq!(display.shown(), vec![0, 1, 3, 4]);
        assert_eq!(health.pipeline_errors(), 1);
    }

    #[tokio::test]
    async fn test_quit_key_cancels_every_stage() {
        let display = ScriptedDisplay::with_keys([
            None,
            Some(KeyCode::Char('f')),
            Some(KeyCode::Char('q')),
        ]);
        let cancel = CancellationToken::new();
        let router = FrameRouter::new(
            Box::new(VecSource::endless()),
            Box::new(display.clone()),
            active(vec![]),
            cancel.clone(),
        );

        let exit = tokio::time::timeout(TIMEOUT, router.run())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, PresentExit::Quit);
        assert!(cancel.is_cancelled());
        assert_eq!(display.shown().len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_mid_stream_releases_queued_frames() {
        let cancel = CancellationToken::new();
        let router = FrameRouter::new(
            Box::new(VecSource::endless()),
            Box::new(ScriptedDisplay::stalled()),
            active(vec![]),
            cancel.clone(),
        );
        let health = router.health();
        let handle = tokio::spawn(router.run());

        // both queues fill up behind the stalled display
        while health.frames_captured() < (2 * QUEUE_CAPACITY + 2) as u64 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        cancel.cancel();

        let exit = tokio::time::timeout(TIMEOUT, handle)
            .await
            .expect("router did not stop after cancellation")
            .unwrap()
            .unwrap();

        assert_eq!(exit, PresentExit::Cancelled);
        assert_eq!(health.frames_presented(), 1);
        assert!(health.frame_drops() > 0);
        assert_eq!(
            health.frames_captured(),
            health.frames_presented() + health.frame_drops()
        );
    }

    #[tokio::test]
    async fn test_empty_source_ends_immediately() {
        let router = FrameRouter::new(
            Box::new(VecSource::numbered(0)),
            Box::new(ScriptedDisplay::default()),
            active(vec![]),
            CancellationToken::new(),
        );
        let exit = tokio::time::timeout(TIMEOUT, router.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, PresentExit::EndOfStream);
    }
}
