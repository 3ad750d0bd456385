//! Present stage for the frame router
//!
//! The last stage owns every output: the per-frame callback, the FPS
//! overlay, the recorder, the broadcast server and the display. JPEG
//! encoding for the recorder and the broadcast runs on the blocking pool.

use anyhow::Result;
use async_trait::async_trait;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::assets::{FPS_BUCKET, FRAME_RATE, LIVE_POLL_DELAY, MAX_PLAUSIBLE_FPS};
use crate::display::DisplaySink;
use crate::display::overlay::draw_fps;
use crate::pipeline::frame_pool::FramePool;
use crate::pipeline::health::RouterHealth;
use crate::pipeline::stage::PipelineStage;
use crate::pipeline::types::Frame;
use crate::workers::{BroadcastServer, RecordingSink};

/// Hook invoked on every frame before it is presented
pub type FrameCallback = Box<dyn FnMut(&mut Frame) + Send>;

/// Why the present stage stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentExit {
    /// The source ran out of frames and every queue drained
    EndOfStream,
    /// A quit key was read from the display
    Quit,
    /// The shared cancellation token fired
    Cancelled,
}

/// Replace a missing or implausible source rate with the default
pub fn sanitize_fps(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 && fps <= MAX_PLAUSIBLE_FPS {
        fps
    } else {
        FRAME_RATE
    }
}

/// Key polling delay: minimal for live sources, one frame period for files
pub fn poll_delay(is_live: bool, fps: f64) -> Duration {
    if is_live {
        LIVE_POLL_DELAY
    } else {
        Duration::from_secs_f64(1.0 / sanitize_fps(fps))
    }
}

/// Frame rate estimate refreshed once per bucket so the overlay stays
/// readable
pub struct FpsMeter {
    bucket: Duration,
    started: Option<Instant>,
    frames: u32,
    fps: Option<f64>,
}

impl FpsMeter {
    pub fn new(bucket: Duration) -> Self {
        Self {
            bucket,
            started: None,
            frames: 0,
            fps: None,
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        let Some(started) = self.started else {
            self.started = Some(now);
            return;
        };

        self.frames += 1;
        let elapsed = now.duration_since(started);
        if elapsed >= self.bucket {
            self.fps = Some(f64::from(self.frames) / elapsed.as_secs_f64());
            self.frames = 0;
            self.started = Some(now);
        }
    }

    pub fn fps(&self) -> Option<f64> {
        self.fps
    }

    pub fn text(&self) -> String {
        match self.fps {
            Some(fps) => format!("FPS: {fps:.1}"),
            None => "FPS: --".to_string(),
        }
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new(FPS_BUCKET)
    }
}

/// Optional outputs of the present stage
#[derive(Default)]
pub struct PresentOutputs {
    pub callback: Option<FrameCallback>,
    pub recorder: Option<RecordingSink>,
    pub broadcast: Option<(Arc<BroadcastServer>, u8)>,
    pub overlay: bool,
}

/// What the blocking half of [`PresentStage::present`] hands back
struct Delivery {
    frame: Frame,
    recorder: Option<RecordingSink>,
    recorded: bool,
    broadcast: bool,
}

/// Write `frame` to the recorder and offer it to the broadcast server.
///
/// A recorder that fails is released and not handed back.
fn deliver_outputs(
    frame: Frame,
    mut recorder: Option<RecordingSink>,
    broadcast: Option<(Arc<BroadcastServer>, u8)>,
) -> Delivery {
    let mut recorded = false;
    let failure = match recorder.as_mut().map(|sink| sink.write(&frame)) {
        Some(Ok(())) => {
            recorded = true;
            None
        }
        Some(Err(e)) => Some(e),
        None => None,
    };
    if let Some(e) = failure {
        error!("PresentStage: recording failed, recorder disabled: {e}");
        if let Some(mut sink) = recorder.take() {
            sink.release();
        }
    }

    let broadcast =
        broadcast.is_some_and(|(server, quality)| server.broadcast(&frame, quality));

    Delivery {
        frame,
        recorder,
        recorded,
        broadcast,
    }
}

/// Present stage: transform queue → outputs → display
pub struct PresentStage {
    input: mpsc::Receiver<Frame>,
    display: Box<dyn DisplaySink>,
    outputs: PresentOutputs,
    delay: Duration,
    meter: FpsMeter,
    pool: FramePool,
    cancel: CancellationToken,
    health: Arc<RouterHealth>,
    exit: PresentExit,
}

impl PresentStage {
    pub fn new(
        input: mpsc::Receiver<Frame>,
        display: Box<dyn DisplaySink>,
        outputs: PresentOutputs,
        delay: Duration,
        pool: FramePool,
        cancel: CancellationToken,
        health: Arc<RouterHealth>,
    ) -> Self {
        Self {
            input,
            display,
            outputs,
            delay,
            meter: FpsMeter::default(),
            pool,
            cancel,
            health,
            exit: PresentExit::EndOfStream,
        }
    }

    pub fn exit(&self) -> PresentExit {
        self.exit
    }

    /// Record and broadcast `frame` off the runtime threads.
    ///
    /// Returns `None` if the blocking task died; the frame and the recorder
    /// are lost with it.
    async fn deliver(&mut self, frame: Frame) -> Option<Frame> {
        let recorder = self.outputs.recorder.take();
        let broadcast = self.outputs.broadcast.clone();
        if recorder.is_none() && broadcast.is_none() {
            return Some(frame);
        }

        let job = tokio::task::spawn_blocking(move || deliver_outputs(frame, recorder, broadcast));
        let delivery = match job.await {
            Ok(delivery) => delivery,
            Err(e) => {
                error!("PresentStage: output task failed: {e}");
                self.health.record_drop();
                return None;
            }
        };

        self.outputs.recorder = delivery.recorder;
        if delivery.recorded {
            self.health.record_recorded();
        }
        if delivery.broadcast {
            self.health.record_broadcast();
        }
        Some(delivery.frame)
    }

    async fn present(&mut self, mut frame: Frame) {
        if let Some(callback) = self.outputs.callback.as_mut() {
            callback(&mut frame);
        }

        self.meter.tick();
        if self.outputs.overlay {
            draw_fps(&mut frame, &self.meter.text());
        }

        let Some(frame) = self.deliver(frame).await else {
            return;
        };

        self.display.show(&frame);
        self.health.record_presented();
        self.pool.put(frame);
    }
}

#[async_trait]
impl PipelineStage for PresentStage {
    async fn run(&mut self) -> Result<()> {
        let mut frames = 0u64;
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.exit = PresentExit::Cancelled;
                    break;
                }
                frame = self.input.recv() => frame,
            };
            let Some(frame) = frame else {
                self.exit = if self.cancel.is_cancelled() {
                    PresentExit::Cancelled
                } else {
                    PresentExit::EndOfStream
                };
                break;
            };

            self.present(frame).await;
            frames += 1;

            let key = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.exit = PresentExit::Cancelled;
                    break;
                }
                key = self.display.wait_key(self.delay) => key,
            };
            match key {
                Some(key) if key.is_quit() => {
                    info!("PresentStage: quit requested");
                    self.exit = PresentExit::Quit;
                    self.cancel.cancel();
                    break;
                }
                Some(key) if key.is_overlay_toggle() => {
                    self.outputs.overlay = !self.outputs.overlay;
                    info!(
                        "PresentStage: FPS overlay {}",
                        if self.outputs.overlay { "on" } else { "off" }
                    );
                }
                _ => {}
            }
        }

        info!(
            "PresentStage: finished after {} frames ({:?})",
            frames, self.exit
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "PresentStage"
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.input.close();
        while let Ok(frame) = self.input.try_recv() {
            self.health.record_drop();
            self.pool.put(frame);
        }
        if let Some(mut recorder) = self.outputs.recorder.take() {
            recorder.release();
        }
        self.display.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::HeadlessDisplay;
    use crate::error::RecordError;
    use crate::pipeline::router::tests::numbered_frame;
    use crate::pipeline::types::Geometry;
    use crate::workers::recorder::{VideoWriter, WriterFactory};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Writer that blocks its thread on every frame, flagging start and end
    #[derive(Clone, Default)]
    struct BlockingWriter {
        started: Arc<AtomicBool>,
        finished: Arc<AtomicBool>,
    }

    impl VideoWriter for BlockingWriter {
        fn write(&mut self, _frame: &Frame) -> Result<(), RecordError> {
            self.started.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn finish(&mut self) -> Result<(), RecordError> {
            Ok(())
        }
    }

    impl WriterFactory for BlockingWriter {
        fn open(
            &mut self,
            _path: &Path,
            _geometry: Geometry,
            _fps: f64,
            _color: bool,
        ) -> Result<Box<dyn VideoWriter>, RecordError> {
            Ok(Box::new(self.clone()))
        }
    }

    #[test]
    fn test_poll_delay() {
        assert_eq!(poll_delay(true, 25.0), LIVE_POLL_DELAY);
        assert_eq!(poll_delay(false, 25.0), Duration::from_millis(40));
        // missing or implausible metadata falls back to 30 fps
        let fallback = Duration::from_secs_f64(1.0 / FRAME_RATE);
        assert_eq!(poll_delay(false, 0.0), fallback);
        assert_eq!(poll_delay(false, 1000.0), fallback);
        assert_eq!(poll_delay(false, f64::NAN), fallback);
    }

    #[test]
    fn test_fps_meter_updates_per_bucket() {
        let mut meter = FpsMeter::new(Duration::from_millis(500));
        let start = Instant::now();
        assert_eq!(meter.text(), "FPS: --");

        meter.tick_at(start);
        for i in 1..=10 {
            meter.tick_at(start + Duration::from_millis(40 * i));
        }
        // 400ms in, still inside the first bucket
        assert!(meter.fps().is_none());

        for i in 11..=13 {
            meter.tick_at(start + Duration::from_millis(40 * i));
        }
        let fps = meter.fps().unwrap();
        assert!((fps - 25.0).abs() < 0.01, "{fps}");
        assert_eq!(meter.text(), "FPS: 25.0");

        // a faster frame does not move the estimate until the next bucket
        meter.tick_at(start + Duration::from_millis(560));
        assert_eq!(meter.fps(), Some(fps));
    }

    #[tokio::test]
    async fn test_recorder_failure_disables_recording() {
        let (tx, rx) = mpsc::channel(10);
        let health = Arc::new(RouterHealth::new());
        let outputs = PresentOutputs {
            recorder: Some(RecordingSink::new("/nonexistent-dir/framecast/rec.mjpeg")),
            ..Default::default()
        };
        let mut stage = PresentStage::new(
            rx,
            Box::new(HeadlessDisplay::new()),
            outputs,
            Duration::ZERO,
            FramePool::default(),
            CancellationToken::new(),
            health.clone(),
        );

        for i in 0..3 {
            tx.send(numbered_frame(i)).await.unwrap();
        }
        drop(tx);
        stage.run().await.unwrap();

        assert_eq!(stage.exit(), PresentExit::EndOfStream);
        assert!(stage.outputs.recorder.is_none());
        assert_eq!(health.frames_presented(), 3);
        assert_eq!(health.frames_recorded(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_slow_recorder_leaves_runtime_free() {
        let writer = BlockingWriter::default();
        let (tx, rx) = mpsc::channel(10);
        let health = Arc::new(RouterHealth::new());
        let outputs = PresentOutputs {
            recorder: Some(RecordingSink::with_factory(
                "rec.mjpeg",
                Box::new(writer.clone()),
            )),
            ..Default::default()
        };
        let mut stage = PresentStage::new(
            rx,
            Box::new(HeadlessDisplay::new()),
            outputs,
            Duration::ZERO,
            FramePool::default(),
            CancellationToken::new(),
            health.clone(),
        );

        tx.send(numbered_frame(0)).await.unwrap();
        drop(tx);
        let running = tokio::spawn(async move {
            stage.run().await.unwrap();
            stage
        });

        // the only runtime thread keeps serving this task while the writer blocks
        while !writer.started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!writer.finished.load(Ordering::SeqCst));

        let stage = running.await.unwrap();
        assert!(stage.outputs.recorder.is_some());
        assert_eq!(health.frames_recorded(), 1);
        assert_eq!(health.frames_presented(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_and_callback() {
        let (tx, rx) = mpsc::channel(10);
        let health = Arc::new(RouterHealth::new());
        let server = Arc::new(BroadcastServer::with_interval(Duration::ZERO));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_by_callback = seen.clone();
        let outputs = PresentOutputs {
            callback: Some(Box::new(move |frame: &mut Frame| {
                seen_by_callback.lock().unwrap().push(frame.data()[0]);
            })),
            broadcast: Some((server.clone(), 80)),
            ..Default::default()
        };
        let mut stage = PresentStage::new(
            rx,
            Box::new(HeadlessDisplay::new()),
            outputs,
            Duration::ZERO,
            FramePool::default(),
            CancellationToken::new(),
            health.clone(),
        );

        for i in 0..2 {
            tx.send(numbered_frame(i)).await.unwrap();
        }
        drop(tx);
        stage.run().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
        assert_eq!(health.frames_broadcast(), 2);
        assert!(server.latest().is_some());
    }
}
