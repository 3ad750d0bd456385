//! Health monitoring and metrics for the frame router

use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Health metrics for the frame router
///
/// Every stage records into the same instance; all fields use atomic
/// operations so no stage ever waits on another to update a counter.
pub struct RouterHealth {
    /// Frames read from the source
    pub frames_captured: AtomicU64,

    /// Frames that went through the pipeline successfully
    pub frames_processed: AtomicU64,

    /// Frames handed to the display
    pub frames_presented: AtomicU64,

    /// Frames released without being presented (errors or shutdown)
    pub frame_drops: AtomicU64,

    /// Per-frame pipeline failures
    pub pipeline_errors: AtomicU64,

    /// Broadcasts accepted by the rate limiter
    pub frames_broadcast: AtomicU64,

    /// Frames written to the recorder
    pub frames_recorded: AtomicU64,

    /// Timestamp (as Unix microseconds) of the last presented frame
    pub last_frame_time: AtomicU64,
}

impl RouterHealth {
    pub fn new() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            frames_presented: AtomicU64::new(0),
            frame_drops: AtomicU64::new(0),
            pipeline_errors: AtomicU64::new(0),
            frames_broadcast: AtomicU64::new(0),
            frames_recorded: AtomicU64::new(0),
            last_frame_time: AtomicU64::new(now_micros()),
        }
    }

    pub fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_presented(&self) {
        self.last_frame_time.store(now_micros(), Ordering::Relaxed);
        self.frames_presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.frame_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// A per-frame pipeline failure also counts as a drop
    pub fn record_pipeline_error(&self) {
        self.pipeline_errors.fetch_add(1, Ordering::Relaxed);
        self.record_drop();
    }

    pub fn record_broadcast(&self) {
        self.frames_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recorded(&self) {
        self.frames_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented.load(Ordering::Relaxed)
    }

    pub fn frame_drops(&self) -> u64 {
        self.frame_drops.load(Ordering::Relaxed)
    }

    pub fn pipeline_errors(&self) -> u64 {
        self.pipeline_errors.load(Ordering::Relaxed)
    }

    pub fn frames_broadcast(&self) -> u64 {
        self.frames_broadcast.load(Ordering::Relaxed)
    }

    pub fn frames_recorded(&self) -> u64 {
        self.frames_recorded.load(Ordering::Relaxed)
    }

    /// Get the timestamp of the last presented frame (Unix microseconds)
    pub fn last_frame_time(&self) -> u64 {
        self.last_frame_time.load(Ordering::Relaxed)
    }

    /// Calculate the frame drop rate as a percentage of captured frames
    pub fn frame_drop_rate(&self) -> f64 {
        let captured = self.frames_captured();
        if captured == 0 {
            return 0.0;
        }
        (self.frame_drops() as f64 / captured as f64) * 100.0
    }

    /// Check if the router has stalled (no frames for given duration)
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let elapsed_micros = now_micros().saturating_sub(self.last_frame_time());
        elapsed_micros > threshold.as_micros() as u64
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_captured: self.frames_captured(),
            frames_processed: self.frames_processed(),
            frames_presented: self.frames_presented(),
            frame_drops: self.frame_drops(),
            pipeline_errors: self.pipeline_errors(),
            frames_broadcast: self.frames_broadcast(),
            frames_recorded: self.frames_recorded(),
            frame_drop_rate: self.frame_drop_rate(),
        }
    }
}

impl Default for RouterHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub frames_presented: u64,
    pub frame_drops: u64,
    pub pipeline_errors: u64,
    pub frames_broadcast: u64,
    pub frames_recorded: u64,
    pub frame_drop_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} captured, {} processed, {} presented ({} drops, {:.2}%), {} pipeline errors, {} broadcast, {} recorded",
            self.frames_captured,
            self.frames_processed,
            self.frames_presented,
            self.frame_drops,
            self.frame_drop_rate,
            self.pipeline_errors,
            self.frames_broadcast,
            self.frames_recorded
        )
    }
}

/// Log the health summary every `interval` until cancelled
pub fn spawn_health_logger(
    health: Arc<RouterHealth>,
    cancel: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    info!("Router: {}", health.summary());
                    if health.is_stalled(interval) {
                        warn!("Router: no frame presented for {:?}", interval);
                    }
                }
            }
        }
    })
}
