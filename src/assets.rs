use std::time::Duration;

pub const FRAME_RATE: f64 = 30.0;
/// Source frame rates above this are treated as broken metadata.
pub const MAX_PLAUSIBLE_FPS: f64 = 200.0;

// pipeline
pub const QUEUE_CAPACITY: usize = 10;
pub const FRAME_POOL_SIZE: usize = 4;
pub const FPS_BUCKET: Duration = Duration::from_millis(500);
pub const LIVE_POLL_DELAY: Duration = Duration::from_millis(1);
pub const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

// hot reload
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(200);
pub const RELOAD_GRACE: Duration = Duration::from_millis(150);
pub const RELOAD_POLL: Duration = Duration::from_millis(250);

// streaming
pub const STREAM_PORT: u16 = 8080;
pub const STREAM_PATH: &str = "/stream";
pub const SNAPSHOT_PATH: &str = "/snapshot.jpg";
pub const STREAM_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 15);
pub const JPEG_QUALITY: u8 = 75;
pub const RECORD_JPEG_QUALITY: u8 = 90;

// output
pub const DEFAULT_OUTPUT: &str = "capture.mjpeg";
pub const DEFAULT_OUTPUT_EXT: &str = ".mjpeg";
pub const WINDOW_NAME: &str = "framecast";

// live test pattern
pub const PATTERN_WIDTH: u32 = 640;
pub const PATTERN_HEIGHT: u32 = 480;
