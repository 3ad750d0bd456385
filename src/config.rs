use crate::assets::{
    DEFAULT_OUTPUT, JPEG_QUALITY, PATTERN_HEIGHT, PATTERN_WIDTH, RELOAD_DEBOUNCE, RELOAD_GRACE,
    RELOAD_POLL, SNAPSHOT_PATH, STREAM_INTERVAL, STREAM_PATH, STREAM_PORT, WINDOW_NAME,
};
use crate::error::ConfigError;
use crate::processor::registry::ParamMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete runtime configuration, loaded from a JSON document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub camera: CameraConfig,
    pub stream: StreamConfig,
    pub reload: ReloadConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub window_name: String,
    pub record: bool,
    pub output: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            window_name: WINDOW_NAME.to_string(),
            record: false,
            output: PathBuf::from(DEFAULT_OUTPUT),
        }
    }
}

/// Frame source selection. A non-empty `file` wins over `device_id`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device_id: u32,
    pub file: Option<PathBuf>,
    /// Frame rate metadata for file sources
    pub fps: Option<f64>,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            file: None,
            fps: None,
            width: PATTERN_WIDTH,
            height: PATTERN_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub quality: u8,
    pub interval_ms: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "0.0.0.0".to_string(),
            port: STREAM_PORT,
            path: STREAM_PATH.to_string(),
            quality: JPEG_QUALITY,
            interval_ms: None,
        }
    }
}

/// Check that `path` is a literal route that does not shadow the snapshot
/// endpoint. Route syntax characters would otherwise make the HTTP router
/// panic when the server starts.
pub fn check_stream_path(path: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &'static str| -> Result<(), ConfigError> {
        Err(ConfigError::InvalidStreamPath {
            path: path.to_string(),
            reason,
        })
    };

    if !path.starts_with('/') {
        return invalid("must start with '/'");
    }
    if path.contains(['{', '}', '*']) {
        return invalid("route parameters and wildcards are not allowed");
    }
    if path.split('/').any(|segment| segment.starts_with(':')) {
        return invalid("segments must not start with ':'");
    }
    if path == SNAPSHOT_PATH {
        return invalid("reserved for snapshots");
    }
    Ok(())
}

impl StreamConfig {
    /// Minimum time between two accepted broadcasts
    pub fn interval(&self) -> Duration {
        self.interval_ms
            .map(Duration::from_millis)
            .unwrap_or(STREAM_INTERVAL)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    pub debounce_ms: u64,
    pub grace_ms: u64,
    pub poll_ms: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            debounce_ms: RELOAD_DEBOUNCE.as_millis() as u64,
            grace_ms: RELOAD_GRACE.as_millis() as u64,
            poll_ms: RELOAD_POLL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub steps: Vec<StepConfig>,
}

/// One pipeline entry: the `name` key plus every other key as parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub params: ParamMap,
}

impl StepConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            params: ParamMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

impl AppConfig {
    /// Parse a configuration document and apply defaults
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = serde_json::from_str(text)?;
        config.normalize()?;
        Ok(config)
    }

    pub async fn load_async(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }

    fn normalize(&mut self) -> Result<(), ConfigError> {
        if self.app.window_name.trim().is_empty() {
            self.app.window_name = WINDOW_NAME.to_string();
        }
        if self.app.output.as_os_str().is_empty() {
            self.app.output = PathBuf::from(DEFAULT_OUTPUT);
        }
        if self.stream.quality == 0 {
            self.stream.quality = JPEG_QUALITY;
        }
        self.stream.quality = self.stream.quality.min(100);
        if !self.stream.path.starts_with('/') {
            self.stream.path.insert(0, '/');
        }
        if self
            .camera
            .file
            .as_ref()
            .is_some_and(|file| file.as_os_str().is_empty())
        {
            self.camera.file = None;
        }
        check_stream_path(&self.stream.path)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
