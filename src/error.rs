//! Error types for the frame runtime
//!
//! Errors are split by how the runtime reacts to them:
//! - `ConfigError`: raised while building a pipeline, never applied
//! - `PipelineError`: raised while running a frame through an executor
//! - `RecordError`: raised by the recording sink
//! - `StepError`: reported by an individual transform step

use std::io;
use thiserror::Error;

/// Failure reported by a transform step
#[derive(Debug, Error)]
pub enum StepError {
    /// The step cannot handle the frame it was given
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// A parameter is out of range or inconsistent
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Configuration and pipeline build errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error while reading the configuration
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    /// Malformed configuration document
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// The stream path cannot be mounted next to the snapshot route
    #[error("invalid stream path {path:?}: {reason}")]
    InvalidStreamPath { path: String, reason: &'static str },

    /// A step table without a `name` key
    #[error("pipeline step {index}: missing 'name' field")]
    MissingName { index: usize },

    /// No constructor registered under the step name
    #[error("pipeline step {index}: unknown processor {name:?}")]
    UnknownStep { index: usize, name: String },

    /// Parameters could not be decoded into the step's typed settings
    #[error("pipeline step {index} ({name}): invalid parameters: {source}")]
    InvalidParams {
        index: usize,
        name: String,
        source: serde_json::Error,
    },

    /// The step was constructed but refused its own settings
    #[error("pipeline step {index} ({name}): validation failed: {source}")]
    Validation {
        index: usize,
        name: String,
        source: StepError,
    },
}

/// Errors raised while executing a pipeline on a frame
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step's `apply` failed; the frame is dropped
    #[error("step {name} failed: {source}")]
    Step { name: String, source: StepError },

    /// Structural: a step was handed an empty frame
    #[error("step {name}: input frame is empty before processing")]
    EmptyInput { name: String },

    /// Structural: a step turned a non-empty frame into an empty one
    #[error("step {name} produced an empty output frame; pipeline halted")]
    EmptyOutput { name: String },

    /// The executor was already released
    #[error("pipeline executor has been released")]
    Released,
}

impl PipelineError {
    /// Structural errors indicate a broken pipeline rather than a bad frame
    pub fn is_structural(&self) -> bool {
        !matches!(self, PipelineError::Step { .. })
    }
}

/// Frame construction errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("buffer of {actual} bytes does not match {width}x{height}x{channels}")]
    SizeMismatch {
        width: u32,
        height: u32,
        channels: u8,
        actual: usize,
    },
}

/// Still-image encoding errors
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cannot encode an empty frame")]
    EmptyFrame,

    #[error("cannot encode a {0}-channel frame")]
    UnsupportedChannels(u8),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Recording sink errors
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("frame {actual} does not match the open output {expected}")]
    FormatMismatch { expected: String, actual: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        let step = PipelineError::Step {
            name: "blur".into(),
            source: StepError::Other("boom".into()),
        };
        let empty = PipelineError::EmptyOutput {
            name: "blur".into(),
        };

        assert!(!step.is_structural());
        assert!(empty.is_structural());
        assert!(PipelineError::Released.is_structural());
    }

    #[test]
    fn test_config_error_names_step() {
        let err = ConfigError::UnknownStep {
            index: 2,
            name: "sharpen".into(),
        };
        assert_eq!(
            err.to_string(),
            "pipeline step 2: unknown processor \"sharpen\""
        );
    }
}
