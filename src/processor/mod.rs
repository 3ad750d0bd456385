//! Transform steps and pipeline construction
//!
//! A pipeline is an ordered list of [`TransformStep`]s built once from
//! configuration through the [`registry::StepRegistry`]:
//!
//! ```text
//! config → builder → PipelineDefinition → PipelineExecutor
//! ```
//!
//! Definitions are never edited after construction; a hot reload builds a
//! new one and swaps the executor that owns it.

pub mod builder;
pub mod core;
pub mod registry;

pub use builder::build_pipeline;
pub use registry::StepRegistry;

use crate::error::StepError;
use crate::pipeline::types::Frame;

/// A single named image operation with a validate/apply/release lifecycle
pub trait TransformStep: Send {
    /// Name the step was configured under, used in errors and reports
    fn name(&self) -> &str;

    /// Check the step's parameters before it joins a pipeline
    fn validate(&self) -> Result<(), StepError> {
        Ok(())
    }

    /// Process `src` into `dst`.
    ///
    /// `dst` is a scratch buffer owned by the executor. Implementations set
    /// its geometry with [`Frame::reshape`] or [`Frame::copy_from`], which
    /// reuse the existing allocation.
    fn apply(&mut self, src: &Frame, dst: &mut Frame) -> Result<(), StepError>;

    /// Free any resources held by the step
    fn release(&mut self) {}
}

/// Ordered, validated chain of transform steps
#[derive(Default)]
pub struct PipelineDefinition {
    steps: Vec<Box<dyn TransformStep>>,
}

impl PipelineDefinition {
    pub fn new(steps: Vec<Box<dyn TransformStep>>) -> Self {
        Self { steps }
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    pub(crate) fn into_steps(self) -> Vec<Box<dyn TransformStep>> {
        self.steps
    }
}

impl std::fmt::Debug for PipelineDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDefinition")
            .field("steps", &self.step_names())
            .finish()
    }
}
