//! Pipeline stage trait
//!
//! Defines the interface shared by the capture, transform and present
//! stages of the frame router.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for router stages that move frames between queues
#[async_trait]
pub trait PipelineStage: Send {
    /// Run the stage until its input ends or the router is cancelled
    async fn run(&mut self) -> Result<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;

    /// Release anything the stage still holds once `run` has returned
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
