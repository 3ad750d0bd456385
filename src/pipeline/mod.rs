//! Frame pipeline runtime
//!
//! This module ties the transform chain to the running stream:
//! - `executor`: runs a frame through the steps with reusable scratch buffers
//! - `router`: capture, transform and present stages over bounded queues
//! - `reload`: swaps the active executor while frames keep flowing
//! - `health`: counters shared by every stage
//!
//! # Architecture
//!
//! Stages implement [`PipelineStage`] and each runs in its own task. The
//! transform stage holds a read lock on [`ActivePipeline`] for exactly one
//! frame; the reload controller takes the write lock only to swap the
//! reference and releases the previous executor after a grace period.

pub mod executor;
pub mod frame_pool;
pub mod health;
pub mod reload;
pub mod router;
pub mod stage;
pub mod state;
pub mod types;

pub use executor::PipelineExecutor;
pub use frame_pool::FramePool;
pub use health::{HealthSummary, RouterHealth};
pub use reload::{ActivePipeline, ConfigWatcher, ReloadController, ReloadSettings};
pub use router::{FrameRouter, PresentExit};
pub use stage::PipelineStage;
pub use state::ReloadState;
pub use types::{Frame, Geometry};
