//! Double-buffered pipeline executor
//!
//! Runs a [`PipelineDefinition`] over a stream of frames using two scratch
//! buffers that are only reallocated when the frame dimensions change.

use log::info;
use std::fmt::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::pipeline::types::{Frame, Geometry};
use crate::processor::{PipelineDefinition, TransformStep};

/// Accumulated timing of one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepStats {
    pub name: String,
    pub calls: u64,
    pub total: Duration,
    pub max: Duration,
}

impl StepStats {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, elapsed: Duration) {
        self.calls += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
    }

    pub fn avg(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        self.total.div_f64(self.calls as f64)
    }
}

struct ExecutorState {
    steps: Vec<Box<dyn TransformStep>>,
    front: Frame,
    back: Frame,
    /// (width, height) the scratch buffers were allocated for
    buffer_dims: Option<(u32, u32)>,
    reallocations: u64,
    stats: Vec<StepStats>,
    released: bool,
}

impl ExecutorState {
    /// Reallocate both scratch buffers when rows or columns change.
    ///
    /// A change in row/column factoring always reallocates, even when the
    /// total byte count stays the same.
    fn ensure_buffers(&mut self, geometry: Geometry) {
        let dims = (geometry.width, geometry.height);
        if self.buffer_dims == Some(dims) {
            return;
        }

        self.front.release();
        self.back.release();
        self.front = Frame::with_geometry(geometry);
        self.back = Frame::with_geometry(geometry);
        self.buffer_dims = Some(dims);
        self.reallocations += 1;
    }
}

/// Applies a pipeline definition to frames.
///
/// One executor is active at a time; it is shared behind
/// [`ActivePipeline`](crate::pipeline::reload::ActivePipeline) and swapped as
/// a whole on reload. The internal mutex is only ever contended by the
/// transform stage itself.
pub struct PipelineExecutor {
    generation: u64,
    state: Mutex<ExecutorState>,
}

impl PipelineExecutor {
    pub fn new(definition: PipelineDefinition) -> Self {
        Self::with_generation(definition, 0)
    }

    /// Executor tagged with the reload generation that produced it
    pub fn with_generation(definition: PipelineDefinition, generation: u64) -> Self {
        let steps = definition.into_steps();
        let stats = steps.iter().map(|s| StepStats::new(s.name())).collect();
        Self {
            generation,
            state: Mutex::new(ExecutorState {
                steps,
                front: Frame::empty(),
                back: Frame::empty(),
                buffer_dims: None,
                reallocations: 0,
                stats,
                released: false,
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn lock(&self) -> MutexGuard<'_, ExecutorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `src` through every step and leave the result in `dst`.
    ///
    /// An empty `src` is a successful no-op and leaves `dst` untouched.
    pub fn run(&self, src: &Frame, dst: &mut Frame) -> Result<(), PipelineError> {
        if src.is_empty() {
            return Ok(());
        }

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.released {
            return Err(PipelineError::Released);
        }

        if state.steps.is_empty() {
            dst.copy_from(src);
            return Ok(());
        }

        state.ensure_buffers(src.geometry());
        state.front.copy_from(src);

        let mut front = &mut state.front;
        let mut back = &mut state.back;
        for (step, stats) in state.steps.iter_mut().zip(state.stats.iter_mut()) {
            if front.is_empty() {
                return Err(PipelineError::EmptyInput {
                    name: step.name().to_string(),
                });
            }

            // failed calls are timed as well
            let started = Instant::now();
            let applied = step.apply(front, back);
            stats.record(started.elapsed());
            applied.map_err(|source| PipelineError::Step {
                name: step.name().to_string(),
                source,
            })?;

            if back.is_empty() {
                return Err(PipelineError::EmptyOutput {
                    name: step.name().to_string(),
                });
            }

            std::mem::swap(&mut front, &mut back);
        }

        dst.copy_from(front);
        Ok(())
    }

    /// Release scratch buffers and every step, then log the timing report.
    ///
    /// Only the first call has any effect.
    pub fn release(&self) {
        let mut state = self.lock();
        if state.released {
            return;
        }
        state.released = true;

        state.front.release();
        state.back.release();
        state.buffer_dims = None;
        for step in &mut state.steps {
            step.release();
        }

        if state.stats.iter().any(|s| s.calls > 0) {
            info!(
                "Pipeline generation {} released\n{}",
                self.generation,
                format_report(&state.stats)
            );
        } else {
            info!("Pipeline generation {} released", self.generation);
        }
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    pub fn stats(&self) -> Vec<StepStats> {
        self.lock().stats.clone()
    }

    /// How many times the scratch buffers were (re)allocated
    pub fn reallocations(&self) -> u64 {
        self.lock().reallocations
    }

    pub fn step_names(&self) -> Vec<String> {
        self.lock().stats.iter().map(|s| s.name.clone()).collect()
    }
}

impl Drop for PipelineExecutor {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("generation", &self.generation)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Per-step performance table: calls, average, max and share of total time
pub fn format_report(stats: &[StepStats]) -> String {
    let grand_total: Duration = stats.iter().map(|s| s.total).sum();
    let mut out = format!(
        "{:<20} {:>8} {:>10} {:>10} {:>7}",
        "step", "calls", "avg(ms)", "max(ms)", "share"
    );
    for s in stats {
        let share = if grand_total.is_zero() {
            0.0
        } else {
            s.total.as_secs_f64() / grand_total.as_secs_f64() * 100.0
        };
        let _ = write!(
            out,
            "\n{:<20} {:>8} {:>10.3} {:>10.3} {:>6.1}%",
            s.name,
            s.calls,
            s.avg().as_secs_f64() * 1000.0,
            s.max.as_secs_f64() * 1000.0,
            share
        );
    }
    out
}
