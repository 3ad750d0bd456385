//! Application wiring: configuration, pipeline, outputs and shutdown

use anyhow::{Context, Result};
use futures_util::future::join_all;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assets::HEALTH_LOG_INTERVAL;
use crate::capture::open_source;
use crate::config::{AppConfig, app_name, version};
use crate::display::{DisplaySink, HeadlessDisplay, TerminalDisplay};
use crate::pipeline::health::{HealthSummary, spawn_health_logger};
use crate::pipeline::{
    ActivePipeline, ConfigWatcher, FrameRouter, PipelineExecutor, ReloadController, ReloadSettings,
};
use crate::processor::registry;
use crate::processor::{StepRegistry, build_pipeline};
use crate::workers::http::spawn_stream_server;
use crate::workers::{BroadcastServer, RecordingSink};

/// Command line overrides applied on top of the configuration file
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_path: PathBuf,
    pub headless: bool,
    pub record: bool,
    pub stream: bool,
}

/// Populate the process-wide step registry. Later calls are no-ops.
pub fn init_registry() {
    if registry::install(StepRegistry::with_builtin_steps()).is_err() {
        warn!("Step registry already installed");
    }
}

/// Run until the stream ends, a quit key is pressed or `cancel` fires.
///
/// Returns the final health counters.
pub async fn run(options: RunOptions, cancel: CancellationToken) -> Result<HealthSummary> {
    let mut config = AppConfig::load_async(&options.config_path)
        .await
        .with_context(|| format!("Failed to load {}", options.config_path.display()))?;
    config.app.record |= options.record;
    config.stream.enabled |= options.stream;

    info!("{} {} starting", app_name(), version());

    let registry = registry::global();
    let definition =
        build_pipeline(&config.pipeline, registry).context("Invalid pipeline configuration")?;
    info!("Pipeline: {:?}", definition.step_names());
    let active = ActivePipeline::new(PipelineExecutor::new(definition));

    let source = open_source(&config.camera)?;
    let source_fps = source.fps();
    let display: Box<dyn DisplaySink> = if options.headless {
        Box::new(HeadlessDisplay::new())
    } else {
        Box::new(TerminalDisplay::new(&config.app.window_name))
    };

    // background tasks stop with the router or with the process
    let background = cancel.child_token();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let settings = ReloadSettings::from(&config.reload);
    let (changes, watcher) =
        ConfigWatcher::new(&options.config_path, settings.poll).spawn(background.clone());
    let controller =
        ReloadController::new(&options.config_path, registry, active.clone(), settings);
    tasks.push(watcher);
    tasks.push(tokio::spawn(controller.run(changes, background.clone())));

    let mut router = FrameRouter::new(source, display, active.clone(), cancel.clone());

    if config.stream.enabled {
        let server = Arc::new(BroadcastServer::with_interval(config.stream.interval()));
        let (_addr, handle) =
            spawn_stream_server(Arc::clone(&server), &config.stream, background.clone()).await?;
        tasks.push(handle);
        router = router.with_broadcast(server, config.stream.quality);
    }

    if config.app.record {
        let mut recorder = RecordingSink::new(&config.app.output);
        recorder.set_rate(source_fps);
        router = router.with_recorder(recorder);
    }

    let health = router.health();
    tasks.push(spawn_health_logger(
        Arc::clone(&health),
        background.clone(),
        HEALTH_LOG_INTERVAL,
    ));

    let result = router.run().await;

    background.cancel();
    for joined in join_all(tasks).await {
        if let Err(e) = joined {
            error!("Background task failed: {e}");
        }
    }
    active.shutdown().await;

    let summary = health.summary();
    info!("Shutdown complete. {summary}");
    let exit = result?;
    info!("Router stopped: {exit:?}");
    Ok(summary)
}
