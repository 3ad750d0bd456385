use crate::app::RunOptions;
use crate::config::{app_name, version};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::{panic, process};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub mod app;
pub mod assets;
pub mod capture;
pub mod config;
pub mod display;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod workers;

/// Cancel `cancel` on SIGINT, SIGTERM or SIGHUP
fn install_signal_handler(cancel: CancellationToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        log::info!("Termination signal received, shutting down");
        cancel.cancel();
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .help("Path of the JSON configuration file, watched for pipeline changes.")
                .default_value("config.json"),
        )
        .arg(
            Arg::new("headless")
                .long("headless")
                .help("Do not read keys from the terminal.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("record")
                .short('r')
                .long("record")
                .help("Record presented frames, overriding app.record.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stream")
                .short('s')
                .long("stream")
                .help("Serve the MJPEG stream, overriding stream.enabled.")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let options = RunOptions {
        config_path: matches
            .get_one::<String>("config")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.json")),
        headless: matches.get_flag("headless"),
        record: matches.get_flag("record"),
        stream: matches.get_flag("stream"),
    };

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        process::exit(105);
    }));

    // gracefully close the app on SIGINT, SIGTERM or SIGHUP
    let cancel = CancellationToken::new();
    if let Err(e) = install_signal_handler(cancel.clone()) {
        log::error!("Error setting signal handler: {e}");
        process::exit(1);
    }

    app::init_registry();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start the async runtime: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(app::run(options, cancel)) {
        log::error!("{e:#}");
        process::exit(1);
    }
}
