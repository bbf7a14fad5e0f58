use std::env;
use std::sync::Arc;
use log::{info, warn, LevelFilter};
use tokio::signal;
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::config::cli::Args;
use crate::config::io::{default_output_dir, get_config_path, read_config};
use crate::console::input::Console;
use crate::console::write_loop::run_console_loop;
use crate::device::btle::BtleTransport;
use crate::device::connection::ConnectionManager;
use crate::device::transport::Transport;
use crate::error::AppRunError;
use crate::sink::output::{locked_sink, next_output_path, OutputLock};

pub mod config;
pub mod console;
pub mod device;
pub mod error;
pub mod sink;

pub fn init_logging(level: LevelFilter) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

async fn record(args: Args) -> Result<(), AppRunError> {
    let config_path = get_config_path(args.config.as_deref())?;
    let mut config = read_config(&config_path).await?;
    config.apply_args(&args);

    let output_dir = match &config.output_dir {
        Some(dir) => dir.clone(),
        None => default_output_dir()?,
    };
    let output_path = next_output_path(&output_dir)?;
    let mut output_lock = OutputLock::open(&output_path)?;
    // held until cleanup is done, so no other recorder can append to this file
    let output_guard = output_lock.lock()?;
    let sink = locked_sink(&output_path, &output_guard)?;
    info!("Writing samples to {}", output_path.to_string_lossy());

    let transport: Arc<dyn Transport> = Arc::new(BtleTransport::new(config.scan_duration()).await?);
    let console = Console::stdin();
    let cancel = CancellationToken::new();

    let mut manager = ConnectionManager::new(
        transport,
        console.clone(),
        config.manager_settings(),
        Box::new(sink),
    );

    let interrupt_cancel = cancel.clone();
    spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("User stopped program.");
                interrupt_cancel.cancel();
            },
            Err(err) => warn!("Failed to listen for Ctrl-C: {}", err),
        }
    });

    let console_cancel = cancel.clone();
    let link = manager.link();
    let console_settings = config.console_settings();
    let console_handle = spawn(async move {
        let result = run_console_loop(console_cancel.clone(), console, link, console_settings).await;
        // a console that can no longer be used ends the whole session
        console_cancel.cancel();
        result
    });

    let manager_result = manager.run_manager_loop(cancel.clone()).await;
    cancel.cancel();

    info!("Disconnecting...");
    manager.cleanup().await;
    drop(output_guard);

    let console_result = console_handle.await.expect("Failed to join console write loop");
    manager_result?;
    console_result?;
    Ok(())
}

pub fn run(args: Args) -> Result<(), AppRunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(record(args));
    // a blocked stdin read would otherwise keep the runtime from shutting down
    runtime.shutdown_background();

    match result {
        Err(err) if err.is_console_closed() => {
            info!("Console input closed");
            Ok(())
        },
        result => result,
    }
}
