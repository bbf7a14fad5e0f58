use clap::Parser;
use log::{error, info};
use ble_recorder::{init_logging, run};
use ble_recorder::config::cli::Args;
use ble_recorder::error::AppRunError;

fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(args.log_level());
    info!(concat!("ble-recorder ", env!("CARGO_PKG_VERSION")));

    match run(args) {
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(())
    }
}
