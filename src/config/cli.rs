use std::path::PathBuf;
use std::time::Duration;
use clap::Parser;
use log::LevelFilter;
use uuid::Uuid;

fn parse_batch_size(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("batch size must be at least 1".to_string()),
        Ok(size) => Ok(size),
        Err(err) => Err(err.to_string()),
    }
}

/// Record notifications from a BLE peripheral to CSV, and write operator values back to it.
#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct Args {
    /// Config file to use instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory that receives the numbered data_dump<N>.csv files
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Number of samples per batch written to the output file
    #[arg(long, value_parser = parse_batch_size)]
    pub batch_size: Option<usize>,

    /// Characteristic that notifies samples
    #[arg(long)]
    pub read_characteristic: Option<Uuid>,

    /// Characteristic that operator values are written to
    #[arg(long)]
    pub write_characteristic: Option<Uuid>,

    /// Delay between connection attempts, e.g. "5s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub connect_delay: Option<Duration>,

    /// Log debug messages
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        if self.verbose { LevelFilter::Debug } else { LevelFilter::Info }
    }
}
