use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::cli::Args;
use crate::console::write_loop::ConsoleSettings;
use crate::device::connection::ManagerSettings;
use crate::device::constants::{
    make_read_characteristic_uuid, make_write_characteristic_uuid, BATCH_SIZE, CONNECT_DELAY, CONSOLE_IDLE_DELAY,
    POLL_DELAY, SCAN_DURATION, WARM_UP_DELAY,
};

/// Recorder settings. Delays are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub read_characteristic: Uuid,
    pub write_characteristic: Uuid,
    pub batch_size: usize,
    pub output_dir: Option<PathBuf>,
    pub connect_delay: u64,
    pub poll_delay: u64,
    pub warm_up_delay: u64,
    pub scan_duration: u64,
    pub console_idle_delay: u64,
}

impl Config {
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(uuid) = args.read_characteristic {
            self.read_characteristic = uuid;
        }
        if let Some(uuid) = args.write_characteristic {
            self.write_characteristic = uuid;
        }
        if let Some(size) = args.batch_size {
            self.batch_size = size;
        }
        if let Some(dir) = &args.output_dir {
            self.output_dir = Some(dir.clone());
        }
        if let Some(delay) = args.connect_delay {
            self.connect_delay = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            read_characteristic: self.read_characteristic,
            batch_size: self.batch_size.max(1),
            connect_delay: Duration::from_millis(self.connect_delay),
            poll_delay: Duration::from_millis(self.poll_delay),
            warm_up_delay: Duration::from_millis(self.warm_up_delay),
        }
    }

    pub fn console_settings(&self) -> ConsoleSettings {
        ConsoleSettings {
            write_characteristic: self.write_characteristic,
            idle_delay: Duration::from_millis(self.console_idle_delay),
        }
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            read_characteristic: make_read_characteristic_uuid(),
            write_characteristic: make_write_characteristic_uuid(),
            batch_size: BATCH_SIZE,
            output_dir: None,
            connect_delay: CONNECT_DELAY,
            poll_delay: POLL_DELAY,
            warm_up_delay: WARM_UP_DELAY,
            scan_duration: SCAN_DURATION,
            console_idle_delay: CONSOLE_IDLE_DELAY,
        }
    }
}
