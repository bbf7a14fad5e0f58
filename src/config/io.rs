use std::env::current_exe;
use std::path::{Path, PathBuf};
use std::str;
use directories_next::ProjectDirs;
use log::{info, warn};
use serde_json;

use crate::config::types::Config;
use crate::error::ConfigError;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "ble-recorder", "ble-recorder")
}

// creates a path to a json file with the same name as the executable, in the same directory
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to ble-recorder.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| {
        dirs.config_dir().join("ble-recorder.json")
    })
}

pub fn get_config_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = get_portable_config_path() {
        if path.is_file() {
            return Ok(path);
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

pub fn default_output_dir() -> Result<PathBuf, ConfigError> {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("data"))
        .ok_or(ConfigError::NoOutputDir)
}

async fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let content = tokio::fs::read(path).await?;

    if content.is_empty() {
        return Ok(Config::default());
    }

    let content = str::from_utf8(&content)?;

    Ok(serde_json::from_str(content)?)
}

/// Read the config file at `path`. A missing file means defaults.
pub async fn read_config(path: &Path) -> Result<Config, ConfigError> {
    match read_config_file(path).await {
        Ok(config) => {
            info!("Using config file {}", path.to_string_lossy());
            Ok(config)
        },
        Err(err) if err.is_file_not_found_error() => {
            info!("Config file {} not found, using defaults", path.to_string_lossy());
            Ok(Config::default())
        },
        Err(err) => Err(err),
    }
}
