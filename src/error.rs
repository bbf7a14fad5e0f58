use std::io;
use std::path::PathBuf;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to determine default output directory")]
    NoOutputDir,

    #[error("Failed to decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Device {address} was not found during discovery")]
    UnknownDevice { address: String },

    #[error("No device is connected")]
    NotConnected,

    #[error("Writing to the characteristic took too long")]
    WriteTimeout,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Selection is not a number")]
    NotANumber,

    #[error("Selection {value} is not in the range [0, {count})")]
    OutOfRange { value: i64, count: usize },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sample lists differ in length (payloads: {payloads}, timestamps: {timestamps}, delays: {delays})")]
    LengthMismatch { payloads: usize, timestamps: usize, delays: usize },

    #[error("Payload {index} is {len} bytes, expected a single boolean byte")]
    Decode { index: usize, len: usize },

    #[error("Failed to write samples: {source}")]
    IO { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Console input was closed")]
    Closed,

    #[error("{input:?} can not be sent as a single byte")]
    InvalidValue { input: String },

    #[error("Failed to read console input: {source}")]
    IO { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Device discovery failed: {source}")]
    Discovery { #[from] source: TransportError },

    #[error("Failed to persist samples: {source}")]
    Sink { #[from] source: SinkError },

    #[error("Device selection failed: {source}")]
    Console { #[from] source: ConsoleError },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (io): {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to start application (bluetooth): {source}")]
    Transport { #[from] source: TransportError },

    #[error("Output file {} is in use by another instance: {source}", path.display())]
    OutputLocked { path: PathBuf, source: io::Error },

    #[error("Connection manager stopped: {source}")]
    Manager { #[from] source: ManagerError },

    #[error("Console write loop stopped: {source}")]
    Console { #[from] source: ConsoleError },
}

impl AppRunError {
    // stdin reaching EOF is how a piped session ends, not a failure
    pub fn is_console_closed(&self) -> bool {
        matches!(
            self,
            AppRunError::Console { source: ConsoleError::Closed }
                | AppRunError::Manager { source: ManagerError::Console { source: ConsoleError::Closed } }
        )
    }
}
