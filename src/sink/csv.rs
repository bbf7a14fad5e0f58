use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use chrono::{DateTime, Local};
use log::{debug, info};

use crate::error::SinkError;

pub const COLUMN_NAMES: [&str; 3] = ["time", "delay", "data_value"];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Receives each completed batch from the connection manager.
pub trait BatchHandler: Send {
    fn flush(&mut self, payloads: &[Vec<u8>], timestamps: &[DateTime<Local>], delays: &[i64]) -> Result<(), SinkError>;
}

/// Appends batches of boolean samples to a CSV file.
#[derive(Debug)]
pub struct SampleSink {
    path: PathBuf,
    // opened for appending
    file: File,
}

fn decode_bool(index: usize, payload: &[u8]) -> Result<bool, SinkError> {
    match payload {
        [byte] => Ok(*byte != 0),
        _ => Err(SinkError::Decode { index, len: payload.len() }),
    }
}

fn format_bool(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

impl SampleSink {
    pub fn new(path: PathBuf, file: File) -> Self {
        SampleSink { path, file }
    }

    #[cfg(test)]
    pub(crate) fn open(path: PathBuf) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        Ok(SampleSink::new(path, file))
    }

    /// Blocking: writes synchronously to the file.
    pub fn write_samples(&self, payloads: &[Vec<u8>], timestamps: &[DateTime<Local>], delays: &[i64]) -> Result<(), SinkError> {
        if payloads.len() != timestamps.len() || payloads.len() != delays.len() {
            return Err(SinkError::LengthMismatch {
                payloads: payloads.len(),
                timestamps: timestamps.len(),
                delays: delays.len(),
            });
        }

        // decode everything first so that a bad payload leaves the file untouched
        let values = payloads.iter()
            .enumerate()
            .map(|(index, payload)| decode_bool(index, payload))
            .collect::<Result<Vec<bool>, SinkError>>()?;

        let is_empty = self.file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(&self.file);

        if is_empty {
            info!("Created file {}", self.path.display());
            writeln!(writer, "{},", COLUMN_NAMES.join(","))?;
        }

        for ((timestamp, delay), value) in timestamps.iter().zip(delays).zip(values) {
            write!(
                writer,
                "{}, {}, {}, \n\n",
                timestamp.format(TIMESTAMP_FORMAT),
                delay,
                format_bool(value),
            )?;
        }

        writer.flush()?;
        debug!("Wrote {} samples to {}", payloads.len(), self.path.display());
        Ok(())
    }
}

impl BatchHandler for SampleSink {
    fn flush(&mut self, payloads: &[Vec<u8>], timestamps: &[DateTime<Local>], delays: &[i64]) -> Result<(), SinkError> {
        self.write_samples(payloads, timestamps, delays)
    }
}
